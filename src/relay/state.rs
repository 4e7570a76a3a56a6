use std::sync::Arc;

use crate::{
    Config, Format,
    provider::GenerativeModel,
    relay::{
        adapter::Adapter, auth::SharedSecretAuth, limiter::FixedWindowLimiter,
        metrics::RelayMetrics,
    },
};

/// Shared application state available to all request handlers.
///
/// Owns the process-wide mutable state (rate-limit buckets and counters);
/// it is created once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub format: Format,
    pub adapter: Adapter,
    pub auth: Arc<SharedSecretAuth>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(config: Config, model: Option<Arc<dyn GenerativeModel>>) -> eyre::Result<Self> {
        let metrics = Arc::new(RelayMetrics::new());

        let mut adapter = Adapter::new(
            model,
            &config.provider.default_model,
            Arc::clone(&metrics),
        );
        if let Some(max_qps) = config.rate_limit.upstream_max_qps {
            adapter = adapter.with_upstream_limit(max_qps);
        }

        let auth = SharedSecretAuth::from_config(&config.auth)?;
        let limiter = FixedWindowLimiter::new(
            config.rate_limit.window,
            config.rate_limit.quotas.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            format: Format::default(),
            adapter,
            auth: Arc::new(auth),
            limiter: Arc::new(limiter),
            metrics,
        })
    }
}
