//! Relay server initialization and lifecycle management.

use crate::{
    client::GeminiClient,
    config,
    provider::GenerativeModel,
    relay::{limiter::FixedWindowLimiter, routes::create_router, state::AppState},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub mod adapter;
pub mod auth;
pub mod error_handler;
pub mod limiter;
pub mod metrics;
pub mod routes;
pub mod state;

/// Starts the relay server.
///
/// This function:
/// 1. Initializes tracing with environment-based log filtering
/// 2. Loads and validates configuration from environment variables
/// 3. Builds the Gemini client when a credential is configured
/// 4. Spawns the rate-limit bucket sweeper
/// 5. Builds the router and adds request tracing
/// 6. Binds to the configured address and serves until Ctrl-C or SIGTERM
///
/// # Errors
///
/// Returns an error if:
/// - The configuration is invalid or unsafe for the environment
/// - The provider client cannot be built
/// - The TCP listener cannot bind to the configured address
/// - The server encounters a fatal error while running
pub async fn run() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gemini_relay=info".parse()?),
        )
        .init();

    let config = config::Config::from_env()?;
    config.validate()?;

    let model = GeminiClient::from_config(&config.provider)?
        .map(|client| Arc::new(client) as Arc<dyn GenerativeModel>);
    match &model {
        Some(_) => info!(
            "Gemini client ready (default_model={}, timeout={:?})",
            config.provider.default_model, config.provider.timeout
        ),
        None => warn!("GEMINI_API_KEY is not set; prompt requests will fail"),
    }
    if config.auth.shared_secret.is_none() {
        warn!("RELAY_SHARED_SECRET is not set; relay is running without authentication");
    }

    let state = AppState::new(config.clone(), model)?;
    spawn_bucket_sweeper(Arc::clone(&state.limiter));
    info!(
        "Rate limiting: window={:?}, default quota={}, {} route rules",
        config.rate_limit.window,
        config.rate_limit.quotas.default_limit,
        config.rate_limit.quotas.rules.len()
    );

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(
        "Listening on {} (environment={})",
        config.listen_addr,
        config.environment.as_str()
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Relay stopped");
    Ok(())
}

/// Periodically evicts buckets whose window has rolled over.
pub fn spawn_bucket_sweeper(limiter: Arc<FixedWindowLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = limiter.purge_expired(std::time::Instant::now());
            if evicted > 0 {
                debug!(evicted, remaining = limiter.len(), "evicted expired rate-limit buckets");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
