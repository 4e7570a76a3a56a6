//! Relay configuration loaded from environment variables.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use axum::http::Method;
use eyre::{WrapErr, bail, eyre};
use tracing::warn;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Deployment environment, read from `RELAY_ENV` or `NODE_ENV`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    /// Anything that is not recognisably production or test is treated as development.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        })
    }
}

/// Generative-language provider settings.
///
/// # Environment Variables
///
/// - `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) - provider credential (default: unset)
/// - `GEMINI_MODEL` - model used when a request names none (default: `gemini-1.5-flash`)
/// - `GEMINI_BASE_URL` - API base URL (default: `https://generativelanguage.googleapis.com`)
/// - `PROVIDER_TIMEOUT_MS` - outbound call timeout (default: `60000`)
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub default_model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout: Duration::from_millis(60_000),
        }
    }
}

/// Shared-secret authentication settings.
///
/// # Environment Variables
///
/// - `RELAY_SHARED_SECRET` - secret clients must present (default: unset, open mode)
/// - `RELAY_AUTH_HEADER` - header carrying the secret (default: `x-api-key`)
/// - `RELAY_ALLOW_OPEN` - permit open mode in production (default: `false`)
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub shared_secret: Option<String>,
    pub header: String,
    pub allow_open: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            header: "x-api-key".into(),
            allow_open: false,
        }
    }
}

/// A single quota entry: `METHOD path=limit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaRule {
    pub method: Method,
    pub path: String,
    pub limit: u32,
}

impl FromStr for QuotaRule {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (route, limit) = s
            .split_once('=')
            .ok_or_else(|| eyre!("quota rule `{s}` is missing `=limit`"))?;
        let (method, path) = route
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| eyre!("quota rule `{s}` must look like `METHOD /path=limit`"))?;
        let method = Method::from_str(&method.to_ascii_uppercase())
            .wrap_err_with(|| format!("invalid method in quota rule `{s}`"))?;
        let path = path.trim();
        if !path.starts_with('/') {
            bail!("quota rule path `{path}` must start with `/`");
        }
        let limit = limit
            .trim()
            .parse()
            .wrap_err_with(|| format!("invalid limit in quota rule `{s}`"))?;

        Ok(Self {
            method,
            path: path.to_string(),
            limit,
        })
    }
}

/// Route-to-quota mapping used by the rate limiter.
///
/// Routes are matched on method and canonical path; anything unmatched gets
/// `default_limit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaTable {
    pub default_limit: u32,
    pub rules: Vec<QuotaRule>,
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            default_limit: 100,
            rules: vec![
                QuotaRule {
                    method: Method::POST,
                    path: "/gemini".into(),
                    limit: 20,
                },
                QuotaRule {
                    method: Method::GET,
                    path: "/gemini".into(),
                    limit: 20,
                },
                QuotaRule {
                    method: Method::GET,
                    path: "/health".into(),
                    limit: 300,
                },
            ],
        }
    }
}

impl QuotaTable {
    /// Returns the quota for the given method and canonical path.
    pub fn limit_for(&self, method: &Method, path: &str) -> u32 {
        self.rules
            .iter()
            .find(|rule| rule.method == *method && rule.path == path)
            .map_or(self.default_limit, |rule| rule.limit)
    }

    /// Overrides (or appends) rules from a comma separated list such as
    /// `POST /gemini=10,GET /health=500`.
    pub fn apply_overrides(&mut self, rules: &str) -> eyre::Result<()> {
        for part in rules.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let rule: QuotaRule = part.parse()?;
            match self
                .rules
                .iter_mut()
                .find(|r| r.method == rule.method && r.path == rule.path)
            {
                Some(existing) => existing.limit = rule.limit,
                None => self.rules.push(rule),
            }
        }
        Ok(())
    }
}

/// Rate limiting settings.
///
/// # Environment Variables
///
/// - `RATE_LIMIT_WINDOW_SECS` - fixed window length (default: `900`)
/// - `RATE_LIMIT_DEFAULT` - quota for routes without a rule (default: `100`)
/// - `RATE_LIMIT_RULES` - per-route overrides, `METHOD /path=limit,...`
/// - `UPSTREAM_MAX_QPS` - process-wide ceiling on provider calls (default: unset)
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub quotas: QuotaTable,
    pub upstream_max_qps: Option<NonZeroU32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            quotas: QuotaTable::default(),
            upstream_max_qps: None,
        }
    }
}

/// Server configuration.
///
/// Load from environment with [`Config::from_env`], or use [`Config::default`]
/// for development defaults.
///
/// # Environment Variables
///
/// - `PORT` - port to listen on, all interfaces (default: `3001`)
/// - `LISTEN_ADDR` - full bind address, takes precedence over `PORT`
/// - `REQUEST_TIMEOUT_MS` - HTTP request timeout in milliseconds (default: `90000`)
/// - `RELAY_ENV` / `NODE_ENV` - environment name (default: `development`)
/// - `VERCEL` - set when deployed behind the platform proxy; client addresses
///   are then read from `X-Forwarded-For`
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub request_timeout_ms: u64,
    pub environment: Environment,
    pub behind_proxy: bool,
    pub provider: ProviderConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            request_timeout_ms: 90_000,
            environment: Environment::default(),
            behind_proxy: false,
            provider: ProviderConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(false)
        };

        let listen_addr = match var("LISTEN_ADDR") {
            Some(addr) => addr
                .parse()
                .wrap_err_with(|| format!("invalid LISTEN_ADDR `{addr}`"))?,
            None => {
                let port = match var("PORT") {
                    Some(port) => port
                        .parse()
                        .wrap_err_with(|| format!("invalid PORT `{port}`"))?,
                    None => DEFAULT_PORT,
                };
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let environment = var("RELAY_ENV")
            .or_else(|| var("NODE_ENV"))
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        let provider = ProviderConfig {
            api_key: var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY")),
            default_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            base_url: var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            timeout: Duration::from_millis(
                parse_or_warn("PROVIDER_TIMEOUT_MS", var("PROVIDER_TIMEOUT_MS")).unwrap_or(60_000),
            ),
        };

        let auth = AuthConfig {
            shared_secret: var("RELAY_SHARED_SECRET"),
            header: var("RELAY_AUTH_HEADER").unwrap_or_else(|| "x-api-key".into()),
            allow_open: flag("RELAY_ALLOW_OPEN"),
        };

        let mut quotas = QuotaTable::default();
        if let Some(default_limit) = parse_or_warn("RATE_LIMIT_DEFAULT", var("RATE_LIMIT_DEFAULT"))
        {
            quotas.default_limit = default_limit;
        }
        if let Some(rules) = var("RATE_LIMIT_RULES") {
            quotas
                .apply_overrides(&rules)
                .wrap_err("invalid RATE_LIMIT_RULES")?;
        }

        let rate_limit = RateLimitConfig {
            window: Duration::from_secs(
                parse_or_warn("RATE_LIMIT_WINDOW_SECS", var("RATE_LIMIT_WINDOW_SECS"))
                    .unwrap_or(15 * 60),
            ),
            quotas,
            upstream_max_qps: parse_or_warn("UPSTREAM_MAX_QPS", var("UPSTREAM_MAX_QPS")),
        };

        Ok(Self {
            listen_addr,
            request_timeout_ms: parse_or_warn("REQUEST_TIMEOUT_MS", var("REQUEST_TIMEOUT_MS"))
                .unwrap_or(90_000),
            environment,
            behind_proxy: flag("VERCEL"),
            provider,
            auth,
            rate_limit,
        })
    }

    /// Rejects configurations that must not be served.
    ///
    /// Running without a shared secret in production requires an explicit
    /// `RELAY_ALLOW_OPEN=true`.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.environment.is_production()
            && self.auth.shared_secret.is_none()
            && !self.auth.allow_open
        {
            bail!(
                "refusing to start in production without RELAY_SHARED_SECRET; \
                 set RELAY_ALLOW_OPEN=true to run unauthenticated"
            );
        }
        if self.rate_limit.window.is_zero() {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        Ok(())
    }
}

/// Parses an optional numeric setting. Unparsable values are logged and
/// treated as unset so the default applies.
fn parse_or_warn<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting, using the default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> eyre::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_config_default_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:3001");
    }

    #[test]
    fn test_empty_env_matches_defaults() {
        let config = config_from(&[]).unwrap();
        let default = Config::default();
        assert_eq!(config.listen_addr, default.listen_addr);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.provider.default_model, "gemini-1.5-flash");
        assert!(config.provider.api_key.is_none());
        assert!(config.auth.shared_secret.is_none());
        assert_eq!(config.rate_limit.window, Duration::from_secs(900));
        assert_eq!(config.rate_limit.quotas, QuotaTable::default());
        assert!(!config.behind_proxy);
    }

    #[test]
    fn test_port_and_listen_addr() {
        let config = config_from(&[("PORT", "8080")]).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.listen_addr.ip().is_unspecified());

        let config = config_from(&[("PORT", "8080"), ("LISTEN_ADDR", "127.0.0.1:9000")]).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9000");

        assert!(config_from(&[("PORT", "not-a-port")]).is_err());
    }

    #[test]
    fn test_provider_settings() {
        let config = config_from(&[
            ("GOOGLE_API_KEY", "fallback"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
            ("PROVIDER_TIMEOUT_MS", "1500"),
        ])
        .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("fallback"));
        assert_eq!(config.provider.default_model, "gemini-1.5-pro");
        assert_eq!(config.provider.timeout, Duration::from_millis(1500));

        let config = config_from(&[("GEMINI_API_KEY", "primary"), ("GOOGLE_API_KEY", "fallback")])
            .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config_from(&[("RELAY_SHARED_SECRET", "  "), ("GEMINI_API_KEY", "")]).unwrap();
        assert!(config.auth.shared_secret.is_none());
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            config_from(&[("NODE_ENV", "production")]).unwrap().environment,
            Environment::Production
        );
        assert_eq!(
            config_from(&[("NODE_ENV", "production"), ("RELAY_ENV", "test")])
                .unwrap()
                .environment,
            Environment::Test
        );
        assert_eq!(
            config_from(&[("NODE_ENV", "staging")]).unwrap().environment,
            Environment::Development
        );
    }

    #[test]
    fn test_platform_flag() {
        assert!(config_from(&[("VERCEL", "1")]).unwrap().behind_proxy);
        assert!(!config_from(&[("VERCEL", "0")]).unwrap().behind_proxy);
    }

    #[test]
    fn test_quota_rule_parsing() {
        let rule: QuotaRule = "post /gemini = 5".parse().unwrap();
        assert_eq!(rule.method, Method::POST);
        assert_eq!(rule.path, "/gemini");
        assert_eq!(rule.limit, 5);

        assert!("POST /gemini".parse::<QuotaRule>().is_err());
        assert!("/gemini=5".parse::<QuotaRule>().is_err());
        assert!("POST gemini=5".parse::<QuotaRule>().is_err());
        assert!("POST /gemini=lots".parse::<QuotaRule>().is_err());
    }

    #[test]
    fn test_quota_table_lookup() {
        let table = QuotaTable::default();
        assert_eq!(table.limit_for(&Method::POST, "/gemini"), 20);
        assert_eq!(table.limit_for(&Method::GET, "/health"), 300);
        assert_eq!(table.limit_for(&Method::DELETE, "/gemini"), 100);
        assert_eq!(table.limit_for(&Method::GET, "/elsewhere"), 100);
    }

    #[test]
    fn test_rate_limit_overrides() {
        let config = config_from(&[
            ("RATE_LIMIT_DEFAULT", "7"),
            ("RATE_LIMIT_RULES", "POST /gemini=3, GET /stats=50"),
            ("RATE_LIMIT_WINDOW_SECS", "60"),
            ("UPSTREAM_MAX_QPS", "4"),
        ])
        .unwrap();
        let quotas = &config.rate_limit.quotas;
        assert_eq!(quotas.limit_for(&Method::POST, "/gemini"), 3);
        assert_eq!(quotas.limit_for(&Method::GET, "/stats"), 50);
        assert_eq!(quotas.limit_for(&Method::PUT, "/other"), 7);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.upstream_max_qps.map(NonZeroU32::get), Some(4));

        assert!(config_from(&[("RATE_LIMIT_RULES", "nonsense")]).is_err());
    }

    #[test]
    fn test_unparsable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("PROVIDER_TIMEOUT_MS", "soon"),
            ("RATE_LIMIT_WINDOW_SECS", "15m"),
            ("RATE_LIMIT_DEFAULT", "-3"),
            ("UPSTREAM_MAX_QPS", "0"),
            ("REQUEST_TIMEOUT_MS", "1.5"),
        ])
        .unwrap();
        assert_eq!(config.provider.timeout, Duration::from_millis(60_000));
        assert_eq!(config.rate_limit.window, Duration::from_secs(900));
        assert_eq!(config.rate_limit.quotas.default_limit, 100);
        assert!(config.rate_limit.upstream_max_qps.is_none());
        assert_eq!(config.request_timeout_ms, 90_000);
    }

    #[test]
    fn test_parse_or_warn() {
        assert_eq!(parse_or_warn::<u64>("K", Some(" 42 ".into())), Some(42));
        assert_eq!(parse_or_warn::<u64>("K", Some("forty".into())), None);
        assert_eq!(parse_or_warn::<u64>("K", None), None);
    }

    #[test]
    fn test_production_requires_secret_or_explicit_open_mode() {
        let config = config_from(&[("NODE_ENV", "production")]).unwrap();
        assert!(config.validate().is_err());

        let config =
            config_from(&[("NODE_ENV", "production"), ("RELAY_SHARED_SECRET", "s3cret")]).unwrap();
        assert!(config.validate().is_ok());

        let config =
            config_from(&[("NODE_ENV", "production"), ("RELAY_ALLOW_OPEN", "true")]).unwrap();
        assert!(config.validate().is_ok());

        // Open mode is fine outside production.
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = config_from(&[("RATE_LIMIT_WINDOW_SECS", "0")]).unwrap();
        assert!(config.validate().is_err());
    }
}
