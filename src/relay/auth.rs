//! Optional shared-secret authentication.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    middleware::Next,
    response::Response,
};
use eyre::WrapErr;
use subtle::ConstantTimeEq;

use crate::{config::AuthConfig, error::RelayError, relay::state::AppState};

/// Checks a client-supplied secret against the configured one.
///
/// With no secret configured every request passes (open mode).
#[derive(Clone, Debug)]
pub struct SharedSecretAuth {
    secret: Option<Arc<str>>,
    header: HeaderName,
}

impl SharedSecretAuth {
    pub fn from_config(config: &AuthConfig) -> eyre::Result<Self> {
        let header = HeaderName::try_from(config.header.to_ascii_lowercase())
            .wrap_err_with(|| format!("invalid RELAY_AUTH_HEADER `{}`", config.header))?;
        Ok(Self {
            secret: config.shared_secret.as_deref().map(Arc::from),
            header,
        })
    }

    pub fn is_open(&self) -> bool {
        self.secret.is_none()
    }

    /// Accepts the secret in the configured header or as an
    /// `Authorization: Bearer` token.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let Some(expected) = self.secret.as_deref() else {
            return Ok(());
        };

        let presented = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });

        match presented {
            Some(candidate) if candidate.as_bytes().ct_eq(expected.as_bytes()).into() => Ok(()),
            _ => Err(RelayError::Unauthorized),
        }
    }
}

/// Auth middleware: rejects with 401 when a secret is configured and the
/// request does not carry it.
pub async fn authorize(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    state.auth.verify(req.headers())?;
    Ok(next.run(req).await)
}
