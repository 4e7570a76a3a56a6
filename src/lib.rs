//! # Gemini Relay
//!
//! An HTTP relay that fronts the Gemini generative-language API with
//! shared-secret auth, per-client rate limiting, and uniform JSON errors.
//!
//! ## Quick Start
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     gemini_relay::relay::run().await
//! }
//! ```
//!
//! ## Configuration
//!
//! The relay is configured via environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GEMINI_API_KEY` | unset | Provider credential (`GOOGLE_API_KEY` also read) |
//! | `GEMINI_MODEL` | `gemini-1.5-flash` | Model used when a request names none |
//! | `RELAY_SHARED_SECRET` | unset | Secret expected in `x-api-key`; unset means open mode |
//! | `PORT` / `LISTEN_ADDR` | `0.0.0.0:3001` | HTTP listen address |
//! | `NODE_ENV` / `RELAY_ENV` | `development` | `production` redacts server error messages |
//! | `RATE_LIMIT_WINDOW_SECS` | `900` | Rate-limit window |
//! | `RATE_LIMIT_RULES` | `POST /gemini=20,GET /gemini=20,GET /health=300` | Per-route quotas |
//!
//! See [`config`] for the full list.
//!
//! ## Endpoints
//!
//! - `POST /gemini`, `POST /api/gemini` - Generate from a JSON request envelope
//! - `GET /gemini`, `GET /api/gemini` - Generate from `prompt` / `model` query parameters
//! - `GET /health` - Liveness and advisory counters

pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod provider;
pub mod relay;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::RelayError;
pub use format::Format;
