//! SBDK Ingress - webhook-triggered rebuilds
//!
//! - HMAC-SHA256 signature verification (`X-Hub-Signature-256`)
//! - classification of push and pull request events into triggers
//! - axum routes: `POST /webhook/github`, `GET /health`

pub mod routes;
pub mod server;
pub mod signature;
pub mod webhook;

mod error;

pub use error::{IngressError, Result};
pub use routes::AppState;
pub use server::{listen_addr, router, serve};
pub use webhook::WebhookIngress;
