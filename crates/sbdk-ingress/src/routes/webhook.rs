//! Webhook delivery endpoint.

use super::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use sbdk_core::{webhook_ack, IngressDisposition};
use serde_json::Value;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/github", post(receive_github))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Verify, classify and acknowledge. Accepted deliveries are handed to the
/// coordinator without waiting for the build.
async fn receive_github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let disposition = state.ingress.receive_delivery(
        &body,
        header(&headers, SIGNATURE_HEADER),
        header(&headers, EVENT_HEADER),
        header(&headers, DELIVERY_HEADER),
    );

    if let IngressDisposition::Accepted(trigger) = &disposition {
        state.coordinator.submit(trigger.clone());
    }

    let ack = webhook_ack(&disposition);
    let status = StatusCode::from_u16(ack.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ack.body))
}
