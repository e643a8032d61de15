mod health;
mod webhook;

pub use health::health_routes;
pub use webhook::{webhook_routes, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};

use crate::webhook::WebhookIngress;
use sbdk_core::BuildCoordinator;
use std::sync::Arc;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<WebhookIngress>,
    pub coordinator: BuildCoordinator,
}

impl AppState {
    pub fn new(ingress: WebhookIngress, coordinator: BuildCoordinator) -> Self {
        Self {
            ingress: Arc::new(ingress),
            coordinator,
        }
    }
}
