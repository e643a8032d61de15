use crate::routes::{health_routes, webhook_routes, AppState};
use crate::{IngressError, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tracing::info;

/// Largest delivery GitHub sends.
const MAX_BODY_SIZE_25MB: usize = 25 * 1024 * 1024;

/// All routes, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(webhook_routes())
        .merge(health_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE_25MB))
}

/// Resolve `host` and `port` to the address to bind.
///
/// IP literals (bracketed or not) are used as-is; anything else is looked
/// up and the first address wins.
pub async fn listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| IngressError::InvalidAddress(format!("{host}:{port}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| IngressError::InvalidAddress(format!("{host}:{port}: no addresses")))
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Webhook listener on http://{}", listener.local_addr()?);
    info!("  POST /webhook/github");
    info!("  GET  /health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
