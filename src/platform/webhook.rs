use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::platform::InboundNotification;

pub fn router(bridge: Arc<Bridge>) -> Router {
    // Media notifications can embed base64 payloads well past axum's 2 MiB default.
    Router::new()
        .route("/webhook", post(receive))
        .layer(DefaultBodyLimit::disable())
        .with_state(bridge)
}

/// The gateway only needs to know the notification arrived, so every
/// request is answered with `{"status":"ok"}` whatever happens downstream.
async fn receive(State(bridge): State<Arc<Bridge>>, body: Bytes) -> Json<Value> {
    let ok = Json(json!({ "status": "ok" }));

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Discarding webhook with invalid JSON body: {}", e);
            return ok;
        }
    };
    debug!("Webhook received: {}", payload);

    let notification = match InboundNotification::from_payload(&payload) {
        Ok(notification) => notification,
        Err(e) => {
            warn!("Discarding webhook: {:#}", e);
            return ok;
        }
    };

    let disposition = bridge.handle(&notification).await;
    debug!("Notification from {} handled: {:?}", notification.chat_id, disposition);

    ok
}

/// Serve the webhook endpoint until Ctrl-C.
pub async fn run(bridge: Arc<Bridge>, addr: std::net::SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening for webhooks on http://{addr}/webhook");

    axum::serve(listener, router(bridge))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => {
            // Without a handler the server runs until the process is killed.
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
