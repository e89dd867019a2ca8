mod bridge;
mod config;
mod gateway;
mod history;
mod llm;
mod platform;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::Bridge;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the variables may come from the real environment.
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => info!("No .env file found, using process environment"),
        Err(e) => return Err(e).context("Failed to read .env file"),
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Gateway: {} (instance {})", config.gateway.base_url, config.gateway.instance);
    info!(
        "  Model: {} on {} via {}",
        config.ollama.model, config.ollama.device, config.ollama.base_url
    );
    info!(
        "  Allowed chats: {} (direct: {})",
        config.target_chat_id,
        config.direct_chat_id.as_deref().unwrap_or("none")
    );
    info!("  History limit: {}", config.history_limit);

    let addr = config.bind_addr;
    let bridge = Arc::new(Bridge::new(config));

    info!("Bridge is starting...");
    platform::webhook::run(bridge, addr).await?;

    Ok(())
}
