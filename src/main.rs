//! Therabot server
//!
//! Entry point for the conversational backend.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::info;

use therabot::config::AppConfig;
use therabot::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED)
    telemetry::init();

    let config = Arc::new(AppConfig::load()?);
    info!(
        name: "config.loaded",
        host = %config.server.host,
        port = config.server.port,
        persistence = %config.persistence.provider,
        sentiment = %config.sentiment.provider,
        speech = %config.speech.provider,
        "Configuration loaded"
    );

    server::start_server(config).await
}
