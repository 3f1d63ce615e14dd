// Docflow API server
//
// Thin binary wrapper around the `docflow_api` library crate (see
// src/lib.rs for the router and src/error.rs for the status-code mapping).
// No business logic lives in this crate; see docflow-engine for that.

use anyhow::{Context, Result};
use docflow_core::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "docflow_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env().context("loading settings")?;
    tracing::info!("docflow-api starting...");

    docflow_api::serve_with_settings(settings).await
}
