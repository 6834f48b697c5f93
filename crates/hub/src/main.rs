mod config;
mod controller;
mod db;
mod error;
mod state;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tracing_subscriber::EnvFilter;

use controller::Controller;
use db::Db;
use state::Aggregator;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:plantwater.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Initial auto-watering settings ──────────────────────────────
    let cfg = config::load(&config_path)?;
    let settings = cfg.auto_watering.into_settings();
    tracing::info!(
        threshold = settings.threshold_percent,
        duration_sec = settings.duration_sec,
        min_interval_sec = settings.min_interval_sec,
        enabled = settings.enabled,
        "auto watering configured"
    );

    db.insert_log(db::now_unix(), "hub started", "system").await?;

    // ── API server ──────────────────────────────────────────────────
    let controller = Arc::new(Controller::new(db.clone(), settings));
    let aggregator = Aggregator::new(db);

    web::serve(AppState {
        controller,
        aggregator,
    })
    .await
}
