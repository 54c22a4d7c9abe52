use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod gallery;
mod service;
mod store;

use config::Config;
use dbus_interface::RollcallInterface;
use gallery::Gallery;
use service::{AttendanceService, ServiceSettings};
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    store.migrate().await.context("migrating database schema")?;

    // A failed gallery load degrades to an empty set rather than blocking
    // startup; model loading stays fail-fast.
    let gallery = Arc::new(Gallery::load(&store).await);

    let extractor = rollcall_core::OnnxExtractor::load(
        &config.detector_model_path(),
        &config.encoder_model_path(),
    )
    .context("loading ONNX models")?;
    let engine = engine::spawn_engine(Box::new(extractor));

    let settings = ServiceSettings::from_config(&config);
    let service = Arc::new(AttendanceService::new(engine, store, gallery, settings));

    let _connection = zbus::connection::Builder::session()
        .context("connecting to session bus")?
        .name("org.rollcall.Rollcall1")?
        .serve_at("/org/rollcall/Rollcall1", RollcallInterface::new(service))?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!("rollcalld ready on org.rollcall.Rollcall1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
