use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod error;
mod pipeline;
mod recorder;
mod records;
mod registry;
mod store;
#[cfg(test)]
mod testing;

use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use pipeline::{Pipeline, PipelineSettings};
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        cache_registry = config.cache_registry,
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let engine = engine::spawn_onnx_engine(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("failed to start extraction engine")?;

    let pipeline = Arc::new(Pipeline::new(engine, Arc::new(store), PipelineSettings::from(&config)));
    let service = RollcallService::new(pipeline, config.default_period.clone());

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, session = config.session_bus, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
