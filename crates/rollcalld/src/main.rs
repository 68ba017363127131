use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();

    let db = rollcall_store::Database::open(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "database ready");

    let store = rollcall_store::GalleryStore::open(&config.gallery_dir)?;
    tracing::info!(dir = %config.gallery_dir.display(), "gallery store ready");

    let extractor = rollcall_core::OnnxExtractor::load(
        &config.model_path.to_string_lossy(),
        config.input_edge,
    )?;
    tracing::info!(path = %config.model_path.display(), "recognition model loaded");

    let engine = engine::spawn_engine(
        Box::new(extractor),
        store,
        db,
        config.distance_threshold,
        Duration::from_secs(config.request_timeout_secs),
    );

    let service = dbus_interface::RollcallService::new(engine, config.distance_threshold);
    let _conn = zbus::connection::Builder::system()?
        .name("org.rollcall.Rollcall1")?
        .serve_at("/org/rollcall/Rollcall1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready on org.rollcall.Rollcall1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
