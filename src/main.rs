use std::{env, path::PathBuf, sync::Arc};

use activity_recorder::{
    recover_interrupted, Database, HttpRemote, RecorderContext, SettingsStore, SyncController,
    SyncReconciler,
};
use anyhow::Context;
use log::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("activity-recorder starting up...");

    let data_dir = env::var("RECORDER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("recorder-data"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = settings_store.engine();

    let db_path = settings
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join("recordings.sqlite3"));
    let database = Database::new(db_path)?;

    let ctx = RecorderContext::with_logging(Arc::new(database), settings.clone());

    // Finalize recordings that were live when the process last died.
    let recovered = recover_interrupted(&ctx).await?;
    if !recovered.is_empty() {
        info!("Recovered {} interrupted recordings", recovered.len());
    }

    let Some(endpoint) = settings.sync_endpoint.clone() else {
        warn!("No sync endpoint configured; nothing to do");
        return Ok(());
    };

    let remote = HttpRemote::new(endpoint, settings.sync_token.clone());
    let reconciler = Arc::new(SyncReconciler::new(ctx, Arc::new(remote)));
    let mut sync = SyncController::new(reconciler);
    sync.start(settings.sync_interval())?;
    sync.trigger();

    info!("Sync loop running every {:?}; Ctrl-C to stop", settings.sync_interval());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    sync.stop().await?;
    info!("activity-recorder stopped");
    Ok(())
}
