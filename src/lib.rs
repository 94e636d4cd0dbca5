pub mod commands;
pub mod config;
pub mod cut;
pub mod database;
pub mod detect;
pub mod error;
pub mod transcribe;
pub mod worker;

#[cfg(test)]
mod test_support;

use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use database::Database;
use error::AppError;
use worker::Pipeline;

/// Install the global subscriber. `RUST_LOG` controls verbosity, default
/// `info`. Records from the `log` macros are bridged in.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Open the episode store named by `config`, creating the media directory.
pub fn open_database(config: &AppConfig) -> Result<Database, AppError> {
    std::fs::create_dir_all(&config.media_base_path)?;
    Ok(Database::new(&config.database_path())?)
}

/// Run the tick scheduler until Ctrl-C.
pub async fn run(config_dir: &Path) -> Result<(), AppError> {
    let config = AppConfig::load(config_dir)?;
    log::info!(
        "podclean starting (config {:?}, media {:?})",
        config_dir,
        config.media_base_path
    );
    let pipeline = Pipeline::open(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Shutdown requested");
                on_signal.cancel();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    worker::run_scheduler(config_dir.to_path_buf(), config, pipeline, cancel).await
}
