use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use podclean_lib::commands;
use podclean_lib::config::{resolve_config_dir, AppConfig};
use podclean_lib::worker::{self, retention, Pipeline};

#[derive(Parser)]
#[command(name = "podclean", version, about = "podcast ad removal pipeline")]
struct Cli {
    /// Directory holding app.yaml and shows/
    #[arg(long, global = true, value_name = "dir")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Run the cut stage for one episode
    Process { guid: String },
    /// One tick with the full transcription backlog forced on
    Backlog,
    /// Apply the retention policy now
    Sweep,
    /// Re-run the stage an episode is stuck in, ignoring the retry limit
    Retry { guid: String },
    /// Episode counts per status
    Status,
    /// Upsert episode records from a JSON array
    Ingest { file: PathBuf },
    /// Record the downloaded file of a pending episode
    Downloaded {
        guid: String,
        path: PathBuf,
        /// Duration in seconds, when known
        #[arg(long)]
        duration: Option<f64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    podclean_lib::init_logging();
    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir.as_deref());

    let config = AppConfig::load(&config_dir)?;

    match cli.command {
        Command::Run => podclean_lib::run(&config_dir).await?,
        Command::Process { guid } => {
            let processor = Pipeline::open(&config)?.processor(config);
            let outcome = processor.process_episode(&guid).await?;
            println!("{}: {:?}", guid, outcome);
        }
        Command::Backlog => {
            let processor = Pipeline::open(&config)?.processor(config);
            print_json(&worker::run_tick(&processor, true).await?)?;
        }
        Command::Sweep => {
            let db = podclean_lib::open_database(&config)?;
            let report = retention::run_retention_sweep(&db, &config, Utc::now())?;
            println!(
                "Deleted {} episodes and {} files",
                report.episodes_deleted, report.files_deleted
            );
        }
        Command::Retry { guid } => {
            let processor = Pipeline::open(&config)?.processor(config);
            let outcome = processor.retry_episode(&guid).await?;
            println!("{}: {:?}", guid, outcome);
        }
        Command::Status => {
            let db = podclean_lib::open_database(&config)?;
            print_json(&commands::get_status_summary(&db)?)?;
        }
        Command::Ingest { file } => {
            let db = podclean_lib::open_database(&config)?;
            let records = commands::load_episode_records(&file)?;
            print_json(&commands::ingest_episodes(&db, &records)?)?;
        }
        Command::Downloaded {
            guid,
            path,
            duration,
        } => {
            let db = podclean_lib::open_database(&config)?;
            let episode = commands::mark_episode_downloaded(&db, &guid, &path, duration)?;
            println!("{} is now {}", episode.source_guid, episode.status);
        }
    }
    Ok(())
}
