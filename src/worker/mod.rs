pub mod backlog;
pub mod lifecycle;
pub mod retention;


use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::cut::{Encoder, FfmpegEncoder};
use crate::database::{Database, EpisodeStatus};
use crate::error::AppError;
use crate::transcribe::{Transcriber, WhisperTranscriber};

use lifecycle::{EpisodeProcessor, Stage, StageOutcome};

/// Counts for one scheduler tick.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TickReport {
    pub cut_ready: usize,
    pub cut_failed: usize,
    pub transcribed: usize,
    pub transcription_failed: usize,
    pub failed_permanently: usize,
    pub original_missing: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match (stage, outcome) {
            (_, StageOutcome::Skipped) => self.skipped += 1,
            (Stage::Cut, StageOutcome::Completed(_)) => self.cut_ready += 1,
            (Stage::FullTranscription, StageOutcome::Completed(_)) => self.transcribed += 1,
            (_, StageOutcome::Failed(EpisodeStatus::FailedPermanently)) => {
                self.failed_permanently += 1
            }
            (_, StageOutcome::Failed(EpisodeStatus::OriginalMissing)) => {
                self.original_missing += 1
            }
            (Stage::Cut, StageOutcome::Failed(_)) => self.cut_failed += 1,
            (Stage::FullTranscription, StageOutcome::Failed(_)) => {
                self.transcription_failed += 1
            }
        }
    }
}

/// Run `stage` for every episode in `guids`, at most
/// `max_parallel_transcribe` at a time.
pub async fn run_batch<T, E>(
    processor: &EpisodeProcessor<T, E>,
    stage: Stage,
    guids: Vec<String>,
    report: &mut TickReport,
) where
    T: Transcriber + 'static,
    E: Encoder + 'static,
{
    if guids.is_empty() {
        return;
    }
    let limit = Arc::new(Semaphore::new(
        processor.config().max_parallel_transcribe.max(1),
    ));
    let mut tasks = JoinSet::new();

    for guid in guids {
        let processor = processor.clone();
        let limit = limit.clone();
        tasks.spawn(
            async move {
                let _permit = limit.acquire_owned().await;
                let outcome = match stage {
                    Stage::Cut => processor.process_episode(&guid).await,
                    Stage::FullTranscription => processor.transcribe_episode(&guid).await,
                };
                (guid, outcome)
            }
            .instrument(tracing::Span::current()),
        );
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(outcome))) => report.record(stage, outcome),
            Ok((guid, Err(e))) => {
                log::error!("{} for {} aborted: {}", stage, guid, e);
                report.errors += 1;
            }
            Err(e) => {
                log::error!("{} task failed: {}", stage, e);
                report.errors += 1;
            }
        }
    }
}

/// One pass of work: cut every eligible episode, then run the full
/// transcription backlog when enabled (or when `force_backlog` is set).
pub async fn run_tick<T, E>(
    processor: &EpisodeProcessor<T, E>,
    force_backlog: bool,
) -> Result<TickReport, AppError>
where
    T: Transcriber + 'static,
    E: Encoder + 'static,
{
    let span = tracing::info_span!("tick", run_id = %uuid::Uuid::new_v4());
    async move {
        let started = Instant::now();
        let config = processor.config();
        let db = processor.db();
        let mut report = TickReport::default();

        let cut: Vec<String> = backlog::select_cut_candidates(db, config)?
            .into_iter()
            .map(|e| e.source_guid)
            .collect();
        log::info!("Tick: {} episodes waiting for the cut stage", cut.len());
        run_batch(processor, Stage::Cut, cut, &mut report).await;

        if config.full_pass_enabled || force_backlog {
            let selected: Vec<String> = backlog::select_backlog(db, config)?
                .into_iter()
                .map(|e| e.source_guid)
                .collect();
            log::info!("Tick: {} episodes selected for full transcription", selected.len());
            run_batch(processor, Stage::FullTranscription, selected, &mut report).await;
        }

        log::info!(
            "Tick finished in {:.1}s: {:?}",
            started.elapsed().as_secs_f64(),
            report
        );
        Ok::<TickReport, AppError>(report)
    }
    .instrument(span)
    .await
}

/// Everything the scheduler needs that outlives a single tick.
pub struct Pipeline {
    pub db: Arc<Database>,
    pub transcriber: Arc<WhisperTranscriber>,
    pub encoder: Arc<FfmpegEncoder>,
}

impl Pipeline {
    pub fn open(config: &AppConfig) -> Result<Self, AppError> {
        let db = crate::open_database(config)?;
        Ok(Self {
            db: Arc::new(db),
            transcriber: Arc::new(WhisperTranscriber::new(config)),
            encoder: Arc::new(FfmpegEncoder::new(Duration::from_secs(
                config.timeouts.encode_secs,
            ))),
        })
    }

    pub fn processor(&self, config: AppConfig) -> EpisodeProcessor<WhisperTranscriber, FfmpegEncoder> {
        EpisodeProcessor::new(
            self.db.clone(),
            Arc::new(config),
            self.transcriber.clone(),
            self.encoder.clone(),
        )
    }
}

/// Tick on a fixed interval until cancelled. The config is reloaded before
/// every tick; a config that fails to load keeps the previous one.
///
/// Whisper paths, parallelism and the database location are read once at
/// startup.
pub async fn run_scheduler(
    config_dir: PathBuf,
    mut config: AppConfig,
    pipeline: Pipeline,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    log::info!(
        "Scheduler started (tick every {}s, retention every {}s)",
        config.scheduler.tick_interval_secs,
        config.scheduler.retention_interval_secs
    );

    pipeline.db.reset_stuck_processing()?;
    let mut last_sweep: Option<Instant> = None;

    loop {
        match AppConfig::load(&config_dir) {
            Ok(fresh) => config = fresh,
            Err(e) => log::warn!("Config reload failed, keeping previous config: {}", e),
        }

        let processor = pipeline.processor(config.clone());
        if let Err(e) = run_tick(&processor, false).await {
            log::error!("Tick failed: {}", e);
        }

        let sweep_due = last_sweep.map_or(true, |t| {
            t.elapsed() >= Duration::from_secs(config.scheduler.retention_interval_secs)
        });
        if sweep_due {
            if let Err(e) = retention::run_retention_sweep(&pipeline.db, &config, Utc::now()) {
                log::error!("Retention sweep failed: {}", e);
            }
            last_sweep = Some(Instant::now());
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Scheduler cancelled");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(config.scheduler.tick_interval_secs.max(1))) => {}
        }
    }

    log::info!("Scheduler stopped");
    Ok(())
}
