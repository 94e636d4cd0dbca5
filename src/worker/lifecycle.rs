use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AppConfig, ShowRules};
use crate::cut::ffmpeg::output_extension;
use crate::cut::{build_keep_segments, kept_duration, retime_chapters, Encoder};
use crate::database::{CutOutcome, Database, Episode, EpisodeStatus};
use crate::detect::{load_chapters_from_json, AdDetector, DetectionInput};
use crate::error::{AppError, PipelineError};
use crate::transcribe::{format_transcript_markdown, Transcriber};

// ============================================================================
// State machine
// ============================================================================

/// The two expensive stages an episode goes through. Each has its own
/// retry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Detect ads, cut, retime chapters.
    Cut,
    /// Second-pass transcription of the cleaned audio.
    FullTranscription,
}

impl Stage {
    pub fn counter_column(&self) -> &'static str {
        match self {
            Stage::Cut => "retry_count",
            Stage::FullTranscription => "full_retry_count",
        }
    }

    pub fn in_flight(&self) -> EpisodeStatus {
        match self {
            Stage::Cut => EpisodeStatus::Processing,
            Stage::FullTranscription => EpisodeStatus::Transcribing,
        }
    }

    pub fn succeeded(&self) -> EpisodeStatus {
        match self {
            Stage::Cut => EpisodeStatus::CutReadyForServing,
            Stage::FullTranscription => EpisodeStatus::Transcribed,
        }
    }

    pub fn failed(&self) -> EpisodeStatus {
        match self {
            Stage::Cut => EpisodeStatus::ProcessingFailed,
            Stage::FullTranscription => EpisodeStatus::FullTranscriptionFailed,
        }
    }

    /// Status from which the stage runs for the first time.
    pub fn ready(&self) -> EpisodeStatus {
        match self {
            Stage::Cut => EpisodeStatus::Downloaded,
            Stage::FullTranscription => EpisodeStatus::CutReadyForServing,
        }
    }

    /// Statuses a scheduled run may claim from.
    pub fn scheduled_from(&self) -> [EpisodeStatus; 2] {
        [self.ready(), self.failed()]
    }

    /// Statuses an operator re-trigger may claim from.
    pub fn manual_from(&self) -> &'static [EpisodeStatus] {
        match self {
            Stage::Cut => &[
                EpisodeStatus::Downloaded,
                EpisodeStatus::ProcessingFailed,
                EpisodeStatus::OriginalMissing,
                EpisodeStatus::FailedPermanently,
            ],
            Stage::FullTranscription => &[
                EpisodeStatus::CutReadyForServing,
                EpisodeStatus::FullTranscriptionFailed,
                EpisodeStatus::FailedPermanently,
            ],
        }
    }

    /// Attempts made so far for this stage.
    pub fn attempts(&self, episode: &Episode) -> i32 {
        match self {
            Stage::Cut => episode.retry_count,
            Stage::FullTranscription => episode.full_retry_count,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Cut => write!(f, "cut"),
            Stage::FullTranscription => write!(f, "full transcription"),
        }
    }
}

/// Status after a failed attempt. `attempts` already includes the attempt
/// that just failed.
pub fn failure_status(stage: Stage, attempts: i32, max_retries: i32) -> EpisodeStatus {
    if attempts >= max_retries {
        EpisodeStatus::FailedPermanently
    } else {
        stage.failed()
    }
}

/// Failed for `stage` and still under the retry limit.
pub fn is_retry_eligible(episode: &Episode, stage: Stage, max_retries: i32) -> bool {
    episode.status == stage.failed() && stage.attempts(episode) < max_retries
}

/// Whether a scheduled run may pick the episode up for `stage`.
pub fn is_eligible(episode: &Episode, stage: Stage, max_retries: i32) -> bool {
    (episode.status == stage.ready() && stage.attempts(episode) < max_retries)
        || is_retry_eligible(episode, stage, max_retries)
}

/// File-name safe stem for per-episode artifacts.
pub fn artifact_stem(source_guid: &str) -> String {
    let stem: String = source_guid
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "episode".to_string()
    } else {
        stem
    }
}

/// Cleaned audio path of an episode, named after its GUID so episodes whose
/// downloads share a file name never share an output.
pub fn cleaned_path(config: &AppConfig, source_guid: &str) -> PathBuf {
    config.cleaned_dir().join(format!(
        "{}_cleaned.{}",
        artifact_stem(source_guid),
        output_extension(&config.encoding.codec)
    ))
}

/// JSON and Markdown transcript paths of an episode.
pub fn transcript_paths(config: &AppConfig, source_guid: &str) -> (PathBuf, PathBuf) {
    let stem = artifact_stem(source_guid);
    let dir = config.transcripts_dir();
    (
        dir.join(format!("{}.json", stem)),
        dir.join(format!("{}.md", stem)),
    )
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(EpisodeStatus),
    Failed(EpisodeStatus),
    /// Not claimable: wrong status, over the retry limit, or taken by
    /// another run.
    Skipped,
}

/// Runs lifecycle stages for single episodes.
///
/// Every run starts with an atomic claim in storage, so two schedulers can
/// never run the same stage of an episode at once. Stage failures end here
/// as a status transition plus `last_error`.
pub struct EpisodeProcessor<T: Transcriber, E: Encoder> {
    db: Arc<Database>,
    config: Arc<AppConfig>,
    transcriber: Arc<T>,
    encoder: Arc<E>,
}

impl<T: Transcriber, E: Encoder> Clone for EpisodeProcessor<T, E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: self.config.clone(),
            transcriber: self.transcriber.clone(),
            encoder: self.encoder.clone(),
        }
    }
}

impl<T: Transcriber, E: Encoder> EpisodeProcessor<T, E> {
    pub fn new(
        db: Arc<Database>,
        config: Arc<AppConfig>,
        transcriber: Arc<T>,
        encoder: Arc<E>,
    ) -> Self {
        Self {
            db,
            config,
            transcriber,
            encoder,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Detect, cut and retime a downloaded (or retry-eligible) episode.
    pub async fn process_episode(&self, source_guid: &str) -> Result<StageOutcome, AppError> {
        let stage = Stage::Cut;
        self.run_stage(
            source_guid,
            stage,
            &stage.scheduled_from(),
            Some(self.config.max_processing_retries),
        )
        .await
    }

    /// Full transcription of a cut (or retry-eligible) episode.
    pub async fn transcribe_episode(&self, source_guid: &str) -> Result<StageOutcome, AppError> {
        let stage = Stage::FullTranscription;
        self.run_stage(
            source_guid,
            stage,
            &stage.scheduled_from(),
            Some(self.config.max_processing_retries),
        )
        .await
    }

    /// Operator re-trigger: re-run the stage the episode is stuck in,
    /// ignoring the retry limit. Counters keep counting.
    pub async fn retry_episode(&self, source_guid: &str) -> Result<StageOutcome, AppError> {
        let episode = self
            .db
            .get_episode(source_guid)?
            .ok_or_else(|| AppError::NotFound(format!("Episode {}", source_guid)))?;

        let stage = if episode.cleaned_file_path.is_some() {
            Stage::FullTranscription
        } else {
            Stage::Cut
        };
        if episode.status == stage.in_flight() {
            return Err(AppError::Other(format!(
                "Episode {} is already in {}",
                source_guid, stage
            )));
        }

        log::info!(
            "Manual retry of {} for {} (status {})",
            stage,
            source_guid,
            episode.status
        );
        self.run_stage(source_guid, stage, stage.manual_from(), None)
            .await
    }

    async fn run_stage(
        &self,
        source_guid: &str,
        stage: Stage,
        from: &[EpisodeStatus],
        max_retries: Option<i32>,
    ) -> Result<StageOutcome, AppError> {
        let Some(episode) = self.db.claim_stage(source_guid, stage, from, max_retries)? else {
            log::debug!("{} not claimable for {}", source_guid, stage);
            return Ok(StageOutcome::Skipped);
        };
        log::info!(
            "Starting {} for '{}' ({}), attempt {}",
            stage,
            episode.title,
            source_guid,
            stage.attempts(&episode)
        );

        let result = match stage {
            Stage::Cut => self.cut_stage(&episode).await,
            Stage::FullTranscription => self.full_stage(&episode).await,
        };

        match result {
            Ok(true) => {
                log::info!("{}: {} -> {}", source_guid, stage.in_flight(), stage.succeeded());
                Ok(StageOutcome::Completed(stage.succeeded()))
            }
            Ok(false) => {
                log::warn!("{}: status changed while {} was running", source_guid, stage);
                Ok(StageOutcome::Skipped)
            }
            Err(e) => {
                let status = if e.is_retryable() {
                    failure_status(
                        stage,
                        stage.attempts(&episode),
                        self.config.max_processing_retries,
                    )
                } else {
                    EpisodeStatus::OriginalMissing
                };
                log::error!("{} failed for {}: {} -> {}", stage, source_guid, e, status);
                self.db
                    .mark_stage_failed(source_guid, stage, status, &e.to_string())?;
                Ok(StageOutcome::Failed(status))
            }
        }
    }

    fn show_rules(&self, show_name: &str) -> ShowRules {
        match self.config.show_rules(show_name) {
            Ok(rules) => rules,
            Err(e) => {
                log::warn!("Invalid rules for show '{}', using defaults: {}", show_name, e);
                ShowRules::default()
            }
        }
    }

    async fn episode_duration(&self, episode: &Episode, audio: &Path) -> Result<f64, PipelineError> {
        if let Some(duration) = episode.original_duration.filter(|d| *d > 0.0) {
            return Ok(duration);
        }
        let duration = self.encoder.probe_duration(audio).await?;
        self.db.set_original_duration(&episode.source_guid, duration)?;
        Ok(duration)
    }

    async fn cut_stage(&self, episode: &Episode) -> Result<bool, PipelineError> {
        let original = episode
            .original_file_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .ok_or_else(|| {
                PipelineError::MissingSourceMedia(
                    episode
                        .original_file_path
                        .clone()
                        .unwrap_or_else(|| "no local file".to_string()),
                )
            })?;

        let duration = self.episode_duration(episode, &original).await?;
        let rules = self.show_rules(&episode.show_name);

        let detection = AdDetector::new(self.transcriber.as_ref())
            .detect(
                DetectionInput {
                    audio_path: &original,
                    chapters_json: episode.chapters_json.as_deref(),
                    duration: Some(duration),
                },
                &self.config,
                &rules,
            )
            .await;

        if let Some(transcript) = &detection.fast_transcript {
            self.db
                .save_fast_transcript(&episode.source_guid, &serde_json::to_string(transcript)?)?;
        }
        let ad_segments_json = serde_json::to_string(&detection.cuts)?;
        self.db
            .record_detection(&episode.source_guid, &ad_segments_json)?;

        let keeps = build_keep_segments(duration, &detection.cuts);
        log::info!(
            "{}: {} ad cuts, {} keep segments",
            episode.source_guid,
            detection.cuts.len(),
            keeps.len()
        );

        let output = cleaned_path(&self.config, &episode.source_guid);

        self.encoder
            .cut(&original, &keeps, &output, &self.config.encoding)
            .await?;

        let cleaned_chapters_json = match episode.chapters_json.as_deref() {
            Some(json) => {
                let chapters = load_chapters_from_json(json);
                Some(serde_json::to_string(&retime_chapters(&chapters, &keeps))?)
            }
            None => None,
        };
        let cleaned_file_size = tokio::fs::metadata(&output)
            .await
            .ok()
            .map(|m| m.len() as i64);

        let outcome = CutOutcome {
            cleaned_file_path: output.to_string_lossy().to_string(),
            cleaned_duration: kept_duration(&keeps),
            cleaned_file_size,
            ad_segments_json,
            cleaned_chapters_json,
        };
        Ok(self.db.mark_cut_ready(&episode.source_guid, &outcome)?)
    }

    async fn full_stage(&self, episode: &Episode) -> Result<bool, PipelineError> {
        let audio = episode
            .cleaned_file_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .ok_or_else(|| {
                PipelineError::TranscriptionFailure("Cleaned audio file is missing".to_string())
            })?;

        let segments = self
            .transcriber
            .transcribe(&audio, &self.config.full_pass)
            .await?;
        if segments.is_empty() {
            return Err(PipelineError::TranscriptionFailure(
                "Transcription returned no segments".to_string(),
            ));
        }

        let transcript_json = serde_json::to_string(&segments)?;
        let (json_path, md_path) = transcript_paths(&self.config, &episode.source_guid);
        if let Some(dir) = json_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&json_path, &transcript_json).await?;
        tokio::fs::write(&md_path, format_transcript_markdown(&segments)).await?;
        log::info!("Transcript saved to {:?}", md_path);

        let md_path = md_path.to_string_lossy().to_string();
        Ok(self
            .db
            .mark_transcribed(&episode.source_guid, &transcript_json, Some(&md_path))?)
    }
}
