use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::{ModelHandle, Transcriber};
use crate::config::{AppConfig, TranscribeOptions};
use crate::database::{TranscriptSegment, Word};
use crate::error::PipelineError;

const VAD_MODEL_FILE: &str = "ggml-silero-v5.1.2.bin";
// Word-level output is regrouped into segments of at most this many words
const MAX_WORDS_PER_SEGMENT: usize = 40;

/// Transcribes by running `whisper-cli` as a subprocess.
///
/// Concurrent calls are bounded by a semaphore sized from
/// `max_parallel_transcribe`; every call is bounded by a timeout after which
/// the child is killed.
pub struct WhisperTranscriber {
    cli_path: PathBuf,
    models_path: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
    permits: Arc<Semaphore>,
    models: Mutex<HashMap<String, Arc<ModelHandle>>>,
}

impl WhisperTranscriber {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            cli_path: config.whisper.cli_path.clone(),
            models_path: config.whisper.models_path.clone(),
            work_dir: std::env::temp_dir().join("podclean-whisper"),
            timeout: Duration::from_secs(config.timeouts.transcribe_secs),
            permits: Arc::new(Semaphore::new(config.max_parallel_transcribe.max(1))),
            models: Mutex::new(HashMap::new()),
        }
    }

    fn model(&self, name: &str) -> Arc<ModelHandle> {
        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        models
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ModelHandle::new(&self.models_path, name)))
            .clone()
    }

    async fn run_whisper(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptSegment>, PipelineError> {
        if !audio_path.exists() {
            return Err(PipelineError::TranscriptionFailure(format!(
                "Audio file not found: {:?}",
                audio_path
            )));
        }

        let model = self.model(&options.model);
        let model_path = model.get().await?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let output_base = self.work_dir.join(uuid::Uuid::new_v4().to_string());
        let args = build_args(
            model_path,
            audio_path,
            &output_base,
            options,
            vad_model(&self.models_path, options),
        );

        log::info!(
            "Running whisper-cli ({}) on {:?}",
            model.name(),
            audio_path
        );

        let child = Command::new(&self.cli_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::TranscriptionFailure(format!("Failed to spawn whisper-cli: {}", e))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                PipelineError::TranscriptionFailure(format!("Failed to wait for whisper-cli: {}", e))
            })?,
            Err(_) => {
                return Err(PipelineError::TranscriptionFailure(format!(
                    "whisper-cli timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(PipelineError::TranscriptionFailure(format!(
                "whisper-cli failed with status {}: {}",
                output.status, tail
            )));
        }

        let json_path = output_base.with_extension("json");
        let content = tokio::fs::read_to_string(&json_path).await.map_err(|e| {
            PipelineError::TranscriptionFailure(format!(
                "Missing whisper output {:?}: {}",
                json_path, e
            ))
        })?;
        let _ = tokio::fs::remove_file(&json_path).await;

        let segments = parse_whisper_json(&content, options.word_timestamps)?;
        log::info!(
            "Transcribed {:?}: {} segments",
            audio_path.file_name().unwrap_or_default(),
            segments.len()
        );
        Ok(segments)
    }
}

impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptSegment>, PipelineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PipelineError::TranscriptionFailure(e.to_string()))?;
        self.run_whisper(audio_path, options).await
    }
}

fn vad_model(models_path: &Path, options: &TranscribeOptions) -> Option<PathBuf> {
    if !options.vad {
        return None;
    }
    let path = models_path.join(VAD_MODEL_FILE);
    if path.exists() {
        Some(path)
    } else {
        log::debug!("VAD requested but {:?} is not installed", path);
        None
    }
}

fn build_args(
    model_path: &Path,
    audio_path: &Path,
    output_base: &Path,
    options: &TranscribeOptions,
    vad_model: Option<PathBuf>,
) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        model_path.to_string_lossy().to_string(),
        "-f".to_string(),
        audio_path.to_string_lossy().to_string(),
        "-bs".to_string(),
        options.beam_size.max(1).to_string(),
        "-oj".to_string(),
        "-of".to_string(),
        output_base.to_string_lossy().to_string(),
        "-np".to_string(),
    ];
    if options.word_timestamps {
        // One entry per word
        args.extend(["-ml", "1", "-sow"].iter().map(|s| s.to_string()));
    }
    if let Some(vad) = vad_model {
        args.push("--vad".to_string());
        args.push("-vm".to_string());
        args.push(vad.to_string_lossy().to_string());
    }
    args
}

// ============================================================================
// Output parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    transcription: Vec<WhisperEntry>,
}

#[derive(Debug, Deserialize)]
struct WhisperEntry {
    offsets: WhisperOffsets,
    text: String,
}

/// Milliseconds from the start of the audio.
#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: i64,
    to: i64,
}

fn is_marker(text: &str) -> bool {
    // [BLANK_AUDIO], [Music], (laughs)
    let t = text.trim();
    (t.starts_with('[') && t.ends_with(']')) || (t.starts_with('(') && t.ends_with(')'))
}

/// Parse `whisper-cli -oj` output. With word timestamps every entry is one
/// word; words are regrouped into sentence-sized segments.
pub fn parse_whisper_json(
    content: &str,
    word_timestamps: bool,
) -> Result<Vec<TranscriptSegment>, PipelineError> {
    let output: WhisperOutput = serde_json::from_str(content).map_err(|e| {
        PipelineError::TranscriptionFailure(format!("Invalid whisper output: {}", e))
    })?;

    let entries = output
        .transcription
        .into_iter()
        .filter(|e| !e.text.trim().is_empty() && !is_marker(&e.text));

    if !word_timestamps {
        return Ok(entries
            .map(|e| TranscriptSegment {
                start: e.offsets.from as f64 / 1000.0,
                end: e.offsets.to as f64 / 1000.0,
                text: e.text.trim().to_string(),
                words: Vec::new(),
                speaker: None,
            })
            .collect());
    }

    let words = entries.map(|e| Word {
        word: e.text,
        start: e.offsets.from as f64 / 1000.0,
        end: e.offsets.to as f64 / 1000.0,
        probability: None,
    });
    Ok(group_words(words))
}

fn group_words(words: impl Iterator<Item = Word>) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut current: Vec<Word> = Vec::new();

    for word in words {
        let ends_sentence = word
            .word
            .trim_end()
            .ends_with(|c: char| matches!(c, '.' | '?' | '!'));
        current.push(word);
        if ends_sentence || current.len() >= MAX_WORDS_PER_SEGMENT {
            segments.push(segment_from_words(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        segments.push(segment_from_words(current));
    }
    segments
}

fn segment_from_words(words: Vec<Word>) -> TranscriptSegment {
    let start = words.first().map(|w| w.start).unwrap_or(0.0);
    let end = words.last().map(|w| w.end).unwrap_or(start);
    let text = words
        .iter()
        .map(|w| w.word.trim())
        .collect::<Vec<_>>()
        .join(" ");
    TranscriptSegment {
        start,
        end,
        text,
        words,
        speaker: None,
    }
}
