//! Collaborator doubles shared by the unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::{EncodingConfig, TranscribeOptions};
use crate::cut::Encoder;
use crate::database::{KeepSegment, TranscriptSegment, Word};
use crate::error::PipelineError;
use crate::transcribe::Transcriber;

/// Segment whose words are spaced half a second apart from `start`.
pub fn spoken(start: f64, text: &str) -> TranscriptSegment {
    let words: Vec<Word> = text
        .split_whitespace()
        .enumerate()
        .map(|(i, w)| Word {
            word: format!(" {}", w),
            start: start + i as f64 * 0.5,
            end: start + i as f64 * 0.5 + 0.4,
            probability: None,
        })
        .collect();
    TranscriptSegment {
        start,
        end: words.last().map(|w| w.end).unwrap_or(start),
        text: text.to_string(),
        words,
        speaker: None,
    }
}

/// Returns a fixed result and counts calls.
pub struct CountingTranscriber {
    calls: AtomicUsize,
    result: Result<Vec<TranscriptSegment>, String>,
}

impl CountingTranscriber {
    pub fn returning(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            result: Ok(segments),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            result: Err(message.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for CountingTranscriber {
    async fn transcribe(
        &self,
        _audio_path: &Path,
        _options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptSegment>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .map_err(PipelineError::TranscriptionFailure)
    }
}

/// Writes a small file on success; can be told to fail.
pub struct ScriptedEncoder {
    pub fail: bool,
    pub duration: Option<f64>,
    pub cuts: Mutex<Vec<Vec<KeepSegment>>>,
}

impl ScriptedEncoder {
    pub fn ok(duration: Option<f64>) -> Self {
        Self {
            fail: false,
            duration,
            cuts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            duration: Some(600.0),
            cuts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_keeps(&self) -> Option<Vec<KeepSegment>> {
        self.cuts.lock().unwrap().last().cloned()
    }
}

impl Encoder for ScriptedEncoder {
    async fn cut(
        &self,
        _input: &Path,
        keeps: &[KeepSegment],
        output: &Path,
        _encoding: &EncodingConfig,
    ) -> Result<(), PipelineError> {
        self.cuts.lock().unwrap().push(keeps.to_vec());
        if self.fail || keeps.is_empty() {
            return Err(PipelineError::EncodeFailure("scripted failure".to_string()));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, b"cleaned audio")?;
        Ok(())
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64, PipelineError> {
        self.duration
            .ok_or_else(|| PipelineError::UnknownDuration(input.display().to_string()))
    }
}
