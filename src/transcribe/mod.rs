pub mod markdown;
pub mod whisper;

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

use crate::config::TranscribeOptions;
use crate::database::TranscriptSegment;
use crate::error::PipelineError;

pub use markdown::format_transcript_markdown;
pub use whisper::WhisperTranscriber;

/// Speech-to-text collaborator.
///
/// Implementations may fail; the lifecycle controller decides what a failure
/// means for the stage (no ads for the fast pass, a retryable failure for
/// the full pass).
pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> impl Future<Output = Result<Vec<TranscriptSegment>, PipelineError>> + Send;
}

/// A whisper model file, resolved and checked the first time it is needed
/// and reused for every later call.
pub struct ModelHandle {
    name: String,
    path: PathBuf,
    resolved: OnceCell<PathBuf>,
}

impl ModelHandle {
    pub fn new(models_path: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: models_path.join(format!("ggml-{}.bin", name)),
            resolved: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to the model file. A missing file is not cached, so a model
    /// installed later is picked up on the next call.
    pub async fn get(&self) -> Result<&Path, PipelineError> {
        let path = self
            .resolved
            .get_or_try_init(|| async {
                match tokio::fs::metadata(&self.path).await {
                    Ok(meta) if meta.is_file() => {
                        log::info!("Using whisper model '{}' at {:?}", self.name, self.path);
                        Ok(self.path.clone())
                    }
                    _ => Err(PipelineError::TranscriptionFailure(format!(
                        "Model not found: {:?}",
                        self.path
                    ))),
                }
            })
            .await?;
        Ok(path.as_path())
    }
}
