use thiserror::Error;

/// Typed application error hierarchy for the plumbing around the pipeline:
/// storage, configuration, file I/O and operator commands.
///
/// Serializes as a plain string so command output stays a flat message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

/// Failures of a single processing stage for one episode.
///
/// These are caught by the lifecycle controller and turned into a status
/// transition plus `last_error`; they never reach the scheduler.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Original media file is absent. Terminal for the run, no retry scheduled.
    #[error("Original media missing: {0}")]
    MissingSourceMedia(String),

    /// A detection collaborator failed. Treated as "no ads found".
    #[error("Detection failed: {0}")]
    DetectionFailure(String),

    #[error("Encode failed: {0}")]
    EncodeFailure(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailure(String),

    #[error("Unknown duration for {0}")]
    UnknownDuration(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    /// Whether the stage may be attempted again on a later tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::MissingSourceMedia(_))
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_missing_media_is_final() {
        assert!(!PipelineError::MissingSourceMedia("/media/x.mp3".into()).is_retryable());
        assert!(PipelineError::EncodeFailure("exit 1".into()).is_retryable());
        assert!(PipelineError::UnknownDuration("/media/x.mp3".into()).is_retryable());
        assert!(PipelineError::Storage("locked".into()).is_retryable());
    }
}
