use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Episode status state machine
// ============================================================================

/// Closed set of episode states.
///
/// Forward path: `pending_download -> downloaded -> processing ->
/// cut_ready_for_serving -> transcribing -> transcribed`. Each in-flight
/// stage has its own failure state, and `failed_permanently` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    #[default]
    PendingDownload,
    Downloaded,
    Processing,
    CutReadyForServing,
    ProcessingFailed,
    OriginalMissing,
    Transcribing,
    Transcribed,
    FullTranscriptionFailed,
    FailedPermanently,
}

impl EpisodeStatus {
    pub const ALL: [EpisodeStatus; 10] = [
        Self::PendingDownload,
        Self::Downloaded,
        Self::Processing,
        Self::CutReadyForServing,
        Self::ProcessingFailed,
        Self::OriginalMissing,
        Self::Transcribing,
        Self::Transcribed,
        Self::FullTranscriptionFailed,
        Self::FailedPermanently,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingDownload => "pending_download",
            Self::Downloaded => "downloaded",
            Self::Processing => "processing",
            Self::CutReadyForServing => "cut_ready_for_serving",
            Self::ProcessingFailed => "processing_failed",
            Self::OriginalMissing => "original_missing",
            Self::Transcribing => "transcribing",
            Self::Transcribed => "transcribed",
            Self::FullTranscriptionFailed => "full_transcription_failed",
            Self::FailedPermanently => "failed_permanently",
        }
    }

    /// No automatic transition ever leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FailedPermanently)
    }

    /// The cleaned file exists and can be served.
    pub fn is_servable(&self) -> bool {
        matches!(
            self,
            Self::CutReadyForServing
                | Self::Transcribing
                | Self::Transcribed
                | Self::FullTranscriptionFailed
        )
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EpisodeStatus {
    type Err = String;

    /// Accepts the current vocabulary plus the older names still found in
    /// existing databases (`cut`, `cut_failed`, `transcription_failed`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_download" | "pending" => Ok(Self::PendingDownload),
            "downloaded" => Ok(Self::Downloaded),
            "processing" | "pending_cut" => Ok(Self::Processing),
            "cut_ready_for_serving" | "cut" => Ok(Self::CutReadyForServing),
            "processing_failed" | "cut_failed" | "error" => Ok(Self::ProcessingFailed),
            "original_missing" => Ok(Self::OriginalMissing),
            "transcribing" | "pending_transcribe" => Ok(Self::Transcribing),
            "transcribed" => Ok(Self::Transcribed),
            "full_transcription_failed" | "transcription_failed" => {
                Ok(Self::FullTranscriptionFailed)
            }
            "failed_permanently" => Ok(Self::FailedPermanently),
            other => Err(format!("unknown episode status: {}", other)),
        }
    }
}

// ============================================================================
// Episodes
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub source_guid: String,
    pub show_name: String,
    pub title: String,
    pub pub_date: DateTime<Utc>,
    pub original_audio_url: String,
    pub original_file_path: Option<String>,
    pub original_duration: Option<f64>,
    pub cleaned_file_path: Option<String>,
    pub cleaned_duration: Option<f64>,
    pub cleaned_file_size: Option<i64>,
    pub cleaned_ready_at: Option<String>,
    pub chapters_json: Option<String>,
    pub ad_segments_json: Option<String>,
    pub cleaned_chapters_json: Option<String>,
    pub fast_transcript_json: Option<String>,
    pub transcript_json: Option<String>,
    pub md_transcript_file_path: Option<String>,
    pub status: EpisodeStatus,
    pub retry_count: i32,
    pub full_retry_count: i32,
    pub last_error: Option<String>,
    pub added_date: String,
}

/// Episode record as produced by the feed collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEpisode {
    pub source_guid: String,
    pub show_name: String,
    pub title: String,
    pub pub_date: DateTime<Utc>,
    pub original_audio_url: String,
    #[serde(default)]
    pub original_duration: Option<f64>,
    #[serde(default)]
    pub chapters_json: Option<String>,
}

/// Everything written on a successful cut.
#[derive(Debug, Clone)]
pub struct CutOutcome {
    pub cleaned_file_path: String,
    pub cleaned_duration: f64,
    pub cleaned_file_size: Option<i64>,
    pub ad_segments_json: String,
    pub cleaned_chapters_json: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: EpisodeStatus,
    pub count: i64,
}

// ============================================================================
// Ad cuts, keep segments and chapters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutType {
    Chapter,
    Text,
    Audio,
}

/// A time range classified as advertisement. Persisted as
/// `{"start": .., "end": .., "type": .., "confidence": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdCut {
    pub start: f64,
    pub end: f64,
    #[serde(rename = "type")]
    pub kind: CutType,
    pub confidence: f64,
}

impl AdCut {
    pub fn new(start: f64, end: f64, kind: CutType, confidence: f64) -> Self {
        Self {
            start,
            end,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// A range of original content retained in the output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeepSegment {
    pub start: f64,
    pub end: f64,
}

impl KeepSegment {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A chapter marker. Unknown keys from the source feed (`img`, `url`, ...)
/// are carried through retiming untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub start: f64,
    pub end: f64,
    pub title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Chapter {
    pub fn new(start: f64, end: f64, title: &str) -> Self {
        Self {
            start,
            end,
            title: title.to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

// ============================================================================
// Transcripts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}
