pub mod merge;
pub mod show_rules;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AppError;
use merge::set_path;

pub use show_rules::{load_show_rules, show_slug, Aggressiveness, ShowRules};

// ============================================================================
// Detector
// ============================================================================

/// Mid-roll prior expressed as fractions of the episode duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidRollPrior {
    pub start_pct: f64,
    pub end_pct: f64,
}

/// Regions of an episode that are more likely to carry ads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TimePriors {
    pub pre_roll_max_s: Option<f64>,
    pub post_roll_last_s: Option<f64>,
    pub mid_roll: Option<MidRollPrior>,
}

impl TimePriors {
    /// Field-wise override: any region set in `other` wins.
    pub fn overlay(&self, other: &TimePriors) -> TimePriors {
        TimePriors {
            pre_roll_max_s: other.pre_roll_max_s.or(self.pre_roll_max_s),
            post_roll_last_s: other.post_roll_last_s.or(self.post_roll_last_s),
            mid_roll: other.mid_roll.or(self.mid_roll),
        }
    }

    /// Whether `timestamp` falls inside any configured region. Regions that
    /// depend on the duration are skipped when it is unknown.
    pub fn contains(&self, timestamp: f64, duration: Option<f64>) -> bool {
        if let Some(max) = self.pre_roll_max_s {
            if timestamp <= max {
                return true;
            }
        }
        let Some(duration) = duration else {
            return false;
        };
        if let Some(last) = self.post_roll_last_s {
            if timestamp >= duration - last {
                return true;
            }
        }
        if let Some(mid) = self.mid_roll {
            if timestamp >= mid.start_pct * duration && timestamp <= mid.end_pct * duration {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub use_chapters: bool,
    pub use_text_rules: bool,
    /// Audio-cue matching is an extension point only.
    pub use_audio_cues: bool,
    pub require_signals: u32,
    pub padding_seconds: f64,
    pub window_seconds: f64,
    pub step_seconds: f64,
    pub priors: TimePriors,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            use_chapters: true,
            use_text_rules: true,
            use_audio_cues: false,
            require_signals: 2,
            padding_seconds: 8.0,
            window_seconds: 20.0,
            step_seconds: 5.0,
            priors: TimePriors {
                pre_roll_max_s: Some(90.0),
                post_roll_last_s: Some(120.0),
                mid_roll: Some(MidRollPrior {
                    start_pct: 0.4,
                    end_pct: 0.6,
                }),
            },
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Options passed to the transcription collaborator for one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeOptions {
    pub model: String,
    pub vad: bool,
    pub beam_size: u32,
    pub word_timestamps: bool,
}

impl TranscribeOptions {
    pub fn fast() -> Self {
        Self {
            model: "small".to_string(),
            vad: true,
            beam_size: 1,
            word_timestamps: true,
        }
    }

    pub fn full() -> Self {
        Self {
            model: "medium".to_string(),
            vad: true,
            beam_size: 2,
            word_timestamps: true,
        }
    }
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self::fast()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: String,
    pub bitrate: String,
    pub normalize_loudness: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: "mp3".to_string(),
            bitrate: "v4".to_string(),
            normalize_loudness: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub cli_path: PathBuf,
    pub models_path: PathBuf,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let root = home.join("bin").join("whisper-cpp").join("whisper.cpp");
        Self {
            cli_path: root.join("build").join("bin").join("whisper-cli"),
            models_path: root.join("models"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub transcribe_secs: u64,
    pub encode_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transcribe_secs: 2 * 3600,
            encode_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub retention_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 300,
            retention_interval_secs: 6 * 3600,
        }
    }
}

// ============================================================================
// Retention and backlog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub max_episodes_per_show: usize,
    pub max_days_per_episode: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_episodes_per_show: 10,
            max_days_per_episode: 30,
        }
    }
}

/// Which eligible episodes of a show get the full transcription pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum BacklogStrategy {
    #[default]
    All,
    NewestOnly,
    LastNEpisodes,
}

impl From<String> for BacklogStrategy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "all" => Self::All,
            "newest_only" => Self::NewestOnly,
            "last_n_episodes" => Self::LastNEpisodes,
            other => {
                log::warn!("Unknown backlog strategy '{}', using 'all'", other);
                Self::All
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    pub strategy: BacklogStrategy,
    pub last_n_episodes_count: usize,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            strategy: BacklogStrategy::All,
            last_n_episodes_count: 5,
        }
    }
}

// ============================================================================
// Application config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub media_base_path: PathBuf,
    pub database_path: Option<PathBuf>,
    pub max_parallel_downloads: usize,
    pub max_parallel_transcribe: usize,
    pub fast_pass: TranscribeOptions,
    pub full_pass: TranscribeOptions,
    pub full_pass_enabled: bool,
    pub encoding: EncodingConfig,
    pub detector: DetectorConfig,
    pub min_confidence: f64,
    pub max_processing_retries: i32,
    pub whisper: WhisperConfig,
    pub timeouts: TimeoutConfig,
    pub scheduler: SchedulerConfig,
    pub retention_policy: RetentionPolicy,
    pub backlog_processing: BacklogConfig,
    /// Directory the config was loaded from; show rules live below it.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media_base_path: PathBuf::from("./data"),
            database_path: None,
            max_parallel_downloads: 3,
            max_parallel_transcribe: 2,
            fast_pass: TranscribeOptions::fast(),
            full_pass: TranscribeOptions::full(),
            full_pass_enabled: false,
            encoding: EncodingConfig::default(),
            detector: DetectorConfig::default(),
            min_confidence: 0.70,
            max_processing_retries: 3,
            whisper: WhisperConfig::default(),
            timeouts: TimeoutConfig::default(),
            scheduler: SchedulerConfig::default(),
            retention_policy: RetentionPolicy::default(),
            backlog_processing: BacklogConfig::default(),
            config_dir: PathBuf::from("./config"),
        }
    }
}

/// Environment variables and the config key each one overrides.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PODCLEAN_MEDIA_BASE_PATH", "media_base_path"),
    ("PODCLEAN_DATABASE_PATH", "database_path"),
    ("MAX_PARALLEL_DOWNLOADS", "max_parallel_downloads"),
    ("MAX_PARALLEL_TRANSCRIBE", "max_parallel_transcribe"),
    ("FAST_MODEL", "fast_pass.model"),
    ("FAST_VAD", "fast_pass.vad"),
    ("FAST_BEAM", "fast_pass.beam_size"),
    ("FAST_WORD_TS", "fast_pass.word_timestamps"),
    ("FULL_MODEL", "full_pass.model"),
    ("FULL_VAD", "full_pass.vad"),
    ("FULL_BEAM", "full_pass.beam_size"),
    ("FULL_WORD_TS", "full_pass.word_timestamps"),
    ("FULL_PASS_ENABLED", "full_pass_enabled"),
    ("TARGET_CODEC", "encoding.codec"),
    ("TARGET_BITRATE", "encoding.bitrate"),
    ("PADDING_SECONDS", "detector.padding_seconds"),
    ("MIN_CONFIDENCE", "min_confidence"),
    ("MAX_PROCESSING_RETRIES", "max_processing_retries"),
    ("WHISPER_CLI_PATH", "whisper.cli_path"),
    ("WHISPER_MODELS_PATH", "whisper.models_path"),
];

impl AppConfig {
    /// Load `app.yaml` from `config_dir` (missing file means defaults), then
    /// apply environment overrides.
    pub fn load(config_dir: &Path) -> Result<AppConfig, AppError> {
        let path = config_dir.join("app.yaml");
        let mut value = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str::<serde_yaml::Value>(&content)?
        } else {
            log::debug!("No app config at {:?}, using defaults", path);
            serde_yaml::Value::Null
        };
        if value.is_null() {
            value = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }

        for (var, key) in ENV_OVERRIDES {
            if let Some(raw) = load_env_value(Path::new("."), var) {
                // Parse as a YAML scalar so "true" / "3" / "0.7" keep their type
                let parsed = serde_yaml::from_str::<serde_yaml::Value>(&raw)
                    .unwrap_or(serde_yaml::Value::String(raw.clone()));
                let parsed = match parsed {
                    serde_yaml::Value::Null => serde_yaml::Value::String(raw),
                    other => other,
                };
                set_path(&mut value, key, parsed);
            }
        }

        let mut config: AppConfig = serde_yaml::from_value(value)?;
        config.config_dir = config_dir.to_path_buf();
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.min_confidence = self.min_confidence.clamp(0.0, 1.0);
        self.max_processing_retries = self.max_processing_retries.max(1);
        self.detector.require_signals = self.detector.require_signals.max(1);
        self.detector.padding_seconds = self.detector.padding_seconds.max(0.0);
        if self.detector.window_seconds <= 0.0 {
            self.detector.window_seconds = 20.0;
        }
        if self.detector.step_seconds <= 0.0 {
            self.detector.step_seconds = 5.0;
        }
        self.max_parallel_transcribe = self.max_parallel_transcribe.max(1);
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.media_base_path.join("podclean.db"))
    }

    pub fn cleaned_dir(&self) -> PathBuf {
        self.media_base_path.join("cleaned")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.media_base_path.join("transcripts")
    }

    pub fn show_rules(&self, show_name: &str) -> Result<ShowRules, AppError> {
        load_show_rules(&self.config_dir, Some(show_name))
    }
}

/// Config directory: `PODCLEAN_CONFIG_DIR`, else `./config` when present,
/// else the platform config directory.
pub fn resolve_config_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("PODCLEAN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let local = PathBuf::from("./config");
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|d| d.join("podclean"))
        .unwrap_or(local)
}

/// Look up `key` in the process environment, then in `<dir>/.env`.
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix(&prefix)?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}
