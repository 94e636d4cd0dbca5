pub mod chapters;
pub mod fusion;
pub mod text_rules;
pub mod windowing;

pub use chapters::{load_chapters_from_json, matches_ad_chapter};
pub use fusion::{AdDetector, AudioCueDetector, Detection, DetectionInput, DetectionStage};
pub use text_rules::{contains_phrases, has_url_or_price, TextRules};
pub use windowing::{sliding_windows, Window};
