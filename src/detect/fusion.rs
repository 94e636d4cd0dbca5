use std::path::Path;

use super::chapters::{load_chapters_from_json, matches_ad_chapter};
use super::text_rules::TextRules;
use super::windowing::{sliding_windows, Window};
use crate::config::{AppConfig, ShowRules, TimePriors};
use crate::cut::merge_and_pad;
use crate::database::{AdCut, CutType, TranscriptSegment};
use crate::error::PipelineError;
use crate::transcribe::Transcriber;

pub const CHAPTER_CONFIDENCE: f64 = 0.99;
pub const TEXT_CONFIDENCE: f64 = 0.70;

/// Third detection stage: audio-cue / jingle matching. Not enabled by
/// default; an implementation can be attached with
/// [`AdDetector::with_audio_cues`] and runs before the final merge.
pub trait AudioCueDetector: Send + Sync {
    fn detect(&self, audio_path: &Path, rules: &ShowRules) -> Result<Vec<AdCut>, PipelineError>;
}

/// What the detector knows about one episode.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub audio_path: &'a Path,
    pub chapters_json: Option<&'a str>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStage {
    /// Confident chapter markers; no transcription was run.
    Chapters,
    /// Chapter markers were absent or not confident enough.
    Transcript,
}

#[derive(Debug, Clone)]
pub struct Detection {
    /// Merged and padded, sorted by start.
    pub cuts: Vec<AdCut>,
    pub stage: DetectionStage,
    pub fast_transcript: Option<Vec<TranscriptSegment>>,
}

/// Signal fusion detector. Escalates from chapter markers to a fast
/// transcription pass only when the chapter stage is not conclusive.
pub struct AdDetector<'a, T: Transcriber> {
    transcriber: &'a T,
    audio_cues: Option<&'a dyn AudioCueDetector>,
}

impl<'a, T: Transcriber> AdDetector<'a, T> {
    pub fn new(transcriber: &'a T) -> Self {
        Self {
            transcriber,
            audio_cues: None,
        }
    }

    pub fn with_audio_cues(mut self, detector: &'a dyn AudioCueDetector) -> Self {
        self.audio_cues = Some(detector);
        self
    }

    /// Detect ad cuts for one episode. Collaborator failures degrade to
    /// "no ads" for that signal and never fail the detection.
    pub async fn detect(
        &self,
        input: DetectionInput<'_>,
        config: &AppConfig,
        rules: &ShowRules,
    ) -> Detection {
        let detector = &config.detector;
        let padding = detector.padding_seconds;

        let chapter_cuts = if detector.use_chapters {
            input.chapters_json.map(chapter_cuts).unwrap_or_default()
        } else {
            Vec::new()
        };

        if !chapter_cuts.is_empty()
            && chapter_cuts
                .iter()
                .all(|c| c.confidence >= config.min_confidence)
        {
            log::info!(
                "Chapter markers flagged {} ad cuts, skipping transcript analysis",
                chapter_cuts.len()
            );
            return Detection {
                cuts: merge_and_pad(&chapter_cuts, padding),
                stage: DetectionStage::Chapters,
                fast_transcript: None,
            };
        }

        let mut text_cuts = Vec::new();
        let mut fast_transcript = None;
        if detector.use_text_rules {
            match self.fast_transcript(input.audio_path, config).await {
                Ok(segments) => {
                    let text_rules = TextRules::new(rules);
                    let priors = detector.priors.overlay(&rules.time_priors);
                    let required = rules.effective_require_signals(detector.require_signals);
                    text_cuts = score_windows(
                        sliding_windows(&segments, detector.window_seconds, detector.step_seconds),
                        &text_rules,
                        &priors,
                        input.duration,
                        required,
                    );
                    log::info!(
                        "Transcript analysis found {} ad windows (require_signals = {})",
                        text_cuts.len(),
                        required
                    );
                    fast_transcript = Some(segments);
                }
                Err(e) => log::warn!("{}; treating as no ads found", e),
            }
        }

        let mut audio_cuts = Vec::new();
        if detector.use_audio_cues {
            match self.audio_cues {
                Some(cues) => match cues.detect(input.audio_path, rules) {
                    Ok(cuts) => audio_cuts = cuts,
                    Err(e) => log::warn!("Audio cue detection failed: {}", e),
                },
                None => log::debug!("Audio cues enabled but no detector is attached"),
            }
        }

        let all: Vec<AdCut> = chapter_cuts
            .into_iter()
            .chain(text_cuts)
            .chain(audio_cuts)
            .collect();

        Detection {
            cuts: merge_and_pad(&all, padding),
            stage: DetectionStage::Transcript,
            fast_transcript,
        }
    }

    async fn fast_transcript(
        &self,
        audio_path: &Path,
        config: &AppConfig,
    ) -> Result<Vec<TranscriptSegment>, PipelineError> {
        let segments = self
            .transcriber
            .transcribe(audio_path, &config.fast_pass)
            .await
            .map_err(|e| PipelineError::DetectionFailure(e.to_string()))?;
        if segments.is_empty() {
            return Err(PipelineError::DetectionFailure(
                "fast transcription returned no segments".to_string(),
            ));
        }
        Ok(segments)
    }
}

/// One cut per flagged ad chapter.
pub fn chapter_cuts(chapters_json: &str) -> Vec<AdCut> {
    load_chapters_from_json(chapters_json)
        .iter()
        .filter(|c| matches_ad_chapter(&c.title))
        .map(|c| AdCut::new(c.start, c.end, CutType::Chapter, CHAPTER_CONFIDENCE))
        .collect()
}

/// Number of signals firing for a window: phrase match, URL/price match and
/// the window start lying in a time prior.
pub fn window_score(
    window: &Window,
    rules: &TextRules,
    priors: &TimePriors,
    duration: Option<f64>,
) -> u32 {
    let mut score = 0;
    if rules.phrase_match(&window.text) {
        score += 1;
    }
    if rules.url_or_price_match(&window.text) {
        score += 1;
    }
    if priors.contains(window.start, duration) {
        score += 1;
    }
    score
}

fn score_windows(
    windows: impl Iterator<Item = Window>,
    rules: &TextRules,
    priors: &TimePriors,
    duration: Option<f64>,
    required: u32,
) -> Vec<AdCut> {
    windows
        .filter(|w| window_score(w, rules, priors, duration) >= required)
        .map(|w| AdCut::new(w.start, w.end, CutType::Text, TEXT_CONFIDENCE))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Aggressiveness;
    use crate::test_support::{spoken, CountingTranscriber};

    const AD_CHAPTERS: &str = r#"[
        {"start": 0, "end": 30, "title": "Intro"},
        {"start": 30, "end": 90, "title": "Sponsor Break"},
        {"start": 90, "end": 600, "title": "Interview"}
    ]"#;

    fn input(chapters_json: Option<&str>) -> DetectionInput<'_> {
        DetectionInput {
            audio_path: Path::new("episode.mp3"),
            chapters_json,
            duration: Some(3600.0),
        }
    }

    fn sponsor_read() -> Vec<TranscriptSegment> {
        vec![
            spoken(300.0, "and that is why the weather matters so much"),
            spoken(600.0, "This episode is brought to you by Acme. Visit acme.com today."),
            spoken(900.0, "back to the interview now"),
        ]
    }

    struct FixedCues(Vec<AdCut>);

    impl AudioCueDetector for FixedCues {
        fn detect(&self, _: &Path, _: &ShowRules) -> Result<Vec<AdCut>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_confident_chapters_skip_transcription() {
        let transcriber = CountingTranscriber::returning(sponsor_read());
        let detector = AdDetector::new(&transcriber);
        let config = AppConfig::default();

        let detection = detector
            .detect(input(Some(AD_CHAPTERS)), &config, &ShowRules::default())
            .await;

        assert_eq!(transcriber.calls(), 0);
        assert_eq!(detection.stage, DetectionStage::Chapters);
        assert!(detection.fast_transcript.is_none());
        assert_eq!(detection.cuts.len(), 1);
        assert_eq!((detection.cuts[0].start, detection.cuts[0].end), (22.0, 98.0));
        assert_eq!(detection.cuts[0].kind, CutType::Chapter);
    }

    #[tokio::test]
    async fn test_unconfident_chapters_escalate() {
        let transcriber = CountingTranscriber::returning(sponsor_read());
        let detector = AdDetector::new(&transcriber);
        let config = AppConfig {
            min_confidence: 1.0,
            ..AppConfig::default()
        };

        let detection = detector
            .detect(input(Some(AD_CHAPTERS)), &config, &ShowRules::default())
            .await;

        assert_eq!(transcriber.calls(), 1);
        assert_eq!(detection.stage, DetectionStage::Transcript);
        // Chapter cut and the sponsor read both survive the merge
        assert_eq!(detection.cuts.len(), 2);
        assert_eq!(detection.cuts[0].kind, CutType::Chapter);
        assert_eq!(detection.cuts[1].kind, CutType::Text);
    }

    #[tokio::test]
    async fn test_transcript_windows_need_two_signals() {
        let transcriber = CountingTranscriber::returning(sponsor_read());
        let detector = AdDetector::new(&transcriber);
        let config = AppConfig::default();

        let detection = detector
            .detect(input(None), &config, &ShowRules::default())
            .await;

        assert_eq!(transcriber.calls(), 1);
        assert_eq!(detection.cuts.len(), 1);
        let cut = detection.cuts[0];
        assert_eq!(cut.kind, CutType::Text);
        assert_eq!(cut.confidence, TEXT_CONFIDENCE);
        assert!(cut.start <= 600.0 - 8.0 + 1e-9);
        assert!(cut.end >= 605.0);
        assert!(cut.end < 900.0);
        assert_eq!(detection.fast_transcript.map(|t| t.len()), Some(3));
    }

    #[tokio::test]
    async fn test_time_prior_counts_as_signal() {
        // Only a phrase match, but inside the pre-roll region
        let transcriber =
            CountingTranscriber::returning(vec![spoken(20.0, "thanks to our sponsor for this")]);
        let detector = AdDetector::new(&transcriber);
        let detection = detector
            .detect(input(None), &AppConfig::default(), &ShowRules::default())
            .await;
        assert_eq!(detection.cuts.len(), 1);
        assert_eq!(detection.cuts[0].start, 12.0);
    }

    #[tokio::test]
    async fn test_single_signal_needs_aggressive_show() {
        let transcriber =
            CountingTranscriber::returning(vec![spoken(1000.0, "use code podcast at checkout")]);
        let detector = AdDetector::new(&transcriber);
        let config = AppConfig::default();

        let conservative = detector.detect(input(None), &config, &ShowRules::default()).await;
        assert!(conservative.cuts.is_empty());

        let aggressive = ShowRules {
            aggressiveness: Aggressiveness::Aggressive,
            ..ShowRules::default()
        };
        let detection = detector.detect(input(None), &config, &aggressive).await;
        assert_eq!(detection.cuts.len(), 1);
    }

    #[tokio::test]
    async fn test_transcription_failure_means_no_ads() {
        let transcriber = CountingTranscriber::failing("model not found");
        let detector = AdDetector::new(&transcriber);
        let detection = detector
            .detect(input(None), &AppConfig::default(), &ShowRules::default())
            .await;
        assert_eq!(transcriber.calls(), 1);
        assert!(detection.cuts.is_empty());
        assert!(detection.fast_transcript.is_none());

        let empty = CountingTranscriber::returning(Vec::new());
        let detection = AdDetector::new(&empty)
            .detect(input(None), &AppConfig::default(), &ShowRules::default())
            .await;
        assert!(detection.cuts.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_signals() {
        let transcriber = CountingTranscriber::returning(sponsor_read());
        let detector = AdDetector::new(&transcriber);
        let mut config = AppConfig::default();
        config.detector.use_chapters = false;
        config.detector.use_text_rules = false;

        let detection = detector
            .detect(input(Some(AD_CHAPTERS)), &config, &ShowRules::default())
            .await;
        assert_eq!(transcriber.calls(), 0);
        assert!(detection.cuts.is_empty());
    }

    #[tokio::test]
    async fn test_audio_cues_join_final_merge() {
        let transcriber = CountingTranscriber::returning(Vec::new());
        let cues = FixedCues(vec![AdCut::new(1200.0, 1230.0, CutType::Audio, 0.8)]);
        let mut config = AppConfig::default();
        config.detector.use_audio_cues = true;

        let detection = AdDetector::new(&transcriber)
            .with_audio_cues(&cues)
            .detect(input(None), &config, &ShowRules::default())
            .await;
        assert_eq!(detection.cuts.len(), 1);
        assert_eq!(detection.cuts[0].kind, CutType::Audio);
        assert_eq!((detection.cuts[0].start, detection.cuts[0].end), (1192.0, 1238.0));
    }
}
