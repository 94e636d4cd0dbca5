use crate::database::{TranscriptSegment, Word};

/// A slice of transcript covering the words fully inside
/// `[cursor, cursor + size)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub words: Vec<Word>,
}

/// Lazy sliding windows over word timestamps.
///
/// Words from every segment are flattened and sorted by start time; the
/// early exit in `next` relies on that order. A word belongs to a window
/// when `word.start >= cursor` and `word.end <= cursor + size`. Windows with
/// no contained words are skipped. Iteration ends once the cursor reaches
/// the end time of the last word.
pub struct TranscriptWindows {
    words: Vec<Word>,
    size: f64,
    step: f64,
    cursor: f64,
    last_end: f64,
    // First word whose start is not before the cursor
    lower: usize,
}

impl TranscriptWindows {
    pub fn new(segments: &[TranscriptSegment], size: f64, step: f64) -> Self {
        let mut words: Vec<Word> = segments
            .iter()
            .flat_map(|s| s.words.iter().cloned())
            .filter(|w| w.start.is_finite() && w.end.is_finite())
            .collect();
        words.sort_by(|a, b| a.start.total_cmp(&b.start));
        let last_end = words.iter().map(|w| w.end).fold(0.0, f64::max);

        Self {
            words,
            size,
            step,
            cursor: 0.0,
            last_end,
            lower: 0,
        }
    }
}

impl Iterator for TranscriptWindows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.step <= 0.0 || self.size <= 0.0 {
            return None;
        }

        while self.cursor < self.last_end {
            let window_start = self.cursor;
            let window_end = self.cursor + self.size;
            self.cursor += self.step;

            while self.lower < self.words.len() && self.words[self.lower].start < window_start {
                self.lower += 1;
            }

            let mut contained = Vec::new();
            for word in &self.words[self.lower..] {
                if word.start >= window_end {
                    break;
                }
                if word.end <= window_end {
                    contained.push(word.clone());
                }
            }

            if contained.is_empty() {
                continue;
            }

            let start = contained
                .iter()
                .map(|w| w.start)
                .fold(f64::INFINITY, f64::min);
            let end = contained
                .iter()
                .map(|w| w.end)
                .fold(f64::NEG_INFINITY, f64::max);
            let text = contained
                .iter()
                .map(|w| w.word.trim())
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            return Some(Window {
                text,
                start,
                end,
                words: contained,
            });
        }

        None
    }
}

/// Windows of `size` seconds every `step` seconds.
pub fn sliding_windows(segments: &[TranscriptSegment], size: f64, step: f64) -> TranscriptWindows {
    TranscriptWindows::new(segments, size, step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(w: &str, start: f64, end: f64) -> Word {
        Word {
            word: w.to_string(),
            start,
            end,
            probability: None,
        }
    }

    fn segment(words: Vec<Word>) -> TranscriptSegment {
        TranscriptSegment {
            start: words.first().map(|w| w.start).unwrap_or(0.0),
            end: words.last().map(|w| w.end).unwrap_or(0.0),
            text: String::new(),
            words,
            speaker: None,
        }
    }

    #[test]
    fn test_empty_transcript_yields_nothing() {
        assert_eq!(sliding_windows(&[], 20.0, 5.0).count(), 0);
    }

    #[test]
    fn test_words_flattened_and_sorted_across_segments() {
        let segments = vec![
            segment(vec![word(" world", 1.0, 1.5)]),
            segment(vec![word(" hello", 0.0, 0.5)]),
        ];
        let first = sliding_windows(&segments, 20.0, 5.0).next().unwrap();
        assert_eq!(first.text, "hello world");
        assert_eq!(first.start, 0.0);
        assert_eq!(first.end, 1.5);
    }

    #[test]
    fn test_containment_boundaries() {
        // Ends exactly at the window edge: inside. Straddles it: outside.
        let segments = vec![segment(vec![
            word("a", 0.0, 1.0),
            word("b", 9.5, 10.0),
            word("c", 9.8, 10.2),
        ])];
        let first = sliding_windows(&segments, 10.0, 10.0).next().unwrap();
        let texts: Vec<&str> = first.words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_windows_are_skipped() {
        // Gap between 2s and 40s: cursors 5..15 would be empty windows
        let segments = vec![segment(vec![word("intro", 0.0, 2.0), word("outro", 40.0, 41.0)])];
        let windows: Vec<Window> = sliding_windows(&segments, 10.0, 5.0).collect();
        assert!(windows.iter().all(|w| !w.words.is_empty()));
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].text, "intro");
        assert_eq!(windows[1].text, "outro");
        assert_eq!(windows[1].start, 40.0);
    }

    #[test]
    fn test_overlapping_windows_advance_by_step() {
        let words: Vec<Word> = (0..30)
            .map(|i| word("w", i as f64, i as f64 + 0.5))
            .collect();
        let windows: Vec<Window> = sliding_windows(&[segment(words)], 20.0, 5.0).collect();
        // cursor 0, 5, 10, 15, 20, 25 (stops once cursor >= 29.5)
        assert_eq!(windows.len(), 6);
        assert_eq!(windows[0].words.len(), 20);
        assert_eq!(windows[1].start, 5.0);
        assert_eq!(windows[5].start, 25.0);
        assert_eq!(windows[5].words.len(), 5);
    }

    #[test]
    fn test_long_early_word_ends_the_last_window() {
        // "sponsored" starts first but ends after the last-starting word
        let segments = vec![segment(vec![
            word("sponsored", 0.0, 12.0),
            word("hi", 1.0, 1.5),
        ])];
        let windows: Vec<Window> = sliding_windows(&segments, 15.0, 5.0).collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, "sponsored hi");
        assert_eq!(windows[0].end, 12.0);
    }
}
