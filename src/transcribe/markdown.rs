use crate::database::TranscriptSegment;

fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Render a transcript as Markdown, one paragraph per segment:
/// `[HH:MM:SS - HH:MM:SS] text`, prefixed with `**speaker**:` when known.
pub fn format_transcript_markdown(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|segment| {
            let timestamp = format!(
                "[{} - {}]",
                format_clock(segment.start),
                format_clock(segment.end)
            );
            let text = segment.text.trim();
            match segment.speaker.as_deref().filter(|s| !s.is_empty()) {
                Some(speaker) => format!("**{}**: {} {}\n", speaker, timestamp, text),
                None => format!("{} {}\n", timestamp, text),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
