use crate::database::{Chapter, KeepSegment};
use crate::detect::chapters::filter_ad_chapters;

/// Map chapter timestamps from the original timeline onto the cleaned one.
///
/// Keep segments are walked in order with a running offset (the kept time
/// before the segment). A start resolves in the segment where
/// `seg.start <= start < seg.end`, an end where `seg.start < end <= seg.end`.
/// Chapters that never resolve both ends lie inside removed audio and are
/// dropped. When spanning several segments leaves `end < start`, the end is
/// approximated from the original chapter length.
///
/// This is the exact retiming rule with no snapping. The cut stage goes
/// through [`retime_chapters`], which snaps boundaries before applying it.
pub fn adjust_chapters_after_cut(chapters: &[Chapter], keeps: &[KeepSegment]) -> Vec<Chapter> {
    let mut adjusted = Vec::with_capacity(chapters.len());

    for chapter in chapters {
        let mut new_start: Option<f64> = None;
        let mut new_end: Option<f64> = None;
        let mut offset = 0.0;

        for keep in keeps {
            if keep.start <= chapter.start && chapter.start < keep.end {
                new_start = Some(offset + (chapter.start - keep.start));
            }
            if keep.start < chapter.end && chapter.end <= keep.end {
                new_end = Some(offset + (chapter.end - keep.start));
            }

            if let (Some(start), Some(mut end)) = (new_start, new_end) {
                if end < start {
                    end = start + (chapter.end - chapter.start);
                }
                adjusted.push(Chapter {
                    start,
                    end,
                    ..chapter.clone()
                });
                break;
            }

            offset += keep.duration();
        }
    }

    adjusted
}

/// Move a boundary that lies in removed audio onto the nearest kept edge
/// inside the chapter. `None` when nothing of the chapter is kept.
/// `keeps` must be sorted.
fn snap_to_keeps(chapter: &Chapter, keeps: &[KeepSegment]) -> Option<Chapter> {
    let start = if keeps
        .iter()
        .any(|k| k.start <= chapter.start && chapter.start < k.end)
    {
        chapter.start
    } else {
        keeps.iter().find(|k| k.start >= chapter.start)?.start
    };
    let end = if keeps
        .iter()
        .any(|k| k.start < chapter.end && chapter.end <= k.end)
    {
        chapter.end
    } else {
        keeps.iter().rev().find(|k| k.end <= chapter.end)?.end
    };

    (start < end).then(|| Chapter {
        start,
        end,
        ..chapter.clone()
    })
}

/// Drop ad chapters, then retime the rest onto the cleaned timeline.
///
/// Padding around a cut usually eats into the neighbouring chapters, so
/// boundaries inside removed audio are first snapped to the kept edge.
/// Chapters whose boundaries already sit in kept audio retime exactly as
/// [`adjust_chapters_after_cut`] would.
pub fn retime_chapters(chapters: &[Chapter], keeps: &[KeepSegment]) -> Vec<Chapter> {
    let snapped: Vec<Chapter> = filter_ad_chapters(chapters)
        .iter()
        .filter_map(|c| snap_to_keeps(c, keeps))
        .collect();
    adjust_chapters_after_cut(&snapped, keeps)
}
