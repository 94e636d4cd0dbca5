use crate::database::{AdCut, KeepSegment};

/// Cuts closer than this are treated as contiguous, and gaps shorter than
/// this are not worth keeping.
pub const EPSILON: f64 = 0.001;

fn sort_by_start(cuts: &mut [AdCut]) {
    cuts.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));
}

/// Widen every cut by `padding` seconds on both sides (never below zero) and
/// merge any cut that starts at or before the end of the previous one.
///
/// The merged cut keeps the type of its earliest member and the highest
/// confidence of all members.
pub fn merge_and_pad(cuts: &[AdCut], padding: f64) -> Vec<AdCut> {
    let padding = padding.max(0.0);
    let mut padded: Vec<AdCut> = cuts
        .iter()
        .filter(|c| c.start.is_finite() && c.end.is_finite())
        .map(|c| AdCut {
            start: (c.start.min(c.end) - padding).max(0.0),
            end: c.end.max(c.start) + padding,
            ..*c
        })
        .collect();
    sort_by_start(&mut padded);

    let mut merged: Vec<AdCut> = Vec::with_capacity(padded.len());
    for cut in padded {
        match merged.last_mut() {
            Some(last) if cut.start <= last.end => {
                last.end = last.end.max(cut.end);
                last.confidence = last.confidence.max(cut.confidence);
            }
            _ => merged.push(cut),
        }
    }
    merged
}

/// Complement of `cuts` within `[0, duration]`.
///
/// Cuts are sorted and merged (overlapping or within [`EPSILON`] of each
/// other), then the gaps between them are emitted in order. Gaps no longer
/// than [`EPSILON`] are dropped. With no cuts the whole episode is kept.
pub fn build_keep_segments(duration: f64, cuts: &[AdCut]) -> Vec<KeepSegment> {
    let duration = duration.max(0.0);

    let mut sorted: Vec<AdCut> = cuts
        .iter()
        .filter(|c| c.start.is_finite() && c.end.is_finite())
        .map(|c| AdCut {
            start: c.start.clamp(0.0, duration),
            end: c.end.clamp(0.0, duration),
            ..*c
        })
        .filter(|c| c.end > c.start)
        .collect();
    sort_by_start(&mut sorted);

    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(sorted.len());
    for cut in &sorted {
        match merged.last_mut() {
            Some(last) if cut.start <= last.1 + EPSILON => last.1 = last.1.max(cut.end),
            _ => merged.push((cut.start, cut.end)),
        }
    }

    let mut keeps = Vec::with_capacity(merged.len() + 1);
    let mut cursor = 0.0_f64;
    for (start, end) in merged {
        if start - cursor > EPSILON {
            keeps.push(KeepSegment::new(cursor, start));
        }
        cursor = cursor.max(end);
    }
    if duration - cursor > EPSILON {
        keeps.push(KeepSegment::new(cursor, duration));
    }
    keeps
}

/// Length of the cleaned output.
pub fn kept_duration(keeps: &[KeepSegment]) -> f64 {
    keeps.iter().map(KeepSegment::duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::CutType;

    fn cut(start: f64, end: f64) -> AdCut {
        AdCut::new(start, end, CutType::Text, 0.7)
    }

    fn pairs(keeps: &[KeepSegment]) -> Vec<(f64, f64)> {
        keeps.iter().map(|k| (k.start, k.end)).collect()
    }

    #[test]
    fn test_keep_segments_with_overlap() {
        let cuts = [cut(10.0, 20.0), cut(18.0, 25.0), cut(100.0, 120.0), cut(250.0, 260.0)];
        assert_eq!(
            pairs(&build_keep_segments(300.0, &cuts)),
            vec![(0.0, 10.0), (25.0, 100.0), (120.0, 250.0), (260.0, 300.0)]
        );
    }

    #[test]
    fn test_keep_segments_without_overlap() {
        let cuts = [cut(10.0, 20.0), cut(30.0, 40.0)];
        assert_eq!(
            pairs(&build_keep_segments(300.0, &cuts)),
            vec![(0.0, 10.0), (20.0, 30.0), (40.0, 300.0)]
        );
    }

    #[test]
    fn test_keep_segments_no_cuts() {
        assert_eq!(pairs(&build_keep_segments(300.0, &[])), vec![(0.0, 300.0)]);
    }

    #[test]
    fn test_unsorted_and_edge_cuts() {
        let cuts = [cut(280.0, 400.0), cut(0.0, 5.0), cut(5.0005, 12.0)];
        assert_eq!(pairs(&build_keep_segments(300.0, &cuts)), vec![(12.0, 280.0)]);
    }

    #[test]
    fn test_keeps_and_cuts_cover_duration() {
        let duration = 1800.0;
        let cut_lists = vec![
            vec![cut(0.0, 60.0)],
            vec![cut(100.0, 160.5), cut(900.25, 960.0), cut(1700.0, 1800.0)],
            vec![cut(10.0, 20.0), cut(20.0, 30.0)],
            vec![cut(400.0, 401.0), cut(1200.0, 1290.0)],
        ];

        for cuts in cut_lists {
            let keeps = build_keep_segments(duration, &cuts);
            for pair in keeps.windows(2) {
                assert!(pair[0].end <= pair[1].start, "not sorted/disjoint: {:?}", keeps);
            }
            for k in &keeps {
                for c in &cuts {
                    assert!(k.end <= c.start || k.start >= c.end, "{:?} overlaps {:?}", k, c);
                }
            }
            let cut_total: f64 = cuts.iter().map(|c| c.end - c.start).sum();
            assert!((kept_duration(&keeps) + cut_total - duration).abs() < 1e-6);
        }
    }

    #[test]
    fn test_complement_round_trip() {
        let cuts = [cut(10.0, 20.0), cut(30.0, 40.0), cut(120.0, 150.0)];
        let keeps = build_keep_segments(300.0, &cuts);
        let gaps: Vec<AdCut> = keeps.iter().map(|k| cut(k.start, k.end)).collect();
        assert_eq!(
            pairs(&build_keep_segments(300.0, &gaps)),
            vec![(10.0, 20.0), (30.0, 40.0), (120.0, 150.0)]
        );
        // Stable across repeated runs
        assert_eq!(build_keep_segments(300.0, &cuts), keeps);
    }

    #[test]
    fn test_merge_and_pad() {
        let cuts = [
            AdCut::new(100.0, 120.0, CutType::Text, 0.7),
            AdCut::new(3.0, 10.0, CutType::Chapter, 0.99),
            AdCut::new(130.0, 140.0, CutType::Chapter, 0.99),
            AdCut::new(400.0, 410.0, CutType::Text, 0.7),
        ];
        let merged = merge_and_pad(&cuts, 5.0);
        assert_eq!(merged.len(), 3);

        // Left edge clamped at zero
        assert_eq!((merged[0].start, merged[0].end), (0.0, 15.0));
        // 115..125 and 125..145 touch and merge
        assert_eq!((merged[1].start, merged[1].end), (95.0, 145.0));
        assert_eq!(merged[1].kind, CutType::Text);
        assert_eq!(merged[1].confidence, 0.99);
        assert_eq!((merged[2].start, merged[2].end), (395.0, 415.0));
    }

    #[test]
    fn test_merge_and_pad_zero_padding() {
        let merged = merge_and_pad(&[cut(10.0, 20.0), cut(21.0, 30.0)], 0.0);
        assert_eq!(merged.len(), 2);
        assert!(merge_and_pad(&[], 8.0).is_empty());
    }
}
