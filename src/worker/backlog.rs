use std::collections::BTreeMap;

use super::lifecycle::{is_eligible, Stage};
use crate::config::{AppConfig, BacklogConfig, BacklogStrategy, ShowRules};
use crate::database::{Database, Episode, EpisodeStatus};
use crate::error::AppError;

/// Strategy and N for one show: show rules override the global setting.
pub fn effective_strategy(global: &BacklogConfig, rules: &ShowRules) -> (BacklogStrategy, usize) {
    (
        rules.backlog_strategy.unwrap_or(global.strategy),
        rules
            .last_n_episodes_count
            .unwrap_or(global.last_n_episodes_count),
    )
}

/// Pick the episodes of one show that get the full transcription pass.
///
/// Only eligible episodes count (cut and never transcribed, or a failed
/// transcription still under the retry limit). The result is newest first.
pub fn select_for_show<'a>(
    episodes: &'a [Episode],
    strategy: BacklogStrategy,
    last_n: usize,
    max_retries: i32,
) -> Vec<&'a Episode> {
    let mut eligible: Vec<&Episode> = episodes
        .iter()
        .filter(|e| is_eligible(e, Stage::FullTranscription, max_retries))
        .collect();
    eligible.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    let limit = match strategy {
        BacklogStrategy::All => eligible.len(),
        BacklogStrategy::NewestOnly => 1,
        BacklogStrategy::LastNEpisodes => last_n,
    };
    eligible.truncate(limit);
    eligible
}

/// Backlog selection over every show, evaluated per show independently.
pub fn select_backlog(db: &Database, config: &AppConfig) -> Result<Vec<Episode>, AppError> {
    let candidates = db.get_episodes_by_status(&Stage::FullTranscription.scheduled_from())?;

    let mut by_show: BTreeMap<String, Vec<Episode>> = BTreeMap::new();
    for episode in candidates {
        by_show
            .entry(episode.show_name.clone())
            .or_default()
            .push(episode);
    }

    let mut selected = Vec::new();
    for (show, episodes) in &by_show {
        let rules = config.show_rules(show).unwrap_or_else(|e| {
            log::warn!("Invalid rules for show '{}', using defaults: {}", show, e);
            ShowRules::default()
        });
        let (strategy, last_n) = effective_strategy(&config.backlog_processing, &rules);
        let picked = select_for_show(episodes, strategy, last_n, config.max_processing_retries);
        log::info!(
            "Backlog for '{}': {} of {} candidates ({:?})",
            show,
            picked.len(),
            episodes.len(),
            strategy
        );
        selected.extend(picked.into_iter().cloned());
    }
    Ok(selected)
}

/// Episodes waiting for the cut stage, by show and newest first.
pub fn select_cut_candidates(db: &Database, config: &AppConfig) -> Result<Vec<Episode>, AppError> {
    let candidates = db.get_episodes_by_status(&[
        EpisodeStatus::Downloaded,
        EpisodeStatus::ProcessingFailed,
    ])?;
    Ok(candidates
        .into_iter()
        .filter(|e| is_eligible(e, Stage::Cut, config.max_processing_retries))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn episode(show: &str, n: i64, status: EpisodeStatus, full_retries: i32) -> Episode {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Episode {
            source_guid: format!("{}-{}", show, n),
            show_name: show.to_string(),
            title: format!("{} #{}", show, n),
            pub_date: base + Duration::days(n),
            status,
            full_retry_count: full_retries,
            ..Episode::default()
        }
    }

    fn five_cut(show: &str) -> Vec<Episode> {
        (1..=5)
            .map(|n| episode(show, n, EpisodeStatus::CutReadyForServing, 0))
            .collect()
    }

    fn guids(selected: &[&Episode]) -> Vec<String> {
        selected.iter().map(|e| e.source_guid.clone()).collect()
    }

    #[test]
    fn test_last_n_picks_most_recent_per_show() {
        for show in ["alpha", "beta"] {
            let episodes = five_cut(show);
            let picked = select_for_show(&episodes, BacklogStrategy::LastNEpisodes, 2, 3);
            assert_eq!(
                guids(&picked),
                vec![format!("{}-5", show), format!("{}-4", show)]
            );
        }
    }

    #[test]
    fn test_newest_only_and_all() {
        let episodes = five_cut("alpha");
        let newest = select_for_show(&episodes, BacklogStrategy::NewestOnly, 2, 3);
        assert_eq!(guids(&newest), vec!["alpha-5"]);
        let all = select_for_show(&episodes, BacklogStrategy::All, 2, 3);
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].source_guid, "alpha-5");
    }

    #[test]
    fn test_only_eligible_episodes_count() {
        let episodes = vec![
            episode("alpha", 9, EpisodeStatus::Transcribed, 1),
            episode("alpha", 8, EpisodeStatus::FullTranscriptionFailed, 3),
            episode("alpha", 7, EpisodeStatus::FullTranscriptionFailed, 1),
            episode("alpha", 6, EpisodeStatus::Processing, 0),
            episode("alpha", 5, EpisodeStatus::CutReadyForServing, 0),
            episode("alpha", 4, EpisodeStatus::CutReadyForServing, 0),
        ];
        let picked = select_for_show(&episodes, BacklogStrategy::LastNEpisodes, 2, 3);
        assert_eq!(guids(&picked), vec!["alpha-7", "alpha-5"]);
    }

    #[test]
    fn test_show_rules_override_global_strategy() {
        let global = BacklogConfig::default();
        let rules = ShowRules {
            backlog_strategy: Some(BacklogStrategy::LastNEpisodes),
            last_n_episodes_count: Some(2),
            ..ShowRules::default()
        };
        assert_eq!(
            effective_strategy(&global, &rules),
            (BacklogStrategy::LastNEpisodes, 2)
        );
        assert_eq!(
            effective_strategy(&global, &ShowRules::default()),
            (BacklogStrategy::All, 5)
        );
    }
}
