use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::lifecycle::transcript_paths;
use crate::config::{AppConfig, RetentionPolicy};
use crate::database::{Database, Episode, EpisodeStatus};
use crate::error::AppError;

#[derive(Debug, Default, Clone)]
pub struct RetentionReport {
    pub episodes_deleted: usize,
    pub files_deleted: usize,
}

/// Episodes of one show to delete: everything past the newest
/// `max_episodes_per_show`, plus anything published before
/// `now - max_days_per_episode`. A day count too large to subtract from
/// `now` disables the age rule. `episodes` must be newest first.
pub fn plan_retention<'a>(
    episodes: &'a [Episode],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<&'a Episode> {
    let cutoff = Duration::try_days(policy.max_days_per_episode.max(0))
        .and_then(|age| now.checked_sub_signed(age));

    let mut seen = HashSet::new();
    let by_count = episodes.iter().skip(policy.max_episodes_per_show);
    let by_age = episodes.iter().filter(|e| cutoff.is_some_and(|c| e.pub_date < c));

    by_count
        .chain(by_age)
        .filter(|e| seen.insert(e.source_guid.as_str()))
        .collect()
}

/// Files owned by an episode, whether or not they exist.
fn episode_files(config: &AppConfig, episode: &Episode) -> Vec<PathBuf> {
    let (json_path, md_path) = transcript_paths(config, &episode.source_guid);
    let mut files: Vec<PathBuf> = [
        episode.original_file_path.as_deref(),
        episode.cleaned_file_path.as_deref(),
        episode.md_transcript_file_path.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(PathBuf::from)
    .collect();
    files.push(json_path);
    if !files.contains(&md_path) {
        files.push(md_path);
    }
    files
}

fn remove_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::info!("    Deleted {:?}", path);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("    Failed to delete {:?}: {}", path, e);
            false
        }
    }
}

/// Apply the retention policy to every show. Does nothing when the policy
/// is disabled.
pub fn run_retention_sweep(
    db: &Database,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RetentionReport, AppError> {
    let policy = &config.retention_policy;
    let mut report = RetentionReport::default();
    if !policy.enabled {
        log::info!("Retention policy is disabled, skipping sweep");
        return Ok(report);
    }

    log::info!(
        "Running retention sweep: max_episodes_per_show={}, max_days_per_episode={}",
        policy.max_episodes_per_show,
        policy.max_days_per_episode
    );

    for show in db.get_show_names()? {
        let episodes = db.get_episodes_for_show(&show)?;
        let doomed = plan_retention(&episodes, policy, now);
        if doomed.is_empty() {
            continue;
        }
        log::info!("Show '{}': deleting {} of {} episodes", show, doomed.len(), episodes.len());

        for episode in doomed {
            if matches!(
                episode.status,
                EpisodeStatus::Processing | EpisodeStatus::Transcribing
            ) {
                log::info!("  Skipping {} while it is being processed", episode.source_guid);
                continue;
            }
            log::info!("  Deleting '{}' ({})", episode.title, episode.source_guid);
            for file in episode_files(config, episode) {
                if remove_file(&file) {
                    report.files_deleted += 1;
                }
            }
            if db.delete_episode(&episode.source_guid)? {
                report.episodes_deleted += 1;
            }
        }
    }

    log::info!(
        "Retention sweep complete: {} episodes, {} files deleted",
        report.episodes_deleted,
        report.files_deleted
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    /// `days_old` for each episode, newest first.
    fn show(days_old: &[i64]) -> Vec<Episode> {
        days_old
            .iter()
            .enumerate()
            .map(|(i, d)| Episode {
                source_guid: format!("ep-{}", i),
                show_name: "show".to_string(),
                pub_date: now() - Duration::days(*d),
                ..Episode::default()
            })
            .collect()
    }

    fn guids(doomed: &[&Episode]) -> Vec<String> {
        doomed.iter().map(|e| e.source_guid.clone()).collect()
    }

    fn policy(max_episodes: usize, max_days: i64) -> RetentionPolicy {
        RetentionPolicy {
            enabled: true,
            max_episodes_per_show: max_episodes,
            max_days_per_episode: max_days,
        }
    }

    #[test]
    fn test_count_and_age_are_unioned() {
        let episodes = show(&[1, 2, 3, 40, 50]);
        let doomed = plan_retention(&episodes, &policy(4, 30), now());
        // ep-4 by count, ep-3 and ep-4 by age, ep-4 only once
        assert_eq!(guids(&doomed), vec!["ep-4", "ep-3"]);
    }

    #[test]
    fn test_nothing_to_delete() {
        let episodes = show(&[1, 2, 3]);
        assert!(plan_retention(&episodes, &policy(10, 30), now()).is_empty());
    }

    #[test]
    fn test_zero_days_deletes_everything_older_than_now() {
        let episodes = show(&[1, 2]);
        assert_eq!(plan_retention(&episodes, &policy(10, 0), now()).len(), 2);
    }

    #[test]
    fn test_huge_day_count_keeps_everything() {
        let episodes = show(&[1, 400, 4000]);
        assert!(plan_retention(&episodes, &policy(10, 100_000_000), now()).is_empty());
        assert!(plan_retention(&episodes, &policy(10, i64::MAX), now()).is_empty());
        // Count rule still applies
        assert_eq!(
            guids(&plan_retention(&episodes, &policy(2, i64::MAX), now())),
            vec!["ep-2"]
        );
    }
}
