use crate::database::{Database, EpisodeStatus, StatusCount};
use crate::error::AppError;
use serde::Serialize;

/// Episode counts per status, for the operator status view.
#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total: i64,
    /// Episodes with a cleaned file that can be served.
    pub servable: i64,
    /// Episodes waiting on an automatic retry.
    pub retrying: i64,
    pub failed_permanently: i64,
    pub counts: Vec<StatusCount>,
}

pub fn get_status_summary(db: &Database) -> Result<StatusSummary, AppError> {
    let counts = db.status_counts()?;
    let sum = |pred: fn(&EpisodeStatus) -> bool| -> i64 {
        counts
            .iter()
            .filter(|c| pred(&c.status))
            .map(|c| c.count)
            .sum()
    };

    Ok(StatusSummary {
        total: sum(|_| true),
        servable: sum(EpisodeStatus::is_servable),
        retrying: sum(|s| {
            matches!(
                s,
                EpisodeStatus::ProcessingFailed | EpisodeStatus::FullTranscriptionFailed
            )
        }),
        failed_permanently: sum(EpisodeStatus::is_terminal),
        counts,
    })
}
