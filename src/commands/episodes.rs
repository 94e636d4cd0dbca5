use crate::database::{Database, Episode, NewEpisode};
use crate::error::AppError;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Default, Serialize)]
pub struct IngestResult {
    pub added: i64,
    pub updated: i64,
    pub total: i64,
}

/// Upsert episode records from the feed collaborator, keyed by source GUID.
pub fn ingest_episodes(db: &Database, records: &[NewEpisode]) -> Result<IngestResult, AppError> {
    let mut result = IngestResult::default();
    for record in records {
        let (_, inserted) = db.upsert_episode(record)?;
        if inserted {
            result.added += 1;
        } else {
            result.updated += 1;
        }
        result.total += 1;
    }
    log::info!(
        "Ingested {} episodes: {} added, {} updated",
        result.total,
        result.added,
        result.updated
    );
    Ok(result)
}

/// Read a JSON array of episode records.
pub fn load_episode_records(path: &Path) -> Result<Vec<NewEpisode>, AppError> {
    let content = std::fs::read_to_string(path)?;
    let records: Vec<NewEpisode> = serde_json::from_str(&content)?;
    Ok(records)
}

pub fn get_episode(db: &Database, source_guid: &str) -> Result<Episode, AppError> {
    db.get_episode(source_guid)?
        .ok_or_else(|| AppError::NotFound(format!("Episode {}", source_guid)))
}

/// Record the local file for a `pending_download` episode.
pub fn mark_episode_downloaded(
    db: &Database,
    source_guid: &str,
    file_path: &Path,
    duration: Option<f64>,
) -> Result<Episode, AppError> {
    let episode = get_episode(db, source_guid)?;
    let path = file_path.to_string_lossy();
    if !db.mark_downloaded(source_guid, &path, duration)? {
        return Err(AppError::Other(format!(
            "Episode {} is {}, expected pending_download",
            source_guid, episode.status
        )));
    }
    log::info!("{} downloaded to {}", source_guid, path);
    get_episode(db, source_guid)
}
