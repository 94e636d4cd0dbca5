pub mod models;


use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::worker::lifecycle::Stage;

pub use models::*;

const EPISODE_COLUMNS: &str = "id, source_guid, show_name, title, pub_date, original_audio_url,
    original_file_path, original_duration, cleaned_file_path, cleaned_duration,
    cleaned_file_size, cleaned_ready_at, chapters_json, ad_segments_json,
    cleaned_chapters_json, fast_transcript_json, transcript_json, md_transcript_file_path,
    status, retry_count, full_retry_count, last_error, added_date";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_guid TEXT NOT NULL UNIQUE,
                show_name TEXT NOT NULL,
                title TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                original_audio_url TEXT NOT NULL,
                original_file_path TEXT UNIQUE,
                original_duration REAL,
                cleaned_file_path TEXT UNIQUE,
                cleaned_duration REAL,
                cleaned_file_size INTEGER,
                cleaned_ready_at TEXT,
                chapters_json TEXT,
                ad_segments_json TEXT,
                cleaned_chapters_json TEXT,
                fast_transcript_json TEXT,
                transcript_json TEXT,
                md_transcript_file_path TEXT,
                status TEXT NOT NULL DEFAULT 'pending_download',
                retry_count INTEGER NOT NULL DEFAULT 0,
                full_retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                added_date TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_status
                ON episodes(status);
            CREATE INDEX IF NOT EXISTS idx_episodes_show_published
                ON episodes(show_name, pub_date DESC);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Episode queries
    // =========================================================================

    pub fn get_episode(&self, source_guid: &str) -> Result<Option<Episode>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM episodes WHERE source_guid = ?", EPISODE_COLUMNS);
        let episode = conn
            .query_row(&sql, params![source_guid], row_to_episode)
            .optional()?;
        Ok(episode)
    }

    /// All episodes whose status is one of `statuses`, newest first within
    /// each show.
    pub fn get_episodes_by_status(&self, statuses: &[EpisodeStatus]) -> Result<Vec<Episode>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM episodes WHERE status IN ({})
             ORDER BY show_name ASC, pub_date DESC",
            EPISODE_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), row_to_episode)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    /// All episodes of one show ordered by publish date, newest first.
    pub fn get_episodes_for_show(&self, show_name: &str) -> Result<Vec<Episode>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM episodes WHERE show_name = ? ORDER BY pub_date DESC",
            EPISODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(params![show_name], row_to_episode)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    pub fn get_show_names(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT show_name FROM episodes ORDER BY show_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn status_counts(&self) -> Result<Vec<StatusCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM episodes GROUP BY status ORDER BY status",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // Legacy names may map onto the same variant, so fold them together
        let mut counts: Vec<StatusCount> = Vec::new();
        for (raw, count) in rows {
            let status: EpisodeStatus = raw.parse().map_err(|e: String| anyhow!(e))?;
            match counts.iter_mut().find(|c| c.status == status) {
                Some(existing) => existing.count += count,
                None => counts.push(StatusCount { status, count }),
            }
        }
        Ok(counts)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Insert a new episode or refresh its feed metadata (by source_guid).
    /// Lifecycle fields are never touched on update.
    pub fn upsert_episode(&self, episode: &NewEpisode) -> Result<(i64, bool)> {
        let conn = self.lock()?;
        let pub_date = format_timestamp(&episode.pub_date);

        let existing_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM episodes WHERE source_guid = ?",
                params![episode.source_guid],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing_id {
            conn.execute(
                "UPDATE episodes SET
                    show_name = ?,
                    title = ?,
                    pub_date = ?,
                    original_audio_url = ?,
                    original_duration = COALESCE(original_duration, ?),
                    chapters_json = COALESCE(?, chapters_json)
                 WHERE id = ?",
                params![
                    episode.show_name,
                    episode.title,
                    pub_date,
                    episode.original_audio_url,
                    episode.original_duration,
                    episode.chapters_json,
                    id
                ],
            )?;
            Ok((id, false))
        } else {
            let now = format_timestamp(&Utc::now());
            conn.execute(
                "INSERT INTO episodes (source_guid, show_name, title, pub_date, original_audio_url,
                                       original_duration, chapters_json, status, added_date)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    episode.source_guid,
                    episode.show_name,
                    episode.title,
                    pub_date,
                    episode.original_audio_url,
                    episode.original_duration,
                    episode.chapters_json,
                    EpisodeStatus::PendingDownload.as_str(),
                    now
                ],
            )?;
            Ok((conn.last_insert_rowid(), true))
        }
    }

    /// Record the local file produced by the download collaborator.
    /// Only advances `pending_download` episodes; returns whether it did.
    pub fn mark_downloaded(
        &self,
        source_guid: &str,
        file_path: &str,
        duration: Option<f64>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE episodes SET original_file_path = ?,
                    original_duration = COALESCE(?, original_duration),
                    status = ?
             WHERE source_guid = ? AND status = ?",
            params![
                file_path,
                duration,
                EpisodeStatus::Downloaded.as_str(),
                source_guid,
                EpisodeStatus::PendingDownload.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    // =========================================================================
    // Lifecycle transitions
    // =========================================================================

    /// Atomically claim an episode for `stage`.
    ///
    /// In one statement: checks the status is in `from`, checks the stage's
    /// retry counter is below `max_retries` (when given), moves the status to
    /// the stage's in-flight value, increments the counter and clears
    /// `last_error`. Returns the claimed episode, or `None` if another
    /// scheduler got there first or the episode is not eligible.
    pub fn claim_stage(
        &self,
        source_guid: &str,
        stage: Stage,
        from: &[EpisodeStatus],
        max_retries: Option<i32>,
    ) -> Result<Option<Episode>> {
        if from.is_empty() {
            return Ok(None);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let counter = stage.counter_column();
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE episodes SET status = ?, {counter} = {counter} + 1, last_error = NULL
             WHERE source_guid = ? AND status IN ({placeholders})
               AND (? IS NULL OR {counter} < ?)",
            counter = counter,
            placeholders = placeholders
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(from.len() + 4);
        values.push(stage.in_flight().as_str().to_string().into());
        values.push(source_guid.to_string().into());
        values.extend(from.iter().map(|s| s.as_str().to_string().into()));
        let max: rusqlite::types::Value = match max_retries {
            Some(m) => (m as i64).into(),
            None => rusqlite::types::Value::Null,
        };
        values.push(max.clone());
        values.push(max);

        let changed = tx.execute(&sql, params_from_iter(values))?;
        if changed != 1 {
            tx.rollback()?;
            return Ok(None);
        }

        let select = format!("SELECT {} FROM episodes WHERE source_guid = ?", EPISODE_COLUMNS);
        let episode = tx.query_row(&select, params![source_guid], row_to_episode)?;
        tx.commit()?;
        Ok(Some(episode))
    }

    pub fn set_original_duration(&self, source_guid: &str, duration: f64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE episodes SET original_duration = ? WHERE source_guid = ?",
            params![duration, source_guid],
        )?;
        Ok(())
    }

    /// Persist the detected ad-cut snapshot as soon as detection finishes.
    pub fn record_detection(&self, source_guid: &str, ad_segments_json: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE episodes SET ad_segments_json = ? WHERE source_guid = ?",
            params![ad_segments_json, source_guid],
        )?;
        Ok(())
    }

    pub fn save_fast_transcript(&self, source_guid: &str, transcript_json: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE episodes SET fast_transcript_json = ? WHERE source_guid = ?",
            params![transcript_json, source_guid],
        )?;
        Ok(())
    }

    /// `processing -> cut_ready_for_serving`, writing every `cleaned_*` field.
    pub fn mark_cut_ready(&self, source_guid: &str, outcome: &CutOutcome) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE episodes SET
                status = ?,
                cleaned_file_path = ?,
                cleaned_duration = ?,
                cleaned_file_size = ?,
                cleaned_ready_at = ?,
                ad_segments_json = ?,
                cleaned_chapters_json = ?,
                last_error = NULL
             WHERE source_guid = ? AND status = ?",
            params![
                EpisodeStatus::CutReadyForServing.as_str(),
                outcome.cleaned_file_path,
                outcome.cleaned_duration,
                outcome.cleaned_file_size,
                format_timestamp(&Utc::now()),
                outcome.ad_segments_json,
                outcome.cleaned_chapters_json,
                source_guid,
                EpisodeStatus::Processing.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// `transcribing -> transcribed`.
    pub fn mark_transcribed(
        &self,
        source_guid: &str,
        transcript_json: &str,
        md_transcript_file_path: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE episodes SET status = ?, transcript_json = ?, md_transcript_file_path = ?,
                    last_error = NULL
             WHERE source_guid = ? AND status = ?",
            params![
                EpisodeStatus::Transcribed.as_str(),
                transcript_json,
                md_transcript_file_path,
                source_guid,
                EpisodeStatus::Transcribing.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Leave the in-flight state of `stage` for `status`, recording `error`.
    pub fn mark_stage_failed(
        &self,
        source_guid: &str,
        stage: Stage,
        status: EpisodeStatus,
        error: &str,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE episodes SET status = ?, last_error = ? WHERE source_guid = ? AND status = ?",
            params![status.as_str(), error, source_guid, stage.in_flight().as_str()],
        )?;
        Ok(changed == 1)
    }

    /// Convert in-flight states left behind by a killed run into their
    /// stage failure state. Retry counters keep the attempt that was made.
    pub fn reset_stuck_processing(&self) -> Result<usize> {
        let conn = self.lock()?;
        let mut count = 0;
        for stage in [Stage::Cut, Stage::FullTranscription] {
            count += conn.execute(
                "UPDATE episodes SET status = ?, last_error = 'Interrupted before completion'
                 WHERE status = ?",
                params![stage.failed().as_str(), stage.in_flight().as_str()],
            )?;
        }
        if count > 0 {
            log::info!("Reset {} interrupted episodes to their failed state", count);
        }
        Ok(count)
    }

    pub fn delete_episode(&self, source_guid: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM episodes WHERE source_guid = ?",
            params![source_guid],
        )?;
        Ok(changed == 1)
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn row_to_episode(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let pub_date: String = row.get(4)?;
    let pub_date = DateTime::parse_from_rfc3339(&pub_date)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let status: String = row.get(18)?;
    let status: EpisodeStatus = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            18,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(Episode {
        id: row.get(0)?,
        source_guid: row.get(1)?,
        show_name: row.get(2)?,
        title: row.get(3)?,
        pub_date,
        original_audio_url: row.get(5)?,
        original_file_path: row.get(6)?,
        original_duration: row.get(7)?,
        cleaned_file_path: row.get(8)?,
        cleaned_duration: row.get(9)?,
        cleaned_file_size: row.get(10)?,
        cleaned_ready_at: row.get(11)?,
        chapters_json: row.get(12)?,
        ad_segments_json: row.get(13)?,
        cleaned_chapters_json: row.get(14)?,
        fast_transcript_json: row.get(15)?,
        transcript_json: row.get(16)?,
        md_transcript_file_path: row.get(17)?,
        status,
        retry_count: row.get(19)?,
        full_retry_count: row.get(20)?,
        last_error: row.get(21)?,
        added_date: row.get(22)?,
    })
}
