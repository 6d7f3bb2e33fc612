use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::models::{AnalysisStatus, FeatureUpdate, LibraryStats, NewTrack, Track, TrackFeatures};
use super::{Database, DbError, Result};
use crate::TrackId;
use crate::camelot::{UNKNOWN_KEY, camelot_code};
use crate::jobs::{AnalysisJob, AnalysisStore, hints_from_tags};
use crate::scoring::TrackDjData;

const ANALYSIS_COLUMNS: &str = "track_id, bpm, key, camelot_key, energy, danceability,
     status, analysis_error, analyzed_at, created_at, updated_at";

const TRACK_COLUMNS: &str = "id, file_path, title, artist, duration_secs, tag_bpm, tag_key";

fn read_features(row: &Row<'_>) -> rusqlite::Result<TrackFeatures> {
    Ok(TrackFeatures {
        track_id: row.get(0)?,
        bpm: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
        key: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| UNKNOWN_KEY.to_string()),
        camelot_key: row.get(3)?,
        energy: row.get(4)?,
        danceability: row.get(5)?,
        status: row.get(6)?,
        analysis_error: row.get(7)?,
        analyzed_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn read_track(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        file_path: row.get(1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        duration_secs: row.get(4)?,
        tag_bpm: row.get(5)?,
        tag_key: row.get(6)?,
    })
}

impl Database {
    /// Insert or update a track. Returns the track id.
    pub fn upsert_track(&self, t: &NewTrack) -> Result<TrackId> {
        Self::upsert_track_on(&self.conn, t)
    }

    /// Upsert on a given connection (used within the scan transaction).
    pub fn upsert_track_on(conn: &Connection, t: &NewTrack) -> Result<TrackId> {
        conn.execute(
            "INSERT INTO tracks (
                file_path, file_size, file_modified, format,
                title, artist, album, duration_secs,
                tag_bpm, tag_key,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8,
                ?9, ?10,
                datetime('now')
            )
            ON CONFLICT(file_path) DO UPDATE SET
                file_size = excluded.file_size,
                file_modified = excluded.file_modified,
                format = excluded.format,
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                duration_secs = excluded.duration_secs,
                tag_bpm = excluded.tag_bpm,
                tag_key = excluded.tag_key,
                updated_at = datetime('now')
            ",
            params![
                t.file_path, t.file_size, t.file_modified, t.format,
                t.title, t.artist, t.album, t.duration_secs,
                t.tag_bpm, t.tag_key,
            ],
        )?;

        let id: TrackId = conn.query_row(
            "SELECT id FROM tracks WHERE file_path = ?1",
            params![t.file_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Make sure a track has an analysis record, creating a `pending` one if
    /// needed. Returns true when a record was created.
    pub fn ensure_analysis_on(conn: &Connection, track_id: TrackId) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO track_analysis (track_id, status) VALUES (?1, ?2)",
            params![track_id, AnalysisStatus::Pending],
        )?;
        Ok(inserted > 0)
    }

    /// Send a track back to `pending` after its file changed on disk.
    pub fn requeue_analysis_on(conn: &Connection, track_id: TrackId) -> Result<()> {
        conn.execute(
            "UPDATE track_analysis
             SET status = ?2, analysis_error = NULL, updated_at = datetime('now')
             WHERE track_id = ?1",
            params![track_id, AnalysisStatus::Pending],
        )?;
        Ok(())
    }

    pub fn track_by_id(&self, id: TrackId) -> Result<Option<Track>> {
        let track = self
            .conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
                params![id],
                read_track,
            )
            .optional()?;
        Ok(track)
    }

    /// Resolve a user-supplied track reference: numeric id, file path, or
    /// (case-insensitive) title fragment, in that order.
    pub fn find_track(&self, query: &str) -> Result<Option<Track>> {
        if let Ok(id) = query.trim().parse::<TrackId>() {
            if let Some(track) = self.track_by_id(id)? {
                return Ok(Some(track));
            }
        }

        let path = std::fs::canonicalize(query)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| query.to_string());
        let by_path = self
            .conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE file_path = ?1"),
                params![path],
                read_track,
            )
            .optional()?;
        if by_path.is_some() {
            return Ok(by_path);
        }

        let by_title = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TRACK_COLUMNS} FROM tracks
                     WHERE title LIKE '%' || ?1 || '%'
                     ORDER BY id LIMIT 1"
                ),
                params![query],
                read_track,
            )
            .optional()?;
        Ok(by_title)
    }

    pub fn analysis_for_track(&self, track_id: TrackId) -> Result<Option<TrackFeatures>> {
        let features = self
            .conn
            .query_row(
                &format!("SELECT {ANALYSIS_COLUMNS} FROM track_analysis WHERE track_id = ?1"),
                params![track_id],
                read_features,
            )
            .optional()?;
        Ok(features)
    }

    /// Create a fresh `pending` record.
    pub fn create_analysis(&self, track_id: TrackId) -> Result<TrackFeatures> {
        self.conn.execute(
            "INSERT INTO track_analysis (track_id, status) VALUES (?1, ?2)",
            params![track_id, AnalysisStatus::Pending],
        )?;
        self.analysis_for_track(track_id)?
            .ok_or(DbError::MissingRecord(track_id))
    }

    /// Change a record's status and write the given fields. A `completed`
    /// transition replaces every feature column, so a value the new result
    /// lacks is cleared. Other transitions only touch the fields they carry.
    /// The Camelot code is recomputed from `key` whenever a key is written.
    pub fn update_analysis(
        &self,
        track_id: TrackId,
        status: AnalysisStatus,
        fields: &FeatureUpdate,
    ) -> Result<()> {
        let camelot = fields.key.as_deref().and_then(camelot_code);
        let error = if status == AnalysisStatus::Failed {
            fields.analysis_error.as_deref()
        } else {
            None
        };

        let replace = status == AnalysisStatus::Completed;

        let updated = self.conn.execute(
            "UPDATE track_analysis SET
                status = ?2,
                bpm = CASE WHEN ?10 THEN ?3 ELSE COALESCE(?3, bpm) END,
                key = CASE WHEN ?10 THEN ?4 ELSE COALESCE(?4, key) END,
                camelot_key = CASE WHEN ?10 OR ?4 IS NOT NULL THEN ?5 ELSE camelot_key END,
                energy = CASE WHEN ?10 THEN ?6 ELSE COALESCE(?6, energy) END,
                danceability = CASE WHEN ?10 THEN ?7 ELSE COALESCE(?7, danceability) END,
                analysis_error = ?8,
                analyzed_at = COALESCE(?9, analyzed_at),
                updated_at = datetime('now')
             WHERE track_id = ?1",
            params![
                track_id,
                status,
                fields.bpm,
                fields.key,
                camelot,
                fields.energy,
                fields.danceability,
                error,
                fields.analyzed_at,
                replace,
            ],
        )?;

        if updated == 0 {
            return Err(DbError::MissingRecord(track_id));
        }
        Ok(())
    }

    pub fn analyses_by_status(&self, status: AnalysisStatus) -> Result<Vec<TrackFeatures>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM track_analysis WHERE status = ?1 ORDER BY track_id"
        ))?;
        let rows = stmt
            .query_map(params![status], read_features)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn analyses_for_tracks(&self, track_ids: &[TrackId]) -> Result<Vec<TrackFeatures>> {
        if track_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; track_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM track_analysis
             WHERE track_id IN ({placeholders}) ORDER BY track_id"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(track_ids), read_features)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_status(&self, status: AnalysisStatus) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM track_analysis WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Records left `analyzing` by an interrupted run go back to `pending`.
    pub fn reset_interrupted(&self) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE track_analysis SET status = ?1, updated_at = datetime('now')
             WHERE status = ?2",
            params![AnalysisStatus::Pending, AnalysisStatus::Analyzing],
        )?;
        Ok(n)
    }

    /// Analysis work for the batch runner: every `pending` track, plus
    /// `failed` ones when retrying. Tag BPM/key become hints.
    pub fn pending_jobs(&self, retry_failed: bool) -> Result<Vec<AnalysisJob>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.file_path, t.tag_bpm, t.tag_key
             FROM track_analysis a
             JOIN tracks t ON t.id = a.track_id
             WHERE a.status = ?1 OR (?2 AND a.status = ?3)
             ORDER BY t.id",
        )?;
        let jobs = stmt
            .query_map(
                params![AnalysisStatus::Pending, retry_failed, AnalysisStatus::Failed],
                |row| {
                    let path: String = row.get(1)?;
                    Ok(AnalysisJob {
                        track_id: row.get(0)?,
                        file_path: PathBuf::from(path),
                        hints: hints_from_tags(row.get(2)?, row.get::<_, Option<String>>(3)?),
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Every completed track, projected for scoring.
    pub fn completed_candidates(&self) -> Result<Vec<TrackDjData>> {
        Ok(self
            .analyses_by_status(AnalysisStatus::Completed)?
            .iter()
            .map(TrackFeatures::to_dj_data)
            .collect())
    }

    /// Get library statistics.
    pub fn stats(&self) -> Result<LibraryStats> {
        let total_tracks: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracks",
            [],
            |row| row.get(0),
        )?;

        let mut stats = LibraryStats {
            total_tracks,
            ..LibraryStats::default()
        };

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM track_analysis GROUP BY status")?;
        let counts: Vec<(AnalysisStatus, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (status, count) in counts {
            match status {
                AnalysisStatus::Pending => stats.pending = count,
                AnalysisStatus::Analyzing => stats.analyzing = count,
                AnalysisStatus::Completed => stats.completed = count,
                AnalysisStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}

fn locked(store: &Mutex<Database>) -> Result<MutexGuard<'_, Database>> {
    store.lock().map_err(|_| DbError::LockPoisoned)
}

impl AnalysisStore for Mutex<Database> {
    fn find_by_track_id(&self, track_id: TrackId) -> Result<Option<TrackFeatures>> {
        locked(self)?.analysis_for_track(track_id)
    }

    fn create(&self, track_id: TrackId) -> Result<TrackFeatures> {
        locked(self)?.create_analysis(track_id)
    }

    fn update(
        &self,
        track_id: TrackId,
        status: AnalysisStatus,
        fields: &FeatureUpdate,
    ) -> Result<()> {
        locked(self)?.update_analysis(track_id, status, fields)
    }

    fn find_by_status(&self, status: AnalysisStatus) -> Result<Vec<TrackFeatures>> {
        locked(self)?.analyses_by_status(status)
    }

    fn find_by_track_ids(&self, track_ids: &[TrackId]) -> Result<Vec<TrackFeatures>> {
        locked(self)?.analyses_for_tracks(track_ids)
    }

    fn count_pending(&self) -> Result<i64> {
        locked(self)?.count_by_status(AnalysisStatus::Pending)
    }

    fn count_by_status(&self, status: AnalysisStatus) -> Result<i64> {
        locked(self)?.count_by_status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_track(path: &str) -> NewTrack {
        NewTrack {
            file_path: path.to_string(),
            file_size: 12_345_678,
            file_modified: "1700000000".to_string(),
            format: "flac".to_string(),
            title: Some("Strings of Life".to_string()),
            artist: Some("Rhythim Is Rhythim".to_string()),
            album: None,
            duration_secs: Some(420.0),
            tag_bpm: Some(125.0),
            tag_key: Some("Abm".to_string()),
        }
    }

    fn db_with_track(path: &str) -> (Database, TrackId) {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_track(&test_track(path)).unwrap();
        (db, id)
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let t = test_track("/music/a.flac");
        let id1 = db.upsert_track(&t).unwrap();
        let id2 = db.upsert_track(&t).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(db.stats().unwrap().total_tracks, 1);
    }

    #[test]
    fn test_create_and_find() {
        let (db, id) = db_with_track("/music/a.flac");
        assert_eq!(db.analysis_for_track(id).unwrap(), None);

        let created = db.create_analysis(id).unwrap();
        assert_eq!(created.status, AnalysisStatus::Pending);
        assert_eq!(created.bpm, 0.0);
        assert_eq!(created.key, UNKNOWN_KEY);
        assert_eq!(created.camelot_key, None);
        assert!(!created.created_at.is_empty());

        // A second create for the same track is a constraint violation
        assert!(db.create_analysis(id).is_err());
    }

    #[test]
    fn test_ensure_analysis_is_idempotent() {
        let (db, id) = db_with_track("/music/a.flac");
        assert!(Database::ensure_analysis_on(&db.conn, id).unwrap());
        assert!(!Database::ensure_analysis_on(&db.conn, id).unwrap());
        assert_eq!(db.count_by_status(AnalysisStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn test_update_derives_camelot_key() {
        let (db, id) = db_with_track("/music/a.flac");
        db.create_analysis(id).unwrap();

        let update = FeatureUpdate {
            bpm: Some(124.0),
            key: Some("Am".to_string()),
            energy: Some(0.7),
            danceability: Some(0.8),
            analyzed_at: Some("2024-01-01T00:00:00+00:00".to_string()),
            ..FeatureUpdate::default()
        };
        db.update_analysis(id, AnalysisStatus::Completed, &update).unwrap();

        let f = db.analysis_for_track(id).unwrap().unwrap();
        assert_eq!(f.status, AnalysisStatus::Completed);
        assert_eq!(f.bpm, 124.0);
        assert_eq!(f.key, "Am");
        assert_eq!(f.camelot_key.as_deref(), Some("8A"));
        assert_eq!(f.energy, Some(0.7));
        assert_eq!(f.analyzed_at.as_deref(), Some("2024-01-01T00:00:00+00:00"));

        // Changing the key changes the code with it
        let rekey = FeatureUpdate {
            bpm: Some(124.0),
            key: Some("C".to_string()),
            ..FeatureUpdate::default()
        };
        db.update_analysis(id, AnalysisStatus::Completed, &rekey).unwrap();
        let f = db.analysis_for_track(id).unwrap().unwrap();
        assert_eq!(f.camelot_key.as_deref(), Some("8B"));
        assert_eq!(f.bpm, 124.0);

        // "Unknown" has no wheel position
        let unknown = FeatureUpdate {
            key: Some(UNKNOWN_KEY.to_string()),
            ..FeatureUpdate::default()
        };
        db.update_analysis(id, AnalysisStatus::Completed, &unknown).unwrap();
        assert_eq!(db.analysis_for_track(id).unwrap().unwrap().camelot_key, None);
    }

    #[test]
    fn test_reanalysis_clears_missing_features() {
        let (db, id) = db_with_track("/music/a.flac");
        db.create_analysis(id).unwrap();

        let first = FeatureUpdate {
            bpm: Some(126.0),
            key: Some("Fm".to_string()),
            energy: Some(0.8),
            danceability: Some(0.9),
            analyzed_at: Some("2024-01-01T00:00:00+00:00".to_string()),
            ..FeatureUpdate::default()
        };
        db.update_analysis(id, AnalysisStatus::Completed, &first).unwrap();
        Database::requeue_analysis_on(&db.conn, id).unwrap();

        // Status-only transitions keep what is there
        db.update_analysis(id, AnalysisStatus::Analyzing, &FeatureUpdate::default())
            .unwrap();
        let f = db.analysis_for_track(id).unwrap().unwrap();
        assert_eq!(f.danceability, Some(0.9));

        // Loudness-only result for the new audio
        let coarse = FeatureUpdate {
            bpm: Some(0.0),
            key: Some(UNKNOWN_KEY.to_string()),
            energy: Some(0.2),
            danceability: None,
            analyzed_at: Some("2024-02-01T00:00:00+00:00".to_string()),
            ..FeatureUpdate::default()
        };
        db.update_analysis(id, AnalysisStatus::Completed, &coarse).unwrap();

        let f = db.analysis_for_track(id).unwrap().unwrap();
        assert_eq!(f.status, AnalysisStatus::Completed);
        assert_eq!(f.bpm, 0.0);
        assert_eq!(f.key, UNKNOWN_KEY);
        assert_eq!(f.camelot_key, None);
        assert_eq!(f.energy, Some(0.2));
        assert_eq!(f.danceability, None);
    }

    #[test]
    fn test_error_only_kept_while_failed() {
        let (db, id) = db_with_track("/music/a.flac");
        db.create_analysis(id).unwrap();

        let failed = FeatureUpdate {
            analysis_error: Some("Worker exited unexpectedly".to_string()),
            ..FeatureUpdate::default()
        };
        db.update_analysis(id, AnalysisStatus::Failed, &failed).unwrap();
        let f = db.analysis_for_track(id).unwrap().unwrap();
        assert_eq!(f.status, AnalysisStatus::Failed);
        assert_eq!(f.analysis_error.as_deref(), Some("Worker exited unexpectedly"));

        db.update_analysis(id, AnalysisStatus::Analyzing, &FeatureUpdate::default())
            .unwrap();
        assert_eq!(db.analysis_for_track(id).unwrap().unwrap().analysis_error, None);
    }

    #[test]
    fn test_update_missing_record() {
        let (db, id) = db_with_track("/music/a.flac");
        assert!(matches!(
            db.update_analysis(id, AnalysisStatus::Analyzing, &FeatureUpdate::default()),
            Err(DbError::MissingRecord(missing)) if missing == id
        ));
    }

    #[test]
    fn test_find_by_status_and_ids() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_track(&test_track("/music/a.flac")).unwrap();
        let b = db.upsert_track(&test_track("/music/b.flac")).unwrap();
        let c = db.upsert_track(&test_track("/music/c.flac")).unwrap();
        for id in [a, b, c] {
            db.create_analysis(id).unwrap();
        }
        db.update_analysis(b, AnalysisStatus::Failed, &FeatureUpdate::default())
            .unwrap();

        let pending: Vec<TrackId> = db
            .analyses_by_status(AnalysisStatus::Pending)
            .unwrap()
            .iter()
            .map(|f| f.track_id)
            .collect();
        assert_eq!(pending, vec![a, c]);
        assert_eq!(db.count_by_status(AnalysisStatus::Pending).unwrap(), 2);

        let some = db.analyses_for_tracks(&[c, b]).unwrap();
        assert_eq!(some.len(), 2);
        assert_eq!(some[0].track_id, b);
        assert!(db.analyses_for_tracks(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_pending_jobs_and_retry() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_track(&test_track("/music/a.flac")).unwrap();
        let b = db.upsert_track(&test_track("/music/b.flac")).unwrap();
        Database::ensure_analysis_on(&db.conn, a).unwrap();
        Database::ensure_analysis_on(&db.conn, b).unwrap();
        db.update_analysis(b, AnalysisStatus::Failed, &FeatureUpdate::default())
            .unwrap();

        let jobs = db.pending_jobs(false).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].track_id, a);
        assert_eq!(jobs[0].file_path, PathBuf::from("/music/a.flac"));
        assert_eq!(jobs[0].hints.bpm, Some(125.0));
        assert_eq!(jobs[0].hints.key.as_deref(), Some("Abm"));

        assert_eq!(db.pending_jobs(true).unwrap().len(), 2);
    }

    #[test]
    fn test_reset_interrupted() {
        let (db, id) = db_with_track("/music/a.flac");
        db.create_analysis(id).unwrap();
        db.update_analysis(id, AnalysisStatus::Analyzing, &FeatureUpdate::default())
            .unwrap();
        assert_eq!(db.reset_interrupted().unwrap(), 1);
        assert_eq!(
            db.analysis_for_track(id).unwrap().unwrap().status,
            AnalysisStatus::Pending
        );
    }

    #[test]
    fn test_find_track() {
        let (db, id) = db_with_track("/music/a.flac");
        assert_eq!(db.find_track(&id.to_string()).unwrap().unwrap().id, id);
        assert_eq!(db.find_track("/music/a.flac").unwrap().unwrap().id, id);
        assert_eq!(db.find_track("strings of").unwrap().unwrap().id, id);
        assert!(db.find_track("nothing like this").unwrap().is_none());
    }

    #[test]
    fn test_completed_candidates_and_stats() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_track(&test_track("/music/a.flac")).unwrap();
        let b = db.upsert_track(&test_track("/music/b.flac")).unwrap();
        db.create_analysis(a).unwrap();
        db.create_analysis(b).unwrap();
        let done = FeatureUpdate {
            bpm: Some(128.0),
            key: Some("Em".to_string()),
            energy: Some(0.5),
            ..FeatureUpdate::default()
        };
        db.update_analysis(a, AnalysisStatus::Completed, &done).unwrap();

        let candidates = db.completed_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].track_id, a);
        assert_eq!(candidates[0].camelot_key.as_deref(), Some("9A"));
        assert_eq!(candidates[0].danceability, None);

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_store_trait_on_mutex() {
        let (db, id) = db_with_track("/music/a.flac");
        let store = Mutex::new(db);
        assert!(store.find_by_track_id(id).unwrap().is_none());
        store.create(id).unwrap();
        assert_eq!(store.count_pending().unwrap(), 1);
        store
            .update(id, AnalysisStatus::Analyzing, &FeatureUpdate::default())
            .unwrap();
        assert_eq!(store.count_pending().unwrap(), 0);
        assert_eq!(store.find_by_status(AnalysisStatus::Analyzing).unwrap().len(), 1);
        assert_eq!(store.count_by_status(AnalysisStatus::Analyzing).unwrap(), 1);
        assert_eq!(store.count_by_status(AnalysisStatus::Completed).unwrap(), 0);
        assert_eq!(store.find_by_track_ids(&[id]).unwrap().len(), 1);
    }
}
