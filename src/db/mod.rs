pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

use crate::TrackId;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("No analysis record for track {0}")]
    MissingRecord(TrackId),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, DbError>;

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{} is newer than this build (v{})",
                version, SCHEMA_VERSION
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: tracks + one analysis record per track
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path       TEXT NOT NULL UNIQUE,
                file_size       INTEGER NOT NULL,
                file_modified   TEXT NOT NULL,
                format          TEXT NOT NULL,

                -- Metadata from tags
                title           TEXT,
                artist          TEXT,
                album           TEXT,
                duration_secs   REAL,

                -- DJ tags (analysis hints)
                tag_bpm         REAL,
                tag_key         TEXT,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist);
            CREATE INDEX IF NOT EXISTS idx_tracks_title ON tracks(title);

            CREATE TABLE IF NOT EXISTS track_analysis (
                track_id        INTEGER PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
                status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'analyzing', 'completed', 'failed')),

                bpm             REAL,
                key             TEXT,
                -- Derived from key in the same statement, never set on its own
                camelot_key     TEXT,
                energy          REAL,
                danceability    REAL,

                analysis_error  TEXT,
                analyzed_at     TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_status ON track_analysis(status);
            CREATE INDEX IF NOT EXISTS idx_analysis_camelot ON track_analysis(camelot_key);
            CREATE INDEX IF NOT EXISTS idx_analysis_bpm ON track_analysis(bpm);
            ",
        )?;
        Ok(())
    }
}
