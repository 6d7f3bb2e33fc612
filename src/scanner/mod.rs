pub mod metadata;

use crate::SUPPORTED_EXTENSIONS;
use crate::db::models::NewTrack;
use crate::db::{Database, DbError};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub scanned: u64,
    pub new: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Scan directories for audio files, upsert them into `tracks`, and make
/// sure every track has an analysis record. Changed files go back to
/// `pending`.
pub fn scan(db: &Database, paths: &[PathBuf], force: bool) -> Result<ScanResult, ScanError> {
    let audio_files = collect_audio_files(paths);

    let pb = ProgressBar::new(audio_files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb.set_message("Scanning...");

    let mut result = ScanResult::default();

    // Wrap all inserts in a single transaction for dramatic speedup
    let tx = db.conn.unchecked_transaction().map_err(DbError::from)?;

    for path in &audio_files {
        result.scanned += 1;

        match process_file(&tx, path, force) {
            Ok(FileAction::New) => result.new += 1,
            Ok(FileAction::Updated) => result.updated += 1,
            Ok(FileAction::Skipped) => result.skipped += 1,
            Err(e) => {
                log::warn!("Error scanning {}: {}", path.display(), e);
                result.errors += 1;
            }
        }

        pb.inc(1);
    }

    tx.commit().map_err(DbError::from)?;

    pb.finish_with_message(format!(
        "Done: {} new, {} updated, {} skipped, {} errors",
        result.new, result.updated, result.skipped, result.errors
    ));

    Ok(result)
}

/// Supported audio files under each root, canonicalized so the same file
/// always maps to the same track row.
fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for root in paths {
        let root = match root.canonicalize() {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Skipping {}: {}", root.display(), e);
                continue;
            }
        };
        for entry in WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

fn is_supported(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

#[derive(Debug, PartialEq, Eq)]
enum FileAction {
    New,
    Updated,
    Skipped,
}

fn process_file(
    conn: &rusqlite::Connection,
    path: &Path,
    force: bool,
) -> Result<FileAction, ScanError> {
    let meta = std::fs::metadata(path)?;
    let file_size = meta.len() as i64;
    let file_modified = format_mtime(&meta);
    let file_path = path.to_string_lossy().to_string();

    // Single query: check if track exists AND if it's unchanged
    let existing: Option<(i64, i64, String)> = conn
        .query_row(
            "SELECT id, file_size, file_modified FROM tracks WHERE file_path = ?1",
            rusqlite::params![file_path],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok();

    let changed = match &existing {
        Some((_, size, mtime)) => *size != file_size || *mtime != file_modified,
        None => true,
    };

    if !force && !changed {
        // Still make sure a record exists, e.g. after a manual cleanup
        if let Some((id, _, _)) = existing {
            Database::ensure_analysis_on(conn, id)?;
        }
        return Ok(FileAction::Skipped);
    }

    let tags = metadata::read_tags(path);
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let new_track = NewTrack {
        file_path,
        file_size,
        file_modified,
        format,
        title: tags.title,
        artist: tags.artist,
        album: tags.album,
        duration_secs: tags.duration_secs,
        tag_bpm: tags.bpm,
        tag_key: tags.key,
    };

    let track_id = Database::upsert_track_on(conn, &new_track)?;
    let created = Database::ensure_analysis_on(conn, track_id)?;

    if existing.is_none() {
        return Ok(FileAction::New);
    }
    if changed && !created {
        // Different audio on disk: earlier features no longer apply
        Database::requeue_analysis_on(conn, track_id)?;
    }
    Ok(FileAction::Updated)
}

fn format_mtime(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}
