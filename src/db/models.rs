use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

use crate::TrackId;
use crate::camelot::UNKNOWN_KEY;
use crate::scoring::TrackDjData;

/// Data for inserting or updating a track (scan phase).
pub struct NewTrack {
    pub file_path: String,
    pub file_size: i64,
    pub file_modified: String,
    pub format: String,

    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: Option<f64>,

    // DJ tags written by other software, used as analysis hints
    pub tag_bpm: Option<f64>,
    pub tag_key: Option<String>,
}

/// A track row read from the database.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub file_path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_secs: Option<f64>,
    pub tag_bpm: Option<f64>,
    pub tag_key: Option<String>,
}

impl Track {
    /// "Artist - Title", falling back to the file name.
    pub fn display_name(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(a), Some(t)) => format!("{} - {}", a, t),
            (None, Some(t)) => t.clone(),
            _ => std::path::Path::new(&self.file_path)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| self.file_path.clone()),
        }
    }
}

/// Lifecycle of a track's analysis record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 4] = [
        AnalysisStatus::Pending,
        AnalysisStatus::Analyzing,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl ToSql for AnalysisStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AnalysisStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

/// Persisted analysis record of one track.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackFeatures {
    pub track_id: TrackId,
    /// 0 = unknown
    pub bpm: f64,
    /// Canonical key name or "Unknown"
    pub key: String,
    /// Always derived from `key`
    pub camelot_key: Option<String>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub status: AnalysisStatus,
    pub analysis_error: Option<String>,
    pub analyzed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TrackFeatures {
    /// Project down to the shape the scoring engine accepts.
    pub fn to_dj_data(&self) -> TrackDjData {
        TrackDjData {
            track_id: self.track_id,
            bpm: (self.bpm > 0.0).then_some(self.bpm),
            key: (self.key != UNKNOWN_KEY).then(|| self.key.clone()),
            camelot_key: self.camelot_key.clone(),
            energy: self.energy,
            danceability: self.danceability,
        }
    }
}

/// Fields written alongside a status change. `None` leaves the stored
/// value untouched, except `analysis_error`, which is cleared unless the
/// new status is `failed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureUpdate {
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub analysis_error: Option<String>,
    pub analyzed_at: Option<String>,
}

/// Library-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub total_tracks: i64,
    pub pending: i64,
    pub analyzing: i64,
    pub completed: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in AnalysisStatus::ALL {
            assert_eq!(AnalysisStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AnalysisStatus::parse("done"), None);
    }

    #[test]
    fn test_to_dj_data_maps_unknowns_to_none() {
        let features = TrackFeatures {
            track_id: 5,
            bpm: 0.0,
            key: UNKNOWN_KEY.to_string(),
            camelot_key: None,
            energy: Some(0.4),
            danceability: None,
            status: AnalysisStatus::Completed,
            analysis_error: None,
            analyzed_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let dj = features.to_dj_data();
        assert_eq!(dj.track_id, 5);
        assert_eq!(dj.bpm, None);
        assert_eq!(dj.key, None);
        assert_eq!(dj.energy, Some(0.4));
    }

    #[test]
    fn test_display_name() {
        let mut track = Track {
            id: 1,
            file_path: "/music/house/track01.flac".into(),
            title: None,
            artist: None,
            duration_secs: None,
            tag_bpm: None,
            tag_key: None,
        };
        assert_eq!(track.display_name(), "track01.flac");
        track.title = Some("Strings of Life".into());
        assert_eq!(track.display_name(), "Strings of Life");
        track.artist = Some("Rhythim Is Rhythim".into());
        assert_eq!(track.display_name(), "Rhythim Is Rhythim - Strings of Life");
    }
}
