pub mod analyzer;
pub mod camelot;
pub mod config;
pub mod db;
pub mod jobs;
pub mod ranking;
pub mod scanner;
pub mod scoring;
pub mod worker;

/// Audio file extensions we support (anything the decoder can read)
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "aif", "aiff", "m4a", "aac", "opus", "wv",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "cuewheel";

/// Opaque track identifier (row id of the `tracks` table).
pub type TrackId = i64;
