use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan for music files (used when `scan` has no CLI args).
    pub music_dirs: Vec<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Analysis worker pool.
    pub pool: PoolConfig,
    /// External audio decoder.
    pub decoder: DecoderConfig,
    /// Ranked feature-extraction backends.
    pub backends: BackendConfig,
    /// Compatibility scoring weights and thresholds.
    pub scoring: ScoringConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker processes. 0 = auto-detect from cores and memory.
    pub workers: usize,
    /// Per-request deadline.
    pub request_timeout_secs: u64,
    /// How long a worker may take to report readiness.
    pub startup_timeout_secs: u64,
    /// Grace period for workers to exit after the exit instruction.
    pub shutdown_grace_ms: u64,
    /// Memory budgeted per feature worker when auto-sizing.
    pub memory_per_worker_mb: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            request_timeout_secs: 300,
            startup_timeout_secs: 60,
            shutdown_grace_ms: 2000,
            memory_per_worker_mb: 500,
        }
    }
}

/// Decoder subprocess configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub ffmpeg_path: PathBuf,
    /// Output sample rate (mono f32).
    pub sample_rate: u32,
    /// Length of the middle segment handed to the analysis backend.
    pub segment_secs: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            sample_rate: 44_100,
            segment_secs: 60.0,
        }
    }
}

/// Feature-extraction backend chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Providers in preference order; the first available one is used.
    pub order: Vec<String>,
    /// Essentia streaming extractor binary for the `essentia` provider.
    pub essentia_path: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            order: vec!["spectral".into(), "essentia".into(), "loudness".into()],
            essentia_path: PathBuf::from("essentia_streaming_extractor_music"),
        }
    }
}

/// Weights and thresholds for compatibility scoring and ranking.
///
/// The piecewise breakpoints of each sub-score are fixed; only the weights
/// and the ranking thresholds are tunable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub key_weight: f64,
    pub bpm_weight: f64,
    /// Split in half with danceability when both tracks have it.
    pub energy_weight: f64,
    /// Candidates below this overall score are dropped.
    pub min_score: u8,
    /// BPM window for the candidate pre-filter, in percent.
    pub bpm_window_percent: f64,
    pub default_limit: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            key_weight: 0.45,
            bpm_weight: 0.35,
            energy_weight: 0.20,
            min_score: 60,
            bpm_window_percent: 8.0,
            default_limit: 10,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/cuewheel/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("cuewheel.db")
    } else {
        // Fallback: current directory
        PathBuf::from("cuewheel.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.pool.workers, 0);
        assert_eq!(config.pool.request_timeout_secs, 300);
        assert_eq!(config.decoder.sample_rate, 44_100);
        assert_eq!(config.backends.order, vec!["spectral", "essentia", "loudness"]);
        assert!((config.scoring.key_weight - 0.45).abs() < 1e-12);
        assert_eq!(config.scoring.min_score, 60);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            db_path = "/tmp/dj.db"

            [pool]
            workers = 3

            [scoring]
            min_score = 70
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/dj.db")));
        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.pool.shutdown_grace_ms, 2000);
        assert_eq!(config.scoring.min_score, 70);
        assert!((config.scoring.bpm_weight - 0.35).abs() < 1e-12);
        assert_eq!(config.decoder.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(AppConfig::from_toml("[pool]\nworkers = \"many\"").is_err());
    }
}
