//! Optional backend wrapping the Essentia streaming music extractor.
//!
//! Usage of the binary: `essentia_streaming_extractor_music <audio> <out.json>`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{AnalyzeError, FeatureBackend};
use crate::camelot::{UNKNOWN_KEY, canonical_key_name};
use crate::worker::protocol::{Hints, RawFeatures};

/// Essentia reports danceability on a 0-3 scale.
const DANCEABILITY_SCALE: f64 = 3.0;

static OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The subset of the extractor's JSON we read.
#[derive(Debug, Default, Deserialize)]
struct EssentiaOutput {
    #[serde(default)]
    lowlevel: LowLevel,
    #[serde(default)]
    rhythm: Rhythm,
    #[serde(default)]
    tonal: Tonal,
}

#[derive(Debug, Default, Deserialize)]
struct LowLevel {
    average_loudness: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Rhythm {
    bpm: Option<f64>,
    danceability: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Tonal {
    key_key: Option<String>,
    key_scale: Option<String>,
}

pub struct EssentiaBackend {
    program: PathBuf,
}

impl EssentiaBackend {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl FeatureBackend for EssentiaBackend {
    fn name(&self) -> &'static str {
        "essentia"
    }

    /// The extractor prints usage and exits non-zero without arguments, so
    /// only a failure to execute counts as unavailable.
    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn analyze(&self, path: &Path, hints: &Hints) -> Result<RawFeatures, AnalyzeError> {
        if !path.exists() {
            return Err(AnalyzeError::Backend(format!(
                "file not found: {}",
                path.display()
            )));
        }

        let tmp_json = std::env::temp_dir().join(format!(
            "cuewheel_essentia_{}_{}.json",
            std::process::id(),
            OUTPUT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let output = Command::new(&self.program)
            .arg(path)
            .arg(&tmp_json)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            std::fs::remove_file(&tmp_json).ok();
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzeError::Backend(format!(
                "essentia extractor failed: {}",
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        let json = std::fs::read_to_string(&tmp_json);
        std::fs::remove_file(&tmp_json).ok();

        let mut features = parse_output(&json?)?;
        if let Some(bpm) = hints.bpm {
            features.bpm = bpm;
        }
        if let Some(key) = &hints.key {
            features.key = key.clone();
        }
        Ok(features)
    }
}

fn parse_output(json: &str) -> Result<RawFeatures, AnalyzeError> {
    let out: EssentiaOutput = serde_json::from_str(json)?;

    let key = match (&out.tonal.key_key, &out.tonal.key_scale) {
        (Some(tonic), Some(scale)) => {
            let name = if scale.eq_ignore_ascii_case("minor") {
                format!("{}m", tonic)
            } else {
                tonic.clone()
            };
            canonical_key_name(&name).to_string()
        }
        _ => UNKNOWN_KEY.to_string(),
    };

    Ok(RawFeatures {
        bpm: out.rhythm.bpm.unwrap_or(0.0),
        key,
        energy: out.lowlevel.average_loudness.unwrap_or(0.0).clamp(0.0, 1.0),
        danceability: out
            .rhythm
            .danceability
            .map(|d| (d / DANCEABILITY_SCALE).clamp(0.0, 1.0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_output() {
        let json = r#"{
            "lowlevel": {"average_loudness": 0.87, "dynamic_complexity": 3.1},
            "rhythm": {"bpm": 127.98, "danceability": 1.5, "onset_rate": 4.2},
            "tonal": {"key_key": "F#", "key_scale": "minor", "key_strength": 0.7},
            "metadata": {"version": {"essentia": "2.1"}}
        }"#;
        let features = parse_output(json).unwrap();
        assert_eq!(features.bpm, 127.98);
        assert_eq!(features.key, "F#m");
        assert_eq!(features.energy, 0.87);
        assert_eq!(features.danceability, Some(0.5));
    }

    #[test]
    fn test_parse_sparse_output() {
        let features = parse_output(r#"{"tonal": {"key_key": "C"}}"#).unwrap();
        assert_eq!(features.bpm, 0.0);
        assert_eq!(features.key, UNKNOWN_KEY);
        assert_eq!(features.energy, 0.0);
        assert_eq!(features.danceability, None);
    }

    #[test]
    fn test_enharmonic_spelling() {
        let json = r#"{"tonal": {"key_key": "A#", "key_scale": "major"}}"#;
        assert_eq!(parse_output(json).unwrap().key, "Bb");
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(parse_output("not json"), Err(AnalyzeError::Json(_))));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let backend = EssentiaBackend::new(PathBuf::from("/nonexistent/essentia_extractor"));
        assert!(!backend.is_available());
    }
}
