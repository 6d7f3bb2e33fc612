use lofty::prelude::*;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::config::DecoderConfig;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ffmpeg decode error: {0}")]
    Ffmpeg(String),
    #[error("Decoder produced no samples")]
    Empty,
}

/// Mono f32 PCM for one segment of a track.
#[derive(Debug, Clone)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Shells out to ffmpeg for raw mono PCM.
#[derive(Debug, Clone)]
pub struct Decoder {
    ffmpeg: PathBuf,
    sample_rate: u32,
    segment_secs: f64,
}

impl Decoder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            sample_rate: config.sample_rate,
            segment_secs: config.segment_secs,
        }
    }

    /// True when the ffmpeg binary can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Decode the middle `segment_secs` of a track (or its start when the
    /// duration is unknown or shorter than the window).
    pub fn decode_segment(&self, path: &Path) -> Result<Pcm, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::FileNotFound(path.display().to_string()));
        }

        let (start, length) = segment_window(probe_duration(path), self.segment_secs);

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin"]);
        if start > 0.0 {
            cmd.arg("-ss").arg(format!("{:.3}", start));
        }
        cmd.arg("-t")
            .arg(format!("{:.3}", length))
            .arg("-i")
            .arg(path)
            .args(["-ac", "1", "-ar"])
            .arg(self.sample_rate.to_string())
            .args(["-f", "f32le", "-"]);

        log::debug!(
            "Decoding {} ({:.1}s from {:.1}s)",
            path.display(),
            length,
            start
        );

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|source| DecodeError::Spawn {
                program: self.ffmpeg.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let first = stderr.lines().next().unwrap_or("").trim();
            return Err(DecodeError::Ffmpeg(match output.status.code() {
                Some(code) if first.is_empty() => format!("ffmpeg exited with {}", code),
                Some(code) => format!("ffmpeg exited with {}: {}", code, first),
                None => "ffmpeg terminated by signal".to_string(),
            }));
        }

        let samples = parse_f32le(&output.stdout);
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(Pcm {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

/// Start offset and length of the analysis window.
pub fn segment_window(duration: Option<f64>, segment_secs: f64) -> (f64, f64) {
    match duration {
        Some(d) if d > segment_secs => ((d - segment_secs) / 2.0, segment_secs),
        _ => (0.0, segment_secs),
    }
}

/// Little-endian f32 samples; a trailing partial sample is dropped.
pub fn parse_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Track duration from container properties, if lofty can read the file.
pub fn probe_duration(path: &Path) -> Option<f64> {
    match lofty::read_from_path(path) {
        Ok(file) => {
            let secs = file.properties().duration().as_secs_f64();
            (secs > 0.0).then_some(secs)
        }
        Err(e) => {
            log::debug!("Could not probe duration of {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_window_centres_long_tracks() {
        assert_eq!(segment_window(Some(300.0), 60.0), (120.0, 60.0));
    }

    #[test]
    fn test_segment_window_short_or_unknown_starts_at_zero() {
        assert_eq!(segment_window(Some(45.0), 60.0), (0.0, 60.0));
        assert_eq!(segment_window(Some(60.0), 60.0), (0.0, 60.0));
        assert_eq!(segment_window(None, 60.0), (0.0, 60.0));
    }

    #[test]
    fn test_parse_f32le() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -1.0, 0.25] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(0x7f);
        assert_eq!(parse_f32le(&bytes), vec![0.5, -1.0, 0.25]);
        assert!(parse_f32le(&[1, 2]).is_empty());
    }

    #[test]
    fn test_missing_file() {
        let decoder = Decoder::new(&DecoderConfig::default());
        let err = decoder
            .decode_segment(Path::new("/nonexistent/cuewheel/track.mp3"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::FileNotFound(_)));
    }

    #[test]
    fn test_unrunnable_decoder_is_unavailable() {
        let decoder = Decoder::new(&DecoderConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..DecoderConfig::default()
        });
        assert!(!decoder.is_available());
    }
}
