pub mod decode;
pub mod essentia;
pub mod features;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;
use crate::camelot::UNKNOWN_KEY;
use crate::worker::protocol::{Hints, RawFeatures};
use decode::Decoder;
use essentia::EssentiaBackend;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A feature-extraction capability. Implementations are queried in
/// configured order at worker startup; the first available one serves the
/// worker for its whole life.
pub trait FeatureBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;
    fn analyze(&self, path: &Path, hints: &Hints) -> Result<RawFeatures, AnalyzeError>;
}

/// Decode the middle segment and run the native DSP extractor.
pub struct SpectralBackend {
    decoder: Decoder,
}

impl SpectralBackend {
    pub fn new(decoder: Decoder) -> Self {
        Self { decoder }
    }
}

impl FeatureBackend for SpectralBackend {
    fn name(&self) -> &'static str {
        "spectral"
    }

    fn is_available(&self) -> bool {
        self.decoder.is_available()
    }

    fn analyze(&self, path: &Path, hints: &Hints) -> Result<RawFeatures, AnalyzeError> {
        let pcm = self.decoder.decode_segment(path)?;
        features::extract(&pcm, hints)
    }
}

/// Coarse best-effort features: loudness-only energy, hinted or unknown
/// BPM and key.
pub struct LoudnessBackend {
    decoder: Decoder,
}

impl LoudnessBackend {
    pub fn new(decoder: Decoder) -> Self {
        Self { decoder }
    }
}

impl FeatureBackend for LoudnessBackend {
    fn name(&self) -> &'static str {
        "loudness"
    }

    fn is_available(&self) -> bool {
        self.decoder.is_available()
    }

    fn analyze(&self, path: &Path, hints: &Hints) -> Result<RawFeatures, AnalyzeError> {
        let pcm = self.decoder.decode_segment(path)?;
        Ok(RawFeatures {
            bpm: hints.bpm.unwrap_or(0.0),
            key: hints.key.clone().unwrap_or_else(|| UNKNOWN_KEY.to_string()),
            energy: features::loudness_energy(&pcm.samples),
            danceability: None,
        })
    }
}

/// Build the configured providers in preference order. Unknown names are
/// skipped with a warning.
pub fn build_backend_chain(config: &AppConfig) -> Vec<Box<dyn FeatureBackend>> {
    let mut chain: Vec<Box<dyn FeatureBackend>> = Vec::new();
    for name in &config.backends.order {
        match name.trim().to_ascii_lowercase().as_str() {
            "spectral" => chain.push(Box::new(SpectralBackend::new(Decoder::new(&config.decoder)))),
            "essentia" => chain.push(Box::new(EssentiaBackend::new(
                config.backends.essentia_path.clone(),
            ))),
            "loudness" => chain.push(Box::new(LoudnessBackend::new(Decoder::new(&config.decoder)))),
            other => log::warn!("Unknown analysis backend '{}' in config, skipping", other),
        }
    }
    chain
}

/// First provider that reports itself available.
pub fn select_backend(chain: Vec<Box<dyn FeatureBackend>>) -> Option<Box<dyn FeatureBackend>> {
    for backend in chain {
        if backend.is_available() {
            return Some(backend);
        }
        log::info!("Analysis backend '{}' unavailable", backend.name());
    }
    None
}

/// The degraded path used in-process when the worker pool has no ready
/// workers.
pub fn loudness_fallback(config: &AppConfig) -> Arc<dyn FeatureBackend> {
    Arc::new(LoudnessBackend::new(Decoder::new(&config.decoder)))
}
