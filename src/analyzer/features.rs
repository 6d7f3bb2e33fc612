//! Native feature extraction: tempo, key, energy and danceability from a
//! mono PCM segment.
//!
//! Tempo comes from the autocorrelation of a spectral-flux onset envelope,
//! key from a chromagram matched against the Krumhansl-Kessler profiles.

use realfft::RealFftPlanner;

use super::AnalyzeError;
use super::decode::Pcm;
use crate::camelot::{CamelotKey, UNKNOWN_KEY};
use crate::worker::protocol::{Hints, RawFeatures};

/// STFT frame for the onset envelope.
pub const FRAME_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 512;

/// Longer frames for chroma so adjacent semitones resolve in the bass.
const CHROMA_FFT_SIZE: usize = 8192;
const CHROMA_HOP: usize = 4096;
const CHROMA_MIN_HZ: f32 = 130.0;
const CHROMA_MAX_HZ: f32 = 5000.0;

/// Tempo search range.
const MIN_TEMPO: f64 = 60.0;
const MAX_TEMPO: f64 = 200.0;
/// Octave errors are folded into [FOLD_LOW, FOLD_HIGH).
const FOLD_LOW: f64 = 70.0;
const FOLD_HIGH: f64 = 180.0;
/// Centre of the log-gaussian tempo prior, in BPM.
const TEMPO_PRIOR_BPM: f64 = 120.0;
/// Width of the prior, in octaves.
const TEMPO_PRIOR_OCTAVES: f64 = 1.0;

/// Loudness mapping: RMS dBFS at or below LOUDNESS_FLOOR_DB is 0 energy,
/// at or above LOUDNESS_CEIL_DB is 1.
const LOUDNESS_FLOOR_DB: f64 = -40.0;
const LOUDNESS_CEIL_DB: f64 = -6.0;
/// Onsets per second treated as maximally busy.
const BUSY_ONSET_RATE: f64 = 8.0;
const LOUDNESS_SHARE: f64 = 0.7;

// Krumhansl-Kessler key profiles, tonic first
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Full analysis of one decoded segment. Hinted BPM and key are trusted
/// and skip their estimation step.
pub fn extract(pcm: &Pcm, hints: &Hints) -> Result<RawFeatures, AnalyzeError> {
    let mut planner = RealFftPlanner::<f32>::new();
    let frame_rate = pcm.sample_rate as f64 / HOP_SIZE as f64;

    let envelope = onset_envelope(&pcm.samples, &mut planner)?;

    let (bpm, danceability) = match hints.bpm {
        Some(bpm) => (bpm, beat_strength(&envelope, frame_rate, bpm)),
        None => match estimate_tempo(&envelope, frame_rate) {
            Some(tempo) => (tempo.bpm, Some(tempo.strength)),
            None => (0.0, None),
        },
    };

    let key = match &hints.key {
        Some(key) => key.clone(),
        None => {
            let chroma = chromagram(&pcm.samples, pcm.sample_rate, &mut planner)?;
            detect_key(&chroma)
                .map(|k| k.key_name().to_string())
                .unwrap_or_else(|| UNKNOWN_KEY.to_string())
        }
    };

    let loudness = loudness_energy(&pcm.samples);
    let density = onset_density(&envelope, frame_rate);
    let energy = (LOUDNESS_SHARE * loudness + (1.0 - LOUDNESS_SHARE) * density).clamp(0.0, 1.0);

    log::debug!(
        "Extracted {:.1}s: bpm={:.1} key={} energy={:.2} dance={:?}",
        pcm.duration_secs(),
        bpm,
        key,
        energy,
        danceability
    );

    Ok(RawFeatures {
        bpm,
        key,
        energy,
        danceability,
    })
}

/// 0-1 energy from RMS loudness alone.
pub fn loudness_energy(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square =
        samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64;
    if mean_square <= 0.0 {
        return 0.0;
    }
    let db = 10.0 * mean_square.log10();
    ((db - LOUDNESS_FLOOR_DB) / (LOUDNESS_CEIL_DB - LOUDNESS_FLOOR_DB)).clamp(0.0, 1.0)
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

fn fft_error(e: realfft::FftError) -> AnalyzeError {
    AnalyzeError::Backend(format!("FFT failed: {:?}", e))
}

/// Half-wave rectified spectral flux of the log-magnitude STFT, one value
/// per hop.
fn onset_envelope(
    samples: &[f32],
    planner: &mut RealFftPlanner<f32>,
) -> Result<Vec<f32>, AnalyzeError> {
    if samples.len() < FRAME_SIZE {
        return Ok(Vec::new());
    }

    let fft = planner.plan_fft_forward(FRAME_SIZE);
    let window = hann_window(FRAME_SIZE);
    let norm = 1.0 / (FRAME_SIZE as f32).sqrt();

    let mut frame = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut scratch = fft.make_scratch_vec();
    let mut previous = vec![0.0f32; spectrum.len()];

    let frames = (samples.len() - FRAME_SIZE) / HOP_SIZE + 1;
    let mut envelope = Vec::with_capacity(frames);

    for idx in 0..frames {
        let start = idx * HOP_SIZE;
        for i in 0..FRAME_SIZE {
            frame[i] = samples[start + i] * window[i];
        }
        fft.process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
            .map_err(fft_error)?;

        let mut flux = 0.0f32;
        for (bin, c) in spectrum.iter().enumerate() {
            let magnitude = (1.0 + 100.0 * c.norm() * norm).ln();
            let rise = magnitude - previous[bin];
            if rise > 0.0 {
                flux += rise;
            }
            previous[bin] = magnitude;
        }
        envelope.push(flux);
    }

    // The first frame rises from silence by construction
    if let Some(first) = envelope.first_mut() {
        *first = 0.0;
    }
    Ok(envelope)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tempo {
    bpm: f64,
    /// Normalized autocorrelation at the beat lag, 0-1.
    strength: f64,
}

/// Normalized autocorrelation of the mean-removed envelope at `lag`.
fn autocorrelation(centered: &[f64], energy: f64, lag: usize) -> f64 {
    if lag >= centered.len() {
        return 0.0;
    }
    centered[..centered.len() - lag]
        .iter()
        .zip(&centered[lag..])
        .map(|(a, b)| a * b)
        .sum::<f64>()
        / energy
}

/// Mean-removed envelope and its energy, or None for a flat envelope.
fn center(envelope: &[f32]) -> Option<(Vec<f64>, f64)> {
    if envelope.is_empty() {
        return None;
    }
    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / envelope.len() as f64;
    let centered: Vec<f64> = envelope.iter().map(|&v| v as f64 - mean).collect();
    let energy: f64 = centered.iter().map(|v| v * v).sum();
    (energy > 1e-9).then_some((centered, energy))
}

fn estimate_tempo(envelope: &[f32], frame_rate: f64) -> Option<Tempo> {
    let min_lag = ((60.0 * frame_rate / MAX_TEMPO).floor() as usize).max(2);
    let max_lag = (60.0 * frame_rate / MIN_TEMPO).ceil() as usize;
    if envelope.len() < max_lag * 2 {
        return None;
    }
    let (centered, energy) = center(envelope)?;

    // One extra lag on each side for the parabolic fit
    let acf: Vec<f64> = (min_lag - 1..=max_lag + 1)
        .map(|lag| autocorrelation(&centered, energy, lag))
        .collect();
    let at = |lag: usize| acf[lag + 1 - min_lag];

    let mut best_lag = 0;
    let mut best_score = 0.0;
    for lag in min_lag..=max_lag {
        let bpm = 60.0 * frame_rate / lag as f64;
        let octaves = (bpm / TEMPO_PRIOR_BPM).log2() / TEMPO_PRIOR_OCTAVES;
        let score = at(lag) * (-0.5 * octaves * octaves).exp();
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }
    if best_lag == 0 {
        return None;
    }

    let (left, mid, right) = (at(best_lag - 1), at(best_lag), at(best_lag + 1));
    let denom = left - 2.0 * mid + right;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let refined = best_lag as f64 + offset;

    Some(Tempo {
        bpm: fold_tempo(60.0 * frame_rate / refined),
        strength: mid.clamp(0.0, 1.0),
    })
}

/// Autocorrelation strength at the lag of a known tempo.
fn beat_strength(envelope: &[f32], frame_rate: f64, bpm: f64) -> Option<f64> {
    if bpm <= 0.0 {
        return None;
    }
    let lag = (60.0 * frame_rate / bpm).round() as usize;
    if lag == 0 || envelope.len() < lag * 2 {
        return None;
    }
    let (centered, energy) = center(envelope)?;
    Some(autocorrelation(&centered, energy, lag).clamp(0.0, 1.0))
}

/// Double or halve until the tempo lands in the DJ-typical range.
fn fold_tempo(mut bpm: f64) -> f64 {
    if bpm <= 0.0 || !bpm.is_finite() {
        return 0.0;
    }
    while bpm < FOLD_LOW {
        bpm *= 2.0;
    }
    while bpm >= FOLD_HIGH {
        bpm /= 2.0;
    }
    bpm
}

/// Share of envelope frames that are local peaks above mean + 1 std,
/// scaled by BUSY_ONSET_RATE.
fn onset_density(envelope: &[f32], frame_rate: f64) -> f64 {
    if envelope.len() < 3 {
        return 0.0;
    }
    let n = envelope.len() as f64;
    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = envelope.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let threshold = mean + var.sqrt();
    if var <= 1e-12 {
        return 0.0;
    }

    let onsets = envelope
        .windows(3)
        .filter(|w| w[1] as f64 > threshold && w[1] >= w[0] && w[1] > w[2])
        .count() as f64;
    let per_second = onsets / (n / frame_rate);
    (per_second / BUSY_ONSET_RATE).clamp(0.0, 1.0)
}

/// 12-bin pitch-class energy summed over the segment, C first.
fn chromagram(
    samples: &[f32],
    sample_rate: u32,
    planner: &mut RealFftPlanner<f32>,
) -> Result<[f64; 12], AnalyzeError> {
    let mut chroma = [0.0f64; 12];
    if samples.len() < CHROMA_FFT_SIZE {
        return Ok(chroma);
    }

    let fft = planner.plan_fft_forward(CHROMA_FFT_SIZE);
    let window = hann_window(CHROMA_FFT_SIZE);
    let mut frame = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut scratch = fft.make_scratch_vec();

    let bin_hz = sample_rate as f32 / CHROMA_FFT_SIZE as f32;
    let first_bin = (CHROMA_MIN_HZ / bin_hz).ceil() as usize;
    let last_bin = ((CHROMA_MAX_HZ / bin_hz) as usize).min(spectrum.len() - 1);
    let pitch_classes: Vec<usize> = (first_bin..=last_bin)
        .map(|bin| {
            let midi = 69.0 + 12.0 * (bin as f32 * bin_hz / 440.0).log2();
            (midi.round() as i64).rem_euclid(12) as usize
        })
        .collect();

    let frames = (samples.len() - CHROMA_FFT_SIZE) / CHROMA_HOP + 1;
    for idx in 0..frames {
        let start = idx * CHROMA_HOP;
        for i in 0..CHROMA_FFT_SIZE {
            frame[i] = samples[start + i] * window[i];
        }
        fft.process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
            .map_err(fft_error)?;

        for (offset, &pc) in pitch_classes.iter().enumerate() {
            chroma[pc] += spectrum[first_bin + offset].norm_sqr() as f64;
        }
    }
    Ok(chroma)
}

/// Best of the 24 rotated profiles by Pearson correlation, or None when
/// the chroma carries no energy.
fn detect_key(chroma: &[f64; 12]) -> Option<CamelotKey> {
    let total: f64 = chroma.iter().sum();
    if total <= 1e-9 {
        return None;
    }
    let normalized: Vec<f64> = chroma.iter().map(|v| v / total).collect();

    let mut best: Option<(f64, u8, bool)> = None;
    for tonic in 0..12 {
        for (profile, minor) in [(&MAJOR_PROFILE, false), (&MINOR_PROFILE, true)] {
            let r = correlate(&normalized, profile, tonic);
            if best.is_none_or(|(score, _, _)| r > score) {
                best = Some((r, tonic as u8, minor));
            }
        }
    }
    best.map(|(_, tonic, minor)| CamelotKey::from_pitch_class(tonic, minor))
}

/// Pearson correlation of chroma against a profile rooted at `tonic`.
fn correlate(chroma: &[f64], profile: &[f32; 12], tonic: usize) -> f64 {
    let rotated: Vec<f64> = (0..12).map(|i| chroma[(tonic + i) % 12]).collect();
    let mean_c = rotated.iter().sum::<f64>() / 12.0;
    let mean_p = profile.iter().map(|&p| p as f64).sum::<f64>() / 12.0;

    let mut cov = 0.0;
    let mut var_c = 0.0;
    let mut var_p = 0.0;
    for (c, &p) in rotated.iter().zip(profile) {
        let dc = c - mean_c;
        let dp = p as f64 - mean_p;
        cov += dc * dp;
        var_c += dc * dc;
        var_p += dp * dp;
    }
    if var_c <= 0.0 || var_p <= 0.0 {
        return 0.0;
    }
    cov / (var_c.sqrt() * var_p.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    fn tone(freqs: &[f32], secs: f32, amplitude: f32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                freqs
                    .iter()
                    .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum::<f32>()
                    * amplitude
                    / freqs.len() as f32
            })
            .collect()
    }

    /// Decaying 1 kHz blips on every beat.
    fn click_track(bpm: f64, secs: f64) -> Vec<f32> {
        let n = (secs * SR as f64) as usize;
        let mut samples = vec![0.0f32; n];
        let period = 60.0 / bpm;
        let click_len = (0.01 * SR as f64) as usize;
        let mut beat = 0.0;
        while beat < secs {
            let start = (beat * SR as f64) as usize;
            for i in 0..click_len {
                if start + i >= n {
                    break;
                }
                let t = i as f32 / SR as f32;
                let decay = (-(i as f32) / (click_len as f32 / 4.0)).exp();
                samples[start + i] = 0.8 * decay * (2.0 * std::f32::consts::PI * 1000.0 * t).sin();
            }
            beat += period;
        }
        samples
    }

    fn pcm(samples: Vec<f32>) -> Pcm {
        Pcm {
            samples,
            sample_rate: SR,
        }
    }

    #[test]
    fn test_click_track_tempo() {
        let features = extract(&pcm(click_track(120.0, 20.0)), &Hints::default()).unwrap();
        assert!(
            (features.bpm - 120.0).abs() < 2.0,
            "expected ~120 BPM, got {}",
            features.bpm
        );
        assert!(features.danceability.unwrap() > 0.2);
    }

    #[test]
    fn test_c_major_triad() {
        let features = extract(
            &pcm(tone(&[261.63, 329.63, 392.00], 3.0, 0.5)),
            &Hints::default(),
        )
        .unwrap();
        assert_eq!(features.key, "C");
    }

    #[test]
    fn test_a_minor_triad() {
        let chroma = chromagram(
            &tone(&[220.00, 261.63, 329.63], 3.0, 0.5),
            SR,
            &mut RealFftPlanner::new(),
        )
        .unwrap();
        assert_eq!(detect_key(&chroma).unwrap().key_name(), "Am");
    }

    #[test]
    fn test_silence() {
        let features = extract(&pcm(vec![0.0; SR as usize * 3]), &Hints::default()).unwrap();
        assert_eq!(features.bpm, 0.0);
        assert_eq!(features.key, UNKNOWN_KEY);
        assert_eq!(features.energy, 0.0);
        assert_eq!(features.danceability, None);
    }

    #[test]
    fn test_hints_skip_estimation() {
        let hints = Hints {
            bpm: Some(128.0),
            key: Some("F#m".into()),
        };
        let features = extract(&pcm(tone(&[440.0], 2.0, 0.5)), &hints).unwrap();
        assert_eq!(features.bpm, 128.0);
        assert_eq!(features.key, "F#m");
    }

    #[test]
    fn test_louder_means_more_energy() {
        let quiet = loudness_energy(&tone(&[440.0], 1.0, 0.01));
        let loud = loudness_energy(&tone(&[440.0], 1.0, 0.9));
        assert!(loud > quiet);
        assert!(loud > 0.8);
        assert_eq!(loudness_energy(&[]), 0.0);
    }

    #[test]
    fn test_fold_tempo() {
        assert_eq!(fold_tempo(60.0), 120.0);
        assert_eq!(fold_tempo(200.0), 100.0);
        assert_eq!(fold_tempo(174.0), 174.0);
        assert_eq!(fold_tempo(0.0), 0.0);
    }

    #[test]
    fn test_short_input_has_no_tempo() {
        assert!(onset_envelope(&[0.1; 100], &mut RealFftPlanner::new())
            .unwrap()
            .is_empty());
        assert_eq!(estimate_tempo(&[], 86.0), None);
    }
}
