//! Harmonic/tempo compatibility between two tracks.
//!
//! Four independent 0-100 sub-scores (tempo, key, energy, danceability) are
//! combined with the weights from [`ScoringConfig`]. The piecewise curves below
//! are fixed: ranking order depends on their exact breakpoints.

use serde::Serialize;

use crate::camelot::CamelotKey;
use crate::config::ScoringConfig;
use crate::TrackId;

/// Score returned when a sub-score's inputs are unknown.
const NEUTRAL_TEMPO: f64 = 50.0;
const NEUTRAL_KEY: f64 = 50.0;
const NEUTRAL_ENERGY: f64 = 70.0;

/// Energy differences up to this are labelled a smooth transition.
const SMOOTH_ENERGY_DELTA: f64 = 0.15;

/// Beyond this tempo difference (percent) the tracks can't be beatmatched.
const BEATMATCH_LIMIT_PERCENT: f64 = 8.0;

/// Minimal feature set the scoring engine works on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDjData {
    pub track_id: TrackId,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub camelot_key: Option<String>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
}

impl TrackDjData {
    /// Known BPM (> 0).
    pub fn known_bpm(&self) -> Option<f64> {
        self.bpm.filter(|b| *b > 0.0 && b.is_finite())
    }

    /// Wheel position, preferring the stored Camelot code over the key name.
    pub fn wheel_key(&self) -> Option<CamelotKey> {
        self.camelot_key
            .as_deref()
            .and_then(CamelotKey::parse_code)
            .or_else(|| self.key.as_deref().and_then(CamelotKey::from_key_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCompatibility {
    Perfect,
    Compatible,
    EnergyBoost,
    Incompatible,
}

impl KeyCompatibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perfect => "perfect",
            Self::Compatible => "compatible",
            Self::EnergyBoost => "energy_boost",
            Self::Incompatible => "incompatible",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Smooth,
    EnergyUp,
    EnergyDown,
    KeyChange,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smooth => "smooth",
            Self::EnergyUp => "energy_up",
            Self::EnergyDown => "energy_down",
            Self::KeyChange => "key_change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoScore {
    pub score: f64,
    /// Smallest difference over direct, half- and double-time, in percent.
    pub diff_percent: Option<f64>,
    pub can_beatmatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyScore {
    pub score: f64,
    pub compatibility: KeyCompatibility,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyScore {
    pub score: f64,
    /// Absolute difference; direction is carried by `transition`.
    pub diff: Option<f64>,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DanceabilityScore {
    pub score: f64,
    pub diff: f64,
}

/// Full compatibility breakdown for a source -> target transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityScore {
    pub overall: u8,
    pub bpm_score: f64,
    pub key_score: f64,
    pub energy_score: f64,
    pub danceability_score: Option<f64>,
    pub bpm_diff_percent: Option<f64>,
    pub energy_diff: Option<f64>,
    pub danceability_diff: Option<f64>,
    pub key_compatibility: KeyCompatibility,
    pub can_beatmatch: bool,
    pub suggested_transition: Transition,
}

/// Linear interpolation of `x` in `[x0, x1]` onto `[y0, y1]`.
fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    y0 + (x - x0) / (x1 - x0) * (y1 - y0)
}

pub fn bpm_score(source: Option<f64>, target: Option<f64>) -> TempoScore {
    let known = |b: Option<f64>| b.filter(|v| *v > 0.0 && v.is_finite());
    let (Some(source), Some(target)) = (known(source), known(target)) else {
        return TempoScore { score: NEUTRAL_TEMPO, diff_percent: None, can_beatmatch: false };
    };

    let diff = [target, target * 2.0, target / 2.0]
        .iter()
        .map(|h| (1.0 - source / h).abs() * 100.0)
        .fold(f64::INFINITY, f64::min);

    let (score, can_beatmatch) = if diff <= 0.5 {
        (100.0, true)
    } else if diff <= 3.0 {
        (lerp(diff, 0.5, 3.0, 95.0, 90.0), true)
    } else if diff <= 6.0 {
        (lerp(diff, 3.0, 6.0, 90.0, 70.0), true)
    } else if diff <= 10.0 {
        (lerp(diff, 6.0, 10.0, 70.0, 40.0), diff <= BEATMATCH_LIMIT_PERCENT)
    } else {
        ((40.0 - 4.0 * (diff - 10.0)).max(0.0), false)
    };

    TempoScore { score, diff_percent: Some(diff), can_beatmatch }
}

pub fn key_score(source: Option<CamelotKey>, target: Option<CamelotKey>) -> KeyScore {
    let (Some(source), Some(target)) = (source, target) else {
        return KeyScore { score: NEUTRAL_KEY, compatibility: KeyCompatibility::Compatible };
    };

    let d = source.distance(&target);
    let same_mode = source.mode() == target.mode();

    let (score, compatibility) = match (d, same_mode) {
        (0, true) => (100.0, KeyCompatibility::Perfect),
        (0, false) => (85.0, KeyCompatibility::Compatible),
        (1, true) => (90.0, KeyCompatibility::EnergyBoost),
        (1, false) => (75.0, KeyCompatibility::Compatible),
        (2, _) => (55.0, KeyCompatibility::Compatible),
        _ => ((50.0 - 5.0 * d as f64).max(20.0), KeyCompatibility::Incompatible),
    };

    KeyScore { score, compatibility }
}

/// Shared curve for energy and danceability differences.
fn delta_curve(delta: f64) -> f64 {
    if delta <= 0.1 {
        100.0
    } else if delta <= 0.2 {
        lerp(delta, 0.1, 0.2, 90.0, 80.0)
    } else if delta <= 0.3 {
        lerp(delta, 0.2, 0.3, 80.0, 70.0)
    } else if delta <= 0.5 {
        lerp(delta, 0.3, 0.5, 70.0, 60.0)
    } else {
        (60.0 - 60.0 * (delta - 0.5)).max(30.0)
    }
}

pub fn energy_score(source: Option<f64>, target: Option<f64>) -> EnergyScore {
    let (Some(source), Some(target)) = (source, target) else {
        return EnergyScore { score: NEUTRAL_ENERGY, diff: None, transition: Transition::Smooth };
    };

    let signed = target - source;
    let delta = signed.abs();
    let transition = if delta <= SMOOTH_ENERGY_DELTA {
        Transition::Smooth
    } else if signed > 0.0 {
        Transition::EnergyUp
    } else {
        Transition::EnergyDown
    };

    EnergyScore { score: delta_curve(delta), diff: Some(delta), transition }
}

/// `None` when either side lacks danceability; never a neutral guess.
pub fn danceability_score(source: Option<f64>, target: Option<f64>) -> Option<DanceabilityScore> {
    let delta = (target? - source?).abs();
    Some(DanceabilityScore { score: delta_curve(delta), diff: delta })
}

/// Score the transition from `source` into `target`.
pub fn calculate_compatibility(
    source: &TrackDjData,
    target: &TrackDjData,
    config: &ScoringConfig,
) -> CompatibilityScore {
    let tempo = bpm_score(source.known_bpm(), target.known_bpm());
    let key = key_score(source.wheel_key(), target.wheel_key());
    let energy = energy_score(source.energy, target.energy);
    let dance = danceability_score(source.danceability, target.danceability);

    let weighted = match dance {
        // Danceability takes half of the energy weight; the other weights are untouched.
        Some(d) => {
            let half = config.energy_weight / 2.0;
            key.score * config.key_weight
                + tempo.score * config.bpm_weight
                + energy.score * half
                + d.score * half
        }
        None => {
            key.score * config.key_weight
                + tempo.score * config.bpm_weight
                + energy.score * config.energy_weight
        }
    };

    let suggested_transition = if key.compatibility == KeyCompatibility::Incompatible {
        Transition::KeyChange
    } else if energy.transition != Transition::Smooth {
        energy.transition
    } else {
        Transition::Smooth
    };

    CompatibilityScore {
        overall: weighted.round().clamp(0.0, 100.0) as u8,
        bpm_score: tempo.score,
        key_score: key.score,
        energy_score: energy.score,
        danceability_score: dance.map(|d| d.score),
        bpm_diff_percent: tempo.diff_percent,
        energy_diff: energy.diff,
        danceability_diff: dance.map(|d| d.diff),
        key_compatibility: key.compatibility,
        can_beatmatch: tempo.can_beatmatch,
        suggested_transition,
    }
}
