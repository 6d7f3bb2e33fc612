use rayon::prelude::*;
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::scoring::{CompatibilityScore, TrackDjData, calculate_compatibility};

/// A ranked next-track candidate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub candidate: TrackDjData,
    pub score: CompatibilityScore,
}

/// Narrow a candidate pool before scoring.
///
/// Keeps candidates (other than the source itself) whose BPM is within
/// `bpm_window_percent` of the source directly or at half/double time, and
/// whose key is wheel-compatible with the source. An unknown BPM or key on
/// either side passes that criterion. Input order is preserved.
pub fn prefilter(
    source: &TrackDjData,
    candidates: &[TrackDjData],
    bpm_window_percent: f64,
) -> Vec<TrackDjData> {
    let source_bpm = source.known_bpm();
    let source_key = source.wheel_key();

    candidates
        .iter()
        .filter(|c| c.track_id != source.track_id)
        .filter(|c| match (source_bpm, c.known_bpm()) {
            (Some(s), Some(t)) => within_window(s, t, bpm_window_percent),
            _ => true,
        })
        .filter(|c| match (source_key, c.wheel_key()) {
            (Some(s), Some(t)) => s.is_compatible(&t),
            _ => true,
        })
        .cloned()
        .collect()
}

fn within_window(source: f64, target: f64, window_percent: f64) -> bool {
    [target, target * 2.0, target / 2.0]
        .iter()
        .any(|h| (1.0 - source / h).abs() * 100.0 <= window_percent)
}

/// Score every candidate against `source`, drop those below `min_score`,
/// sort by descending overall score and keep the first `limit`.
///
/// Candidates with equal overall scores keep their input order.
pub fn rank_candidates(
    source: &TrackDjData,
    candidates: &[TrackDjData],
    config: &ScoringConfig,
    min_score: u8,
    limit: usize,
) -> Vec<Suggestion> {
    // Indexed parallel collect keeps input order
    let mut ranked: Vec<Suggestion> = candidates
        .par_iter()
        .map(|c| Suggestion {
            candidate: c.clone(),
            score: calculate_compatibility(source, c, config),
        })
        .collect();

    ranked.retain(|s| s.score.overall >= min_score);
    // Stable sort: ties stay in pre-filter order
    ranked.sort_by(|a, b| b.score.overall.cmp(&a.score.overall));
    ranked.truncate(limit);
    ranked
}

/// Pre-filter then rank, using the thresholds from `config`.
pub fn suggest(
    source: &TrackDjData,
    pool: &[TrackDjData],
    config: &ScoringConfig,
    limit: usize,
) -> Vec<Suggestion> {
    let candidates = prefilter(source, pool, config.bpm_window_percent);
    log::debug!(
        "Pre-filter kept {} of {} candidates for track {}",
        candidates.len(),
        pool.len(),
        source.track_id
    );
    rank_candidates(source, &candidates, config, config.min_score, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: i64, bpm: Option<f64>, key: Option<&str>, energy: Option<f64>) -> TrackDjData {
        TrackDjData {
            track_id: id,
            bpm,
            key: key.map(|k| k.to_string()),
            camelot_key: key.and_then(crate::camelot::camelot_code),
            energy,
            danceability: None,
        }
    }

    fn library() -> Vec<TrackDjData> {
        vec![
            track(2, Some(128.0), Some("Em"), Some(0.5)),  // 9A: energy boost
            track(3, Some(128.0), Some("Am"), Some(0.5)),  // perfect
            track(4, Some(90.0), Some("Am"), Some(0.5)),   // far tempo
            track(5, Some(128.0), Some("Ebm"), Some(0.5)), // 2A: clash
            track(6, Some(64.0), Some("C"), Some(0.5)),    // half time, relative major
            track(7, Some(128.0), Some("Am"), Some(0.5)),  // ties with 3
            track(8, None, None, None),                    // unknown everything
        ]
    }

    #[test]
    fn test_rank_threshold_and_order() {
        let source = track(1, Some(128.0), Some("Am"), Some(0.5));
        let ranked = rank_candidates(&source, &library(), &ScoringConfig::default(), 60, 10);

        assert!(!ranked.is_empty());
        for s in &ranked {
            assert!(s.score.overall >= 60);
        }
        for pair in ranked.windows(2) {
            assert!(pair[0].score.overall >= pair[1].score.overall);
        }

        let ids: Vec<i64> = ranked.iter().map(|s| s.candidate.track_id).collect();
        // Ties (3 and 7 are identical) keep input order
        let pos3 = ids.iter().position(|&i| i == 3).unwrap();
        let pos7 = ids.iter().position(|&i| i == 7).unwrap();
        assert!(pos3 < pos7);
        // 90 BPM vs 128: tempo score 0, 45 + 0 + 20 = 65 -> kept
        assert!(ids.contains(&4));
        // Clashing key at the same tempo: 20 * 0.45 + 35 + 20 = 64 -> kept, ranked last
        assert_eq!(*ids.last().unwrap(), 5);
        // All-unknown candidate: 50 * 0.45 + 50 * 0.35 + 70 * 0.2 = 54 -> dropped
        assert!(!ids.contains(&8));
    }

    #[test]
    fn test_rank_drops_below_threshold() {
        let source = track(1, Some(128.0), Some("Am"), Some(0.9));
        let pool = vec![track(2, Some(90.0), Some("Ebm"), Some(0.1))];
        // 20 * 0.45 + 0 + 42 * 0.2 = 17.4
        assert!(rank_candidates(&source, &pool, &ScoringConfig::default(), 60, 10).is_empty());
    }

    #[test]
    fn test_rank_limit() {
        let source = track(1, Some(128.0), Some("Am"), Some(0.5));
        let ranked = rank_candidates(&source, &library(), &ScoringConfig::default(), 0, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].candidate.track_id, 3);
        assert_eq!(ranked[1].candidate.track_id, 7);
    }

    #[test]
    fn test_prefilter() {
        let source = track(1, Some(128.0), Some("Am"), Some(0.5));
        let mut pool = library();
        pool.push(source.clone());

        let kept: Vec<i64> = prefilter(&source, &pool, 8.0)
            .iter()
            .map(|t| t.track_id)
            .collect();
        // 4 is out of the BPM window, 5 is not wheel-compatible, 1 is the source
        assert_eq!(kept, vec![2, 3, 6, 7, 8]);
    }

    #[test]
    fn test_suggest_uses_config_thresholds() {
        let source = track(1, Some(128.0), Some("Am"), Some(0.5));
        let config = ScoringConfig { min_score: 90, ..ScoringConfig::default() };
        let ids: Vec<i64> = suggest(&source, &library(), &config, 10)
            .iter()
            .map(|s| s.candidate.track_id)
            .collect();
        // 2 (energy boost) = 95.5 -> 96, 6 (half time, relative major) = 93.25 -> 93
        assert_eq!(ids, vec![3, 7, 2, 6]);
    }
}
