use sysinfo::System;

/// Environment variable that overrides both the config file and the
/// computed worker count.
pub const WORKERS_ENV: &str = "CUEWHEEL_WORKERS";

const MB: u64 = 1024 * 1024;

/// Resource profile of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolProfile {
    /// Tempo/key/energy extraction: CPU bound, light on memory.
    Features,
    /// Stem separation: memory bound.
    Stems,
}

impl PoolProfile {
    /// Inclusive bounds on the worker count.
    pub fn bounds(self) -> (usize, usize) {
        match self {
            PoolProfile::Features => (1, 8),
            PoolProfile::Stems => (1, 2),
        }
    }

    /// Default memory budget per worker.
    pub fn memory_per_worker(self) -> u64 {
        match self {
            PoolProfile::Features => 500 * MB,
            PoolProfile::Stems => 2048 * MB,
        }
    }
}

/// Pure sizing rule: as many workers as there are cores and as fit in
/// available memory, clamped to the profile's bounds.
pub fn compute_pool_size(
    profile: PoolProfile,
    cores: usize,
    available_memory: u64,
    memory_per_worker: u64,
) -> usize {
    let (min, max) = profile.bounds();
    let by_memory = if memory_per_worker == 0 {
        usize::MAX
    } else {
        (available_memory / memory_per_worker) as usize
    };
    cores.min(by_memory).clamp(min, max)
}

/// Pick the worker count: env override, then config, then auto-sizing.
/// Overrides are clamped to the profile's bounds like the computed size.
///
/// `env` is the raw value of [`WORKERS_ENV`]; unparsable or zero values are
/// ignored with a warning.
pub fn pick_pool_size(
    profile: PoolProfile,
    env: Option<&str>,
    configured: usize,
    auto: impl FnOnce() -> usize,
) -> usize {
    if let Some(raw) = env {
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => return clamp_override(profile, n),
            _ => log::warn!("Ignoring invalid {}={:?}", WORKERS_ENV, raw),
        }
    }
    if configured > 0 {
        return clamp_override(profile, configured);
    }
    auto()
}

fn clamp_override(profile: PoolProfile, requested: usize) -> usize {
    let (min, max) = profile.bounds();
    let size = requested.clamp(min, max);
    if size != requested {
        log::warn!(
            "Requested {} workers for the {:?} pool; using {}",
            requested,
            profile,
            size
        );
    }
    size
}

/// Resolve the pool size for this machine.
pub fn resolve_pool_size(
    profile: PoolProfile,
    configured: usize,
    memory_per_worker_mb: u64,
) -> usize {
    let env = std::env::var(WORKERS_ENV).ok();
    pick_pool_size(profile, env.as_deref(), configured, || {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let mut sys = System::new();
        sys.refresh_memory();
        let budget = if memory_per_worker_mb > 0 {
            memory_per_worker_mb * MB
        } else {
            profile.memory_per_worker()
        };
        let size = compute_pool_size(profile, cores, sys.available_memory(), budget);
        log::debug!(
            "Auto-sized {:?} pool: {} cores, {} MB available -> {} workers",
            profile,
            cores,
            sys.available_memory() / MB,
            size
        );
        size
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * MB;

    #[test]
    fn test_features_profile() {
        let budget = PoolProfile::Features.memory_per_worker();
        // Plenty of memory: bounded by cores, then by the cap of 8
        assert_eq!(compute_pool_size(PoolProfile::Features, 4, 64 * GB, budget), 4);
        assert_eq!(compute_pool_size(PoolProfile::Features, 32, 64 * GB, budget), 8);
        // 1.2 GB fits two 500 MB workers
        assert_eq!(compute_pool_size(PoolProfile::Features, 16, 1200 * MB, budget), 2);
        // Never below one
        assert_eq!(compute_pool_size(PoolProfile::Features, 16, 100 * MB, budget), 1);
    }

    #[test]
    fn test_stems_profile() {
        let budget = PoolProfile::Stems.memory_per_worker();
        assert_eq!(compute_pool_size(PoolProfile::Stems, 16, 64 * GB, budget), 2);
        assert_eq!(compute_pool_size(PoolProfile::Stems, 16, 3 * GB, budget), 1);
        assert_eq!(compute_pool_size(PoolProfile::Stems, 1, 64 * GB, budget), 1);
    }

    #[test]
    fn test_override_precedence() {
        let features = PoolProfile::Features;
        assert_eq!(pick_pool_size(features, Some("3"), 5, || 7), 3);
        assert_eq!(pick_pool_size(features, None, 5, || 7), 5);
        assert_eq!(pick_pool_size(features, None, 0, || 7), 7);
        assert_eq!(pick_pool_size(features, Some("zero"), 0, || 7), 7);
        assert_eq!(pick_pool_size(features, Some("0"), 5, || 7), 5);
    }

    #[test]
    fn test_overrides_respect_profile_bounds() {
        assert_eq!(pick_pool_size(PoolProfile::Features, Some("64"), 0, || 1), 8);
        assert_eq!(pick_pool_size(PoolProfile::Features, None, 20, || 1), 8);
        assert_eq!(pick_pool_size(PoolProfile::Stems, Some("4"), 0, || 1), 2);
        assert_eq!(pick_pool_size(PoolProfile::Stems, None, 3, || 1), 2);
    }
}
