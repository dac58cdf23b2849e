//! Adaptive chunk sizing for bulk array operations.
//!
//! Chunk sizes shrink as process memory pressure approaches the configured
//! threshold and grow towards the maximum when there is headroom. Every
//! `evaluate` call re-samples live pressure; nothing is cached between calls,
//! so the policy is safe to share across concurrent in-flight requests.

use std::{fs, sync::Arc, time::Duration};

use tracing::debug;

use crate::{config::ChunkingConfig, metrics};

/// One chunking decision, valid only for the moment it was computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDecision {
    /// Rows the next batch should carry. Never exceeds the configured
    /// maximum or the remaining row count.
    pub chunk_size: usize,
    /// The pressure sample behind this decision, 0-100.
    pub pressure_pct: f64,
    /// Whether the producer should pause before issuing the next batch.
    pub throttle_producer: bool,
    /// How long to pause when throttled.
    pub pause: Duration,
}

impl ChunkDecision {
    pub fn should_pause(&self) -> bool {
        self.throttle_producer && !self.pause.is_zero()
    }
}

/// A point-in-time memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSnapshot {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl PressureSnapshot {
    pub fn usage_percent(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 * 100.0) / self.limit_bytes as f64
    }
}

/// Source of memory pressure readings. Implementations must be cheap enough
/// to call once per batch and must never panic; returning `None` degrades
/// the policy to its default chunk size.
pub trait PressureSampler: Send + Sync {
    fn sample(&self) -> Option<PressureSnapshot>;
}

/// Fixed reading, for tests and for callers that feed pressure from an
/// external source.
#[derive(Debug, Clone, Copy)]
pub struct FixedPressureSampler {
    pub pressure_pct: f64,
}

impl PressureSampler for FixedPressureSampler {
    fn sample(&self) -> Option<PressureSnapshot> {
        Some(PressureSnapshot {
            used_bytes: self.pressure_pct.clamp(0.0, 100.0) as u64,
            limit_bytes: 100,
        })
    }
}

/// Samples the process resident set against a memory budget: the configured
/// budget, else the cgroup v2 limit, else total system memory.
#[derive(Debug, Clone, Default)]
pub struct ResidentMemorySampler {
    pub budget_bytes: Option<u64>,
}

impl ResidentMemorySampler {
    fn resident_bytes() -> Option<u64> {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
        let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kb * 1024)
    }

    fn limit_bytes(&self) -> Option<u64> {
        if let Some(budget) = self.budget_bytes {
            return Some(budget);
        }
        if let Ok(raw) = fs::read_to_string("/sys/fs/cgroup/memory.max") {
            if let Ok(limit) = raw.trim().parse::<u64>() {
                return Some(limit);
            }
        }
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
        let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kb * 1024)
    }
}

impl PressureSampler for ResidentMemorySampler {
    fn sample(&self) -> Option<PressureSnapshot> {
        let used_bytes = Self::resident_bytes()?;
        let limit_bytes = self.limit_bytes()?;
        if limit_bytes == 0 {
            return None;
        }
        Some(PressureSnapshot { used_bytes, limit_bytes })
    }
}

/// Samples allocator-resident memory via jemalloc stats, falling back to the
/// OS resident set when the stats are unavailable.
#[cfg(feature = "jemalloc")]
#[derive(Debug, Clone, Default)]
pub struct JemallocSampler {
    pub budget_bytes: Option<u64>,
}

#[cfg(feature = "jemalloc")]
impl PressureSampler for JemallocSampler {
    fn sample(&self) -> Option<PressureSnapshot> {
        let fallback = ResidentMemorySampler { budget_bytes: self.budget_bytes };

        let used_bytes = jemalloc_ctl::epoch::advance()
            .ok()
            .and_then(|_| jemalloc_ctl::stats::resident::read().ok())
            .map(|b| b as u64);

        match used_bytes {
            Some(used_bytes) => {
                let limit_bytes = fallback.limit_bytes()?;
                if limit_bytes == 0 {
                    return None;
                }
                Some(PressureSnapshot { used_bytes, limit_bytes })
            }
            None => fallback.sample(),
        }
    }
}

/// Stateless policy mapping live memory pressure to a chunk size.
#[derive(Clone)]
pub struct ChunkingPolicy {
    config: ChunkingConfig,
    sampler: Arc<dyn PressureSampler>,
}

impl ChunkingPolicy {
    pub fn new(config: ChunkingConfig) -> Self {
        let sampler = default_sampler(&config);
        ChunkingPolicy { config, sampler }
    }

    pub fn with_sampler(config: ChunkingConfig, sampler: Arc<dyn PressureSampler>) -> Self {
        ChunkingPolicy { config, sampler }
    }

    /// Computes the chunk size for the next batch given the remaining row
    /// count. Re-samples pressure on every call and never fails: a missing
    /// sample reports the threshold itself, which pins the target at the
    /// default chunk size without engaging throttling.
    pub fn evaluate(&self, total_rows: usize) -> ChunkDecision {
        let threshold = self.config.pressure_threshold_percent.clamp(0.0, 100.0);

        let (pressure_pct, sampled) = match self.sampler.sample() {
            Some(snapshot) => (snapshot.usage_percent().clamp(0.0, 100.0), true),
            None => (threshold, false),
        };

        metrics::bulk::record_memory_pressure(pressure_pct);

        let headroom = (threshold - pressure_pct).max(0.0) / threshold.max(1.0);
        let span = self.config.max_chunk_size as f64 - self.config.default_chunk_size as f64;
        let target = (self.config.default_chunk_size as f64 + headroom * span).round() as usize;
        let target = target.clamp(self.config.min_chunk_size, self.config.max_chunk_size);

        let chunk_size = if total_rows == 0 { 0 } else { target.min(total_rows) };

        let throttle_producer = sampled && pressure_pct >= threshold;
        let pause = if throttle_producer {
            Duration::from_millis(self.config.pause_duration_ms)
        } else {
            Duration::ZERO
        };

        debug!(
            "chunking decision: rows={}, chunk_size={}, pressure={:.1}%, throttle={}",
            total_rows, chunk_size, pressure_pct, throttle_producer
        );

        ChunkDecision { chunk_size, pressure_pct, throttle_producer, pause }
    }
}

#[cfg(feature = "jemalloc")]
fn default_sampler(config: &ChunkingConfig) -> Arc<dyn PressureSampler> {
    Arc::new(JemallocSampler { budget_bytes: config.memory_budget_bytes })
}

#[cfg(not(feature = "jemalloc"))]
fn default_sampler(config: &ChunkingConfig) -> Arc<dyn PressureSampler> {
    Arc::new(ResidentMemorySampler { budget_bytes: config.memory_budget_bytes })
}
