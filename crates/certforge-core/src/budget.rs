//! Resource-adaptive sizing of the generation pipeline.
//!
//! The profiler reads available memory and logical CPU count once per job and
//! derives the batch size, worker count, and queue capacity. Explicit
//! overrides always win over auto-detection, and a failed probe falls back to
//! conservative defaults instead of failing the job.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lower bound for auto-sized batches.
pub const MIN_BATCH: u64 = 1_000;
/// Upper bound for auto-sized batches.
pub const MAX_BATCH: u64 = 50_000;

/// Rough in-memory footprint of one certificate record, in bytes.
const ESTIMATED_RECORD_SIZE: u64 = 200;
/// Divisor keeping in-flight batches well below available memory.
const SAFETY_FACTOR: u64 = 16;

/// Pipeline sizing, computed once per job and immutable for its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Records accumulated before the writer commits a transaction.
    pub batch_size: usize,
    /// Parallel synthesizer tasks feeding the writer.
    pub worker_count: usize,
    /// Capacity of the producer/consumer queue, in records.
    pub buffer_size: usize,
}

impl ResourceBudget {
    /// Conservative sizing used when resource introspection is unavailable.
    pub const FALLBACK: Self = Self {
        batch_size: 1_000,
        worker_count: 1,
        buffer_size: 1_000,
    };
}

/// Explicit sizing overrides; any field set here takes precedence over the
/// probed value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOverrides {
    pub batch_size: Option<usize>,
    pub worker_count: Option<usize>,
    pub buffer_size: Option<usize>,
}

/// Source of machine resource readings. Seam for injecting fixed readings in
/// tests so profiling stays deterministic.
pub trait ResourceProbe {
    fn cpu_cores(&self) -> Option<usize>;
    fn available_memory_bytes(&self) -> Option<u64>;
}

/// Probe backed by the host system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ResourceProbe for SystemProbe {
    fn cpu_cores(&self) -> Option<usize> {
        let cores = num_cpus::get();
        (cores > 0).then_some(cores)
    }

    fn available_memory_bytes(&self) -> Option<u64> {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let available = system.available_memory();
        (available > 0).then_some(available)
    }
}

/// Derives a [`ResourceBudget`] from machine resources and overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceProfiler<P = SystemProbe> {
    probe: P,
}

impl ResourceProfiler<SystemProbe> {
    pub fn new() -> Self {
        Self { probe: SystemProbe }
    }
}

impl<P: ResourceProbe> ResourceProfiler<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Compute the budget. Never fails: unavailable introspection falls back
    /// to [`ResourceBudget::FALLBACK`] values for the affected fields.
    pub fn profile(&self, overrides: &BudgetOverrides) -> ResourceBudget {
        let cores = self.probe.cpu_cores();
        let memory = self.probe.available_memory_bytes();
        if cores.is_none() || memory.is_none() {
            warn!(
                cores_probed = cores.is_some(),
                memory_probed = memory.is_some(),
                "resource probe unavailable, using fallback budget values"
            );
        }

        let worker_count = overrides.worker_count.unwrap_or_else(|| {
            cores
                .map(|cores| cores.saturating_sub(1).max(1))
                .unwrap_or(ResourceBudget::FALLBACK.worker_count)
        });
        let batch_size = overrides.batch_size.unwrap_or_else(|| {
            memory
                .map(auto_batch_size)
                .unwrap_or(ResourceBudget::FALLBACK.batch_size)
        });
        let buffer_size = overrides
            .buffer_size
            .unwrap_or_else(|| batch_size.saturating_mul(worker_count));

        ResourceBudget {
            batch_size: batch_size.max(1),
            worker_count: worker_count.max(1),
            buffer_size: buffer_size.max(1),
        }
    }
}

fn auto_batch_size(available_memory_bytes: u64) -> usize {
    let raw = available_memory_bytes / ESTIMATED_RECORD_SIZE / SAFETY_FACTOR;
    raw.clamp(MIN_BATCH, MAX_BATCH) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        cores: Option<usize>,
        memory: Option<u64>,
    }

    impl ResourceProbe for FixedProbe {
        fn cpu_cores(&self) -> Option<usize> {
            self.cores
        }

        fn available_memory_bytes(&self) -> Option<u64> {
            self.memory
        }
    }

    #[test]
    fn leaves_one_core_for_the_writer() {
        let profiler = ResourceProfiler::with_probe(FixedProbe {
            cores: Some(8),
            memory: Some(64 * 1024 * 1024 * 1024),
        });
        let budget = profiler.profile(&BudgetOverrides::default());
        assert_eq!(budget.worker_count, 7);
        assert_eq!(budget.batch_size, MAX_BATCH as usize);
        assert_eq!(budget.buffer_size, budget.batch_size * budget.worker_count);
    }

    #[test]
    fn single_core_still_gets_one_worker() {
        let profiler = ResourceProfiler::with_probe(FixedProbe {
            cores: Some(1),
            memory: Some(1024 * 1024 * 1024),
        });
        let budget = profiler.profile(&BudgetOverrides::default());
        assert_eq!(budget.worker_count, 1);
    }

    #[test]
    fn batch_size_clamps_to_bounds() {
        let tiny = ResourceProfiler::with_probe(FixedProbe {
            cores: Some(4),
            memory: Some(1024),
        });
        assert_eq!(
            tiny.profile(&BudgetOverrides::default()).batch_size,
            MIN_BATCH as usize
        );

        let huge = ResourceProfiler::with_probe(FixedProbe {
            cores: Some(4),
            memory: Some(u64::MAX / 2),
        });
        assert_eq!(
            huge.profile(&BudgetOverrides::default()).batch_size,
            MAX_BATCH as usize
        );
    }

    #[test]
    fn overrides_take_precedence_over_probe() {
        let profiler = ResourceProfiler::with_probe(FixedProbe {
            cores: Some(16),
            memory: Some(64 * 1024 * 1024 * 1024),
        });
        let budget = profiler.profile(&BudgetOverrides {
            batch_size: Some(250),
            worker_count: Some(3),
            buffer_size: None,
        });
        assert_eq!(budget.batch_size, 250);
        assert_eq!(budget.worker_count, 3);
        assert_eq!(budget.buffer_size, 750);
    }

    #[test]
    fn failed_probe_falls_back_to_defaults() {
        let profiler = ResourceProfiler::with_probe(FixedProbe {
            cores: None,
            memory: None,
        });
        let budget = profiler.profile(&BudgetOverrides::default());
        assert_eq!(budget, ResourceBudget::FALLBACK);
    }
}
