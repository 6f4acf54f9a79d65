//! Collective operations used to synchronize metric results across workers.
//!
//! Evaluation runs data-parallel: every worker processes its own shard and
//! the shards are merged on the main process (rank 0). The [`Communicator`]
//! trait is the seam between metrics and whatever transport connects the
//! workers. Two implementations ship with the crate:
//!
//! - [`SingleProcess`] for non-distributed runs,
//! - [`LocalGroup`] for workers driven from threads of one process.

mod local;
mod single;

pub use local::{LocalGroup, LocalWorker};
pub use single::SingleProcess;

use crate::{EvalError, Metrics, Result, Value};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Where results reside while they are exchanged between workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectDevice {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for CollectDevice {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(CollectDevice::Cpu),
            "gpu" => Ok(CollectDevice::Gpu),
            _ => Err(EvalError::InvalidCollectDevice(s.to_string())),
        }
    }
}

impl fmt::Display for CollectDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectDevice::Cpu => write!(f, "cpu"),
            CollectDevice::Gpu => write!(f, "gpu"),
        }
    }
}

/// Transport for the two collectives a metric needs.
///
/// Every call is collective: all workers of the group must make the same
/// call in the same order, and each call blocks until the whole group has
/// reached it.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    fn is_main_process(&self) -> bool {
        self.rank() == 0
    }

    /// Gathers every worker's `part` on the main process.
    ///
    /// Returns the merged results in sampler order, truncated to `size`, on
    /// the main process and `None` on every other worker.
    fn collect_results(
        &self,
        part: Vec<Value>,
        size: usize,
        device: CollectDevice,
    ) -> Result<Option<Vec<Value>>>;

    /// Hands the main process's `metrics` to every worker.
    ///
    /// Non-main workers pass `None`; their argument is ignored.
    fn broadcast_metrics(&self, metrics: Option<Metrics>) -> Result<Metrics>;
}

/// Restores sampler order from per-rank parts and drops padding.
///
/// A distributed sampler deals indices round-robin, so sample `i` of rank `r`
/// is dataset item `i * world_size + r`. Interleaving stops at the shortest
/// part, then the result is cut to `size`.
pub fn interleave_parts(parts: Vec<Vec<Value>>, size: usize) -> Vec<Value> {
    let rounds = parts.iter().map(Vec::len).min().unwrap_or(0);
    let mut iters: Vec<_> = parts.into_iter().map(Vec::into_iter).collect();
    let mut ordered = Vec::with_capacity(rounds * iters.len());
    for _ in 0..rounds {
        for it in iters.iter_mut() {
            ordered.extend(it.next());
        }
    }
    ordered.truncate(size);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn interleave_restores_sampler_order() {
        let parts = vec![ints(&[0, 2, 4]), ints(&[1, 3, 5])];
        assert_eq!(interleave_parts(parts, 6), ints(&[0, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn interleave_drops_padding() {
        // 5 samples over 2 ranks: rank 1 repeats sample 0 as padding.
        let parts = vec![ints(&[0, 2, 4]), ints(&[1, 3, 0])];
        assert_eq!(interleave_parts(parts, 5), ints(&[0, 1, 2, 3, 4]));
    }

    #[test]
    fn interleave_single_part_truncates() {
        assert_eq!(interleave_parts(vec![ints(&[7, 8, 9])], 2), ints(&[7, 8]));
        assert_eq!(interleave_parts(vec![ints(&[7])], 10), ints(&[7]));
        assert!(interleave_parts(Vec::new(), 3).is_empty());
    }

    #[test]
    fn collect_device_parsing() {
        assert_eq!("cpu".parse::<CollectDevice>().unwrap(), CollectDevice::Cpu);
        assert_eq!("GPU".parse::<CollectDevice>().unwrap(), CollectDevice::Gpu);
        assert!(matches!(
            "tpu".parse::<CollectDevice>(),
            Err(EvalError::InvalidCollectDevice(name)) if name == "tpu"
        ));
        assert_eq!(CollectDevice::Gpu.to_string(), "gpu");
    }
}
