use super::{interleave_parts, CollectDevice, Communicator};
use crate::value::to_cpu_all;
use crate::{EvalError, Metrics, Result, Value};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};
use tracing::debug;

struct Shared {
    world_size: usize,
    barrier: Barrier,
    parts: Mutex<Vec<Option<Vec<Value>>>>,
    metrics: Mutex<Option<Metrics>>,
}

/// An in-process worker group, one [`LocalWorker`] per thread.
///
/// Collectives rendezvous on a shared barrier. There is no timeout: a worker
/// that never reaches a collective blocks the rest of the group.
pub struct LocalGroup;

impl LocalGroup {
    /// Creates the workers of a group of `world_size`, in rank order.
    pub fn workers(world_size: usize) -> Result<Vec<LocalWorker>> {
        if world_size == 0 {
            return Err(EvalError::EmptyGroup);
        }
        let shared = Arc::new(Shared {
            world_size,
            barrier: Barrier::new(world_size),
            parts: Mutex::new(vec![None; world_size]),
            metrics: Mutex::new(None),
        });
        Ok((0..world_size)
            .map(|rank| LocalWorker {
                rank,
                shared: shared.clone(),
            })
            .collect())
    }
}

pub struct LocalWorker {
    rank: usize,
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EvalError::Collective("a worker panicked inside a collective".to_string()))
}

impl Communicator for LocalWorker {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn collect_results(
        &self,
        part: Vec<Value>,
        size: usize,
        device: CollectDevice,
    ) -> Result<Option<Vec<Value>>> {
        let part = match device {
            CollectDevice::Cpu => to_cpu_all(&part)?,
            CollectDevice::Gpu => part,
        };
        debug!(rank = self.rank, len = part.len(), %device, "collecting results");
        lock(&self.shared.parts)?[self.rank] = Some(part);
        self.shared.barrier.wait();

        let collected = if self.is_main_process() {
            let parts = lock(&self.shared.parts)?
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            Some(interleave_parts(parts, size))
        } else {
            None
        };
        // Slots must be drained before any worker can start the next exchange.
        self.shared.barrier.wait();
        Ok(collected)
    }

    fn broadcast_metrics(&self, metrics: Option<Metrics>) -> Result<Metrics> {
        if self.is_main_process() {
            *lock(&self.shared.metrics)? = metrics;
        }
        self.shared.barrier.wait();
        let received = lock(&self.shared.metrics)?.clone();
        self.shared.barrier.wait();
        received.ok_or(EvalError::MissingBroadcast)
    }
}
