use super::{interleave_parts, CollectDevice, Communicator};
use crate::value::to_cpu_all;
use crate::{EvalError, Metrics, Result, Value};

/// A group of one: the only worker is the main process.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl SingleProcess {
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
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
        Ok(Some(interleave_parts(vec![part], size)))
    }

    fn broadcast_metrics(&self, metrics: Option<Metrics>) -> Result<Metrics> {
        metrics.ok_or(EvalError::MissingBroadcast)
    }
}
