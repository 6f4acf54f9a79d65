//! Hooks called around an evaluation run.

mod best_metric;
mod metric_logger;

pub use best_metric::BestMetric;
pub use metric_logger::MetricLogger;

use crate::{Metrics, Result, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Min,
    Max,
}

pub trait EvalHook: Send {
    fn before_eval(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_eval_iter(&mut self, _batch_idx: usize, _outputs: &[Value]) -> Result<()> {
        Ok(())
    }

    fn after_eval(&mut self, _metrics: &Metrics) -> Result<()> {
        Ok(())
    }
}
