use super::EvalHook;
use crate::{Metrics, Result};
use tracing::info;

/// Logs every metric once an evaluation round finishes.
#[derive(Debug, Default)]
pub struct MetricLogger {
    rounds: usize,
}

impl MetricLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

impl EvalHook for MetricLogger {
    fn after_eval(&mut self, metrics: &Metrics) -> Result<()> {
        self.rounds += 1;
        if metrics.is_empty() {
            info!(round = self.rounds, "evaluation produced no metrics");
        }
        for (name, value) in metrics {
            info!(round = self.rounds, "{name}: {value}");
        }
        Ok(())
    }
}
