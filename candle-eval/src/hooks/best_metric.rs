use super::{EvalHook, Mode};
use crate::{Metrics, Result};
use tracing::info;

/// Tracks the best value of one metric across evaluation rounds.
pub struct BestMetric {
    monitor: String,
    min_delta: f64,
    mode: Mode,
    best: Option<f64>,
    best_round: Option<usize>,
    rounds: usize,
    improved: bool,
}

impl BestMetric {
    pub fn new(monitor: impl Into<String>) -> Self {
        Self {
            monitor: monitor.into(),
            min_delta: 0.0,
            mode: Mode::Max,
            best: None,
            best_round: None,
            rounds: 0,
            improved: false,
        }
    }

    pub fn min_delta(mut self, delta: f64) -> Self {
        self.min_delta = delta;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Zero-based index of the round that produced [`best`](Self::best).
    pub fn best_round(&self) -> Option<usize> {
        self.best_round
    }

    /// Whether the most recent round set a new best.
    pub fn improved(&self) -> bool {
        self.improved
    }

    fn is_improvement(&self, current: f64, best: f64) -> bool {
        match self.mode {
            Mode::Min => current < best - self.min_delta,
            Mode::Max => current > best + self.min_delta,
        }
    }
}

impl EvalHook for BestMetric {
    fn after_eval(&mut self, metrics: &Metrics) -> Result<()> {
        let round = self.rounds;
        self.rounds += 1;
        self.improved = false;

        let Some(current) = metrics.get(&self.monitor).and_then(|v| v.as_f64()) else {
            return Ok(());
        };

        let improved = match self.best {
            None => true,
            Some(best) => self.is_improvement(current, best),
        };
        if improved {
            info!(monitor = %self.monitor, round, "new best {}: {current:.4}", self.monitor);
            self.best = Some(current);
            self.best_round = Some(round);
            self.improved = true;
        }
        Ok(())
    }
}
