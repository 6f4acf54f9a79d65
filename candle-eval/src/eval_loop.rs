//! Evaluation loop implementation.

use crate::dist::Communicator;
use crate::hooks::EvalHook;
use crate::{EvalLoopConfig, EvalModule, Evaluator, Metrics, Result, Value};
use tracing::debug;

pub struct EvalLoop {
    config: EvalLoopConfig,
    evaluator: Evaluator,
    hooks: Vec<Box<dyn EvalHook>>,
}

impl EvalLoop {
    pub fn new(config: EvalLoopConfig, evaluator: Evaluator) -> Self {
        Self {
            config,
            evaluator,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: impl EvalHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn config(&self) -> &EvalLoopConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    /// Runs `model` over this worker's shard of batches and evaluates.
    ///
    /// Without a configured dataset size, the size is this worker's sample
    /// count times the world size, which keeps any sampler padding.
    pub fn run<M, I>(&mut self, model: &M, batches: I, comm: &dyn Communicator) -> Result<Metrics>
    where
        M: EvalModule + ?Sized,
        I: IntoIterator<Item = Value>,
    {
        for hook in &mut self.hooks {
            hook.before_eval()?;
        }

        let log_every = self.config.log_every_n_batches;
        let mut n_samples = 0;
        for (batch_idx, batch) in batches.into_iter().enumerate() {
            let outputs = model.predict_step(&batch, batch_idx)?;
            n_samples += outputs.len();
            self.evaluator.process(&outputs, &batch)?;
            if log_every > 0 && (batch_idx + 1) % log_every == 0 {
                debug!(rank = comm.rank(), batch_idx, n_samples, "eval progress");
            }
            for hook in &mut self.hooks {
                hook.after_eval_iter(batch_idx, &outputs)?;
            }
        }

        let size = self
            .config
            .dataset_size
            .unwrap_or(n_samples * comm.world_size());
        let metrics = self.evaluator.evaluate(size, comm)?;

        for hook in &mut self.hooks {
            hook.after_eval(&metrics)?;
        }
        Ok(metrics)
    }
}
