//! EvalModule trait for models that produce predictions.

use crate::{Result, Value};

/// Trait for models that can be evaluated with [`EvalLoop`](crate::EvalLoop).
pub trait EvalModule {
    /// Compute the predictions for one batch, one entry per sample.
    fn predict_step(&self, batch: &Value, batch_idx: usize) -> Result<Vec<Value>>;
}
