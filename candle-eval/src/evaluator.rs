//! Runs several metrics over one evaluation round.

use crate::dist::Communicator;
use crate::{DatasetMeta, EvalError, Metric, Metrics, Result, Value};

/// Owns the metrics of an evaluation and merges their results.
#[derive(Default)]
pub struct Evaluator {
    metrics: Vec<Box<dyn Metric>>,
    dataset_meta: Option<DatasetMeta>,
}

impl Evaluator {
    pub fn new(metrics: Vec<Box<dyn Metric>>) -> Self {
        Self {
            metrics,
            dataset_meta: None,
        }
    }

    pub fn with_metric(mut self, metric: impl Metric + 'static) -> Self {
        self.metrics.push(Box::new(metric));
        self
    }

    pub fn metrics(&self) -> &[Box<dyn Metric>] {
        &self.metrics
    }

    pub fn dataset_meta(&self) -> Option<&DatasetMeta> {
        self.dataset_meta.as_ref()
    }

    /// Stores the dataset meta information and hands a copy to every metric.
    pub fn set_dataset_meta(&mut self, meta: DatasetMeta) {
        for metric in &mut self.metrics {
            metric.set_dataset_meta(meta.clone());
        }
        self.dataset_meta = Some(meta);
    }

    /// Feeds one batch of model outputs to every metric.
    pub fn process(&mut self, data_samples: &[Value], data_batch: &Value) -> Result<()> {
        for metric in &mut self.metrics {
            metric.process(data_batch, data_samples)?;
        }
        Ok(())
    }

    /// Evaluates every metric and merges the results.
    ///
    /// Two metrics reporting the same name is an error; give them distinct
    /// prefixes.
    pub fn evaluate(&mut self, size: usize, comm: &dyn Communicator) -> Result<Metrics> {
        let mut merged = Metrics::new();
        for metric in &mut self.metrics {
            for (name, value) in metric.evaluate(size, comm)? {
                if merged.contains_key(&name) {
                    return Err(EvalError::DuplicateMetric(name));
                }
                merged.insert(name, value);
            }
        }
        Ok(merged)
    }

    /// Evaluates predictions computed ahead of time.
    ///
    /// Samples are fed `chunk_size` at a time, paired with the matching slice
    /// of `data` when given, then evaluated with the number of samples as the
    /// dataset size.
    pub fn offline_evaluate(
        &mut self,
        data_samples: &[Value],
        data: Option<&[Value]>,
        chunk_size: usize,
        comm: &dyn Communicator,
    ) -> Result<Metrics> {
        if let Some(data) = data {
            if data.len() != data_samples.len() {
                return Err(EvalError::LengthMismatch {
                    samples: data_samples.len(),
                    data: data.len(),
                });
            }
        }
        let chunk_size = chunk_size.max(1);
        for (i, samples) in data_samples.chunks(chunk_size).enumerate() {
            let batch = match data {
                Some(data) => {
                    let start = i * chunk_size;
                    Value::List(data[start..start + samples.len()].to_vec())
                }
                None => Value::None,
            };
            self.process(samples, &batch)?;
        }
        self.evaluate(data_samples.len(), comm)
    }
}
