//! The metric abstraction: accumulate per-batch results, then reduce them
//! over the whole (distributed) dataset.

use crate::dist::{CollectDevice, Communicator};
use crate::value::to_cpu_all;
use crate::{MetricConfig, Result, Value};
use indexmap::IndexMap;
use tracing::warn;

/// Reduced metrics, keyed by metric name.
pub type Metrics = IndexMap<String, Value>;

/// Dataset meta information handed to metrics by the evaluator.
pub type DatasetMeta = IndexMap<String, Value>;

/// State every metric carries.
#[derive(Debug)]
pub struct MetricState {
    name: String,
    collect_device: CollectDevice,
    prefix: Option<String>,
    dataset_meta: Option<DatasetMeta>,
    results: Vec<Value>,
}

impl MetricState {
    /// Resolves the configured prefix against the metric's `default_prefix`.
    ///
    /// An empty configured prefix counts as unset. `name` only shows up in
    /// log messages.
    pub fn new(config: MetricConfig, default_prefix: Option<&str>, name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = config
            .prefix
            .filter(|p| !p.is_empty())
            .or_else(|| default_prefix.map(str::to_string));
        if prefix.is_none() {
            warn!(metric = %name, "the prefix is not set in metric {name}");
        }
        Self {
            name,
            collect_device: config.collect_device,
            prefix,
            dataset_meta: None,
            results: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collect_device(&self) -> CollectDevice {
        self.collect_device
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn dataset_meta(&self) -> Option<&DatasetMeta> {
        self.dataset_meta.as_ref()
    }

    pub fn set_dataset_meta(&mut self, meta: DatasetMeta) {
        self.dataset_meta = Some(meta);
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn results_mut(&mut self) -> &mut Vec<Value> {
        &mut self.results
    }

    /// Renames every key to `prefix/key` when a prefix is set.
    pub fn apply_prefix(&self, metrics: Metrics) -> Metrics {
        match self.prefix.as_deref() {
            Some(prefix) => metrics
                .into_iter()
                .map(|(k, v)| (format!("{prefix}/{k}"), v))
                .collect(),
            None => metrics,
        }
    }
}

/// A metric evaluated over a data-parallel evaluation round.
///
/// Implementors supply [`process`](Metric::process), which appends processed
/// entries to the accumulator, and [`compute_metrics`](Metric::compute_metrics),
/// which reduces the results of the whole dataset. Synchronizing workers is
/// handled by [`evaluate`](Metric::evaluate).
pub trait Metric: Send {
    fn state(&self) -> &MetricState;

    fn state_mut(&mut self) -> &mut MetricState;

    /// Processes one batch of data and model outputs.
    fn process(&mut self, data_batch: &Value, data_samples: &[Value]) -> Result<()>;

    /// Computes the metrics from the results of the whole dataset.
    ///
    /// Called on the main process only. `results` may be empty.
    fn compute_metrics(&mut self, results: Vec<Value>) -> Result<Metrics>;

    fn name(&self) -> &str {
        self.state().name()
    }

    fn prefix(&self) -> Option<&str> {
        self.state().prefix()
    }

    fn collect_device(&self) -> CollectDevice {
        self.state().collect_device()
    }

    fn dataset_meta(&self) -> Option<&DatasetMeta> {
        self.state().dataset_meta()
    }

    fn set_dataset_meta(&mut self, meta: DatasetMeta) {
        self.state_mut().set_dataset_meta(meta);
    }

    fn results(&self) -> &[Value] {
        self.state().results()
    }

    /// Evaluates the whole dataset once every batch has been processed.
    ///
    /// `size` is the length of the dataset without the padding a distributed
    /// sampler adds to even out shards. Every worker of `comm` must call this
    /// together. All of them return the metrics computed on the main process.
    /// The accumulator is emptied whether or not evaluation succeeds.
    fn evaluate(&mut self, size: usize, comm: &dyn Communicator) -> Result<Metrics> {
        let state = self.state_mut();
        if state.results.is_empty() {
            warn!(
                metric = %state.name,
                "{} got empty results; make sure `process` adds the processed results to the accumulator",
                state.name
            );
        }
        let local = std::mem::take(&mut state.results);
        let device = state.collect_device;

        let collected = comm.collect_results(local, size, device)?;

        let metrics = if comm.is_main_process() {
            let results = to_cpu_all(&collected.unwrap_or_default())?;
            let metrics = self.compute_metrics(results)?;
            Some(self.state().apply_prefix(metrics))
        } else {
            None
        };

        comm.broadcast_metrics(metrics)
    }
}
