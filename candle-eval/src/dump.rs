//! Dump model predictions to a pickle file for offline evaluation.

use crate::dist::CollectDevice;
use crate::fileio::{self, FileFormat};
use crate::value::to_cpu_all;
use crate::{DumpResultsConfig, Metric, MetricConfig, MetricState, Metrics, Result, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Collects every prediction and writes them to `out_file_path` instead of
/// scoring them. Reports no metrics.
#[derive(Debug)]
pub struct DumpResults {
    state: MetricState,
    out_file_path: PathBuf,
}

impl DumpResults {
    /// Fails unless `out_file_path` ends in `.pkl` or `.pickle`.
    pub fn new(out_file_path: impl Into<PathBuf>, collect_device: CollectDevice) -> Result<Self> {
        let out_file_path = out_file_path.into();
        FileFormat::from_path(&out_file_path)?;
        let config = MetricConfig::new().collect_device(collect_device);
        Ok(Self {
            state: MetricState::new(config, None, "DumpResults"),
            out_file_path,
        })
    }

    pub fn from_config(config: DumpResultsConfig) -> Result<Self> {
        Self::new(config.out_file_path, config.collect_device)
    }

    pub fn out_file_path(&self) -> &Path {
        &self.out_file_path
    }
}

impl Metric for DumpResults {
    fn state(&self) -> &MetricState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MetricState {
        &mut self.state
    }

    fn process(&mut self, _data_batch: &Value, predictions: &[Value]) -> Result<()> {
        let predictions = to_cpu_all(predictions)?;
        self.state.results_mut().extend(predictions);
        Ok(())
    }

    fn compute_metrics(&mut self, results: Vec<Value>) -> Result<Metrics> {
        fileio::dump(&results, &self.out_file_path)?;
        let path = self.out_file_path.display();
        info!(path = %path, "Results has been saved to {path}.");
        Ok(Metrics::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EvalError;
    use candle::{Device, Tensor};

    #[test]
    fn accepts_pickle_extensions_only() {
        assert!(DumpResults::new("out.pkl", CollectDevice::Cpu).is_ok());
        assert!(DumpResults::new("out.pickle", CollectDevice::Gpu).is_ok());
        assert!(matches!(
            DumpResults::new("out.json", CollectDevice::Cpu),
            Err(EvalError::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn has_no_prefix() -> anyhow::Result<()> {
        let metric = DumpResults::from_config(DumpResultsConfig::new("results.pkl"))?;
        assert_eq!(metric.prefix(), None);
        assert_eq!(metric.collect_device(), CollectDevice::Cpu);
        assert_eq!(metric.out_file_path(), Path::new("results.pkl"));
        Ok(())
    }

    #[test]
    fn process_keeps_nested_predictions() -> anyhow::Result<()> {
        let mut metric = DumpResults::new("results.pkl", CollectDevice::Cpu)?;
        let scores = Tensor::new(&[0.1f32, 0.9], &Device::Cpu)?;
        let prediction = Value::map([
            ("id", Value::Int(1)),
            ("scores", Value::List(vec![scores.into()])),
        ]);
        metric.process(&Value::None, std::slice::from_ref(&prediction))?;
        metric.process(&Value::None, &[])?;
        assert_eq!(metric.results(), &[prediction]);
        Ok(())
    }
}
