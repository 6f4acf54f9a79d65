//! Metric and evaluation loop configuration.

use crate::dist::CollectDevice;
use serde::Deserialize;
use std::path::PathBuf;

/// Options shared by every metric.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricConfig {
    pub collect_device: CollectDevice,
    pub prefix: Option<String>,
}

impl MetricConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect_device(mut self, device: CollectDevice) -> Self {
        self.collect_device = device;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Options for [`DumpResults`](crate::DumpResults).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumpResultsConfig {
    pub out_file_path: PathBuf,
    #[serde(default)]
    pub collect_device: CollectDevice,
}

impl DumpResultsConfig {
    pub fn new(out_file_path: impl Into<PathBuf>) -> Self {
        Self {
            out_file_path: out_file_path.into(),
            collect_device: CollectDevice::default(),
        }
    }

    pub fn collect_device(mut self, device: CollectDevice) -> Self {
        self.collect_device = device;
        self
    }
}

/// Options for [`EvalLoop`](crate::EvalLoop).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalLoopConfig {
    /// Length of the whole evaluation dataset, padding excluded.
    pub dataset_size: Option<usize>,
    pub log_every_n_batches: usize,
}

impl Default for EvalLoopConfig {
    fn default() -> Self {
        Self {
            dataset_size: None,
            log_every_n_batches: 50,
        }
    }
}

impl EvalLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset_size(mut self, size: usize) -> Self {
        self.dataset_size = Some(size);
        self
    }

    pub fn log_every_n_batches(mut self, n: usize) -> Self {
        self.log_every_n_batches = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_config_from_json() -> anyhow::Result<()> {
        let config: MetricConfig =
            serde_json::from_str(r#"{"collect_device": "gpu", "prefix": "coco"}"#)?;
        assert_eq!(config.collect_device, CollectDevice::Gpu);
        assert_eq!(config.prefix.as_deref(), Some("coco"));

        let config: MetricConfig = serde_json::from_str("{}")?;
        assert_eq!(config, MetricConfig::new());
        Ok(())
    }

    #[test]
    fn metric_config_rejects_unknown_options() {
        assert!(serde_json::from_str::<MetricConfig>(r#"{"collect_device": "tpu"}"#).is_err());
        assert!(serde_json::from_str::<MetricConfig>(r#"{"prefx": "typo"}"#).is_err());
    }

    #[test]
    fn dump_results_config_defaults_to_cpu() -> anyhow::Result<()> {
        let config: DumpResultsConfig =
            serde_json::from_str(r#"{"out_file_path": "work_dirs/results.pkl"}"#)?;
        assert_eq!(config, DumpResultsConfig::new("work_dirs/results.pkl"));
        assert!(serde_json::from_str::<DumpResultsConfig>("{}").is_err());
        Ok(())
    }

    #[test]
    fn eval_loop_config_builder() {
        let config = EvalLoopConfig::new().dataset_size(10).log_every_n_batches(0);
        assert_eq!(config.dataset_size, Some(10));
        assert_eq!(config.log_every_n_batches, 0);
    }
}
