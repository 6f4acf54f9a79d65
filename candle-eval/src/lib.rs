//! Evaluation metrics for Candle, synchronized across data-parallel workers.
//!
//! A [`Metric`] accumulates processed results batch by batch. Once every
//! batch is processed, [`Metric::evaluate`] gathers the results of all workers
//! on the main process, reduces them there and broadcasts the metrics back,
//! so every worker returns the same mapping.

pub mod config;
pub mod dist;
pub mod dump;
pub mod error;
pub mod eval_loop;
pub mod evaluator;
pub mod fileio;
pub mod hooks;
pub mod metric;
pub mod module;
pub mod value;

pub use config::{DumpResultsConfig, EvalLoopConfig, MetricConfig};
pub use dist::{CollectDevice, Communicator, LocalGroup, SingleProcess};
pub use dump::DumpResults;
pub use error::{EvalError, Result};
pub use eval_loop::EvalLoop;
pub use evaluator::Evaluator;
pub use hooks::EvalHook;
pub use metric::{DatasetMeta, Metric, MetricState, Metrics};
pub use module::EvalModule;
pub use value::{to_cpu, DataSample, Value};
