//! Error type shared by metrics, the evaluator and the collective layer.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("unsupported output file {path:?}: expected a .pkl or .pickle extension")]
    UnsupportedExtension { path: PathBuf },

    #[error("invalid collect device {0:?}: expected \"cpu\" or \"gpu\"")]
    InvalidCollectDevice(String),

    #[error("the main process did not provide metrics to broadcast")]
    MissingBroadcast,

    #[error("multiple evaluation results share the metric name {0:?}")]
    DuplicateMetric(String),

    #[error("got {samples} data samples but {data} data items")]
    LengthMismatch { samples: usize, data: usize },

    #[error("a worker group needs at least one worker")]
    EmptyGroup,

    #[error("collective operation failed: {0}")]
    Collective(String),

    #[error("invalid pickle content: {0}")]
    InvalidPickle(String),

    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pickle(#[from] serde_pickle::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;
