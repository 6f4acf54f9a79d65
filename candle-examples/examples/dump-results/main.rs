// Evaluates a fixed linear classifier on two in-process workers, scoring
// accuracy and dumping every prediction to a pickle file.
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use candle::{Device, Tensor, D};
use candle_eval::hooks::MetricLogger;
use candle_eval::{
    CollectDevice, Communicator, DumpResults, EvalLoop, EvalLoopConfig, EvalModule, Evaluator,
    LocalGroup, Metric, MetricConfig, MetricState, Metrics, Value,
};
use candle_nn::{Linear, Module};
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::EnvFilter;

const WORLD_SIZE: usize = 2;
const DATASET_LEN: usize = 9;
const BATCH_SIZE: usize = 2;

struct Classifier {
    linear: Linear,
}

impl Classifier {
    fn new(dev: &Device) -> candle::Result<Self> {
        // Class 1 wins when x > y.
        let w = Tensor::new(&[[-1f32, 1.], [1., -1.]], dev)?;
        Ok(Self {
            linear: Linear::new(w, None),
        })
    }
}

impl EvalModule for Classifier {
    fn predict_step(&self, batch: &Value, batch_idx: usize) -> candle_eval::Result<Vec<Value>> {
        let (Some(points), Some(labels)) = (
            batch.get("points").and_then(Value::as_tensor),
            batch.get("labels").and_then(Value::as_tensor),
        ) else {
            return Err(candle::Error::Msg(format!("batch {batch_idx} is malformed")).into());
        };
        let logits = self.linear.forward(points)?;
        let preds = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        let labels = labels.to_vec1::<u32>()?;
        let mut outputs = Vec::with_capacity(preds.len());
        for (i, (pred, label)) in preds.into_iter().zip(labels).enumerate() {
            outputs.push(Value::map([
                ("logits", Value::from(logits.get(i)?)),
                ("pred_label", Value::Int(pred as i64)),
                ("gt_label", Value::Int(label as i64)),
            ]));
        }
        Ok(outputs)
    }
}

struct Accuracy {
    state: MetricState,
}

impl Accuracy {
    fn new(config: MetricConfig) -> Self {
        Self {
            state: MetricState::new(config, Some("accuracy"), "Accuracy"),
        }
    }
}

impl Metric for Accuracy {
    fn state(&self) -> &MetricState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MetricState {
        &mut self.state
    }

    fn process(&mut self, _data_batch: &Value, data_samples: &[Value]) -> candle_eval::Result<()> {
        for sample in data_samples {
            let correct = sample.get("pred_label") == sample.get("gt_label");
            self.state.results_mut().push(Value::Bool(correct));
        }
        Ok(())
    }

    fn compute_metrics(&mut self, results: Vec<Value>) -> candle_eval::Result<Metrics> {
        let correct = results.iter().filter(|r| **r == Value::Bool(true)).count();
        let top1 = if results.is_empty() {
            0.0
        } else {
            100.0 * correct as f64 / results.len() as f64
        };
        Ok(Metrics::from([("top1".to_string(), Value::Float(top1))]))
    }
}

fn create_batches(indices: &[usize], dev: &Device) -> candle::Result<Vec<Value>> {
    let mut batches = Vec::new();
    for chunk in indices.chunks(BATCH_SIZE) {
        let mut points = Vec::with_capacity(chunk.len() * 2);
        let mut labels = Vec::with_capacity(chunk.len());
        for &i in chunk {
            let (x, y) = (i as f32, (DATASET_LEN - i) as f32 * 0.5);
            points.extend([x, y]);
            // Every third label is flipped so accuracy is not perfect.
            let label = u32::from(x > y) ^ u32::from(i % 3 == 0);
            labels.push(label);
        }
        batches.push(Value::map([
            (
                "points",
                Value::from(Tensor::from_vec(points, (chunk.len(), 2), dev)?),
            ),
            (
                "labels",
                Value::from(Tensor::new(labels.as_slice(), dev)?),
            ),
        ]));
    }
    Ok(batches)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let out_file: PathBuf = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "work_dirs/predictions.pkl".to_string())
        .into();
    let cpu = std::env::var("CANDLE_EVAL_CPU").is_ok();

    let handles: Vec<_> = LocalGroup::workers(WORLD_SIZE)?
        .into_iter()
        .map(|worker| {
            let out_file = out_file.clone();
            thread::spawn(move || -> anyhow::Result<Metrics> {
                let dev = candle_examples::device(cpu)?;
                let model = Classifier::new(&dev)?;
                let indices = candle_examples::shard_indices(DATASET_LEN, worker.rank(), WORLD_SIZE);
                let batches = create_batches(&indices, &dev)?;

                let config = MetricConfig::new().collect_device(CollectDevice::Cpu);
                let evaluator = Evaluator::default()
                    .with_metric(Accuracy::new(config))
                    .with_metric(DumpResults::new(out_file, CollectDevice::Cpu)?);
                let config = EvalLoopConfig::new()
                    .dataset_size(DATASET_LEN)
                    .log_every_n_batches(1);
                let mut eval_loop = EvalLoop::new(config, evaluator);
                if worker.is_main_process() {
                    eval_loop = eval_loop.with_hook(MetricLogger::new());
                }
                Ok(eval_loop.run(&model, batches, &worker)?)
            })
        })
        .collect();

    for (rank, handle) in handles.into_iter().enumerate() {
        let metrics = handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker {rank} panicked"))??;
        println!("rank {rank}: {metrics:?}");
    }

    let dumped = candle_eval::fileio::load(&out_file)?;
    println!("{} predictions dumped to {}", dumped.len(), out_file.display());
    Ok(())
}
