use anyhow::Result;
use candle::{Device, Tensor};
use candle_eval::hooks::{BestMetric, MetricLogger, Mode};
use candle_eval::{
    Communicator, EvalHook, EvalLoop, EvalLoopConfig, EvalModule, Evaluator, LocalGroup, Metric,
    MetricConfig, MetricState, Metrics, SingleProcess, Value,
};
use candle_nn::{Linear, Module};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

struct LinearModel {
    linear: Linear,
}

impl LinearModel {
    // y = 3x + z - 2
    fn new(device: &Device) -> Result<Self> {
        let w = Tensor::new(&[[3f32, 1.]], device)?;
        let b = Tensor::new(-2f32, device)?;
        Ok(Self {
            linear: Linear::new(w, Some(b)),
        })
    }
}

fn field<'a>(batch: &'a Value, key: &str) -> candle_eval::Result<&'a Tensor> {
    batch
        .get(key)
        .and_then(Value::as_tensor)
        .ok_or_else(|| candle::Error::Msg(format!("batch has no tensor {key:?}")).into())
}

impl EvalModule for LinearModel {
    fn predict_step(&self, batch: &Value, _batch_idx: usize) -> candle_eval::Result<Vec<Value>> {
        let preds = self
            .linear
            .forward(field(batch, "xs")?)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let targets = field(batch, "ys")?.to_vec1::<f32>()?;
        Ok(preds
            .into_iter()
            .zip(targets)
            .map(|(p, t)| {
                Value::map([
                    ("pred", Value::Float(p as f64)),
                    ("target", Value::Float(t as f64)),
                ])
            })
            .collect())
    }
}

struct MeanSquaredError {
    state: MetricState,
}

impl MeanSquaredError {
    fn new() -> Self {
        Self {
            state: MetricState::new(MetricConfig::new(), Some("regression"), "MeanSquaredError"),
        }
    }
}

impl Metric for MeanSquaredError {
    fn state(&self) -> &MetricState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MetricState {
        &mut self.state
    }

    fn process(&mut self, _data_batch: &Value, data_samples: &[Value]) -> candle_eval::Result<()> {
        for sample in data_samples {
            let pred = sample.get("pred").and_then(Value::as_f64).unwrap_or(0.0);
            let target = sample.get("target").and_then(Value::as_f64).unwrap_or(0.0);
            self.state
                .results_mut()
                .push(Value::Float((pred - target).powi(2)));
        }
        Ok(())
    }

    fn compute_metrics(&mut self, results: Vec<Value>) -> candle_eval::Result<Metrics> {
        let sum: f64 = results.iter().filter_map(Value::as_f64).sum();
        let mse = if results.is_empty() {
            0.0
        } else {
            sum / results.len() as f64
        };
        Ok(Metrics::from([("mse".to_string(), Value::Float(mse))]))
    }
}

/// One sample per batch; sample `i` is `[i, 1]` with its target off by `i`.
fn batch(i: usize, device: &Device) -> Result<Value> {
    let x = i as f32;
    let pred = 3. * x + 1. - 2.;
    Ok(Value::map([
        ("xs", Value::from(Tensor::new(&[[x, 1.]], device)?)),
        ("ys", Value::from(Tensor::new(&[pred + x], device)?)),
    ]))
}

struct CountingHook {
    starts: Arc<AtomicUsize>,
    iters: Arc<AtomicUsize>,
    ends: Arc<AtomicUsize>,
}

impl EvalHook for CountingHook {
    fn before_eval(&mut self) -> candle_eval::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_eval_iter(&mut self, _batch_idx: usize, outputs: &[Value]) -> candle_eval::Result<()> {
        self.iters.fetch_add(outputs.len(), Ordering::SeqCst);
        Ok(())
    }

    fn after_eval(&mut self, _metrics: &Metrics) -> candle_eval::Result<()> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn eval_loop_single_process() -> Result<()> {
    let device = Device::Cpu;
    let model = LinearModel::new(&device)?;
    let batches = (0..4).map(|i| batch(i, &device)).collect::<Result<Vec<_>>>()?;

    let starts = Arc::new(AtomicUsize::new(0));
    let iters = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));
    let hook = CountingHook {
        starts: starts.clone(),
        iters: iters.clone(),
        ends: ends.clone(),
    };

    let evaluator = Evaluator::default().with_metric(MeanSquaredError::new());
    let config = EvalLoopConfig::new().log_every_n_batches(1);
    let mut eval_loop = EvalLoop::new(config, evaluator)
        .with_hook(hook)
        .with_hook(MetricLogger::new());

    let metrics = eval_loop.run(&model, batches.clone(), &SingleProcess)?;
    // errors 0, 1, 2, 3
    assert_eq!(metrics.get("regression/mse"), Some(&Value::Float(14. / 4.)));

    eval_loop.run(&model, batches, &SingleProcess)?;
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(iters.load(Ordering::SeqCst), 8);
    assert_eq!(ends.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn eval_loop_rounds_are_independent() -> Result<()> {
    let device = Device::Cpu;
    let model = LinearModel::new(&device)?;
    let evaluator = Evaluator::default().with_metric(MeanSquaredError::new());
    let mut eval_loop = EvalLoop::new(EvalLoopConfig::new(), evaluator)
        .with_hook(BestMetric::new("regression/mse").mode(Mode::Min));

    let mut history = Vec::new();
    for n in 1..4 {
        let batches = (0..n).map(|i| batch(i, &device)).collect::<Result<Vec<_>>>()?;
        let metrics = eval_loop.run(&model, batches, &SingleProcess)?;
        history.push(metrics["regression/mse"].as_f64().unwrap());
        assert!(eval_loop.evaluator().metrics()[0].results().is_empty());
    }
    assert_eq!(history, vec![0.0, 0.5, 5.0 / 3.0]);
    Ok(())
}

#[test]
fn eval_loop_two_workers_drop_padding() -> Result<()> {
    let world_size = 2;
    let dataset_len = 5;
    let handles: Vec<_> = LocalGroup::workers(world_size)?
        .into_iter()
        .map(|worker| {
            thread::spawn(move || -> Result<Metrics> {
                let device = Device::Cpu;
                let model = LinearModel::new(&device)?;
                // Round-robin shard padded to an even length with sample 0.
                let indices = (0..dataset_len + 1)
                    .skip(worker.rank())
                    .step_by(world_size)
                    .map(|i| i % dataset_len);
                let batches = indices
                    .map(|i| batch(i, &device))
                    .collect::<Result<Vec<_>>>()?;

                let evaluator = Evaluator::default().with_metric(MeanSquaredError::new());
                let config = EvalLoopConfig::new().dataset_size(dataset_len);
                let mut eval_loop = EvalLoop::new(config, evaluator);
                Ok(eval_loop.run(&model, batches, &worker)?)
            })
        })
        .collect();

    let results: Vec<Metrics> = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Result<_>>()?;

    // (0 + 1 + 4 + 9 + 16) / 5, the padded duplicate of sample 0 is dropped.
    for metrics in &results {
        assert_eq!(metrics.get("regression/mse"), Some(&Value::Float(6.0)));
    }
    assert_eq!(results[0], results[1]);
    Ok(())
}
