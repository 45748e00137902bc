//! Training strategies: plain Adam at a fixed learning rate, or a learning-rate-free
//! VeLO-style schedule.
//!
//! Both strategies share one epoch loop. Each epoch streams shuffled (or, in
//! deterministic mode, ordered) batches through the model, then scores the
//! validation split and hands an [`EpochSummary`] to every callback.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use models::ConstrainedDetector;
use seg_dataset::{BatchConfig, BatchIter, HostBatch, SampleShape, SegmentationSample};

use crate::callbacks::{EpochCallback, EpochSummary};
use crate::error::TrainError;
use crate::loss::WeightedCrossEntropy;
use crate::metrics::{evaluate_dataset, scalar};
use crate::{ADBackend, TrainBackend};

/// Peak learning rate of the VeLO-style schedule.
pub const VELO_BASE_LR: f64 = 1e-3;
/// Floor the cosine decay settles on.
pub const VELO_MIN_LR: f64 = 1e-5;
const VELO_WEIGHT_DECAY: f32 = 1e-4;

type Detector = ConstrainedDetector<ADBackend>;

/// Transformed datasets plus the batching policy for a run.
#[derive(Debug, Clone)]
pub struct TrainData {
    pub train: Arc<Vec<SegmentationSample>>,
    pub val: Arc<Vec<SegmentationSample>>,
    pub shape: SampleShape,
    pub batch: BatchConfig,
}

impl TrainData {
    pub fn steps_per_epoch(&self) -> usize {
        let n = self.train.len();
        let bs = self.batch.batch_size.max(1);
        if self.batch.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    Standard { learning_rate: f64, epochs: usize },
    /// Ignores any configured learning rate.
    Velo { epochs: usize },
}

impl Strategy {
    pub fn from_flag(use_velo: bool, learning_rate: f64, epochs: usize) -> Self {
        if use_velo {
            Strategy::Velo { epochs }
        } else {
            Strategy::Standard {
                learning_rate,
                epochs,
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Standard { .. } => "standard",
            Strategy::Velo { .. } => "velo",
        }
    }

    pub fn epochs(&self) -> usize {
        match self {
            Strategy::Standard { epochs, .. } | Strategy::Velo { epochs } => *epochs,
        }
    }

    pub fn run(
        &self,
        model: Detector,
        data: &TrainData,
        loss: &WeightedCrossEntropy,
        callbacks: &mut [&mut dyn EpochCallback],
    ) -> Result<Detector, TrainError> {
        match *self {
            Strategy::Standard {
                learning_rate,
                epochs,
            } => {
                tracing::info!(learning_rate, epochs, "training with Adam");
                let optim = AdamConfig::new().init::<ADBackend, Detector>();
                fit(
                    model,
                    optim,
                    |_| learning_rate,
                    false,
                    epochs,
                    data,
                    loss,
                    callbacks,
                )
            }
            Strategy::Velo { epochs } => {
                let total = data.steps_per_epoch().max(1) * epochs;
                tracing::info!(
                    epochs,
                    total_steps = total,
                    "training with learning-rate-free schedule (configured learning rate ignored)"
                );
                let optim = AdamWConfig::new()
                    .with_weight_decay(VELO_WEIGHT_DECAY)
                    .init::<ADBackend, Detector>();
                fit(
                    model,
                    optim,
                    |step| velo_learning_rate(step, total),
                    true,
                    epochs,
                    data,
                    loss,
                    callbacks,
                )
            }
        }
    }
}

/// Cosine decay from [`VELO_BASE_LR`] to [`VELO_MIN_LR`] over `total` steps.
pub fn velo_learning_rate(step: usize, total: usize) -> f64 {
    if total == 0 {
        return VELO_BASE_LR;
    }
    let t = (step.min(total) as f64) / total as f64;
    VELO_MIN_LR + 0.5 * (VELO_BASE_LR - VELO_MIN_LR) * (1.0 + (std::f64::consts::PI * t).cos())
}

/// Whether a backend panic message reports an allocation failure.
pub fn is_resource_exhaustion(msg: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "out of memory",
        "outofmemory",
        "oom",
        "resource exhausted",
        "failed to allocate",
        "allocation failed",
    ];
    let lower = msg.to_ascii_lowercase();
    MARKERS.iter().any(|m| {
        if *m == "oom" {
            lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|w| w == "oom")
        } else {
            lower.contains(m)
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `step`, turning an allocation-failure panic into [`TrainError::ResourceExhausted`].
///
/// Any other panic is re-raised unchanged.
pub fn guard_resource_exhaustion<T, F>(batch_size: usize, step: F) -> Result<T, TrainError>
where
    F: FnOnce() -> Result<T, TrainError>,
{
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            if !is_resource_exhaustion(&detail) {
                panic::resume_unwind(payload);
            }
            tracing::error!(batch_size, %detail, "training ran out of memory");
            Err(TrainError::ResourceExhausted { batch_size, detail })
        }
    }
}

fn train_step<O>(
    model: Detector,
    optim: &mut O,
    lr: f64,
    host: &HostBatch,
    loss: &WeightedCrossEntropy,
    device: &<ADBackend as Backend>::Device,
) -> Result<(Detector, f32), TrainError>
where
    O: Optimizer<Detector, ADBackend>,
{
    let batch = host.to_device::<ADBackend>(device);
    let logits = model.forward(batch.images);
    let loss = loss.forward(logits, batch.targets)?;
    let value = scalar(loss.clone().detach())?;
    let grads = GradientsParams::from_grads(loss.backward(), &model);
    Ok((optim.step(lr, model, grads), value))
}

#[allow(clippy::too_many_arguments)]
fn fit<O, S>(
    mut model: Detector,
    mut optim: O,
    schedule: S,
    guard_oom: bool,
    epochs: usize,
    data: &TrainData,
    loss: &WeightedCrossEntropy,
    callbacks: &mut [&mut dyn EpochCallback],
) -> Result<Detector, TrainError>
where
    O: Optimizer<Detector, ADBackend>,
    S: Fn(usize) -> f64,
{
    let device = <ADBackend as Backend>::Device::default();
    let val_device = <TrainBackend as Backend>::Device::default();
    let mut global_step = 0usize;

    for epoch in 0..epochs {
        let batch_cfg = data.batch.for_epoch(epoch);
        let mut iter = BatchIter::new(data.train.clone(), data.shape, &batch_cfg)?;
        let mut loss_sum = 0.0f64;
        let mut steps = 0usize;
        while let Some(host) = iter.next_host() {
            let lr = schedule(global_step);
            let (next, value) = if guard_oom {
                guard_resource_exhaustion(data.batch.batch_size, || {
                    train_step(model, &mut optim, lr, &host, loss, &device)
                })?
            } else {
                train_step(model, &mut optim, lr, &host, loss, &device)?
            };
            model = next;
            loss_sum += value as f64;
            steps += 1;
            global_step += 1;
            tracing::debug!(epoch = epoch + 1, step = steps, lr, loss = value, "train step");
        }

        let eval = evaluate_dataset(
            &model.valid(),
            data.val.clone(),
            data.shape,
            &data.batch,
            loss,
            &val_device,
        )?;
        let summary = EpochSummary {
            epoch,
            epochs,
            train_loss: if steps == 0 {
                0.0
            } else {
                (loss_sum / steps as f64) as f32
            },
            val_loss: eval.loss,
            val: eval.score,
        };
        for cb in callbacks.iter_mut() {
            cb.on_epoch_end(&summary, &model)?;
        }
    }
    Ok(model)
}
