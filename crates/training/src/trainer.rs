//! End-to-end training orchestration.
//!
//! `train` walks a fixed sequence: resolve pretrained weights, build the detector,
//! derive the output grid, rasterize labels, initialise the logits bias from class
//! priors, run the selected strategy, reload the best checkpoint and attach softmax.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{ConstrainedDetector, DetectorConfig, InputShape, SoftmaxDetector};
use seg_dataset::{
    class_priors, transform_samples, BatchConfig, DetectionSample, PrefetchPolicy, SampleShape,
    SegmentationSample,
};

use crate::callbacks::{BestCheckpoint, EpochCallback, MetricsHistory, ProgressLogger};
use crate::error::TrainError;
use crate::loss::WeightedCrossEntropy;
use crate::metrics::{evaluate_dataset, Evaluation};
use crate::strategy::{Strategy, TrainData};
use crate::weights::{self, WeightFetcher};
use crate::{ADBackend, TrainBackend};

/// Seed used when determinism is requested without an explicit seed.
pub const DEFAULT_SEED: u64 = 42;

/// Everything `train` needs; paths are already resolved by the caller.
#[derive(Debug, Clone)]
pub struct TrainParams {
    /// Object classes, background excluded.
    pub num_classes: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub alpha: f32,
    pub object_weight: f32,
    pub input: InputShape,
    pub batch_size: usize,
    pub use_velo: bool,
    pub deterministic: bool,
    pub seed: Option<u64>,
    /// Directory holding cached pretrained backbones.
    pub weights_prefix: PathBuf,
    pub weights_url: Option<String>,
    pub checkpoint: PathBuf,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            num_classes: 1,
            learning_rate: 1e-3,
            epochs: 30,
            alpha: 0.35,
            object_weight: 100.0,
            input: InputShape::square(96, 1),
            batch_size: 32,
            use_velo: false,
            deterministic: false,
            seed: None,
            weights_prefix: PathBuf::from("."),
            weights_url: None,
            checkpoint: PathBuf::from("checkpoints/constrained_detector.bin"),
        }
    }
}

impl TrainParams {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig::new(self.input, self.alpha, self.num_classes)
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::from_flag(self.use_velo, self.learning_rate, self.epochs)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            shuffle: true,
            seed: self.effective_seed(),
            deterministic: self.deterministic,
            drop_last: false,
            prefetch: PrefetchPolicy::Autotune,
        }
    }

    pub fn effective_seed(&self) -> Option<u64> {
        match (self.seed, self.deterministic) {
            (Some(seed), _) => Some(seed),
            (None, true) => Some(DEFAULT_SEED),
            (None, false) => None,
        }
    }

    fn validate(&self) -> Result<(), TrainError> {
        self.detector_config().validate()?;
        if self.epochs == 0 {
            return Err(TrainError::Config("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(TrainError::Config("batch_size must be at least 1".into()));
        }
        if self.object_weight.is_nan() || self.object_weight <= 0.0 {
            return Err(TrainError::Config(format!(
                "object_weight must be positive, got {}",
                self.object_weight
            )));
        }
        Ok(())
    }
}

/// Result of a finished run.
#[derive(Debug)]
pub struct TrainOutcome {
    /// Best-F1 weights with softmax attached.
    pub model: SoftmaxDetector<TrainBackend>,
    pub best_val_f1: f32,
    pub best_epoch: Option<usize>,
    pub checkpoint: PathBuf,
    pub pretrained: Option<PathBuf>,
    pub history: MetricsHistory,
}

/// Train a constrained detector on `train`, selecting the checkpoint by F1 on `val`.
pub fn train(
    params: &TrainParams,
    train: &[DetectionSample],
    val: &[DetectionSample],
    fetcher: &dyn WeightFetcher,
) -> Result<TrainOutcome, TrainError> {
    params.validate()?;
    let cfg = params.detector_config();
    let output = cfg.output_shape()?;
    if train.is_empty() {
        return Err(TrainError::Config("training set is empty".into()));
    }

    if let Some(seed) = params.effective_seed() {
        <ADBackend as Backend>::seed(seed);
    }
    let device = <ADBackend as Backend>::Device::default();

    let pretrained = weights::resolve(
        &params.weights_prefix,
        params.input.channels,
        params.alpha,
        params.weights_url.as_deref(),
        fetcher,
    )?;
    let mut model = ConstrainedDetector::<ADBackend>::new(&cfg, &device)?;
    if let Some(path) = &pretrained {
        model = model.with_backbone_weights(path, &device)?;
        tracing::info!(path = %path.display(), "loaded pretrained backbone");
    } else {
        tracing::info!("backbone randomly initialised");
    }
    tracing::info!(
        input = ?params.input,
        output = ?output,
        alpha = params.alpha,
        "detector built"
    );

    let loss = WeightedCrossEntropy::new(output, params.object_weight);
    let shape = SampleShape {
        channels: params.input.channels,
        input_size: params.input.height,
        grid_size: output.height,
        classes: output.classes,
    };
    let train_seg = Arc::new(transform_samples(train, shape)?);
    let val_seg = Arc::new(transform_samples(val, shape)?);

    let priors = class_priors(&train_seg, &shape);
    let bias = logits_bias_from_priors(&priors);
    tracing::debug!(?priors, ?bias, "logits bias from class priors");
    let model = model.with_logits_bias(&bias)?;

    let data = TrainData {
        train: train_seg,
        val: val_seg,
        shape,
        batch: params.batch_config(),
    };
    let strategy = params.strategy();
    let mut progress = ProgressLogger;
    let mut best = BestCheckpoint::new(&params.checkpoint);
    let mut history = MetricsHistory::default();
    tracing::info!(
        strategy = strategy.name(),
        train = data.train.len(),
        val = data.val.len(),
        batch_size = params.batch_size,
        deterministic = params.deterministic,
        "starting training"
    );
    let mut callbacks: [&mut dyn EpochCallback; 3] = [&mut history, &mut progress, &mut best];
    strategy.run(model, &data, &loss, &mut callbacks)?;

    let checkpoint = best.path().to_path_buf();
    let best_val_f1 = best.best_f1().unwrap_or(0.0);
    let model = load_detector_checkpoint(&cfg, &checkpoint)?;
    tracing::info!(
        best_val_f1,
        best_epoch = ?best.best_epoch().map(|e| e + 1),
        path = %checkpoint.display(),
        "restored best checkpoint"
    );

    Ok(TrainOutcome {
        model: model.with_softmax(),
        best_val_f1,
        best_epoch: best.best_epoch(),
        checkpoint,
        pretrained,
        history,
    })
}

/// Load a full detector checkpoint written during training.
pub fn load_detector_checkpoint(
    cfg: &DetectorConfig,
    path: &Path,
) -> Result<ConstrainedDetector<TrainBackend>, TrainError> {
    let path = path.with_extension("bin");
    if !path.exists() {
        return Err(TrainError::Checkpoint {
            msg: "file not found".into(),
            path,
        });
    }
    let device = <TrainBackend as Backend>::Device::default();
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    ConstrainedDetector::<TrainBackend>::new(cfg, &device)?
        .load_file(path.clone(), &recorder, &device)
        .map_err(|e| TrainError::Checkpoint {
            path,
            msg: e.to_string(),
        })
}

/// Score a trained detector on already transformed samples.
pub fn evaluate(
    model: &ConstrainedDetector<TrainBackend>,
    samples: Vec<SegmentationSample>,
    shape: SampleShape,
    object_weight: f32,
    batch_size: usize,
) -> Result<Evaluation, TrainError> {
    let device = <TrainBackend as Backend>::Device::default();
    let output = models::OutputShape {
        height: shape.grid_size,
        width: shape.grid_size,
        classes: shape.classes,
    };
    let batch = BatchConfig {
        batch_size: batch_size.max(1),
        shuffle: false,
        deterministic: true,
        ..BatchConfig::default()
    };
    evaluate_dataset(
        model,
        Arc::new(samples),
        shape,
        &batch,
        &WeightedCrossEntropy::new(output, object_weight),
        &device,
    )
}

/// Log of each class prior, so the untrained softmax reproduces the class frequencies.
pub fn logits_bias_from_priors(priors: &[f32]) -> Vec<f32> {
    priors.iter().map(|p| p.max(1e-6).ln()).collect()
}
