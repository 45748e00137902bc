//! Argument parsing and command drivers behind the `train` and `eval` binaries.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use cli_support::{DatasetArgs, ModelShapeArgs};
use data_contracts::{TrainManifest, TrainManifestSchemaVersion};
use models::InputShape;
use seg_dataset::{split_samples, DatasetPathConfig, DetectionSample, SampleShape};

use crate::config::PathConfig;
use crate::trainer::{self, TrainOutcome, TrainParams};
use crate::weights::HttpFetcher;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a MobileNetV2 constrained (centroid) detector"
)]
pub struct TrainArgs {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[command(flatten)]
    pub model: ModelShapeArgs,
    #[command(flatten)]
    pub dataset: DatasetArgs,
    /// Training dataset root (overrides the config file).
    #[arg(long)]
    pub train_root: Option<PathBuf>,
    /// Validation dataset root; when absent a share of the training set is held out.
    #[arg(long)]
    pub val_root: Option<PathBuf>,
    /// Share of the training set held out for validation when no val root is given.
    #[arg(long, default_value_t = 0.2)]
    pub val_ratio: f32,
    /// Loss multiplier for object (non-background) pixels.
    #[arg(long, default_value_t = 100.0)]
    pub object_weight: f32,
    /// Learning rate (ignored with --velo).
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    #[arg(long, default_value_t = 30)]
    pub epochs: usize,
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Use the learning-rate-free schedule instead of Adam.
    #[arg(long, default_value_t = false)]
    pub velo: bool,
    /// Disable shuffling, prefetch one batch at a time and seed the backend.
    #[arg(long, default_value_t = false)]
    pub deterministic: bool,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Directory holding cached pretrained backbones (defaults to $WEIGHTS_PREFIX or the cwd).
    #[arg(long)]
    pub weights_prefix: Option<PathBuf>,
    /// Base URL to download pretrained backbones from.
    #[arg(long)]
    pub weights_url: Option<String>,
    /// Best checkpoint output path.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Score a constrained detector checkpoint on a labeled dataset (centroid precision/recall/F1)"
)]
pub struct EvalArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[command(flatten)]
    pub dataset: DatasetArgs,
    /// Dataset root to score (defaults to the configured val root, then train root).
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    /// Checkpoint to load; its training manifest must sit next to it.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; the WGPU backend is used despite --backend ndarray");
            Ok(())
        }
        _ => Ok(()),
    }
}

impl TrainArgs {
    /// Merge CLI values over the file configuration.
    pub fn to_params(&self, paths: &PathConfig) -> TrainParams {
        let (height, width, channels) = self.model.input_shape;
        TrainParams {
            num_classes: self.model.num_classes,
            learning_rate: self.lr,
            epochs: self.epochs,
            alpha: self.model.alpha,
            object_weight: self.object_weight,
            input: InputShape {
                height,
                width,
                channels,
            },
            batch_size: self.batch_size,
            use_velo: self.velo,
            deterministic: self.deterministic,
            seed: self.seed,
            weights_prefix: self
                .weights_prefix
                .clone()
                .unwrap_or_else(|| paths.weights_prefix.clone()),
            weights_url: self
                .weights_url
                .clone()
                .or_else(|| paths.weights_url.clone()),
            checkpoint: self
                .checkpoint
                .clone()
                .unwrap_or_else(|| paths.checkpoint.clone()),
        }
    }
}

fn load_dataset(
    root: &Path,
    dataset: &DatasetArgs,
    input: InputShape,
    num_classes: usize,
) -> anyhow::Result<Vec<DetectionSample>> {
    let cfg = DatasetPathConfig {
        root: root.to_path_buf(),
        labels_subdir: dataset.labels_subdir.clone(),
        images_subdir: dataset.images_subdir.clone(),
    };
    cfg.load(input.height, input.channels, num_classes)
        .with_context(|| format!("failed to load dataset under {}", root.display()))
}

/// Path of the JSON manifest written beside a checkpoint.
pub fn manifest_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("json")
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainOutcome> {
    validate_backend_choice(args.backend)?;
    let paths = PathConfig::load();
    let params = args.to_params(&paths);
    // Shape errors surface before any data is touched.
    params.detector_config().output_shape()?;

    let train_root = args.train_root.clone().unwrap_or(paths.train_root.clone());
    let samples = load_dataset(&train_root, &args.dataset, params.input, params.num_classes)?;
    if samples.is_empty() {
        anyhow::bail!("no labeled samples found under {}", train_root.display());
    }
    let (train, val) = match args.val_root.clone().or(paths.val_root.clone()) {
        Some(val_root) => {
            let val = load_dataset(&val_root, &args.dataset, params.input, params.num_classes)?;
            (samples, val)
        }
        None => split_samples(samples, args.val_ratio, params.effective_seed()),
    };
    tracing::info!(train = train.len(), val = val.len(), "datasets ready");

    let outcome = trainer::train(&params, &train, &val, &HttpFetcher::default())?;
    write_manifest(&params, &outcome)?;
    Ok(outcome)
}

pub fn write_manifest(params: &TrainParams, outcome: &TrainOutcome) -> anyhow::Result<PathBuf> {
    let manifest = TrainManifest {
        schema_version: TrainManifestSchemaVersion::V1,
        checkpoint: outcome.checkpoint.clone(),
        num_classes: params.num_classes,
        input_size: params.input.height,
        input_channels: params.input.channels,
        alpha: params.alpha,
        object_weight: params.object_weight,
        strategy: params.strategy().name().to_string(),
        epochs: params.epochs,
        best_epoch: outcome.best_epoch,
        best_val_f1: outcome.best_val_f1,
        pretrained_weights: outcome.pretrained.clone(),
        seed: params.effective_seed(),
    };
    manifest.validate().map_err(|e| anyhow::anyhow!(e))?;
    let path = manifest_path(&outcome.checkpoint);
    fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote training manifest");
    Ok(path)
}

pub fn read_manifest(checkpoint: &Path) -> anyhow::Result<TrainManifest> {
    let path = manifest_path(checkpoint);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read training manifest {}", path.display()))?;
    let manifest: TrainManifest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    manifest.validate().map_err(|e| anyhow::anyhow!(e))?;
    Ok(manifest)
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<crate::Evaluation> {
    validate_backend_choice(args.backend)?;
    let paths = PathConfig::load();
    let checkpoint = args.checkpoint.clone().unwrap_or(paths.checkpoint.clone());
    let manifest = read_manifest(&checkpoint)?;
    let input = InputShape::square(manifest.input_size, manifest.input_channels);
    let cfg = models::DetectorConfig::new(input, manifest.alpha, manifest.num_classes);
    let output = cfg.output_shape()?;
    let model = trainer::load_detector_checkpoint(&cfg, &checkpoint)?;

    let root = args
        .dataset_root
        .clone()
        .or(paths.val_root.clone())
        .unwrap_or(paths.train_root.clone());
    let samples = load_dataset(&root, &args.dataset, input, manifest.num_classes)?;
    let shape = SampleShape {
        channels: input.channels,
        input_size: input.height,
        grid_size: output.height,
        classes: output.classes,
    };
    let samples = seg_dataset::transform_samples(&samples, shape)?;
    let count = samples.len();
    let eval = trainer::evaluate(
        &model,
        samples,
        shape,
        manifest.object_weight,
        args.batch_size,
    )?;
    tracing::info!(
        samples = count,
        loss = eval.loss,
        precision = eval.score.precision(),
        recall = eval.score.recall(),
        f1 = eval.score.f1(),
        "evaluation finished"
    );
    Ok(eval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = TrainArgs::parse_from(["train"]);
        let params = args.to_params(&PathConfig::default());
        assert_eq!(params.input, InputShape::square(96, 1));
        assert_eq!(params.num_classes, 1);
        assert!((params.alpha - 0.35).abs() < f32::EPSILON);
        assert_eq!(params.object_weight, 100.0);
        assert_eq!(params.epochs, 30);
        assert_eq!(params.batch_size, 32);
        assert!(!params.use_velo);
    }

    #[test]
    fn cli_paths_override_config() {
        let args = TrainArgs::parse_from([
            "train",
            "--checkpoint",
            "out/best.bin",
            "--weights-prefix",
            "/tmp/w",
            "--input-shape",
            "64x64x3",
            "--velo",
        ]);
        let paths = PathConfig {
            weights_url: Some("https://example.invalid".into()),
            ..PathConfig::default()
        };
        let params = args.to_params(&paths);
        assert_eq!(params.checkpoint, PathBuf::from("out/best.bin"));
        assert_eq!(params.weights_prefix, PathBuf::from("/tmp/w"));
        assert_eq!(params.weights_url.as_deref(), Some("https://example.invalid"));
        assert_eq!(params.input, InputShape::square(64, 3));
        assert_eq!(params.strategy().name(), "velo");
    }

    #[test]
    fn manifest_sits_next_to_checkpoint() {
        assert_eq!(
            manifest_path(Path::new("runs/best.bin")),
            PathBuf::from("runs/best.json")
        );
    }
}
