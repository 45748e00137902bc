use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use data_contracts::TrainManifest;
use image::DynamicImage;
use models::{ConstrainedDetector, DetectorConfig, InputShape, ModelError, SoftmaxDetector};
use thiserror::Error;

use crate::centroids::{centroids_from_probs, Centroid};
use crate::InferenceBackend;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("checkpoint {path} could not be loaded: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("training manifest {path} is unusable: {msg}")]
    Manifest { path: PathBuf, msg: String },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("tensor readback failed: {0}")]
    Tensor(String),
    #[error("input has {actual} values, expected {expected}")]
    InputLength { expected: usize, actual: usize },
}

fn host_values(data: TensorData) -> Result<Vec<f32>, InferenceError> {
    data.to_vec::<f32>()
        .map_err(|e| InferenceError::Tensor(format!("{e:?}")))
}

/// Minimum class probability for a cell to be reported.
#[derive(Debug, Clone, Copy)]
pub struct InferenceThresholds {
    pub min_score: f32,
}

impl Default for InferenceThresholds {
    fn default() -> Self {
        Self { min_score: 0.5 }
    }
}

/// Softmax detector plus the shapes needed to interpret its output.
pub struct CentroidDetector {
    model: SoftmaxDetector<InferenceBackend>,
    input: InputShape,
    grid: usize,
    classes: usize,
    thresholds: InferenceThresholds,
    device: <InferenceBackend as Backend>::Device,
}

impl CentroidDetector {
    pub fn input_shape(&self) -> InputShape {
        self.input
    }

    pub fn thresholds(&self) -> InferenceThresholds {
        self.thresholds
    }

    /// Class probabilities `[classes, grid, grid]` for one CHW image at the model input size.
    pub fn probabilities(&self, image_chw: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let InputShape {
            height,
            width,
            channels,
        } = self.input;
        let expected = channels * height * width;
        if image_chw.len() != expected {
            return Err(InferenceError::InputLength {
                expected,
                actual: image_chw.len(),
            });
        }
        let x = Tensor::<InferenceBackend, 1>::from_floats(image_chw, &self.device)
            .reshape([1, channels, height, width]);
        let probs = self.model.forward(x);
        host_values(probs.into_data())
    }

    pub fn detect_chw(&self, image_chw: &[f32]) -> Result<Vec<Centroid>, InferenceError> {
        let probs = self.probabilities(image_chw)?;
        Ok(centroids_from_probs(
            &probs,
            self.classes,
            self.grid,
            self.thresholds.min_score,
        ))
    }

    pub fn detect_image(&self, img: &DynamicImage) -> Result<Vec<Centroid>, InferenceError> {
        let chw = seg_dataset::image_to_chw(img, self.input.height, self.input.channels);
        self.detect_chw(&chw)
    }

    pub fn detect_path(&self, path: &Path) -> Result<Vec<Centroid>, InferenceError> {
        let img = image::open(path).map_err(|source| InferenceError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        self.detect_image(&img)
    }
}

/// Builds [`CentroidDetector`]s from training checkpoints.
pub struct InferenceFactory;

impl InferenceFactory {
    /// Load `checkpoint` into a detector built from `cfg`.
    pub fn load(
        &self,
        cfg: &DetectorConfig,
        checkpoint: &Path,
        thresholds: InferenceThresholds,
    ) -> Result<CentroidDetector, InferenceError> {
        let output = cfg.output_shape()?;
        let path = checkpoint.with_extension("bin");
        if !path.exists() {
            return Err(InferenceError::Checkpoint {
                msg: "file not found".into(),
                path,
            });
        }
        let device = <InferenceBackend as Backend>::Device::default();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let model = ConstrainedDetector::<InferenceBackend>::new(cfg, &device)?
            .load_file(path.clone(), &recorder, &device)
            .map_err(|e| InferenceError::Checkpoint {
                path: path.clone(),
                msg: e.to_string(),
            })?;
        tracing::info!(
            path = %path.display(),
            input = ?cfg.input,
            grid = output.height,
            classes = output.classes,
            "loaded detector checkpoint"
        );
        Ok(CentroidDetector {
            model: model.with_softmax(),
            input: cfg.input,
            grid: output.height,
            classes: output.classes,
            thresholds,
            device,
        })
    }

    /// Load using the JSON training manifest written beside the checkpoint.
    pub fn load_with_manifest(
        &self,
        checkpoint: &Path,
        thresholds: InferenceThresholds,
    ) -> Result<CentroidDetector, InferenceError> {
        let manifest_path = checkpoint.with_extension("json");
        let manifest_err = |msg: String| InferenceError::Manifest {
            path: manifest_path.clone(),
            msg,
        };
        let raw =
            std::fs::read_to_string(&manifest_path).map_err(|e| manifest_err(e.to_string()))?;
        let manifest: TrainManifest =
            serde_json::from_str(&raw).map_err(|e| manifest_err(e.to_string()))?;
        manifest.validate().map_err(manifest_err)?;
        let cfg = DetectorConfig::new(
            InputShape::square(manifest.input_size, manifest.input_channels),
            manifest.alpha,
            manifest.num_classes,
        );
        self.load(&cfg, checkpoint, thresholds)
    }
}
