//! Constrained detector: truncated MobileNetV2 + 1x1 head producing per-cell class logits.

use crate::mobilenet::{MobileNetV2Backbone, MobileNetV2Config};
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Dropout, DropoutConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::{backend::Backend, Tensor};
use std::path::Path;
use thiserror::Error;

/// Total downsampling between input and output grid.
pub const OUTPUT_STRIDE: usize = 8;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("input shape must be square, got {height}x{width}")]
    NonSquareInput { height: usize, width: usize },
    #[error("derived output shape must be square, got {height}x{width}")]
    NonSquareOutput { height: usize, width: usize },
    #[error("invalid detector config: {0}")]
    InvalidConfig(String),
    #[error("logits bias has {actual} entries, expected {expected}")]
    BiasLength { expected: usize, actual: usize },
    #[error("record error at {path}: {msg}")]
    Record { path: String, msg: String },
}

/// Model input shape in image terms (height, width, channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn square(size: usize, channels: usize) -> Self {
        Self {
            height: size,
            width: size,
            channels,
        }
    }
}

/// Output grid shape: `classes` includes the background class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputShape {
    pub height: usize,
    pub width: usize,
    pub classes: usize,
}

/// Spatial size after the three stride-2 stages (each rounds up).
pub fn output_size(input: usize) -> usize {
    (0..3).fold(input, |s, _| s.div_ceil(2))
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub input: InputShape,
    pub alpha: f32,
    /// Object classes, background excluded.
    pub num_classes: usize,
    pub head_filters: usize,
    pub dropout: f64,
    /// Keras-convention batch-norm momentum.
    pub bn_momentum: f64,
}

impl DetectorConfig {
    pub fn new(input: InputShape, alpha: f32, num_classes: usize) -> Self {
        Self {
            input,
            alpha,
            num_classes,
            head_filters: 32,
            dropout: 0.5,
            bn_momentum: 0.9,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let InputShape {
            height,
            width,
            channels,
        } = self.input;
        if height != width {
            return Err(ModelError::NonSquareInput { height, width });
        }
        if height == 0 || channels == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "input shape {height}x{width}x{channels} has an empty dimension"
            )));
        }
        if self.num_classes == 0 {
            return Err(ModelError::InvalidConfig(
                "num_classes must be at least 1".into(),
            ));
        }
        if self.alpha.is_nan() || self.alpha <= 0.0 {
            return Err(ModelError::InvalidConfig(format!(
                "alpha must be positive, got {}",
                self.alpha
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Validated output grid shape.
    pub fn output_shape(&self) -> Result<OutputShape, ModelError> {
        self.validate()?;
        let height = output_size(self.input.height);
        let width = output_size(self.input.width);
        if height != width {
            return Err(ModelError::NonSquareOutput { height, width });
        }
        Ok(OutputShape {
            height,
            width,
            classes: self.num_classes + 1,
        })
    }

    pub fn backbone(&self) -> MobileNetV2Config {
        MobileNetV2Config {
            in_channels: self.input.channels,
            alpha: self.alpha,
            bn_momentum: self.bn_momentum,
        }
    }
}

#[derive(Module, Debug)]
pub struct ConstrainedDetector<B: Backend> {
    backbone: MobileNetV2Backbone<B>,
    head: Conv2d<B>,
    dropout: Dropout,
    logits: Conv2d<B>,
    classes: usize,
}

impl<B: Backend> ConstrainedDetector<B> {
    /// Randomly initialised detector; fails on non-square shapes.
    pub fn new(cfg: &DetectorConfig, device: &B::Device) -> Result<Self, ModelError> {
        let out = cfg.output_shape()?;
        let backbone_cfg = cfg.backbone();
        let backbone = MobileNetV2Backbone::new(&backbone_cfg, device);
        let head = Conv2dConfig::new([backbone_cfg.out_channels(), cfg.head_filters], [1, 1])
            .init(device);
        let dropout = DropoutConfig::new(cfg.dropout).init();
        let logits = Conv2dConfig::new([cfg.head_filters, out.classes], [1, 1]).init(device);
        Ok(Self {
            backbone,
            head,
            dropout,
            logits,
            classes: out.classes,
        })
    }

    /// Number of output classes including background.
    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Replace the backbone with weights from a burn record file.
    pub fn with_backbone_weights(
        mut self,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.backbone = self
            .backbone
            .load_file(path, &recorder, device)
            .map_err(|e| ModelError::Record {
                path: path.display().to_string(),
                msg: e.to_string(),
            })?;
        Ok(self)
    }

    /// Write only the backbone weights, in the format `with_backbone_weights` reads.
    pub fn save_backbone_file(&self, path: &Path) -> Result<(), ModelError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.backbone
            .clone()
            .save_file(path, &recorder)
            .map_err(|e| ModelError::Record {
                path: path.display().to_string(),
                msg: e.to_string(),
            })
    }

    /// Backbone feature map at the cut point.
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.backbone.forward(x)
    }

    /// `[B, C, H, W]` → `[B, classes, H/8, W/8]` logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.backbone.forward(x);
        let x = relu(self.head.forward(x));
        let x = self.dropout.forward(x);
        self.logits.forward(x)
    }

    /// Overwrite the logits bias, one value per class (background first).
    pub fn with_logits_bias(mut self, bias: &[f32]) -> Result<Self, ModelError> {
        if bias.len() != self.classes {
            return Err(ModelError::BiasLength {
                expected: self.classes,
                actual: bias.len(),
            });
        }
        let device = self.logits.weight.device();
        let tensor = Tensor::<B, 1>::from_floats(bias, &device);
        self.logits.bias = Some(Param::from_tensor(tensor));
        Ok(self)
    }

    pub fn logits_bias(&self) -> Option<Vec<f32>> {
        self.logits
            .bias
            .as_ref()
            .and_then(|b| b.val().into_data().to_vec::<f32>().ok())
    }

    /// Append a softmax over the class axis for inference export.
    pub fn with_softmax(self) -> SoftmaxDetector<B> {
        SoftmaxDetector { detector: self }
    }
}

/// Detector whose output is a per-cell class probability distribution.
#[derive(Module, Debug)]
pub struct SoftmaxDetector<B: Backend> {
    detector: ConstrainedDetector<B>,
}

impl<B: Backend> SoftmaxDetector<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        softmax(self.detector.forward(x), 1)
    }

    pub fn detector(&self) -> &ConstrainedDetector<B> {
        &self.detector
    }

    pub fn into_detector(self) -> ConstrainedDetector<B> {
        self.detector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_size_is_input_over_eight() {
        for h in [8, 32, 96, 160, 320] {
            assert_eq!(output_size(h), h / OUTPUT_STRIDE);
        }
        assert_eq!(output_size(100), 13);
    }

    #[test]
    fn non_square_input_rejected() {
        let cfg = DetectorConfig::new(
            InputShape {
                height: 96,
                width: 64,
                channels: 3,
            },
            0.35,
            1,
        );
        assert!(matches!(
            cfg.output_shape(),
            Err(ModelError::NonSquareInput {
                height: 96,
                width: 64
            })
        ));
    }

    #[test]
    fn output_shape_adds_background() {
        let cfg = DetectorConfig::new(InputShape::square(96, 1), 0.35, 2);
        let out = cfg.output_shape().unwrap();
        assert_eq!(
            out,
            OutputShape {
                height: 12,
                width: 12,
                classes: 3
            }
        );
    }

    #[test]
    fn zero_classes_rejected() {
        let cfg = DetectorConfig::new(InputShape::square(96, 1), 0.35, 0);
        assert!(matches!(
            cfg.validate(),
            Err(ModelError::InvalidConfig(_))
        ));
    }
}
