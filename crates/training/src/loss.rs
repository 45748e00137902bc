//! Weighted per-pixel cross-entropy.

use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, Tensor};
use models::OutputShape;

use crate::error::TrainError;

/// Cross-entropy over the class axis; pixels whose true class is an object count
/// `object_weight` times, background pixels count once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedCrossEntropy {
    output: OutputShape,
    object_weight: f32,
}

impl WeightedCrossEntropy {
    pub fn new(output: OutputShape, object_weight: f32) -> Self {
        Self {
            output,
            object_weight,
        }
    }

    pub fn output_shape(&self) -> OutputShape {
        self.output
    }

    pub fn object_weight(&self) -> f32 {
        self.object_weight
    }

    /// `[B, 1, H, W]` multipliers derived from one-hot targets `[B, C, H, W]`.
    pub fn pixel_weights<B: Backend>(&self, targets: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _, h, w] = targets.dims();
        let background = targets.slice([0..batch, 0..1, 0..h, 0..w]);
        // background * 1 + (1 - background) * object_weight
        background
            .mul_scalar(1.0 - self.object_weight)
            .add_scalar(self.object_weight)
    }

    /// Mean weighted cross-entropy of `logits` against one-hot `targets`.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> Result<Tensor<B, 1>, TrainError> {
        let dims = logits.dims();
        let expected = [self.output.classes, self.output.height, self.output.width];
        if dims[1..] != expected {
            return Err(TrainError::Shape(format!(
                "logits {dims:?} do not match output shape {expected:?}"
            )));
        }
        if targets.dims() != dims {
            return Err(TrainError::Shape(format!(
                "targets {:?} do not match logits {dims:?}",
                targets.dims()
            )));
        }
        let xent = (log_softmax(logits, 1) * targets.clone()).sum_dim(1).neg();
        let weights = self.pixel_weights(targets);
        Ok((xent * weights).mean())
    }
}
