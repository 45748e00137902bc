//! Burn modules for constrained (centroid-style) object detection.
//!
//! - `MobileNetV2Backbone`: MobileNetV2 cut at `block_6_expand_relu`, output stride 8.
//! - `ConstrainedDetector`: backbone + 1x1 conv head + dropout + 1x1 logits conv.
//! - `SoftmaxDetector`: the trained detector with a softmax over classes, for inference.
//!
//! These are plain burn Modules; training and inference crates drive them.

pub mod detector;
pub mod mobilenet;

pub use detector::{
    output_size, ConstrainedDetector, DetectorConfig, InputShape, ModelError, OutputShape,
    SoftmaxDetector, OUTPUT_STRIDE,
};
pub use mobilenet::{make_divisible, MobileNetV2Backbone, MobileNetV2Config, CUT_POINT};

pub mod prelude {
    pub use super::{
        ConstrainedDetector, DetectorConfig, InputShape, ModelError, OutputShape, SoftmaxDetector,
    };
}
