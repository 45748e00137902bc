//! Core types and error definitions for seg_dataset.

use data_contracts::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("label validation failed at {path}: {source}")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("sample {frame_id} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        frame_id: u64,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("frame {frame_id}: box {bbox:?} with class {class_id} rejected: {reason}")]
    InvalidBox {
        frame_id: u64,
        bbox: [f32; 4],
        class_id: usize,
        reason: &'static str,
    },
    #[error("{0}")]
    Other(String),
}

/// One labeled box in training form: normalized corners and the segmentation class (background = 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledBox {
    pub bbox: [f32; 4],
    pub class_id: usize,
}

impl LabeledBox {
    /// Corners must be finite, within [0, 1] and ordered; the class must be an object class.
    pub fn check(&self, classes: usize) -> Result<(), &'static str> {
        let [x0, y0, x1, y1] = self.bbox;
        if !self.bbox.iter().all(|v| v.is_finite()) {
            return Err("non-finite corner");
        }
        if !self.bbox.iter().all(|v| (0.0..=1.0).contains(v)) {
            return Err("corner outside [0, 1]");
        }
        if x0 > x1 || y0 > y1 {
            return Err("inverted box");
        }
        if self.class_id == 0 {
            return Err("class 0 is background");
        }
        if self.class_id >= classes {
            return Err("class outside segmentation classes");
        }
        Ok(())
    }
}

/// An image with its box labels, before conversion to a segmentation target.
#[derive(Debug, Clone)]
pub struct DetectionSample {
    pub frame_id: u64,
    /// Image in CHW layout, normalized to [0, 1].
    pub image_chw: Vec<f32>,
    pub channels: usize,
    pub width: usize,
    pub height: usize,
    pub boxes: Vec<LabeledBox>,
}

/// An image paired with its dense one-hot target of shape `[classes, grid, grid]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationSample {
    pub frame_id: u64,
    pub image_chw: Vec<f32>,
    pub seg_map: Vec<f32>,
}

/// Static shapes shared by every sample of a transformed dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleShape {
    pub channels: usize,
    pub input_size: usize,
    pub grid_size: usize,
    /// Number of segmentation classes including background.
    pub classes: usize,
}

impl SampleShape {
    pub fn image_len(&self) -> usize {
        self.channels * self.input_size * self.input_size
    }

    pub fn seg_len(&self) -> usize {
        self.classes * self.grid_size * self.grid_size
    }
}
