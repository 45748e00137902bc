use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One labeled box: normalized `[x_min, y_min, x_max, y_max]` plus a one-hot class vector.
///
/// The one-hot vector covers object classes only; background is implicit and is not encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoxLabel {
    pub bbox_norm: [f32; 4],
    pub one_hot: Vec<f32>,
}

/// Label file for a single image (`<root>/labels/*.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleLabel {
    pub frame_id: u64,
    pub image: String,
    #[serde(default)]
    pub boxes: Vec<BoxLabel>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("bbox_norm out of range or inverted: {0:?}")]
    InvalidBboxNorm([f32; 4]),
    #[error("one-hot label has {actual} entries, expected {expected}")]
    OneHotLength { expected: usize, actual: usize },
    #[error("one-hot label is not a single 1.0 among zeros: {0:?}")]
    OneHotNotHot(Vec<f32>),
    #[error("missing image path")]
    MissingImage,
}

impl BoxLabel {
    pub fn validate(&self, num_classes: usize) -> Result<(), ValidationError> {
        let norm = self.bbox_norm;
        let in_range = norm.iter().all(|v| !v.is_nan() && *v >= 0.0 && *v <= 1.0);
        if !in_range || norm[0] > norm[2] || norm[1] > norm[3] {
            return Err(ValidationError::InvalidBboxNorm(norm));
        }
        if self.one_hot.len() != num_classes {
            return Err(ValidationError::OneHotLength {
                expected: num_classes,
                actual: self.one_hot.len(),
            });
        }
        let hot = self.one_hot.iter().filter(|v| **v == 1.0).count();
        let cold = self.one_hot.iter().filter(|v| **v == 0.0).count();
        if hot != 1 || hot + cold != self.one_hot.len() {
            return Err(ValidationError::OneHotNotHot(self.one_hot.clone()));
        }
        Ok(())
    }

    /// Index of the hot entry among object classes (0-based, background excluded).
    pub fn class_index(&self) -> Option<usize> {
        self.one_hot.iter().position(|v| *v == 1.0)
    }

    /// Segmentation class id: object classes shifted by one so background owns 0.
    pub fn segmentation_class(&self) -> Option<usize> {
        self.class_index().map(|c| c + 1)
    }
}

impl SampleLabel {
    pub fn validate(&self, num_classes: usize) -> Result<(), ValidationError> {
        if self.image.trim().is_empty() {
            return Err(ValidationError::MissingImage);
        }
        for b in &self.boxes {
            b.validate(num_classes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_class_skips_background() {
        let label = BoxLabel {
            bbox_norm: [0.1, 0.1, 0.4, 0.4],
            one_hot: vec![0.0, 1.0, 0.0],
        };
        assert_eq!(label.class_index(), Some(1));
        assert_eq!(label.segmentation_class(), Some(2));
    }

    #[test]
    fn sample_label_parses_without_boxes() {
        let raw = r#"{"frame_id": 3, "image": "img_3.png"}"#;
        let label: SampleLabel = serde_json::from_str(raw).unwrap();
        assert!(label.boxes.is_empty());
        assert!(label.validate(2).is_ok());
    }
}
