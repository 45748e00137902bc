//! Loading labeled images from a dataset root.

use crate::types::{DatasetError, DatasetResult, DetectionSample, LabeledBox};
use data_contracts::SampleLabel;
use image::imageops::FilterType;
use image::DynamicImage;
use rayon::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetPathConfig {
    pub root: PathBuf,
    pub labels_subdir: String,
    pub images_subdir: String,
}

impl DatasetPathConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            labels_subdir: "labels".to_string(),
            images_subdir: ".".to_string(),
        }
    }

    /// Label files under `<root>/<labels_subdir>`, sorted by path for a stable order.
    pub fn label_paths(&self) -> DatasetResult<Vec<PathBuf>> {
        let labels_dir = self.root.join(&self.labels_subdir);
        let entries = fs::read_dir(&labels_dir).map_err(|source| DatasetError::Io {
            path: labels_dir.clone(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DatasetError::Io {
                path: labels_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Load every labeled image, resized to `input_size` square with `channels` channels.
    pub fn load(
        &self,
        input_size: usize,
        channels: usize,
        num_classes: usize,
    ) -> DatasetResult<Vec<DetectionSample>> {
        if channels != 1 && channels != 3 {
            return Err(DatasetError::Other(format!(
                "unsupported channel count {channels}; expected 1 (grayscale) or 3 (RGB)"
            )));
        }
        let paths = self.label_paths()?;
        let samples = paths
            .par_iter()
            .map(|path| self.load_one(path, input_size, channels, num_classes))
            .collect::<DatasetResult<Vec<_>>>()?;
        tracing::info!(
            root = %self.root.display(),
            samples = samples.len(),
            "loaded dataset"
        );
        Ok(samples)
    }

    fn load_one(
        &self,
        label_path: &Path,
        input_size: usize,
        channels: usize,
        num_classes: usize,
    ) -> DatasetResult<DetectionSample> {
        let raw = fs::read(label_path).map_err(|source| DatasetError::Io {
            path: label_path.to_path_buf(),
            source,
        })?;
        let label: SampleLabel =
            serde_json::from_slice(&raw).map_err(|source| DatasetError::Json {
                path: label_path.to_path_buf(),
                source,
            })?;
        label
            .validate(num_classes)
            .map_err(|source| DatasetError::Validation {
                path: label_path.to_path_buf(),
                source,
            })?;

        let img_path = self.root.join(&self.images_subdir).join(&label.image);
        let img = image::open(&img_path).map_err(|source| DatasetError::Image {
            path: img_path.clone(),
            source,
        })?;
        let image_chw = image_to_chw(&img, input_size, channels);

        let boxes = label
            .boxes
            .iter()
            .filter_map(|b| {
                b.segmentation_class().map(|class_id| LabeledBox {
                    bbox: b.bbox_norm,
                    class_id,
                })
            })
            .collect();

        Ok(DetectionSample {
            frame_id: label.frame_id,
            image_chw,
            channels,
            width: input_size,
            height: input_size,
            boxes,
        })
    }
}

/// Resize to `input_size` square and lay out as normalized CHW (grayscale when `channels == 1`).
pub fn image_to_chw(img: &DynamicImage, input_size: usize, channels: usize) -> Vec<f32> {
    let size = input_size as u32;
    let resized = img.resize_exact(size, size, FilterType::Triangle);
    if channels == 1 {
        resized
            .to_luma8()
            .as_raw()
            .iter()
            .map(|v| *v as f32 / 255.0)
            .collect()
    } else {
        hwc_to_chw(resized.to_rgb8().as_raw(), input_size * input_size, 3)
    }
}

fn hwc_to_chw(raw: &[u8], pixels: usize, channels: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; pixels * channels];
    for (p, px) in raw.chunks_exact(channels).enumerate() {
        for (c, v) in px.iter().enumerate() {
            out[c * pixels + p] = *v as f32 / 255.0;
        }
    }
    out
}
