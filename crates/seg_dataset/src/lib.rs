//! Dataset loading, box-to-segmentation conversion, and burn batching for constrained detectors.
//!
//! This crate provides utilities for:
//! - Loading labeled images from a dataset root (`labels/*.json` + images)
//! - Rasterizing bounding boxes into per-cell segmentation maps
//! - Class prior estimation for logits bias initialisation
//! - Train/val splitting
//! - Prefetching batch iteration with a deterministic mode
//!
//! Image decoding (`DatasetPathConfig::load`) and rasterization (`transform_samples`) run
//! on rayon; batches are assembled sequentially on a single prefetch thread.

pub mod batch;
pub mod loader;
pub mod segmentation;
pub mod splits;
pub mod types;

pub use batch::{BatchConfig, BatchIter, HostBatch, PrefetchPolicy, SegBatch};
pub use loader::{image_to_chw, DatasetPathConfig};
pub use segmentation::{class_priors, rasterize_boxes, to_segmentation, transform_samples};
pub use splits::split_samples;
pub use types::*;
