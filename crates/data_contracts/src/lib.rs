//! Shared data contracts for detection labels and training run manifests.

pub mod label;
pub mod manifest;

pub use label::{BoxLabel, SampleLabel, ValidationError};
pub use manifest::{TrainManifest, TrainManifestSchemaVersion};
