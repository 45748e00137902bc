use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrainManifestSchemaVersion {
    V1,
}

/// Summary written next to the best checkpoint once training finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainManifest {
    pub schema_version: TrainManifestSchemaVersion,
    pub checkpoint: PathBuf,
    pub num_classes: usize,
    pub input_size: usize,
    pub input_channels: usize,
    pub alpha: f32,
    pub object_weight: f32,
    pub strategy: String,
    pub epochs: usize,
    pub best_epoch: Option<usize>,
    pub best_val_f1: f32,
    pub pretrained_weights: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl TrainManifest {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes == 0 {
            return Err("num_classes must be at least 1".into());
        }
        if self.best_val_f1.is_nan() || !(0.0..=1.0).contains(&self.best_val_f1) {
            return Err("best_val_f1 must be within 0..=1".into());
        }
        if let Some(epoch) = self.best_epoch {
            if epoch >= self.epochs {
                return Err("best_epoch must be below epochs".into());
            }
        }
        Ok(())
    }
}
