//! Per-epoch monitoring hooks.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use models::ConstrainedDetector;
use serde::Serialize;

use crate::error::TrainError;
use crate::metrics::CentroidScore;
use crate::ADBackend;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochSummary {
    /// Zero-based.
    pub epoch: usize,
    pub epochs: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub val: CentroidScore,
}

impl EpochSummary {
    pub fn val_f1(&self) -> f32 {
        self.val.f1()
    }
}

pub trait EpochCallback {
    fn on_epoch_end(
        &mut self,
        summary: &EpochSummary,
        model: &ConstrainedDetector<ADBackend>,
    ) -> Result<(), TrainError>;
}

/// Logs loss, validation scores and overall progress.
#[derive(Debug, Default)]
pub struct ProgressLogger;

impl EpochCallback for ProgressLogger {
    fn on_epoch_end(
        &mut self,
        s: &EpochSummary,
        _model: &ConstrainedDetector<ADBackend>,
    ) -> Result<(), TrainError> {
        let progress = 100.0 * (s.epoch + 1) as f32 / s.epochs.max(1) as f32;
        tracing::info!(
            epoch = s.epoch + 1,
            epochs = s.epochs,
            progress = format!("{progress:.0}%"),
            train_loss = s.train_loss,
            val_loss = s.val_loss,
            precision = s.val.precision(),
            recall = s.val.recall(),
            f1 = s.val.f1(),
            "epoch finished"
        );
        Ok(())
    }
}

/// Writes the model whenever validation F1 strictly improves.
#[derive(Debug)]
pub struct BestCheckpoint {
    path: PathBuf,
    best_f1: Option<f32>,
    best_epoch: Option<usize>,
}

impl BestCheckpoint {
    /// The recorder always writes `.bin`; the stored path reflects that.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().with_extension("bin"),
            best_f1: None,
            best_epoch: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn best_f1(&self) -> Option<f32> {
        self.best_f1
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    fn improves(&self, f1: f32) -> bool {
        match self.best_f1 {
            None => !f1.is_nan(),
            Some(best) => f1 > best,
        }
    }
}

impl EpochCallback for BestCheckpoint {
    fn on_epoch_end(
        &mut self,
        s: &EpochSummary,
        model: &ConstrainedDetector<ADBackend>,
    ) -> Result<(), TrainError> {
        let f1 = s.val_f1();
        if !self.improves(f1) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TrainError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(self.path.clone(), &recorder)
            .map_err(|e| TrainError::Checkpoint {
                path: self.path.clone(),
                msg: e.to_string(),
            })?;
        tracing::info!(
            epoch = s.epoch + 1,
            f1,
            previous = ?self.best_f1,
            path = %self.path.display(),
            "saved best checkpoint"
        );
        self.best_f1 = Some(f1);
        self.best_epoch = Some(s.epoch);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MetricsHistory {
    pub epochs: Vec<EpochSummary>,
}

impl EpochCallback for MetricsHistory {
    fn on_epoch_end(
        &mut self,
        s: &EpochSummary,
        _model: &ConstrainedDetector<ADBackend>,
    ) -> Result<(), TrainError> {
        self.epochs.push(*s);
        Ok(())
    }
}
