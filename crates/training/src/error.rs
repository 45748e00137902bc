use models::ModelError;
use seg_dataset::DatasetError;
use std::path::PathBuf;
use thiserror::Error;

use crate::weights::WeightsError;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Weights(#[from] WeightsError),
    #[error(
        "ran out of memory while training with batch size {batch_size} ({detail}); \
         try again with a smaller batch size"
    )]
    ResourceExhausted { batch_size: usize, detail: String },
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("checkpoint error at {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid training configuration: {0}")]
    Config(String),
}
