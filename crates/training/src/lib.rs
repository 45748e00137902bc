#![recursion_limit = "256"]

pub mod callbacks;
pub mod config;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod strategy;
pub mod trainer;
pub mod util;
pub mod weights;

pub use callbacks::{BestCheckpoint, EpochCallback, EpochSummary, MetricsHistory, ProgressLogger};
pub use config::PathConfig;
pub use error::TrainError;
pub use loss::WeightedCrossEntropy;
pub use metrics::{score_cells, CentroidScore, Evaluation};
pub use strategy::{Strategy, TrainData};
pub use trainer::{
    evaluate, load_detector_checkpoint, logits_bias_from_priors, train, TrainOutcome, TrainParams,
};
pub use util::{run_eval, run_train, EvalArgs, TrainArgs};
pub use weights::{HttpFetcher, WeightFetcher, WeightsError};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
