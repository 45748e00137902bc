#![recursion_limit = "256"]

pub mod centroids;
pub mod factory;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use centroids::{centroids_from_probs, Centroid};
pub use factory::{CentroidDetector, InferenceError, InferenceFactory, InferenceThresholds};

pub mod prelude {
    pub use crate::centroids::Centroid;
    pub use crate::factory::{CentroidDetector, InferenceFactory, InferenceThresholds};
    pub use crate::InferenceBackend;
}
