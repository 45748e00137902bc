//! Batch iteration for training and validation.
//!
//! Batches are assembled on a background prefetch thread and handed over through a
//! bounded channel. Deterministic mode disables shuffling and pins the prefetch depth
//! to one batch so two runs over the same data yield identical batch sequences.

use crate::types::{DatasetError, DatasetResult, SampleShape, SegmentationSample};
use burn::tensor::{backend::Backend, Tensor};
use crossbeam_channel::{bounded, Receiver};
use rand::{seq::SliceRandom, SeedableRng};
use std::sync::Arc;
use std::thread::JoinHandle;

/// How many assembled batches may wait in the prefetch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchPolicy {
    Fixed(usize),
    /// Scale with available parallelism.
    Autotune,
}

impl PrefetchPolicy {
    pub fn depth(&self) -> usize {
        match self {
            PrefetchPolicy::Fixed(n) => (*n).max(1),
            PrefetchPolicy::Autotune => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Shuffle sample order per epoch (ignored when `deterministic`).
    pub shuffle: bool,
    /// Seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// No shuffling, prefetch depth 1.
    pub deterministic: bool,
    /// Drop the last partial batch.
    pub drop_last: bool,
    pub prefetch: PrefetchPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            seed: None,
            deterministic: false,
            drop_last: false,
            prefetch: PrefetchPolicy::Autotune,
        }
    }
}

impl BatchConfig {
    /// Same batching, but never shuffled and never dropping samples.
    pub fn validation(&self) -> Self {
        Self {
            shuffle: false,
            drop_last: false,
            ..self.clone()
        }
    }

    /// Mix the epoch into the seed so each epoch sees a different (but reproducible) order.
    pub fn for_epoch(&self, epoch: usize) -> Self {
        Self {
            seed: self
                .seed
                .map(|s| s ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            ..self.clone()
        }
    }

    pub fn effective_shuffle(&self) -> bool {
        self.shuffle && !self.deterministic
    }

    pub fn effective_prefetch(&self) -> PrefetchPolicy {
        if self.deterministic {
            PrefetchPolicy::Fixed(1)
        } else {
            self.prefetch
        }
    }
}

/// Host-side batch buffers (CHW images and one-hot targets), ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBatch {
    pub frame_ids: Vec<u64>,
    pub images: Vec<f32>,
    pub targets: Vec<f32>,
    pub len: usize,
    pub shape: SampleShape,
}

pub struct SegBatch<B: Backend> {
    /// `[batch, channels, input, input]`
    pub images: Tensor<B, 4>,
    /// `[batch, classes, grid, grid]` one-hot.
    pub targets: Tensor<B, 4>,
}

impl HostBatch {
    pub fn to_device<B: Backend>(&self, device: &B::Device) -> SegBatch<B> {
        let s = self.shape;
        let images = Tensor::<B, 1>::from_floats(self.images.as_slice(), device).reshape([
            self.len,
            s.channels,
            s.input_size,
            s.input_size,
        ]);
        let targets = Tensor::<B, 1>::from_floats(self.targets.as_slice(), device).reshape([
            self.len,
            s.classes,
            s.grid_size,
            s.grid_size,
        ]);
        SegBatch { images, targets }
    }
}

pub struct BatchIter {
    rx: Option<Receiver<HostBatch>>,
    worker: Option<JoinHandle<()>>,
    prefetch_depth: usize,
    num_batches: usize,
}

impl BatchIter {
    pub fn new(
        samples: Arc<Vec<SegmentationSample>>,
        shape: SampleShape,
        cfg: &BatchConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::Other("batch_size must be at least 1".into()));
        }
        if let Some(bad) = samples.iter().find(|s| {
            s.image_chw.len() != shape.image_len() || s.seg_map.len() != shape.seg_len()
        }) {
            return Err(DatasetError::Other(format!(
                "sample {} does not match batch shape {:?}",
                bad.frame_id, shape
            )));
        }

        let mut order: Vec<usize> = (0..samples.len()).collect();
        if cfg.effective_shuffle() {
            let mut rng = match cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        let chunks: Vec<Vec<usize>> = order
            .chunks(cfg.batch_size)
            .filter(|c| !cfg.drop_last || c.len() == cfg.batch_size)
            .map(|c| c.to_vec())
            .collect();
        let num_batches = chunks.len();

        let prefetch_depth = cfg.effective_prefetch().depth();
        let (tx, rx) = bounded(prefetch_depth);
        let worker = std::thread::Builder::new()
            .name("seg-prefetch".into())
            .spawn(move || {
                for chunk in chunks {
                    let batch = assemble(&samples, &chunk, shape);
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| DatasetError::Other(format!("failed to spawn prefetch thread: {e}")))?;

        tracing::debug!(num_batches, prefetch_depth, "batch iterator ready");
        Ok(Self {
            rx: Some(rx),
            worker: Some(worker),
            prefetch_depth,
            num_batches,
        })
    }

    pub fn prefetch_depth(&self) -> usize {
        self.prefetch_depth
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn next_host(&mut self) -> Option<HostBatch> {
        self.rx.as_ref()?.recv().ok()
    }

    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> Option<SegBatch<B>> {
        self.next_host().map(|b| b.to_device(device))
    }
}

impl Iterator for BatchIter {
    type Item = HostBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_host()
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        // Close the channel first so a worker blocked on a full queue can exit.
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn assemble(samples: &[SegmentationSample], chunk: &[usize], shape: SampleShape) -> HostBatch {
    let mut images = Vec::with_capacity(chunk.len() * shape.image_len());
    let mut targets = Vec::with_capacity(chunk.len() * shape.seg_len());
    let mut frame_ids = Vec::with_capacity(chunk.len());
    for &i in chunk {
        let s = &samples[i];
        images.extend_from_slice(&s.image_chw);
        targets.extend_from_slice(&s.seg_map);
        frame_ids.push(s.frame_id);
    }
    HostBatch {
        frame_ids,
        images,
        targets,
        len: chunk.len(),
        shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_overrides_shuffle_and_prefetch() {
        let cfg = BatchConfig {
            shuffle: true,
            deterministic: true,
            prefetch: PrefetchPolicy::Fixed(8),
            ..Default::default()
        };
        assert!(!cfg.effective_shuffle());
        assert_eq!(cfg.effective_prefetch(), PrefetchPolicy::Fixed(1));
    }

    #[test]
    fn epoch_seeds_differ() {
        let cfg = BatchConfig {
            seed: Some(42),
            ..Default::default()
        };
        assert_ne!(cfg.for_epoch(0).seed, cfg.for_epoch(1).seed);
        assert_eq!(cfg.for_epoch(0).seed, Some(42));
    }

    #[test]
    fn fixed_prefetch_never_zero() {
        assert_eq!(PrefetchPolicy::Fixed(0).depth(), 1);
        assert!(PrefetchPolicy::Autotune.depth() >= 1);
    }
}
