//! Centroid scoring on the output grid.

use std::sync::Arc;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use models::ConstrainedDetector;
use seg_dataset::{BatchConfig, BatchIter, SampleShape, SegmentationSample};
use serde::Serialize;

use crate::error::TrainError;
use crate::loss::WeightedCrossEntropy;

/// Cell-level detection counts; a cell is an object centroid when its argmax class is not background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CentroidScore {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl CentroidScore {
    pub fn merge(&mut self, other: CentroidScore) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }

    pub fn precision(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn recall(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    pub fn f1(&self) -> f32 {
        ratio(
            2 * self.true_positives,
            2 * self.true_positives + self.false_positives + self.false_negatives,
        )
    }
}

fn ratio(num: usize, denom: usize) -> f32 {
    if denom == 0 {
        0.0
    } else {
        num as f32 / denom as f32
    }
}

fn argmax_class(values: &[f32], classes: usize, plane: usize, offset: usize) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for c in 0..classes {
        let v = values[c * plane + offset];
        if v > best_val {
            best_val = v;
            best = c;
        }
    }
    best
}

/// Score predictions (logits or probabilities) against one-hot targets, both `[batch, classes, cells]`.
pub fn score_cells(pred: &[f32], target: &[f32], classes: usize, cells: usize) -> CentroidScore {
    let per_sample = classes * cells;
    let mut score = CentroidScore::default();
    if per_sample == 0 {
        return score;
    }
    for (p, t) in pred
        .chunks_exact(per_sample)
        .zip(target.chunks_exact(per_sample))
    {
        for cell in 0..cells {
            let predicted = argmax_class(p, classes, cells, cell);
            let truth = argmax_class(t, classes, cells, cell);
            match (predicted, truth) {
                (0, 0) => {}
                (p, t) if p == t => score.true_positives += 1,
                (0, _) => score.false_negatives += 1,
                (_, 0) => score.false_positives += 1,
                _ => {
                    score.false_positives += 1;
                    score.false_negatives += 1;
                }
            }
        }
    }
    score
}

/// Mean loss and centroid counts of a model over a dataset split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Evaluation {
    pub loss: f32,
    pub score: CentroidScore,
}

/// Run `model` over `samples` in unshuffled batches and score every output cell.
pub fn evaluate_dataset<B: Backend>(
    model: &ConstrainedDetector<B>,
    samples: Arc<Vec<SegmentationSample>>,
    shape: SampleShape,
    batch: &BatchConfig,
    loss: &WeightedCrossEntropy,
    device: &B::Device,
) -> Result<Evaluation, TrainError> {
    if samples.is_empty() {
        return Ok(Evaluation::default());
    }
    let mut iter = BatchIter::new(samples, shape, &batch.validation())?;
    let cells = shape.grid_size * shape.grid_size;
    let mut eval = Evaluation::default();
    let mut weighted_loss = 0.0f64;
    let mut seen = 0usize;
    while let Some(host) = iter.next_host() {
        let batch = host.to_device::<B>(device);
        let logits = model.forward(batch.images);
        let batch_loss = loss.forward(logits.clone(), batch.targets)?;
        weighted_loss += scalar(batch_loss)? as f64 * host.len as f64;
        seen += host.len;
        let pred = host_values(logits.into_data())?;
        eval.score
            .merge(score_cells(&pred, &host.targets, shape.classes, cells));
    }
    eval.loss = if seen == 0 {
        0.0
    } else {
        (weighted_loss / seen as f64) as f32
    };
    Ok(eval)
}

/// Host copy of tensor data as `f32`.
pub(crate) fn host_values(data: TensorData) -> Result<Vec<f32>, TrainError> {
    data.to_vec::<f32>()
        .map_err(|e| TrainError::Shape(format!("tensor readback failed: {e:?}")))
}

pub(crate) fn scalar<B: Backend>(t: Tensor<B, 1>) -> Result<f32, TrainError> {
    host_values(t.into_data())?
        .first()
        .copied()
        .ok_or_else(|| TrainError::Shape("expected a scalar loss, got an empty tensor".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_type_mismatch_is_an_error() {
        let ints = TensorData::new(vec![1i32, 2], [2]);
        assert!(matches!(host_values(ints), Err(TrainError::Shape(_))));
    }

    #[test]
    fn empty_loss_is_not_read_as_zero() {
        let device = Default::default();
        let empty = Tensor::<burn_ndarray::NdArray<f32>, 1>::from_floats([0.0f32; 0], &device);
        assert!(matches!(scalar(empty), Err(TrainError::Shape(_))));
        let one = Tensor::<burn_ndarray::NdArray<f32>, 1>::from_floats([2.5f32], &device);
        assert_eq!(scalar(one).unwrap(), 2.5);
    }

    #[test]
    fn empty_score_has_zero_f1() {
        assert_eq!(CentroidScore::default().f1(), 0.0);
    }

    #[test]
    fn counts_hits_misses_and_confusions() {
        // 2 classes + background, 4 cells, one sample. Layout [class][cell].
        let target = [
            1.0, 0.0, 0.0, 0.0, // background
            0.0, 1.0, 1.0, 0.0, // class 1
            0.0, 0.0, 0.0, 1.0, // class 2
        ];
        let pred = [
            0.1, 0.2, 0.9, 0.1, // background
            0.8, 0.7, 0.05, 0.6, // class 1
            0.1, 0.1, 0.05, 0.3, // class 2
        ];
        let score = score_cells(&pred, &target, 3, 4);
        // cell0: fp, cell1: tp, cell2: fn, cell3: class confusion (fp + fn)
        assert_eq!(
            score,
            CentroidScore {
                true_positives: 1,
                false_positives: 2,
                false_negatives: 2,
            }
        );
        assert!((score.f1() - 2.0 / 6.0).abs() < 1e-6);
        assert!((score.precision() - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn perfect_prediction_scores_one() {
        let target = [0.0, 1.0, 1.0, 0.0];
        let score = score_cells(&target, &target, 2, 2);
        assert_eq!(score.f1(), 1.0);
        assert_eq!(score.recall(), 1.0);
    }
}
