//! Per-cell centroid extraction from softmax output.

use serde::Serialize;

/// One detected object centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Centroid {
    /// Object class index, matching the position in the label one-hot vector.
    pub class: usize,
    pub score: f32,
    /// Normalized cell centre in [0, 1].
    pub x: f32,
    pub y: f32,
}

/// Centroids of one sample's `[classes, grid, grid]` probabilities.
///
/// A cell yields a centroid when its most likely class is not background and that
/// probability reaches `min_score`. Results are in row-major cell order.
pub fn centroids_from_probs(
    probs: &[f32],
    classes: usize,
    grid: usize,
    min_score: f32,
) -> Vec<Centroid> {
    let plane = grid * grid;
    if classes < 2 || probs.len() < classes * plane {
        return Vec::new();
    }
    let mut out = Vec::new();
    for cell in 0..plane {
        let (best, score) = (0..classes)
            .map(|c| (c, probs[c * plane + cell]))
            .fold((0, f32::NEG_INFINITY), |acc, cur| {
                if cur.1 > acc.1 {
                    cur
                } else {
                    acc
                }
            });
        if best == 0 || score < min_score {
            continue;
        }
        let (gx, gy) = (cell % grid, cell / grid);
        out.push(Centroid {
            class: best - 1,
            score,
            x: (gx as f32 + 0.5) / grid as f32,
            y: (gy as f32 + 0.5) / grid as f32,
        });
    }
    out
}
