//! Bounding box to segmentation map conversion.
//!
//! A cell `(x, y)` of an `S x S` grid belongs to a box when the cell centre
//! `((x + 0.5) / S, (y + 0.5) / S)` lies inside the box, bounds inclusive. A box too
//! small to cover any cell centre claims the single cell holding its centroid, so
//! tiny objects still produce a target. Later boxes overwrite earlier ones.

use crate::types::{
    DatasetError, DatasetResult, DetectionSample, LabeledBox, SampleShape, SegmentationSample,
};
use rayon::prelude::*;

/// Returns the class id of every cell in row-major order (`y * grid + x`); background is 0.
pub fn rasterize_boxes(boxes: &[LabeledBox], grid: usize) -> Vec<usize> {
    let mut cells = vec![0usize; grid * grid];
    if grid == 0 {
        return cells;
    }
    let step = 1.0 / grid as f32;
    for b in boxes {
        let [x0, y0, x1, y1] = b.bbox;
        let mut covered = false;
        for y in 0..grid {
            let cy = (y as f32 + 0.5) * step;
            if cy < y0 || cy > y1 {
                continue;
            }
            for x in 0..grid {
                let cx = (x as f32 + 0.5) * step;
                if cx < x0 || cx > x1 {
                    continue;
                }
                cells[y * grid + x] = b.class_id;
                covered = true;
            }
        }
        if !covered {
            let cx = ((x0 + x1) * 0.5 * grid as f32).floor() as isize;
            let cy = ((y0 + y1) * 0.5 * grid as f32).floor() as isize;
            let cx = cx.clamp(0, grid as isize - 1) as usize;
            let cy = cy.clamp(0, grid as isize - 1) as usize;
            cells[cy * grid + cx] = b.class_id;
        }
    }
    cells
}

/// Convert a labeled image into an image + one-hot `[classes, grid, grid]` target.
pub fn to_segmentation(
    sample: &DetectionSample,
    shape: &SampleShape,
) -> DatasetResult<SegmentationSample> {
    let actual = (sample.channels, sample.height, sample.width);
    let expected = (shape.channels, shape.input_size, shape.input_size);
    if actual != expected || sample.image_chw.len() != shape.image_len() {
        return Err(DatasetError::ShapeMismatch {
            frame_id: sample.frame_id,
            expected,
            actual,
        });
    }
    for b in &sample.boxes {
        b.check(shape.classes)
            .map_err(|reason| DatasetError::InvalidBox {
                frame_id: sample.frame_id,
                bbox: b.bbox,
                class_id: b.class_id,
                reason,
            })?;
    }

    let grid = shape.grid_size;
    let cells = rasterize_boxes(&sample.boxes, grid);
    let plane = grid * grid;
    let mut seg_map = vec![0.0f32; shape.seg_len()];
    for (i, class_id) in cells.into_iter().enumerate() {
        seg_map[class_id * plane + i] = 1.0;
    }
    Ok(SegmentationSample {
        frame_id: sample.frame_id,
        image_chw: sample.image_chw.clone(),
        seg_map,
    })
}

/// Transform a whole dataset; order is preserved.
pub fn transform_samples(
    samples: &[DetectionSample],
    shape: SampleShape,
) -> DatasetResult<Vec<SegmentationSample>> {
    samples
        .par_iter()
        .map(|s| to_segmentation(s, &shape))
        .collect()
}

/// Relative frequency of each segmentation class over all cells of `samples`.
///
/// Every class gets at least one pseudo-count so no prior is exactly zero.
pub fn class_priors(samples: &[SegmentationSample], shape: &SampleShape) -> Vec<f32> {
    let plane = shape.grid_size * shape.grid_size;
    let mut counts = vec![1.0f64; shape.classes];
    for sample in samples {
        for (class_id, count) in counts.iter_mut().enumerate() {
            let start = class_id * plane;
            *count += sample.seg_map[start..start + plane]
                .iter()
                .map(|v| *v as f64)
                .sum::<f64>();
        }
    }
    let total: f64 = counts.iter().sum();
    counts.into_iter().map(|c| (c / total) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(bbox: [f32; 4], class_id: usize) -> LabeledBox {
        LabeledBox { bbox, class_id }
    }

    #[test]
    fn box_fills_covered_cells() {
        // 4x4 grid, cell centres at 0.125, 0.375, 0.625, 0.875.
        let cells = rasterize_boxes(&[boxed([0.0, 0.0, 0.5, 0.5], 1)], 4);
        let expected = [
            1, 1, 0, 0, //
            1, 1, 0, 0, //
            0, 0, 0, 0, //
            0, 0, 0, 0,
        ];
        assert_eq!(cells, expected);
    }

    #[test]
    fn tiny_box_marks_centroid_cell() {
        let cells = rasterize_boxes(&[boxed([0.76, 0.51, 0.8, 0.55], 2)], 4);
        let hit: Vec<usize> = cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hit, vec![2 * 4 + 3]);
        assert_eq!(cells[2 * 4 + 3], 2);
    }

    #[test]
    fn later_boxes_overwrite() {
        let cells = rasterize_boxes(
            &[boxed([0.0, 0.0, 1.0, 1.0], 1), boxed([0.5, 0.5, 1.0, 1.0], 2)],
            2,
        );
        assert_eq!(cells, vec![1, 1, 1, 2]);
    }

    #[test]
    fn segmentation_is_one_hot_with_background() {
        let shape = SampleShape {
            channels: 1,
            input_size: 16,
            grid_size: 2,
            classes: 3,
        };
        let sample = DetectionSample {
            frame_id: 7,
            image_chw: vec![0.0; 16 * 16],
            channels: 1,
            width: 16,
            height: 16,
            boxes: vec![boxed([0.0, 0.0, 0.4, 0.4], 2)],
        };
        let seg = to_segmentation(&sample, &shape).unwrap();
        assert_eq!(seg.seg_map.len(), 3 * 4);
        // Cell 0 is class 2; cells 1..4 are background.
        assert_eq!(&seg.seg_map[0..4], &[0.0, 1.0, 1.0, 1.0]);
        assert_eq!(&seg.seg_map[4..8], &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(&seg.seg_map[8..12], &[1.0, 0.0, 0.0, 0.0]);
        for cell in 0..4 {
            let total: f32 = (0..3).map(|c| seg.seg_map[c * 4 + cell]).sum();
            assert_eq!(total, 1.0);
        }
    }

    #[test]
    fn wrong_image_shape_rejected() {
        let shape = SampleShape {
            channels: 3,
            input_size: 16,
            grid_size: 2,
            classes: 2,
        };
        let sample = DetectionSample {
            frame_id: 1,
            image_chw: vec![0.0; 16 * 16],
            channels: 1,
            width: 16,
            height: 16,
            boxes: Vec::new(),
        };
        assert!(matches!(
            to_segmentation(&sample, &shape),
            Err(DatasetError::ShapeMismatch { .. })
        ));
    }

    fn reject_reason(bbox: [f32; 4], class_id: usize) -> &'static str {
        let shape = SampleShape {
            channels: 1,
            input_size: 16,
            grid_size: 2,
            classes: 2,
        };
        let sample = DetectionSample {
            frame_id: 3,
            image_chw: vec![0.0; 16 * 16],
            channels: 1,
            width: 16,
            height: 16,
            boxes: vec![boxed([0.0, 0.0, 0.5, 0.5], 1), boxed(bbox, class_id)],
        };
        match to_segmentation(&sample, &shape) {
            Err(DatasetError::InvalidBox {
                frame_id, reason, ..
            }) => {
                assert_eq!(frame_id, 3);
                reason
            }
            other => panic!("expected InvalidBox, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_corner_rejected() {
        assert_eq!(
            reject_reason([f32::NAN, 0.0, 0.1, 0.1], 1),
            "non-finite corner"
        );
        assert_eq!(
            reject_reason([0.0, 0.0, f32::INFINITY, 0.1], 1),
            "non-finite corner"
        );
    }

    #[test]
    fn out_of_range_corner_rejected() {
        assert_eq!(
            reject_reason([-0.1, 0.0, 0.5, 0.5], 1),
            "corner outside [0, 1]"
        );
        assert_eq!(
            reject_reason([0.0, 0.0, 0.5, 1.2], 1),
            "corner outside [0, 1]"
        );
    }

    #[test]
    fn inverted_box_rejected() {
        assert_eq!(reject_reason([0.9, 0.9, 0.1, 0.1], 1), "inverted box");
        assert_eq!(reject_reason([0.1, 0.6, 0.2, 0.5], 1), "inverted box");
    }

    #[test]
    fn background_and_unknown_classes_rejected() {
        assert_eq!(
            reject_reason([0.0, 0.0, 1.0, 1.0], 0),
            "class 0 is background"
        );
        assert_eq!(
            reject_reason([0.0, 0.0, 1.0, 1.0], 2),
            "class outside segmentation classes"
        );
    }

    #[test]
    fn degenerate_point_box_is_valid() {
        assert_eq!(boxed([0.3, 0.3, 0.3, 0.3], 1).check(2), Ok(()));
    }

    #[test]
    fn priors_sum_to_one_and_favour_background() {
        let shape = SampleShape {
            channels: 1,
            input_size: 8,
            grid_size: 2,
            classes: 2,
        };
        let seg = SegmentationSample {
            frame_id: 0,
            image_chw: vec![0.0; 64],
            seg_map: vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        };
        let priors = class_priors(&[seg], &shape);
        assert!((priors.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(priors[0] > priors[1]);
    }
}
