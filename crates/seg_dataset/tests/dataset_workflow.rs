//! End-to-end dataset workflow: disk → samples → segmentation maps → batches.

use burn_ndarray::NdArray;
use data_contracts::{BoxLabel, SampleLabel};
use image::{Rgb, RgbImage};
use seg_dataset::{
    class_priors, transform_samples, BatchConfig, BatchIter, DatasetPathConfig, HostBatch,
    PrefetchPolicy, SampleShape,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Write `frames` labeled 16x16 images, alternating between class 0 and class 1 boxes.
fn create_synthetic_dataset(root: &Path, frames: usize) -> anyhow::Result<()> {
    let labels_dir = root.join("labels");
    fs::create_dir_all(&labels_dir)?;
    for i in 0..frames {
        let image = format!("frame_{i:05}.png");
        let mut one_hot = vec![0.0, 0.0];
        one_hot[i % 2] = 1.0;
        let label = SampleLabel {
            frame_id: i as u64,
            image: image.clone(),
            boxes: vec![BoxLabel {
                bbox_norm: [0.0, 0.0, 0.5, 0.5],
                one_hot,
            }],
        };
        fs::write(
            labels_dir.join(format!("frame_{i:05}.json")),
            serde_json::to_vec(&label)?,
        )?;
        let img = RgbImage::from_fn(16, 16, |x, _y| Rgb([(x * 10 + i as u32) as u8, 64, 128]));
        img.save(root.join(&image))?;
    }
    Ok(())
}

fn shape() -> SampleShape {
    SampleShape {
        channels: 1,
        input_size: 16,
        grid_size: 2,
        classes: 3,
    }
}

#[test]
fn load_and_transform_grayscale() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), 4)?;

    let samples = DatasetPathConfig::new(tmp.path()).load(16, 1, 2)?;
    assert_eq!(samples.len(), 4);
    assert!(samples.iter().all(|s| s.image_chw.len() == 16 * 16));
    assert_eq!(samples[1].boxes[0].class_id, 2);

    let seg = transform_samples(&samples, shape())?;
    // Box covers the top-left cell only; frame 0 is class 1.
    assert_eq!(seg[0].seg_map, vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    let priors = class_priors(&seg, &shape());
    assert_eq!(priors.len(), 3);
    assert!(priors[0] > priors[1]);
    Ok(())
}

#[test]
fn invalid_label_reports_path() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), 1)?;
    // Three classes expected, labels carry two.
    let err = DatasetPathConfig::new(tmp.path()).load(16, 1, 3).unwrap_err();
    assert!(err.to_string().contains("frame_00000.json"));
    Ok(())
}

#[test]
fn deterministic_runs_yield_identical_batches() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), 7)?;
    let samples = DatasetPathConfig::new(tmp.path()).load(16, 1, 2)?;
    let seg = Arc::new(transform_samples(&samples, shape())?);

    let cfg = BatchConfig {
        batch_size: 3,
        shuffle: true,
        seed: None,
        deterministic: true,
        drop_last: false,
        prefetch: PrefetchPolicy::Autotune,
    };
    let run = |cfg: &BatchConfig| -> anyhow::Result<Vec<HostBatch>> {
        let iter = BatchIter::new(seg.clone(), shape(), cfg)?;
        assert_eq!(iter.prefetch_depth(), 1);
        Ok(iter.collect())
    };
    let first = run(&cfg)?;
    let second = run(&cfg)?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first[2].len, 1);
    let ids: Vec<u64> = first.iter().flat_map(|b| b.frame_ids.clone()).collect();
    assert_eq!(ids, (0..7).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn seeded_shuffle_is_reproducible_and_drop_last_applies() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), 5)?;
    let samples = DatasetPathConfig::new(tmp.path()).load(16, 1, 2)?;
    let seg = Arc::new(transform_samples(&samples, shape())?);

    let cfg = BatchConfig {
        batch_size: 2,
        seed: Some(11),
        drop_last: true,
        ..Default::default()
    };
    let a: Vec<HostBatch> = BatchIter::new(seg.clone(), shape(), &cfg)?.collect();
    let b: Vec<HostBatch> = BatchIter::new(seg.clone(), shape(), &cfg)?.collect();
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    Ok(())
}

#[test]
fn batches_upload_with_nchw_shapes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), 2)?;
    let samples = DatasetPathConfig::new(tmp.path()).load(16, 1, 2)?;
    let seg = Arc::new(transform_samples(&samples, shape())?);
    let mut iter = BatchIter::new(
        seg,
        shape(),
        &BatchConfig {
            batch_size: 2,
            ..Default::default()
        },
    )?;
    let device = Default::default();
    let batch = iter
        .next_batch::<NdArray<f32>>(&device)
        .expect("one batch available");
    assert_eq!(batch.images.dims(), [2, 1, 16, 16]);
    assert_eq!(batch.targets.dims(), [2, 3, 2, 2]);
    assert!(iter.next_batch::<NdArray<f32>>(&device).is_none());
    Ok(())
}

#[test]
fn dropping_iterator_early_does_not_hang() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), 6)?;
    let samples = DatasetPathConfig::new(tmp.path()).load(16, 1, 2)?;
    let seg = Arc::new(transform_samples(&samples, shape())?);
    let mut iter = BatchIter::new(
        seg,
        shape(),
        &BatchConfig {
            batch_size: 1,
            deterministic: true,
            ..Default::default()
        },
    )?;
    assert!(iter.next_host().is_some());
    drop(iter);
    Ok(())
}
