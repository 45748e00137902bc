use data_contracts::label::{BoxLabel, SampleLabel, ValidationError};
use data_contracts::manifest::{TrainManifest, TrainManifestSchemaVersion};

fn sample(boxes: Vec<BoxLabel>) -> SampleLabel {
    SampleLabel {
        frame_id: 0,
        image: "images/frame.png".into(),
        boxes,
    }
}

#[test]
fn inverted_bbox_norm_rejected() {
    let meta = sample(vec![BoxLabel {
        bbox_norm: [0.8, 0.2, 0.1, 0.9],
        one_hot: vec![1.0],
    }]);
    let err = meta.validate(1).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidBboxNorm(_)));
}

#[test]
fn one_hot_length_must_match_classes() {
    let meta = sample(vec![BoxLabel {
        bbox_norm: [0.1, 0.1, 0.2, 0.2],
        one_hot: vec![0.0, 1.0],
    }]);
    assert_eq!(
        meta.validate(3).unwrap_err(),
        ValidationError::OneHotLength {
            expected: 3,
            actual: 2
        }
    );
}

#[test]
fn multi_hot_rejected() {
    let meta = sample(vec![BoxLabel {
        bbox_norm: [0.1, 0.1, 0.2, 0.2],
        one_hot: vec![1.0, 1.0],
    }]);
    assert!(matches!(
        meta.validate(2).unwrap_err(),
        ValidationError::OneHotNotHot(_)
    ));
}

#[test]
fn valid_label_passes() {
    let meta = sample(vec![BoxLabel {
        bbox_norm: [0.1, 0.1, 0.2, 0.2],
        one_hot: vec![0.0, 1.0],
    }]);
    assert!(meta.validate(2).is_ok());
}

#[test]
fn manifest_rejects_best_epoch_out_of_range() {
    let manifest = TrainManifest {
        schema_version: TrainManifestSchemaVersion::V1,
        checkpoint: "checkpoints/best.bin".into(),
        num_classes: 1,
        input_size: 96,
        input_channels: 1,
        alpha: 0.35,
        object_weight: 100.0,
        strategy: "standard".into(),
        epochs: 2,
        best_epoch: Some(2),
        best_val_f1: 0.5,
        pretrained_weights: None,
        seed: None,
    };
    assert!(manifest.validate().is_err());
}
