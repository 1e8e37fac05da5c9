mod support;

use image::GrayImage;
use segmask::{error::ErrorKind, features::BandCube};
use serde_json::json;
use support::project::{ProjectHarness, ProjectOptions};

const REGION: usize = 16;

/// 32×32 scene, dark on the left half and bright on the right.
fn scene(dir: &std::path::Path) -> BandCube {
    let image = GrayImage::from_fn(32, 32, |x, _| image::Luma([if x < 16 { 30 } else { 220 }]));
    let path = dir.join("scene.png");
    image.save(&path).expect("write scene");
    BandCube::open(&path).expect("open scene")
}

/// Two labelled columns on each side of the region.
fn request(labels: (u8, u8)) -> Vec<u8> {
    let mut pixels = Vec::new();
    let mut classes = Vec::new();
    for row in 0..REGION {
        for col in [0, 1] {
            pixels.push(row * REGION + col);
            classes.push(labels.0);
        }
        for col in [REGION - 2, REGION - 1] {
            pixels.push(row * REGION + col);
            classes.push(labels.1);
        }
    }
    serde_json::to_vec(&json!({ "user_pixels": pixels, "user_labels": classes })).unwrap()
}

fn harness(ai_model: &str) -> ProjectHarness {
    ProjectHarness::new(ProjectOptions {
        mask_area: [8, 8, 24, 24],
        ai_model,
        ..ProjectOptions::default()
    })
}

#[test]
fn prediction_separates_the_two_halves() {
    let harness = harness("");
    let cube = scene(harness.dir.path());
    let labels = harness
        .service
        .predict_mask("scene", "alice", &cube, &request((1, 2)))
        .expect("predict");
    assert_eq!(labels.len(), REGION * REGION);
    for row in 0..REGION {
        assert_eq!(labels[row * REGION + 3], 1, "row {row} left");
        assert_eq!(labels[row * REGION + 12], 2, "row {row} right");
    }
}

#[test]
fn pixelwise_coordinates_are_accepted() {
    let harness = harness("use_meshgrid = true\nmeshgrid_cells = \"pixelwise\"\nuse_superpixels = true");
    let cube = scene(harness.dir.path());
    let labels = harness
        .service
        .predict_mask("scene", "alice", &cube, &request((0, 2)))
        .expect("predict");
    assert_eq!(labels.len(), REGION * REGION);
    assert_eq!(labels[5 * REGION + 2], 0);
    assert_eq!(labels[5 * REGION + 13], 2);
}

#[test]
fn single_label_requests_are_rejected() {
    let harness = harness("");
    let cube = scene(harness.dir.path());
    let err = harness
        .service
        .predict_mask("scene", "alice", &cube, &request((1, 1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn malformed_json_is_a_validation_error() {
    let harness = harness("");
    let cube = scene(harness.dir.path());
    let err = harness
        .service
        .predict_mask("scene", "alice", &cube, br#"{"user_pixels": [0]}"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn unknown_band_is_a_configuration_error() {
    let harness = harness("bands = [\"nir\"]");
    let cube = scene(harness.dir.path());
    let err = harness
        .service
        .predict_mask("scene", "alice", &cube, &request((1, 2)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn suppression_collapses_isolated_predictions() {
    let harness = harness("suppression_threshold = 100.0\nsuppression_filter_size = 3");
    let cube = scene(harness.dir.path());
    let labels = harness
        .service
        .predict_mask("scene", "alice", &cube, &request((1, 2)))
        .expect("predict");
    // With a 100% threshold only pixels whose every neighbour is non-default survive,
    // and no pixel has non-default support from out-of-bounds padding.
    for col in 0..REGION {
        assert_eq!(labels[col], 0, "top border column {col}");
    }
    assert_eq!(labels[5 * REGION + 5], 1);
}
