use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};
use segmask::{
    config::{AiModelSettings, GridCells},
    features::{BandCube, FeatureToggles, build_features},
    segmentation::{ClassificationRequest, OnlineClassifier},
};

const SIDE: usize = 128;

/// Three noisy bands over a scene split into a left and a right half.
fn synthetic_cube(rng: &mut StdRng) -> BandCube {
    let bands = ["red", "green", "nir"]
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let band = Array2::from_shape_fn((SIDE, SIDE), |(_, x)| {
                let base = if x < SIDE / 2 { 0.2 } else { 0.7 };
                base + idx as f32 * 0.05 + rng.random_range(-0.1..0.1)
            });
            (name.to_string(), band)
        })
        .collect();
    BandCube::from_bands(bands).expect("synthetic cube")
}

fn sparse_request(rng: &mut StdRng) -> ClassificationRequest {
    let mut request = ClassificationRequest::default();
    for _ in 0..400 {
        let row = rng.random_range(0..SIDE);
        let col = rng.random_range(0..SIDE);
        request.user_pixels.push(row * SIDE + col);
        request.user_labels.push(if col < SIDE / 2 { 1 } else { 2 });
    }
    request
}

fn bench_features(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let cube = synthetic_cube(&mut rng);
    let mut group = c.benchmark_group("features");
    let variants = [
        ("bands_edges", FeatureToggles { edges: true, spatial: None, superpixels: false }),
        (
            "grid",
            FeatureToggles {
                edges: true,
                spatial: Some(GridCells::Cells { rows: 3, cols: 3 }),
                superpixels: false,
            },
        ),
        ("superpixels", FeatureToggles { edges: false, spatial: None, superpixels: true }),
    ];
    for (name, toggles) in variants {
        group.bench_with_input(BenchmarkId::new(name, SIDE), &toggles, |b, toggles| {
            b.iter(|| build_features(black_box(&cube), *toggles));
        });
    }
    group.finish();
}

fn bench_fit_predict(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let cube = synthetic_cube(&mut rng);
    let request = sparse_request(&mut rng);
    let settings = AiModelSettings::default();
    let features = build_features(&cube, FeatureToggles::from_settings(&settings));
    let classifier = OnlineClassifier::from_settings(&settings);
    c.bench_function("fit_predict", |b| {
        b.iter(|| {
            classifier
                .fit_predict(black_box(&features), black_box(&request))
                .expect("fit_predict")
        });
    });
}

criterion_group!(benches, bench_features, bench_fit_predict);
criterion_main!(benches);
