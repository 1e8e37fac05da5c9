mod support;

use std::io::Cursor;

use ndarray::Array3;
use segmask::{
    error::ErrorKind,
    geo::{
        Affine, AlignedFormat, Crs, GeoReference,
        geotiff::{read_georeference, write_geotiff},
    },
};
use support::project::{ProjectHarness, ProjectOptions, save_buffer};

#[rustfmt::skip]
const MASK: [u8; 16] = [
    0, 0, 1, 1,
    0, 2, 1, 1,
    2, 2, 1, 1,
    2, 2, 2, 0,
];

fn saved_project() -> ProjectHarness {
    let harness = ProjectHarness::new(ProjectOptions {
        mask_area: [2, 2, 6, 6],
        ..ProjectOptions::default()
    });
    harness
        .service
        .save_mask("tile", "alice", &save_buffer(&MASK, &[1; 16]))
        .expect("save");
    harness
}

fn wgs84() -> Crs {
    Crs {
        geo_keys: vec![1, 1, 0, 1, 2048, 0, 1, 4326],
        double_params: Vec::new(),
        ascii_params: None,
    }
}

#[test]
fn geotiff_sources_get_a_georeferenced_mask() {
    let harness = saved_project();
    let source = harness.dir.path().join("tile.tif");
    let georef = GeoReference {
        transform: Affine::new(0.5, 0.0, 13.0, 0.0, -0.5, 52.0),
        crs: Some(wgs84()),
    };
    std::fs::write(&source, write_geotiff(&Array3::zeros((8, 8, 1)), &georef).unwrap()).unwrap();

    let download = harness
        .service
        .download_final_mask("tile", "alice", &source)
        .expect("export");
    assert_eq!(download.file_name, "tile_alice_mask.tif");
    assert_eq!(download.mask.format, AlignedFormat::GeoTiff);

    let exported = read_georeference(Cursor::new(&download.mask.bytes))
        .unwrap()
        .expect("georeference");
    assert_eq!(exported.transform, Affine::new(0.5, 0.0, 14.0, 0.0, -0.5, 51.0));
    assert_eq!(exported.crs.expect("crs").epsg(), Some(4326));
}

#[test]
fn plain_images_get_the_mask_as_npy() {
    let harness = saved_project();
    let download = harness
        .service
        .download_final_mask("tile", "alice", &harness.dir.path().join("tile.jpg"))
        .expect("export");
    assert_eq!(download.file_name, "tile_alice_mask.jpg");
    assert_eq!(download.mask.format, AlignedFormat::Npy);
    let layers: Array3<bool> =
        ndarray_npy::ReadNpyExt::read_npy(Cursor::new(download.mask.bytes)).unwrap();
    assert_eq!(layers.dim(), (4, 4, 3));
    assert!(layers[[1, 1, 2]]);
}

#[test]
fn unknown_formats_degrade_to_the_stored_file() {
    let harness = saved_project();
    let download = harness
        .service
        .download_final_mask("tile", "alice", &harness.dir.path().join("tile.jp2"))
        .expect("export");
    assert_eq!(download.mask.format, AlignedFormat::Raw);
    assert_eq!(
        download.mask.format.degradation(),
        Some(ErrorKind::UnsupportedFormat)
    );
    let stored_path = harness
        .service
        .store()
        .final_mask_path("tile", "alice")
        .unwrap();
    assert_eq!(download.mask.bytes, std::fs::read(stored_path).unwrap());
}

#[test]
fn exporting_a_missing_mask_is_not_found() {
    let harness = saved_project();
    let err = harness
        .service
        .download_final_mask("tile", "bob", &harness.dir.path().join("tile.tif"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
