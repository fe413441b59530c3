use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use cellscape::annotations::{read_annotation_files, read_annotations};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

#[ctor::ctor]
fn init() {
    cellscape::util::init_logging();
}

fn tif_bytes(seed: u8) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(8, 8, |x, y| {
        Rgb([seed, x as u8 * 16, y as u8 * 16])
    }));
    let mut bytes = Cursor::new(vec![]);
    image.write_to(&mut bytes, ImageOutputFormat::Tiff).unwrap();
    bytes.into_inner()
}

fn write_archive(path: &Path, states_json: &str, patches: &[(&str, u8)]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();

    writer.start_file("annotation.json", options).unwrap();
    writer
        .write_all(format!(r#"{{"states": {states_json}}}"#).as_bytes())
        .unwrap();

    for &(name, seed) in patches {
        writer.start_file(name, options).unwrap();
        writer.write_all(&tif_bytes(seed)).unwrap();
    }
    writer.finish().unwrap();
}

const STATES: &str = r#"{"interphase": 1, "mitotic": 2}"#;

#[test]
fn test_aggregates_archives_in_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(
        &dir.path().join("annotation_gv0800.zip"),
        STATES,
        &[("interphase_001.tif", 10), ("interphase_002.tif", 20), ("mitotic_001.tif", 30)],
    );
    write_archive(
        &dir.path().join("annotation_gv0801.zip"),
        STATES,
        &[("mitotic_002.tif", 40)],
    );

    let annotations = read_annotations(dir.path(), false).unwrap();
    assert_eq!(annotations.images.len(), 4);
    assert_eq!(annotations.labels.len(), 4);
    assert_eq!(annotations.labels.iter().filter(|&&l| l == 1).count(), 2);
    assert_eq!(annotations.labels.iter().filter(|&&l| l == 2).count(), 2);
    assert_eq!(annotations.states["interphase"], 1);
    assert_eq!(annotations.states["mitotic"], 2);
}

#[test]
fn test_flagged_patches_are_skipped_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("annotation_a.zip");
    write_archive(
        &archive,
        STATES,
        &[("interphase_001.tif", 1), ("interphase_002_flagged.tif", 2)],
    );

    let without = read_annotation_files(&[archive.clone()], false).unwrap();
    assert_eq!(without.images.len(), 1);

    let with = read_annotation_files(&[archive], true).unwrap();
    assert_eq!(with.images.len(), 2);
}

#[test]
fn test_incompatible_states_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("annotation_a.zip");
    let second = dir.path().join("annotation_b.zip");
    write_archive(&first, STATES, &[("interphase_001.tif", 1)]);
    write_archive(&second, r#"{"anaphase": 1}"#, &[("anaphase_001.tif", 2)]);

    let err = read_annotation_files(&[first, second], false).unwrap_err();
    assert!(err.to_string().contains("incompatible"), "unexpected error: {err:#}");
}

#[test]
fn test_misnamed_and_missing_archives_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("annotation_a.zip");
    let misnamed = dir.path().join("labels.zip");
    write_archive(&good, STATES, &[("mitotic_001.tif", 1)]);
    write_archive(&misnamed, STATES, &[("mitotic_002.tif", 2)]);

    let files = vec![misnamed, dir.path().join("annotation_missing.zip"), good];
    let annotations = read_annotation_files(&files, false).unwrap();
    assert_eq!(annotations.images.len(), 1);
    assert_eq!(annotations.labels, vec![2]);
}

#[test]
fn test_empty_directory_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_annotations(dir.path(), false).is_err());
}

#[test]
fn test_decoded_patches_keep_their_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("annotation_a.zip");
    write_archive(&archive, STATES, &[("interphase_001.tif", 99)]);

    let annotations = read_annotation_files(&[archive], false).unwrap();
    let image = annotations.images[0].to_rgb8();
    assert_eq!(image.dimensions(), (8, 8));
    assert_eq!(image.get_pixel(0, 0).0[0], 99);
}

#[test]
fn test_explicit_paths_accept_pathbuf_list() {
    let dir = tempfile::tempdir().unwrap();
    let archive: PathBuf = dir.path().join("annotation_a.zip");
    write_archive(&archive, STATES, &[("mitotic_001.tif", 5)]);

    let annotations = read_annotation_files(std::slice::from_ref(&archive), false).unwrap();
    assert_eq!(annotations.labels, vec![2]);
}
