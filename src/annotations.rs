//! Ingestion of annotation archives.
//!
//! Annotators produce `annotation_*.zip` files, each holding a JSON manifest
//! with a `"states"` map (label name to numeric label) and TIFF patches named
//! `<label>...tif`. This module aggregates any number of such archives into
//! one labelled image set.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use image::DynamicImage;
use log::{debug, warn};
use serde::Deserialize;
use zip::ZipArchive;

/// Aggregated annotation data. `images` and `labels` always have the same
/// length; `states` maps label names to the numeric labels used in `labels`.
#[derive(Debug)]
pub struct Annotations {
    pub images: Vec<DynamicImage>,
    pub labels: Vec<i64>,
    pub states: BTreeMap<String, i64>,
}

#[derive(Deserialize)]
struct AnnotationManifest {
    states: BTreeMap<String, i64>,
}

/// Read every `annotation_*.zip` archive in a directory.
///
/// Patches whose filename stem ends in `flagged` are skipped unless
/// `use_flagged` is set.
pub fn read_annotations(path: impl AsRef<Path>, use_flagged: bool) -> Result<Annotations> {
    let path = path.as_ref();
    let pattern = path.join("annotation_*.zip");
    let mut files = glob::glob(pattern.to_str().context("non-UTF-8 annotation path")?)?
        .collect::<Result<Vec<_>, _>>()?;
    files.sort();
    read_annotation_files(&files, use_flagged)
}

/// Read an explicit list of annotation archives. Missing or mis-named
/// archives are logged and skipped; incompatible state maps are an error.
pub fn read_annotation_files(files: &[PathBuf], use_flagged: bool) -> Result<Annotations> {
    ensure!(!files.is_empty(), "no annotation zip files found");

    let mut images = vec![];
    let mut labels = vec![];
    let mut states = BTreeMap::new();

    for file in files {
        if !file.is_file() {
            warn!("no such annotation file: '{}'", file.display());
            continue;
        }
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !name.starts_with("annotation_") || !name.ends_with(".zip") {
            warn!("archive name in incorrect format: '{name}'");
            continue;
        }
        read_archive(file, use_flagged, &mut states, &mut images, &mut labels)?;
    }

    ensure!(images.len() == labels.len(), "number of labels and images are different");
    Ok(Annotations { images, labels, states })
}

fn read_archive(
    file: &Path,
    use_flagged: bool,
    states: &mut BTreeMap<String, i64>,
    images: &mut Vec<DynamicImage>,
    labels: &mut Vec<i64>,
) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(file).with_context(|| format!("opening '{}'", file.display()))?)?;
    let names: Vec<String> = archive.file_names().map(String::from).collect();

    let manifest_name = names
        .iter()
        .find(|n| n.ends_with(".json"))
        .with_context(|| format!("no JSON manifest in '{}'", file.display()))?
        .clone();
    let manifest: AnnotationManifest = {
        let entry = archive.by_name(&manifest_name)?;
        serde_json::from_reader(entry).with_context(|| format!("parsing '{}' in '{}'", manifest_name, file.display()))?
    };

    // the first archive defines the canonical state labels
    if states.is_empty() {
        *states = manifest.states;
    } else if *states != manifest.states {
        bail!("annotation files are incompatible: '{}' defines different states", file.display());
    }

    let mut patches = 0;
    for (label, &numeric) in states.iter() {
        for name in &names {
            if !name.ends_with(".tif") || !name.starts_with(label.as_str()) {
                continue;
            }
            if !use_flagged && is_flagged(name) {
                continue;
            }
            let mut bytes = vec![];
            archive.by_name(name)?.read_to_end(&mut bytes)?;
            let image = image::load_from_memory(&bytes)
                .with_context(|| format!("decoding '{}' in '{}'", name, file.display()))?;
            images.push(image);
            labels.push(numeric);
            patches += 1;
        }
    }
    debug!("read {} patches from '{}'", patches, file.display());
    Ok(())
}

fn is_flagged(name: &str) -> bool {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.ends_with("flagged"))
}
