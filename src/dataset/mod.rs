//! TFRecord serialization of image datasets for model training.
//!
//! Images are stored one `Example` per record with their dimensions alongside
//! the raw pixel bytes, plus an optional numeric label.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use log::info;
use ndarray::{Array3, ArrayView3};
use prost::Message;

pub mod proto;
mod record;

pub use proto::{Example, Feature, Features};

const FEATURE_IMAGE: &str = "train/image";
const FEATURE_HEIGHT: &str = "train/height";
const FEATURE_WIDTH: &str = "train/width";
const FEATURE_CHANNELS: &str = "train/channels";
const FEATURE_LABEL: &str = "train/label";

/// One deserialized dataset entry: an HWC image and its optional label.
pub struct DatasetImage {
    pub image: Array3<u8>,
    pub label: Option<i64>,
}

/// Writes images as TFRecord `Example`s.
pub struct DatasetWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl DatasetWriter {
    /// Create a new record file at `path`, appending the `.tfrecord`
    /// extension when it is missing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = with_tfrecord_extension(path.as_ref());
        let file = File::create(&path).with_context(|| format!("creating '{}'", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            written: 0,
        })
    }

    /// Serialize one HWC image, with an optional training label.
    pub fn write_image(&mut self, image: ArrayView3<u8>, label: Option<i64>) -> Result<()> {
        let (height, width, channels) = image.dim();
        ensure!(
            height > 0 && width > 0 && channels > 0,
            "image dimensions must be non-zero, got {:?}",
            image.dim()
        );

        let mut feature = HashMap::from([
            (FEATURE_IMAGE.to_string(), Feature::bytes(image.iter().copied().collect())),
            (FEATURE_HEIGHT.to_string(), Feature::int64(height as i64)),
            (FEATURE_WIDTH.to_string(), Feature::int64(width as i64)),
            (FEATURE_CHANNELS.to_string(), Feature::int64(channels as i64)),
        ]);
        if let Some(label) = label {
            feature.insert(FEATURE_LABEL.to_string(), Feature::int64(label));
        }

        let example = Example {
            features: Some(Features { feature }),
        };
        record::write_record(&mut self.writer, &example.encode_to_vec())?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        info!("wrote {} examples to '{}'", self.written, self.path.display());
        Ok(self.path)
    }
}

/// Write a whole dataset in one go. When labels are given there must be
/// exactly one per image.
pub fn write_dataset(path: impl AsRef<Path>, images: &[Array3<u8>], labels: Option<&[i64]>) -> Result<PathBuf> {
    if let Some(labels) = labels {
        ensure!(
            labels.len() == images.len(),
            "{} labels for {} images",
            labels.len(),
            images.len()
        );
    }

    let mut writer = DatasetWriter::create(path)?;
    for (idx, image) in images.iter().enumerate() {
        writer.write_image(image.view(), labels.map(|l| l[idx]))?;
    }
    writer.finish()
}

/// Iterator over the `Example`s of one record file, verifying checksums and
/// the pixel-byte count against the stored dimensions.
pub struct DatasetReader {
    reader: BufReader<File>,
}

impl DatasetReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    fn parse_example(payload: &[u8]) -> Result<DatasetImage> {
        let example = Example::decode(payload).context("decoding example protobuf")?;
        let mut feature = example.features.context("example has no features")?.feature;

        let dim = |name: &str| -> Result<usize> {
            let value = feature
                .get(name)
                .and_then(Feature::as_int64)
                .with_context(|| format!("example is missing '{name}'"))?;
            ensure!(value > 0, "'{}' must be positive, got {}", name, value);
            Ok(value as usize)
        };
        let height = dim(FEATURE_HEIGHT)?;
        let width = dim(FEATURE_WIDTH)?;
        let channels = dim(FEATURE_CHANNELS)?;

        let label = feature.get(FEATURE_LABEL).and_then(Feature::as_int64);
        let bytes = feature
            .remove(FEATURE_IMAGE)
            .and_then(Feature::into_bytes)
            .with_context(|| format!("example is missing '{FEATURE_IMAGE}'"))?;
        ensure!(
            bytes.len() == height * width * channels,
            "image has {} bytes but dimensions {}x{}x{}",
            bytes.len(),
            height,
            width,
            channels
        );

        let image = Array3::from_shape_vec((height, width, channels), bytes)?;
        Ok(DatasetImage { image, label })
    }
}

impl Iterator for DatasetReader {
    type Item = Result<DatasetImage>;

    fn next(&mut self) -> Option<Self::Item> {
        match record::read_record(&mut self.reader) {
            Ok(Some(payload)) => Some(Self::parse_example(&payload)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Read every `*.tfrecord` file in `dir`, in sorted filename order.
pub fn read_dataset_dir(dir: impl AsRef<Path>) -> Result<Vec<DatasetImage>> {
    let dir = dir.as_ref();
    let pattern = dir.join("*.tfrecord");
    let mut files = glob::glob(pattern.to_str().context("non-UTF-8 dataset path")?)?
        .collect::<Result<Vec<_>, _>>()?;
    files.sort();
    ensure!(!files.is_empty(), "no .tfrecord files found in '{}'", dir.display());

    let mut entries = vec![];
    for file in files {
        for entry in DatasetReader::open(&file)? {
            entries.push(entry?);
        }
    }
    Ok(entries)
}

fn with_tfrecord_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "tfrecord" => path.to_path_buf(),
        _ => {
            let mut name = path.as_os_str().to_owned();
            name.push(".tfrecord");
            PathBuf::from(name)
        }
    }
}
