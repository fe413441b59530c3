//! Writing and reading learned-encoding metadata.
//!
//! Encodings are stored as `.npz` files next to a single JSON manifest. The
//! manifest keeps a SHA-256 hash of every encoding so the reader can verify
//! that payload and metadata still belong together.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use log::info;
use ndarray::{arr0, Array0, Array1, ArrayView1};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One manifest entry. Caller metadata is flattened into the JSON object
/// alongside the fixed fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodingEntry {
    pub dst_file: String,
    pub src_file: String,
    pub class_label: i64,
    pub hash: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Writes encodings as `.npz` files and collects their manifest, which is
/// serialized by [`finish`](Self::finish). Unlike a scope guard, the explicit
/// finish call can report I/O errors.
pub struct EncodingWriter {
    filename: PathBuf,
    entries: BTreeMap<String, EncodingEntry>,
}

impl EncodingWriter {
    /// `filename` is the JSON manifest path; missing parent directories are
    /// created.
    pub fn create(filename: impl AsRef<Path>) -> Result<Self> {
        let filename = filename.as_ref().to_path_buf();
        ensure!(
            filename.extension().is_some_and(|ext| ext == "json"),
            "manifest filename must end in .json, got '{}'",
            filename.display()
        );

        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating directory '{}'", parent.display()))?;
            }
        }

        Ok(Self {
            filename,
            entries: BTreeMap::new(),
        })
    }

    /// Store one encoding at `dst_file` (must end in `.npz`) and record its
    /// manifest entry.
    pub fn write(
        &mut self,
        encoding: ArrayView1<f32>,
        src_file: &str,
        dst_file: &Path,
        class_label: i64,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        ensure!(
            dst_file.extension().is_some_and(|ext| ext == "npz"),
            "encoding filename must end in .npz, got '{}'",
            dst_file.display()
        );

        let file = File::create(dst_file).with_context(|| format!("creating '{}'", dst_file.display()))?;
        let mut npz = NpzWriter::new(file);
        npz.add_array("encoding", &encoding)?;
        npz.add_array("class_label", &arr0(class_label))?;
        npz.finish()?;

        let entry = EncodingEntry {
            dst_file: dst_file.to_string_lossy().into_owned(),
            src_file: src_file.to_string(),
            class_label,
            hash: hash_encoding(encoding),
            metadata,
        };
        self.entries.insert(entry.dst_file.clone(), entry);
        Ok(())
    }

    /// Serialize the manifest.
    pub fn finish(self) -> Result<()> {
        let file = File::create(&self.filename)
            .with_context(|| format!("creating '{}'", self.filename.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.entries)?;
        info!("wrote {} encoding entries to '{}'", self.entries.len(), self.filename.display());
        Ok(())
    }
}

/// Reads a manifest and its `.npz` encodings, verifying on every access that
/// the stored hash and class label still match the payload.
pub struct EncodingReader {
    entries: Vec<EncodingEntry>,
}

impl EncodingReader {
    pub fn open(filename: impl AsRef<Path>) -> Result<Self> {
        let filename = filename.as_ref();
        let file = File::open(filename).with_context(|| format!("opening '{}'", filename.display()))?;
        let entries: BTreeMap<String, EncodingEntry> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing manifest '{}'", filename.display()))?;
        Ok(Self {
            entries: entries.into_values().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EncodingEntry] {
        &self.entries
    }

    /// Load the encoding at `idx` and return it with its manifest entry.
    pub fn get(&self, idx: usize) -> Result<(Array1<f32>, &EncodingEntry)> {
        let entry = self
            .entries
            .get(idx)
            .with_context(|| format!("encoding index {} out of range ({} entries)", idx, self.entries.len()))?;

        let file = File::open(&entry.dst_file).with_context(|| format!("opening '{}'", entry.dst_file))?;
        let mut npz = NpzReader::new(file)?;
        let encoding: Array1<f32> = npz.by_name("encoding.npy")?;
        let class_label: Array0<i64> = npz.by_name("class_label.npy")?;

        ensure!(
            class_label.into_scalar() == entry.class_label,
            "class label in '{}' does not match its manifest entry",
            entry.dst_file
        );
        ensure!(
            hash_encoding(encoding.view()) == entry.hash,
            "encoding hash in '{}' does not match its manifest entry",
            entry.dst_file
        );
        Ok((encoding, entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<(Array1<f32>, &EncodingEntry)>> + '_ {
        (0..self.entries.len()).map(move |idx| self.get(idx))
    }
}

/// SHA-256 over the little-endian bytes of the encoding.
fn hash_encoding(encoding: ArrayView1<f32>) -> String {
    let mut hasher = Sha256::new();
    for &v in encoding.iter() {
        hasher.update(v.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}
