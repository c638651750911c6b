//! On-disk array store: a JSON manifest plus one raw row-major file per array.
//!
//! Layout of a store directory:
//!
//! ```text
//! <dir>/manifest.json
//! <dir>/<name>.bin        # product(shape) * size_of(dtype) bytes
//! ```

use crate::array::{check_ranges, for_each_run, Array, ArrayData, DType, Endianness};
use crate::store::ArrayStore;
use crate::types::{DatasetResult, RegionDatasetError};
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub const MANIFEST_NAME: &str = "manifest.json";
pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    pub format_version: u32,
    pub created_at_ms: u64,
    pub arrays: Vec<ArrayMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub name: String,
    /// Path to the array file, relative to the store root (UTF-8).
    pub relative_path: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub endianness: Endianness,
    /// Hex-encoded SHA256 of the array file (optional).
    pub checksum_sha256: Option<String>,
}

impl ArrayMetadata {
    pub fn byte_len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(self.dtype.size_of(), |acc, &d| acc.checked_mul(d))
    }
}

impl StoreManifest {
    pub fn new(arrays: Vec<ArrayMetadata>) -> Self {
        let created_at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            format_version: STORE_FORMAT_VERSION,
            created_at_ms,
            arrays,
        }
    }

    pub fn save(&self, path: &Path) -> DatasetResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| RegionDatasetError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| RegionDatasetError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, data).map_err(|e| RegionDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> DatasetResult<Self> {
        let raw = fs::read(path).map_err(|e| RegionDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| RegionDatasetError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// How array files are accessed after the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Memory-mapped files (low RAM, fast random access on most systems).
    #[default]
    Mmap,
    /// Seek-and-read through a fresh file handle per request.
    Streamed,
}

impl StoreMode {
    pub fn from_env() -> Option<Self> {
        Self::parse(std::env::var("REGION_STORE_MODE").ok()?.as_str())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mmap" => Some(StoreMode::Mmap),
            "streamed" | "streaming" => Some(StoreMode::Streamed),
            _ => None,
        }
    }
}

enum ArrayBacking {
    Mmap(Arc<Mmap>),
    Streamed(PathBuf),
    /// Zero-length arrays have nothing to map.
    Empty,
}

struct DiskArray {
    meta: ArrayMetadata,
    path: PathBuf,
    backing: ArrayBacking,
}

impl DiskArray {
    fn read_runs(&self, ranges: &[Range<usize>]) -> DatasetResult<Array> {
        let out_shape = check_ranges(&self.meta.name, &self.meta.shape, ranges)?;
        let elem = self.meta.dtype.size_of();
        let mut out = ArrayData::with_capacity(self.meta.dtype, out_shape.iter().product());
        match &self.backing {
            ArrayBacking::Mmap(mmap) => {
                for_each_run(&self.meta.shape, ranges, |start, len| {
                    let from = start * elem;
                    let to = from + len * elem;
                    if to > mmap.len() {
                        return Err(RegionDatasetError::Other(format!(
                            "array file {} truncated for requested range",
                            self.path.display()
                        )));
                    }
                    out.extend_from_bytes(&mmap[from..to], self.meta.endianness);
                    Ok(())
                })?;
            }
            ArrayBacking::Streamed(path) => {
                let mut file = File::open(path).map_err(|e| RegionDatasetError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                let mut runs = Vec::new();
                for_each_run(&self.meta.shape, ranges, |start, len| {
                    runs.push((start, len));
                    Ok(())
                })?;
                let mut buf = Vec::new();
                for (start, len) in coalesce_runs(runs) {
                    file.seek(SeekFrom::Start((start * elem) as u64))
                        .map_err(|e| RegionDatasetError::Io {
                            path: path.clone(),
                            source: e,
                        })?;
                    buf.resize(len * elem, 0);
                    file.read_exact(&mut buf)
                        .map_err(|e| RegionDatasetError::Io {
                            path: path.clone(),
                            source: e,
                        })?;
                    out.extend_from_bytes(&buf, self.meta.endianness);
                }
            }
            ArrayBacking::Empty => {}
        }
        Array::new(out_shape, out)
    }

    fn full_ranges(&self) -> Vec<Range<usize>> {
        self.meta.shape.iter().map(|&d| 0..d).collect()
    }
}

/// Merge element runs that continue one another into single reads.
fn coalesce_runs(runs: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(runs.len());
    for (start, len) in runs {
        match merged.last_mut() {
            Some((s, l)) if *s + *l == start => *l += len,
            _ => merged.push((start, len)),
        }
    }
    merged
}

/// Array store backed by a manifest directory.
pub struct DiskStore {
    root: PathBuf,
    mode: StoreMode,
    arrays: BTreeMap<String, DiskArray>,
}

impl DiskStore {
    pub fn open(root: &Path, mode: StoreMode) -> DatasetResult<Self> {
        let manifest = StoreManifest::load(&root.join(MANIFEST_NAME))?;
        if manifest.format_version != STORE_FORMAT_VERSION {
            return Err(RegionDatasetError::Unsupported(format!(
                "store format version {} in {}",
                manifest.format_version,
                root.display()
            )));
        }
        let t0 = Instant::now();
        let mut arrays = BTreeMap::new();
        for meta in manifest.arrays {
            let array = open_array(root, meta, mode)?;
            arrays.insert(array.meta.name.clone(), array);
        }
        tracing::info!(
            "[store] opened {} ({} arrays, mode={:?}) in {} ms",
            root.display(),
            arrays.len(),
            mode,
            t0.elapsed().as_millis()
        );
        Ok(Self {
            root: root.to_path_buf(),
            mode,
            arrays,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    fn get(&self, name: &str) -> DatasetResult<&DiskArray> {
        self.arrays
            .get(name)
            .ok_or_else(|| RegionDatasetError::MissingArray(name.to_string()))
    }
}

impl ArrayStore for DiskStore {
    fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    fn shape(&self, name: &str) -> DatasetResult<Vec<usize>> {
        Ok(self.get(name)?.meta.shape.clone())
    }

    fn dtype(&self, name: &str) -> DatasetResult<DType> {
        Ok(self.get(name)?.meta.dtype)
    }

    fn read_all(&self, name: &str) -> DatasetResult<Array> {
        let array = self.get(name)?;
        array.read_runs(&array.full_ranges())
    }

    fn read_partial(&self, name: &str, ranges: &[Range<usize>]) -> DatasetResult<Array> {
        self.get(name)?.read_runs(ranges)
    }

    fn array_names(&self) -> Vec<String> {
        self.arrays.keys().cloned().collect()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest;
    let hash = sha2::Sha256::digest(bytes);
    format!("{:x}", hash)
}

fn open_array(root: &Path, meta: ArrayMetadata, mode: StoreMode) -> DatasetResult<DiskArray> {
    let path = root.join(&meta.relative_path);
    let expected = meta.byte_len().ok_or_else(|| {
        RegionDatasetError::Other(format!("overflow computing size of `{}`", meta.name))
    })?;
    let file = File::open(&path).map_err(|e| RegionDatasetError::Io {
        path: path.clone(),
        source: e,
    })?;
    let file_len = file
        .metadata()
        .map_err(|e| RegionDatasetError::Io {
            path: path.clone(),
            source: e,
        })?
        .len() as usize;
    if file_len != expected {
        return Err(RegionDatasetError::ShapeMismatch {
            name: meta.name.clone(),
            shape: meta.shape.clone(),
            expected: format!("{expected} bytes in {}, found {file_len}", path.display()),
        });
    }

    let backing = if expected == 0 {
        ArrayBacking::Empty
    } else {
        match mode {
            StoreMode::Mmap => {
                let mmap = unsafe {
                    MmapOptions::new()
                        .map(&file)
                        .map_err(|e| RegionDatasetError::Io {
                            path: path.clone(),
                            source: e,
                        })?
                };
                ArrayBacking::Mmap(Arc::new(mmap))
            }
            StoreMode::Streamed => ArrayBacking::Streamed(path.clone()),
        }
    };

    if let Some(expected_sum) = &meta.checksum_sha256 {
        let actual = match &backing {
            ArrayBacking::Mmap(mmap) => sha256_hex(&mmap[..]),
            _ => {
                let bytes = fs::read(&path).map_err(|e| RegionDatasetError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                sha256_hex(&bytes)
            }
        };
        if !actual.eq_ignore_ascii_case(expected_sum) {
            return Err(RegionDatasetError::Checksum {
                name: meta.name.clone(),
                expected: expected_sum.clone(),
                actual,
            });
        }
    }

    Ok(DiskArray {
        meta,
        path,
        backing,
    })
}

/// Writes arrays and the manifest for a [`DiskStore`] directory.
pub struct DiskStoreWriter {
    root: PathBuf,
    arrays: Vec<ArrayMetadata>,
    checksums: bool,
}

impl DiskStoreWriter {
    pub fn new(root: &Path) -> DatasetResult<Self> {
        fs::create_dir_all(root).map_err(|e| RegionDatasetError::Io {
            path: root.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            arrays: Vec::new(),
            checksums: true,
        })
    }

    /// Skip SHA256 computation (large image arrays).
    pub fn without_checksums(mut self) -> Self {
        self.checksums = false;
        self
    }

    pub fn write_array(&mut self, name: &str, array: &Array) -> DatasetResult<()> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(RegionDatasetError::Other(format!(
                "invalid array name `{name}`"
            )));
        }
        let relative_path = format!("{name}.bin");
        let path = self.root.join(&relative_path);
        let bytes = array.data().to_le_bytes();
        fs::write(&path, &bytes).map_err(|e| RegionDatasetError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.arrays.retain(|a| a.name != name);
        self.arrays.push(ArrayMetadata {
            name: name.to_string(),
            relative_path,
            dtype: array.dtype(),
            shape: array.shape().to_vec(),
            endianness: Endianness::Little,
            checksum_sha256: self.checksums.then(|| sha256_hex(&bytes)),
        });
        Ok(())
    }

    pub fn finish(self) -> DatasetResult<StoreManifest> {
        let manifest = StoreManifest::new(self.arrays);
        manifest.save(&self.root.join(MANIFEST_NAME))?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(root: &Path) {
        let mut writer = DiskStoreWriter::new(root).unwrap();
        writer
            .write_array(
                "boxes",
                &Array::from_i32(vec![3, 4], (0..12).collect()).unwrap(),
            )
            .unwrap();
        writer
            .write_array("empty", &Array::from_f32(vec![0, 5], Vec::new()).unwrap())
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn mmap_and_streamed_reads_agree() {
        let tmp = tempfile::tempdir().unwrap();
        write_sample(tmp.path());
        let mmap = DiskStore::open(tmp.path(), StoreMode::Mmap).unwrap();
        let streamed = DiskStore::open(tmp.path(), StoreMode::Streamed).unwrap();
        let a = mmap.read_partial("boxes", &[1..3, 1..3]).unwrap();
        let b = streamed.read_partial("boxes", &[1..3, 1..3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.data(), &ArrayData::I32(vec![5, 6, 9, 10]));
        assert_eq!(mmap.read_all("empty").unwrap().shape(), &[0, 5]);
    }

    #[test]
    fn adjacent_runs_are_read_together() {
        // Full rows of a [3, 4] array are one run; a column window is not.
        let mut full = Vec::new();
        for_each_run(&[3, 4], &[0..3, 0..4], |s, l| {
            full.push((s, l));
            Ok(())
        })
        .unwrap();
        assert_eq!(coalesce_runs(full), vec![(0, 12)]);
        assert_eq!(
            coalesce_runs(vec![(1, 2), (5, 2), (7, 1), (9, 3)]),
            vec![(1, 2), (5, 3), (9, 3)]
        );

        let tmp = tempfile::tempdir().unwrap();
        write_sample(tmp.path());
        let streamed = DiskStore::open(tmp.path(), StoreMode::Streamed).unwrap();
        assert_eq!(
            streamed.read_all("boxes").unwrap().data(),
            &ArrayData::I32((0..12).collect())
        );
        assert_eq!(
            streamed.read_partial("boxes", &[1..3, 0..4]).unwrap().data(),
            &ArrayData::I32((4..12).collect())
        );
    }

    #[test]
    fn truncated_file_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        write_sample(tmp.path());
        fs::write(tmp.path().join("boxes.bin"), [0u8; 8]).unwrap();
        assert!(matches!(
            DiskStore::open(tmp.path(), StoreMode::Mmap),
            Err(RegionDatasetError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_file_fails_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        write_sample(tmp.path());
        fs::write(tmp.path().join("boxes.bin"), [7u8; 48]).unwrap();
        assert!(matches!(
            DiskStore::open(tmp.path(), StoreMode::Streamed),
            Err(RegionDatasetError::Checksum { .. })
        ));
    }

    #[test]
    fn store_mode_parses_aliases() {
        assert_eq!(StoreMode::parse("MMAP"), Some(StoreMode::Mmap));
        assert_eq!(StoreMode::parse("streaming"), Some(StoreMode::Streamed));
        assert_eq!(StoreMode::parse("inmemory"), None);
    }
}
