//! Metadata document: vocabulary and per-image filenames.
//!
//! On disk this is JSON keyed by stringified integers:
//!
//! ```json
//! { "idx_to_token": { "1": "a", "2": "cat" },
//!   "idx_to_filename": { "1": "1.jpg", "2": "2.jpg" } }
//! ```
//!
//! The keys are parsed and validated once here; the rest of the crate only
//! sees integer-indexed tables.

use crate::types::{DatasetResult, RegionDatasetError};
use crate::vocab::Vocabulary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFile {
    pub idx_to_token: BTreeMap<String, String>,
    pub idx_to_filename: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MetadataDocument {
    vocab: Vocabulary,
    filenames: BTreeMap<usize, String>,
}

impl MetadataDocument {
    pub fn load(path: &Path) -> DatasetResult<Self> {
        let raw = fs::read(path).map_err(|e| RegionDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: MetadataFile =
            serde_json::from_slice(&raw).map_err(|e| RegionDatasetError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::from_file(file)
    }

    pub fn from_file(file: MetadataFile) -> DatasetResult<Self> {
        let tokens = parse_keys("idx_to_token", file.idx_to_token)?;
        let filenames = parse_keys("idx_to_filename", file.idx_to_filename)?;
        Ok(Self {
            vocab: Vocabulary::from_id_map(tokens)?,
            filenames,
        })
    }

    pub fn new(vocab: Vocabulary, filenames: Vec<String>) -> Self {
        let filenames = filenames
            .into_iter()
            .enumerate()
            .map(|(i, name)| (i + 1, name))
            .collect();
        Self { vocab, filenames }
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Vocabulary and filenames keyed by 1-based image index.
    pub fn into_parts(self) -> (Vocabulary, BTreeMap<usize, String>) {
        (self.vocab, self.filenames)
    }

    pub fn filename(&self, image: usize) -> Option<&str> {
        self.filenames.get(&image).map(String::as_str)
    }

    /// Resolve filenames for images `1..=count`, failing on the first gap.
    pub fn filenames_for(&self, count: usize) -> DatasetResult<Vec<String>> {
        (1..=count)
            .map(|i| {
                self.filename(i)
                    .map(str::to_string)
                    .ok_or(RegionDatasetError::MissingFilename(i))
            })
            .collect()
    }
}

fn parse_keys(
    table: &'static str,
    raw: BTreeMap<String, String>,
) -> DatasetResult<BTreeMap<usize, String>> {
    raw.into_iter()
        .map(|(k, v)| match k.trim().parse::<usize>() {
            Ok(id) if id > 0 => Ok((id, v)),
            _ => Err(RegionDatasetError::InvalidMetadataKey { table, key: k }),
        })
        .collect()
}
