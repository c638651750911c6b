//! Random-access array store abstraction.
//!
//! Split, region and batch logic only ever talk to [`ArrayStore`], so any
//! backend that can answer whole-array and range-partial reads by name can
//! stand in for the on-disk format in [`crate::disk`].

use crate::array::{Array, DType};
use crate::types::{DatasetResult, RegionDatasetError};
use std::collections::BTreeMap;
use std::ops::Range;

pub trait ArrayStore: Send + Sync {
    fn contains(&self, name: &str) -> bool;

    fn shape(&self, name: &str) -> DatasetResult<Vec<usize>>;

    fn dtype(&self, name: &str) -> DatasetResult<DType>;

    fn read_all(&self, name: &str) -> DatasetResult<Array>;

    /// Read the block selected by one half-open range per dimension.
    fn read_partial(&self, name: &str, ranges: &[Range<usize>]) -> DatasetResult<Array>;

    fn array_names(&self) -> Vec<String>;
}

/// Store over arrays already held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    arrays: BTreeMap<String, Array>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, array: Array) -> Option<Array> {
        self.arrays.insert(name.into(), array)
    }

    pub fn with(mut self, name: impl Into<String>, array: Array) -> Self {
        self.insert(name, array);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Array> {
        self.arrays.remove(name)
    }

    fn get(&self, name: &str) -> DatasetResult<&Array> {
        self.arrays
            .get(name)
            .ok_or_else(|| RegionDatasetError::MissingArray(name.to_string()))
    }
}

impl ArrayStore for MemoryStore {
    fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    fn shape(&self, name: &str) -> DatasetResult<Vec<usize>> {
        Ok(self.get(name)?.shape().to_vec())
    }

    fn dtype(&self, name: &str) -> DatasetResult<DType> {
        Ok(self.get(name)?.dtype())
    }

    fn read_all(&self, name: &str) -> DatasetResult<Array> {
        self.get(name).cloned()
    }

    fn read_partial(&self, name: &str, ranges: &[Range<usize>]) -> DatasetResult<Array> {
        self.get(name)?.slice(name, ranges)
    }

    fn array_names(&self) -> Vec<String> {
        self.arrays.keys().cloned().collect()
    }
}

/// Read a required array, failing with [`RegionDatasetError::MissingArray`].
pub(crate) fn read_required(store: &dyn ArrayStore, name: &str) -> DatasetResult<Array> {
    if !store.contains(name) {
        return Err(RegionDatasetError::MissingArray(name.to_string()));
    }
    store.read_all(name)
}

/// Read an optional array; absent arrays yield `None`.
pub(crate) fn read_optional(store: &dyn ArrayStore, name: &str) -> DatasetResult<Option<Array>> {
    if !store.contains(name) {
        return Ok(None);
    }
    store.read_all(name).map(Some)
}
