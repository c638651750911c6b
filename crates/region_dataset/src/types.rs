//! Core types, error definitions, and shared records for region_dataset.

use crate::splits::Split;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, RegionDatasetError>;

#[derive(Debug, Error)]
pub enum RegionDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config parse error at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("array `{0}` missing from store")]
    MissingArray(String),
    #[error("array `{name}` has shape {shape:?}, expected {expected}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        expected: String,
    },
    #[error("images array must be 4-dimensional, got shape {0:?}")]
    ImagesNotFourDim(Vec<usize>),
    #[error("images array must have a square canvas, got {height}x{width}")]
    ImagesNotSquare { height: usize, width: usize },
    #[error("range {start}..{end} out of bounds for dim {dim} (extent {extent}) of `{name}`")]
    RangeOutOfBounds {
        name: String,
        dim: usize,
        start: usize,
        end: usize,
        extent: usize,
    },
    #[error("checksum mismatch for `{name}`: expected {expected}, got {actual}")]
    Checksum {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid split id {0}; expected 0 (train), 1 (val) or 2 (test)")]
    InvalidSplit(i64),
    #[error("split {0} is empty")]
    EmptySplit(Split),
    #[error("image {image} has split label {value}; expected 0, 1 or 2")]
    InvalidSplitLabel { image: usize, value: i64 },
    #[error("image index {index} out of range 1..={count}")]
    ImageOutOfRange { index: usize, count: usize },
    #[error("no filename for image {0}")]
    MissingFilename(usize),
    #[error("vocabulary ids must be contiguous from 1; id {0} is missing")]
    VocabularyGap(usize),
    #[error("metadata key `{key}` in `{table}` is not a positive integer")]
    InvalidMetadataKey { table: &'static str, key: String },
    #[error("image {image} has invalid offsets [{first}, {last}]")]
    InvalidOffsets { image: usize, first: i64, last: i64 },
    #[error("image {image} rows {first}..={last} exceed `{name}` with {rows} rows")]
    OffsetsOutOfBounds {
        image: usize,
        name: String,
        first: usize,
        last: usize,
        rows: usize,
    },
    #[error("image {image} stored size {width}x{height} exceeds canvas {canvas}")]
    ImageExceedsCanvas {
        image: usize,
        width: usize,
        height: usize,
        canvas: usize,
    },
    #[error("pixel mean has {mean} channels, images have {channels}")]
    MeanChannelMismatch { mean: usize, channels: usize },
    #[error("bounds validation failed: {0}")]
    Validation(String),
    #[error("{0}")]
    Other(String),
}

/// Stored and original dimensions of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    /// Size after resize, before padding to the canvas.
    pub width: usize,
    pub height: usize,
    /// Size of the source image before resizing.
    pub original_width: usize,
    pub original_height: usize,
}

/// Per-batch record describing where the image came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// 1-based global image index.
    pub image_index: usize,
    pub split: Split,
    pub filename: String,
    /// (1-based position within the split, split size).
    pub split_bounds: (usize, usize),
    pub width: usize,
    pub height: usize,
    pub ori_width: usize,
    pub ori_height: usize,
}
