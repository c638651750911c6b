//! Dataset access for region-annotated image/caption data.
//!
//! This crate provides utilities for:
//! - Reading array stores from disk (mmap or streamed) or memory
//! - Train/val/test splitting with per-split cursors and random draws
//! - Per-image region and proposal lookup through 1-based offset tables
//! - Single-image batch assembly with cropping and mean subtraction
//! - Decoding caption token sequences back to text

// Module declarations
pub mod array;
pub mod batch;
pub mod boxes;
pub mod config;
pub mod disk;
pub mod index;
pub mod metadata;
pub mod proposals;
pub mod regions;
pub mod splits;
pub mod store;
pub mod types;
pub mod validation;
pub mod vocab;

// Re-export public API
pub use array::{Array, ArrayData, DType, Endianness};
pub use batch::{ImageBatch, LoaderOptions, RegionBatch, RegionLoader, VGG_MEAN_BGR, VGG_MEAN_RGB};
pub use config::LoaderConfig;
pub use disk::{DiskStore, DiskStoreWriter, StoreManifest, StoreMode};
pub use index::{DatasetIndex, IndexOptions};
pub use metadata::MetadataDocument;
pub use proposals::{ProposalSlice, ProposalStore};
pub use regions::{OffsetTable, RegionSlice, RegionStore};
pub use splits::{Split, SplitAssignment, SplitManager, SplitPolicy, SplitPosition};
pub use store::{ArrayStore, MemoryStore};
pub use types::*;
pub use validation::{summarize_index, IndexSummary};
pub use vocab::Vocabulary;

#[cfg(feature = "burn-runtime")]
pub use batch::BurnRegionBatch;
