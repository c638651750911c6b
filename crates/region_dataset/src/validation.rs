//! Index summaries and optional strict bounds checks.

use crate::index::DatasetIndex;
use crate::splits::{Split, SplitAssignment};
use crate::types::{DatasetResult, RegionDatasetError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub images: usize,
    pub regions: usize,
    /// Train, val, test sizes when an assignment was supplied.
    pub split_sizes: Option<[usize; 3]>,
    /// Images whose offset range is empty.
    pub empty_images: Vec<usize>,
    /// Images whose stored size exceeds the canvas.
    pub oversized_images: Vec<usize>,
    /// Images whose offsets are malformed or point past the region arrays.
    pub bad_offsets: Vec<usize>,
    /// Regions whose `box_to_img` entry disagrees with the offset table.
    pub box_to_img_mismatches: usize,
    /// Label rows whose `lengths` entry exceeds the sequence length.
    pub over_length_labels: usize,
}

impl IndexSummary {
    /// Fail on any violation that would make a batch read out of bounds.
    pub fn check_bounds(&self) -> DatasetResult<()> {
        let mut reasons = Vec::new();
        if !self.oversized_images.is_empty() {
            reasons.push(format!(
                "{} images exceed the canvas (first: {})",
                self.oversized_images.len(),
                self.oversized_images[0]
            ));
        }
        if !self.bad_offsets.is_empty() {
            reasons.push(format!(
                "{} images have out-of-range offsets (first: {})",
                self.bad_offsets.len(),
                self.bad_offsets[0]
            ));
        }
        if self.box_to_img_mismatches > 0 {
            reasons.push(format!(
                "{} regions disagree with box_to_img",
                self.box_to_img_mismatches
            ));
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(RegionDatasetError::Validation(reasons.join("; ")))
        }
    }
}

pub fn summarize_index(index: &DatasetIndex, splits: Option<&SplitAssignment>) -> IndexSummary {
    let regions = index.regions();
    let total_rows = regions.num_regions();
    let mut summary = IndexSummary {
        images: index.num_images(),
        regions: total_rows,
        split_sizes: splits.map(|a| Split::ALL.map(|s| a.len(s))),
        ..Default::default()
    };

    let mut owner = vec![0usize; total_rows];
    for image in 1..=index.num_images() {
        match regions.offsets().rows_within(image, "boxes", total_rows) {
            Ok(rows) if rows.is_empty() => summary.empty_images.push(image),
            Ok(rows) => rows.for_each(|r| owner[r] = image),
            Err(_) => summary.bad_offsets.push(image),
        }
        if let Ok(dims) = index.image_dims(image) {
            let canvas = index.max_image_size();
            if dims.width > canvas || dims.height > canvas {
                summary.oversized_images.push(image);
            }
        }
    }

    if let Some(box_to_img) = index.box_to_img() {
        summary.box_to_img_mismatches = box_to_img
            .iter()
            .zip(&owner)
            .filter(|&(&claimed, &actual)| claimed != actual as i64)
            .count()
            + total_rows.saturating_sub(box_to_img.len());
    }
    if let Some(lengths) = index.lengths() {
        let seq_len = index.seq_length() as i64;
        summary.over_length_labels = lengths.iter().filter(|&&l| l > seq_len).count();
    }

    if !summary.empty_images.is_empty() {
        tracing::warn!(
            "[index] {} images have no regions (first: {})",
            summary.empty_images.len(),
            summary.empty_images[0]
        );
    }
    if summary.over_length_labels > 0 {
        tracing::warn!(
            "[index] {} label rows report lengths above seq_len {}",
            summary.over_length_labels,
            index.seq_length()
        );
    }
    summary
}
