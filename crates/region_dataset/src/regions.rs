//! Per-image offset tables and region (box + caption label) lookup.

use crate::types::{DatasetResult, RegionDatasetError};
use std::ops::Range;

/// 1-based inclusive `[first, last]` row ranges, one pair per image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    first: Vec<i64>,
    last: Vec<i64>,
}

impl OffsetTable {
    pub fn new(first: Vec<i64>, last: Vec<i64>) -> DatasetResult<Self> {
        if first.len() != last.len() {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "img_to_last_box".to_string(),
                shape: vec![last.len()],
                expected: format!("[{}] to match img_to_first_box", first.len()),
            });
        }
        Ok(Self { first, last })
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// Raw `(first, last)` entries for a 1-based image index.
    pub fn entry(&self, image: usize) -> DatasetResult<(i64, i64)> {
        if image == 0 || image > self.first.len() {
            return Err(RegionDatasetError::ImageOutOfRange {
                index: image,
                count: self.first.len(),
            });
        }
        Ok((self.first[image - 1], self.last[image - 1]))
    }

    /// 0-based half-open row range for `image`. `last == first - 1` means no rows.
    pub fn rows(&self, image: usize) -> DatasetResult<Range<usize>> {
        let (first, last) = self.entry(image)?;
        if first < 1 || last < first - 1 {
            return Err(RegionDatasetError::InvalidOffsets { image, first, last });
        }
        Ok((first - 1) as usize..last as usize)
    }

    /// Like [`OffsetTable::rows`], additionally checked against `total_rows` of `name`.
    pub fn rows_within(&self, image: usize, name: &str, total_rows: usize) -> DatasetResult<Range<usize>> {
        let rows = self.rows(image)?;
        if rows.end > total_rows {
            return Err(RegionDatasetError::OffsetsOutOfBounds {
                image,
                name: name.to_string(),
                first: rows.start + 1,
                last: rows.end,
                rows: total_rows,
            });
        }
        Ok(rows)
    }
}

/// Regions of one image, shaped as a batch of one.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSlice {
    /// `[1, count, 4]` boxes in xcycwh.
    pub boxes: Vec<f32>,
    /// `[1, count, seq_len]` token ids.
    pub labels: Vec<i32>,
    pub count: usize,
    pub seq_len: usize,
}

impl RegionSlice {
    pub fn boxes_shape(&self) -> [usize; 3] {
        [1, self.count, 4]
    }

    pub fn labels_shape(&self) -> [usize; 3] {
        [1, self.count, self.seq_len]
    }

    pub fn box_at(&self, i: usize) -> Option<[f32; 4]> {
        self.boxes
            .get(i * 4..i * 4 + 4)
            .map(|b| [b[0], b[1], b[2], b[3]])
    }

    pub fn label_at(&self, i: usize) -> Option<&[i32]> {
        self.labels.get(i * self.seq_len..(i + 1) * self.seq_len)
    }
}

/// Global region arrays with per-image ranges.
#[derive(Debug, Clone)]
pub struct RegionStore {
    offsets: OffsetTable,
    /// Row-major `[num_regions, 4]`.
    boxes: Vec<f32>,
    /// Row-major `[num_regions, seq_len]`.
    labels: Vec<i32>,
    seq_len: usize,
}

impl RegionStore {
    pub fn new(offsets: OffsetTable, boxes: Vec<f32>, labels: Vec<i32>, seq_len: usize) -> DatasetResult<Self> {
        if boxes.len() % 4 != 0 {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "boxes".to_string(),
                shape: vec![boxes.len()],
                expected: "a multiple of 4 elements".to_string(),
            });
        }
        let num_regions = boxes.len() / 4;
        if labels.len() != num_regions * seq_len {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "labels".to_string(),
                shape: vec![labels.len()],
                expected: format!("[{num_regions}, {seq_len}]"),
            });
        }
        Ok(Self {
            offsets,
            boxes,
            labels,
            seq_len,
        })
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    pub fn num_regions(&self) -> usize {
        self.boxes.len() / 4
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// 1-based inclusive `(first, last)` region rows for `image`.
    pub fn range(&self, image: usize) -> DatasetResult<(i64, i64)> {
        self.offsets.entry(image)
    }

    pub fn regions_for(&self, image: usize) -> DatasetResult<RegionSlice> {
        let rows = self.offsets.rows_within(image, "boxes", self.num_regions())?;
        let count = rows.len();
        Ok(RegionSlice {
            boxes: self.boxes[rows.start * 4..rows.end * 4].to_vec(),
            labels: self.labels[rows.start * self.seq_len..rows.end * self.seq_len].to_vec(),
            count,
            seq_len: self.seq_len,
        })
    }
}
