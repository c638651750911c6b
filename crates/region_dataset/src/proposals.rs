//! Externally computed region proposals, rescaled into the stored image frame.

use crate::boxes::rescale_proposal;
use crate::regions::OffsetTable;
use crate::store::{read_required, ArrayStore};
use crate::types::{DatasetResult, RegionDatasetError};

pub const PROPOSAL_FIELDS: usize = 5;

/// Proposals of one image as `[1, count, 5]` rows of `(xc, yc, w, h, score)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalSlice {
    pub boxes: Vec<[f32; PROPOSAL_FIELDS]>,
}

impl ProposalSlice {
    pub fn count(&self) -> usize {
        self.boxes.len()
    }

    pub fn shape(&self) -> [usize; 3] {
        [1, self.boxes.len(), PROPOSAL_FIELDS]
    }

    pub fn flat(&self) -> Vec<f32> {
        self.boxes.iter().flatten().copied().collect()
    }
}

pub struct ProposalStore {
    offsets: OffsetTable,
    store: Box<dyn ArrayStore>,
    num_proposals: usize,
}

impl ProposalStore {
    /// Open a proposal store holding `img_to_first_box`, `img_to_last_box`
    /// and `boxes` (`[P, 5]`, `xywh` + score in original image pixels).
    pub fn open(store: Box<dyn ArrayStore>) -> DatasetResult<Self> {
        let first = read_required(store.as_ref(), "img_to_first_box")?
            .data()
            .to_i64_vec();
        let last = read_required(store.as_ref(), "img_to_last_box")?
            .data()
            .to_i64_vec();
        if !store.contains("boxes") {
            return Err(RegionDatasetError::MissingArray("boxes".to_string()));
        }
        let shape = store.shape("boxes")?;
        if shape.len() != 2 || shape[1] != PROPOSAL_FIELDS {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "boxes".to_string(),
                shape,
                expected: format!("[P, {PROPOSAL_FIELDS}]"),
            });
        }
        let offsets = OffsetTable::new(first, last)?;
        tracing::info!(
            "[proposals] {} proposals for {} images",
            shape[0],
            offsets.len()
        );
        Ok(Self {
            offsets,
            store,
            num_proposals: shape[0],
        })
    }

    pub fn num_images(&self) -> usize {
        self.offsets.len()
    }

    pub fn num_proposals(&self) -> usize {
        self.num_proposals
    }

    /// Read the proposals of `image` and map them into the stored frame using
    /// the single factor `stored_width / original_width`.
    pub fn proposals_for(
        &self,
        image: usize,
        stored_width: usize,
        original_width: usize,
    ) -> DatasetResult<ProposalSlice> {
        if original_width == 0 {
            return Err(RegionDatasetError::Other(format!(
                "image {image} has zero original width"
            )));
        }
        let rows = self
            .offsets
            .rows_within(image, "proposal boxes", self.num_proposals)?;
        let raw = self
            .store
            .read_partial("boxes", &[rows, 0..PROPOSAL_FIELDS])?
            .data()
            .to_f32_vec();
        let factor = stored_width as f32 / original_width as f32;
        let boxes = raw
            .chunks_exact(PROPOSAL_FIELDS)
            .map(|c| rescale_proposal([c[0], c[1], c[2], c[3], c[4]], factor))
            .collect();
        Ok(ProposalSlice { boxes })
    }
}
