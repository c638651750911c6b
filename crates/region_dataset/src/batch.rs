//! Batch assembly: one image, its regions and (optionally) proposals per call.

use crate::config::LoaderConfig;
use crate::disk::DiskStore;
use crate::index::{DatasetIndex, IndexOptions};
use crate::metadata::MetadataDocument;
use crate::proposals::{ProposalSlice, ProposalStore};
use crate::regions::RegionSlice;
use crate::splits::{Split, SplitAssignment, SplitManager, SplitPolicy};
use crate::types::{BatchInfo, DatasetResult, RegionDatasetError};
use crate::validation::summarize_index;
use crate::vocab::Vocabulary;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_BATCHES: usize = 1000;

/// VGG mean in BGR channel order.
pub const VGG_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
/// VGG mean in RGB channel order.
pub const VGG_MEAN_RGB: [f32; 3] = [123.68, 116.779, 103.939];

/// Cropped, mean-subtracted image shaped `[1, C, H, W]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub data: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageBatch {
    pub fn shape(&self) -> [usize; 4] {
        [1, self.channels, self.height, self.width]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionBatch {
    pub image: ImageBatch,
    pub regions: RegionSlice,
    pub info: BatchInfo,
    /// `None` when no proposal source is configured.
    pub proposals: Option<ProposalSlice>,
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub split: SplitPolicy,
    pub debug_max_images: Option<usize>,
    pub pixel_mean: Vec<f32>,
    pub seed: Option<u64>,
    pub strict_bounds: bool,
    /// Progress log interval in batches; `None` disables it.
    pub log_every: Option<usize>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            split: SplitPolicy::Indicator,
            debug_max_images: None,
            pixel_mean: VGG_MEAN_BGR.to_vec(),
            seed: None,
            strict_bounds: false,
            log_every: Some(DEFAULT_LOG_EVERY_BATCHES),
        }
    }
}

pub struct RegionLoader {
    index: DatasetIndex,
    splits: SplitManager,
    proposals: Option<ProposalStore>,
    pixel_mean: Vec<f32>,
    log_every: Option<usize>,
    processed_batches: usize,
    last_logged_batches: usize,
    started: Instant,
    total_fetch_time: Duration,
}

impl RegionLoader {
    pub fn new(index: DatasetIndex, opts: LoaderOptions) -> DatasetResult<Self> {
        opts.split.validate()?;
        if opts.pixel_mean.len() != index.num_channels() {
            return Err(RegionDatasetError::MeanChannelMismatch {
                mean: opts.pixel_mean.len(),
                channels: index.num_channels(),
            });
        }
        let assignment =
            SplitAssignment::from_policy(&opts.split, index.num_images(), index.split_labels())?;
        if opts.strict_bounds {
            summarize_index(&index, Some(&assignment)).check_bounds()?;
        }
        tracing::info!(
            "[loader] split sizes: train={} val={} test={}",
            assignment.len(Split::Train),
            assignment.len(Split::Val),
            assignment.len(Split::Test)
        );
        let splits = SplitManager::new(assignment, opts.debug_max_images, opts.seed);
        Ok(Self {
            index,
            splits,
            proposals: None,
            pixel_mean: opts.pixel_mean,
            log_every: opts.log_every.filter(|&n| n > 0),
            processed_batches: 0,
            last_logged_batches: 0,
            started: Instant::now(),
            total_fetch_time: Duration::ZERO,
        })
    }

    pub fn with_proposals(mut self, proposals: ProposalStore) -> Self {
        self.proposals = Some(proposals);
        self
    }

    /// Open the index, metadata and optional proposal stores named by `cfg`.
    pub fn from_config(cfg: &LoaderConfig) -> DatasetResult<Self> {
        cfg.validate()?;
        let store = DiskStore::open(&cfg.index_dir, cfg.store_mode)?;
        let metadata = MetadataDocument::load(&cfg.metadata_path)?;
        let index = DatasetIndex::open(
            Box::new(store),
            metadata,
            IndexOptions {
                preload_images: cfg.preload_images,
            },
        )?;
        let mut loader = Self::new(index, cfg.loader_options())?;
        if let Some(dir) = &cfg.proposals_dir {
            let store = DiskStore::open(dir, cfg.store_mode)?;
            loader = loader.with_proposals(ProposalStore::open(Box::new(store))?);
        }
        Ok(loader)
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn splits(&self) -> &SplitManager {
        &self.splits
    }

    pub fn max_image_size(&self) -> usize {
        self.index.max_image_size()
    }

    pub fn seq_length(&self) -> usize {
        self.index.seq_length()
    }

    pub fn vocab_size(&self) -> usize {
        self.index.vocab_size()
    }

    pub fn vocab(&self) -> &Vocabulary {
        self.index.vocab()
    }

    pub fn reset_iterator(&mut self, split: Split) {
        self.splits.reset(split);
    }

    /// Decode a `[seq_len, count]` matrix of token ids into `count` strings.
    pub fn decode_sequence(&self, seqs: &[i32], shape: [usize; 2]) -> DatasetResult<Vec<String>> {
        self.index.vocab().decode_sequence(seqs, shape)
    }

    /// Draw one image from `split` (sequentially when `iterate`, uniformly at
    /// random otherwise) and assemble its batch.
    pub fn get_batch(&mut self, split: Split, iterate: bool) -> DatasetResult<RegionBatch> {
        let pick = self.splits.next_position(split, iterate)?;
        let ix = pick.image;
        let t_fetch = Instant::now();

        let dims = self.index.image_dims(ix)?;
        let data = self.index.read_image(ix, &self.pixel_mean)?;
        let image = ImageBatch {
            data,
            channels: self.index.num_channels(),
            height: dims.height,
            width: dims.width,
        };
        let regions = self.index.regions().regions_for(ix)?;
        let proposals = match &self.proposals {
            Some(store) => Some(store.proposals_for(ix, dims.width, dims.original_width)?),
            None => None,
        };
        let info = BatchInfo {
            image_index: ix,
            split,
            filename: self.index.filename(ix)?.to_string(),
            split_bounds: (pick.position, pick.split_len),
            width: dims.width,
            height: dims.height,
            ori_width: dims.original_width,
            ori_height: dims.original_height,
        };

        self.total_fetch_time += t_fetch.elapsed();
        self.processed_batches += 1;
        tracing::debug!(
            split = split.as_str(),
            image = ix,
            position = pick.position,
            regions = regions.count,
            "[loader] batch"
        );
        self.maybe_log_progress();

        Ok(RegionBatch {
            image,
            regions,
            info,
            proposals,
        })
    }

    fn maybe_log_progress(&mut self) {
        let Some(every) = self.log_every else {
            return;
        };
        if self.processed_batches - self.last_logged_batches < every {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_fetch_ms =
            (self.total_fetch_time.as_secs_f64() * 1000.0) / self.processed_batches.max(1) as f64;
        tracing::info!(
            "[loader] batches={} elapsed={:.1}s rate={:.1} img/s avg_fetch_ms={:.2}",
            self.processed_batches,
            secs,
            self.processed_batches as f32 / secs,
            avg_fetch_ms
        );
        self.last_logged_batches = self.processed_batches;
    }
}

#[cfg(feature = "burn-runtime")]
pub struct BurnRegionBatch<B: burn::tensor::backend::Backend> {
    pub image: burn::tensor::Tensor<B, 4>,
    pub boxes: burn::tensor::Tensor<B, 3>,
    pub labels: burn::tensor::Tensor<B, 3, burn::tensor::Int>,
    pub proposals: Option<burn::tensor::Tensor<B, 3>>,
}

#[cfg(feature = "burn-runtime")]
impl RegionBatch {
    pub fn to_burn<B: burn::tensor::backend::Backend>(&self, device: &B::Device) -> BurnRegionBatch<B> {
        let image = burn::tensor::Tensor::<B, 1>::from_floats(self.image.data.as_slice(), device)
            .reshape(self.image.shape());
        let boxes =
            burn::tensor::Tensor::<B, 1>::from_floats(self.regions.boxes.as_slice(), device)
                .reshape(self.regions.boxes_shape());
        let labels = burn::tensor::Tensor::<B, 1, burn::tensor::Int>::from_ints(
            self.regions.labels.as_slice(),
            device,
        )
        .reshape(self.regions.labels_shape());
        let proposals = self.proposals.as_ref().map(|p| {
            burn::tensor::Tensor::<B, 1>::from_floats(p.flat().as_slice(), device)
                .reshape(p.shape())
        });
        BurnRegionBatch {
            image,
            boxes,
            labels,
            proposals,
        }
    }
}
