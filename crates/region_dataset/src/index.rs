//! Dataset index: scalar per-image arrays, global region arrays, vocabulary,
//! and access to the image array (streamed from the store or preloaded).

use crate::array::Array;
use crate::metadata::MetadataDocument;
use crate::regions::{OffsetTable, RegionStore};
use crate::store::{read_optional, read_required, ArrayStore};
use crate::types::{DatasetResult, ImageDims, RegionDatasetError};
use crate::vocab::Vocabulary;
use std::time::Instant;

pub const IMAGES: &str = "images";

/// Where image pixels come from after construction.
enum ImageSource {
    /// Whole `[N, C, S, S]` array held in memory; the store has been released.
    Preloaded(Array),
    Store(Box<dyn ArrayStore>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Read the whole image array at construction instead of once per batch.
    pub preload_images: bool,
}

pub struct DatasetIndex {
    vocab: Vocabulary,
    filenames: Vec<String>,
    image_widths: Vec<usize>,
    image_heights: Vec<usize>,
    original_widths: Vec<usize>,
    original_heights: Vec<usize>,
    split_labels: Option<Vec<i64>>,
    box_to_img: Option<Vec<i64>>,
    lengths: Option<Vec<i64>>,
    regions: RegionStore,
    num_images: usize,
    num_channels: usize,
    max_image_size: usize,
    images: ImageSource,
}

fn per_image(store: &dyn ArrayStore, name: &str, n: usize) -> DatasetResult<Vec<i64>> {
    let values = read_required(store, name)?.data().to_i64_vec();
    check_len(name, &values, n)?;
    Ok(values)
}

fn check_len<T>(name: &str, values: &[T], n: usize) -> DatasetResult<()> {
    if values.len() != n {
        return Err(RegionDatasetError::ShapeMismatch {
            name: name.to_string(),
            shape: vec![values.len()],
            expected: format!("[{n}]"),
        });
    }
    Ok(())
}

fn to_dims(name: &str, values: Vec<i64>) -> DatasetResult<Vec<usize>> {
    values
        .into_iter()
        .map(|v| {
            usize::try_from(v)
                .map_err(|_| RegionDatasetError::Other(format!("negative value {v} in `{name}`")))
        })
        .collect()
}

impl DatasetIndex {
    pub fn open(
        store: Box<dyn ArrayStore>,
        metadata: MetadataDocument,
        opts: IndexOptions,
    ) -> DatasetResult<Self> {
        let t0 = Instant::now();
        if !store.contains(IMAGES) {
            return Err(RegionDatasetError::MissingArray(IMAGES.to_string()));
        }
        let image_shape = store.shape(IMAGES)?;
        if image_shape.len() != 4 {
            return Err(RegionDatasetError::ImagesNotFourDim(image_shape));
        }
        let (num_images, num_channels) = (image_shape[0], image_shape[1]);
        if image_shape[2] != image_shape[3] {
            return Err(RegionDatasetError::ImagesNotSquare {
                height: image_shape[2],
                width: image_shape[3],
            });
        }
        let max_image_size = image_shape[2];

        let s = store.as_ref();
        let first = per_image(s, "img_to_first_box", num_images)?;
        let last = per_image(s, "img_to_last_box", num_images)?;
        let image_widths = to_dims("image_widths", per_image(s, "image_widths", num_images)?)?;
        let image_heights = to_dims("image_heights", per_image(s, "image_heights", num_images)?)?;
        let original_widths =
            to_dims("original_widths", per_image(s, "original_widths", num_images)?)?;
        let original_heights =
            to_dims("original_heights", per_image(s, "original_heights", num_images)?)?;
        let split_labels = read_optional(s, "split")?.map(|a| a.data().to_i64_vec());
        if let Some(labels) = &split_labels {
            check_len("split", labels, num_images)?;
        }

        let boxes = read_required(s, "boxes")?;
        if boxes.ndim() != 2 || boxes.shape()[1] != 4 {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "boxes".to_string(),
                shape: boxes.shape().to_vec(),
                expected: "[R, 4]".to_string(),
            });
        }
        let num_regions = boxes.shape()[0];
        let labels = read_required(s, "labels")?;
        if labels.ndim() != 2 || labels.shape()[0] != num_regions {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "labels".to_string(),
                shape: labels.shape().to_vec(),
                expected: format!("[{num_regions}, L]"),
            });
        }
        let seq_len = labels.shape()[1];
        let box_to_img = read_optional(s, "box_to_img")?.map(|a| a.data().to_i64_vec());
        let lengths = read_optional(s, "lengths")?.map(|a| a.data().to_i64_vec());
        let regions = RegionStore::new(
            OffsetTable::new(first, last)?,
            boxes.data().to_f32_vec(),
            labels.data().to_i32_vec(),
            seq_len,
        )?;

        let filenames = metadata.filenames_for(num_images)?;
        let (vocab, _) = metadata.into_parts();

        let images = if opts.preload_images {
            let t_load = Instant::now();
            let all = store.read_all(IMAGES)?;
            tracing::info!(
                "[index] preloaded {} images ({}x{}x{}) in {} ms",
                num_images,
                num_channels,
                max_image_size,
                max_image_size,
                t_load.elapsed().as_millis()
            );
            ImageSource::Preloaded(all)
        } else {
            ImageSource::Store(store)
        };

        tracing::info!(
            "[index] {} images, {} regions, seq_len={}, vocab={}, canvas={} in {} ms",
            num_images,
            num_regions,
            seq_len,
            vocab.len(),
            max_image_size,
            t0.elapsed().as_millis()
        );

        Ok(Self {
            vocab,
            filenames,
            image_widths,
            image_heights,
            original_widths,
            original_heights,
            split_labels,
            box_to_img,
            lengths,
            regions,
            num_images,
            num_channels,
            max_image_size,
            images,
        })
    }

    pub fn num_images(&self) -> usize {
        self.num_images
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn max_image_size(&self) -> usize {
        self.max_image_size
    }

    pub fn seq_length(&self) -> usize {
        self.regions.seq_len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn regions(&self) -> &RegionStore {
        &self.regions
    }

    pub fn split_labels(&self) -> Option<&[i64]> {
        self.split_labels.as_deref()
    }

    pub fn box_to_img(&self) -> Option<&[i64]> {
        self.box_to_img.as_deref()
    }

    pub fn lengths(&self) -> Option<&[i64]> {
        self.lengths.as_deref()
    }

    pub fn is_preloaded(&self) -> bool {
        matches!(self.images, ImageSource::Preloaded(_))
    }

    fn check_image(&self, image: usize) -> DatasetResult<usize> {
        if image == 0 || image > self.num_images {
            return Err(RegionDatasetError::ImageOutOfRange {
                index: image,
                count: self.num_images,
            });
        }
        Ok(image - 1)
    }

    pub fn filename(&self, image: usize) -> DatasetResult<&str> {
        let i = self.check_image(image)?;
        self.filenames
            .get(i)
            .map(String::as_str)
            .ok_or(RegionDatasetError::MissingFilename(image))
    }

    pub fn image_dims(&self, image: usize) -> DatasetResult<ImageDims> {
        let i = self.check_image(image)?;
        Ok(ImageDims {
            width: self.image_widths[i],
            height: self.image_heights[i],
            original_width: self.original_widths[i],
            original_height: self.original_heights[i],
        })
    }

    /// Crop `image` to its stored size, widen to `f32` and subtract `mean[c]`
    /// per channel. Output is `[C, height, width]` row-major.
    pub fn read_image(&self, image: usize, mean: &[f32]) -> DatasetResult<Vec<f32>> {
        let i = self.check_image(image)?;
        let dims = self.image_dims(image)?;
        let s = self.max_image_size;
        if dims.width > s || dims.height > s {
            return Err(RegionDatasetError::ImageExceedsCanvas {
                image,
                width: dims.width,
                height: dims.height,
                canvas: s,
            });
        }
        if mean.len() != self.num_channels {
            return Err(RegionDatasetError::MeanChannelMismatch {
                mean: mean.len(),
                channels: self.num_channels,
            });
        }
        let c = self.num_channels;
        let per_image = c * s * s;
        let (data, base) = match &self.images {
            ImageSource::Preloaded(all) => (all.data(), i * per_image),
            ImageSource::Store(store) => {
                let one = store.read_partial(IMAGES, &[i..i + 1, 0..c, 0..s, 0..s])?;
                return Ok(crop_normalize(one.data(), 0, c, s, dims, mean));
            }
        };
        Ok(crop_normalize(data, base, c, s, dims, mean))
    }
}

fn crop_normalize(
    src: &crate::array::ArrayData,
    base: usize,
    channels: usize,
    canvas: usize,
    dims: ImageDims,
    mean: &[f32],
) -> Vec<f32> {
    let (h, w) = (dims.height, dims.width);
    let mut out = Vec::with_capacity(channels * h * w);
    for (ch, m) in mean.iter().enumerate().take(channels) {
        for y in 0..h {
            let row = base + (ch * canvas + y) * canvas;
            out.extend((0..w).map(|x| src.get_f32(row + x) - m));
        }
    }
    out
}
