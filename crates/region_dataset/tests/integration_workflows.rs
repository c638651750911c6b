//! Integration tests for end-to-end region_dataset workflows.
//!
//! These tests write a small store to disk and drive it through the loader:
//! 1. Store writing -> DiskStore (mmap and streamed) -> batch assembly
//! 2. Split cursors, debug caps and random draws
//! 3. Proposal rescaling, config loading and bounds checking

use region_dataset::metadata::MetadataFile;
use region_dataset::{
    Array, DatasetIndex, DiskStore, DiskStoreWriter, IndexOptions, LoaderConfig, LoaderOptions,
    MetadataDocument, ProposalStore, RegionDatasetError, RegionLoader, Split, SplitPolicy,
    StoreMode,
};
use std::fs;
use std::path::Path;

const CANVAS: usize = 4;
const CHANNELS: usize = 3;
const WIDTHS: [i32; 5] = [4, 3, 4, 2, 4];
const HEIGHTS: [i32; 5] = [4, 4, 2, 3, 4];
const MEAN: [f32; 3] = [1.0, 2.0, 3.0];

fn pixel(image: usize, c: usize, y: usize, x: usize) -> u8 {
    ((image - 1) * 50 + c * 16 + y * 4 + x) as u8
}

/// Writes a 5-image store: train = {1, 2, 5}, val = {3}, test = {4}.
/// Image 3 has no regions.
fn write_index(root: &Path, last: [i32; 5]) -> anyhow::Result<()> {
    let mut pixels = Vec::new();
    for i in 1..=5 {
        for c in 0..CHANNELS {
            for y in 0..CANVAS {
                for x in 0..CANVAS {
                    pixels.push(pixel(i, c, y, x));
                }
            }
        }
    }
    let per_image = |v: &[i32]| Array::from_i32(vec![5], v.to_vec());
    let mut writer = DiskStoreWriter::new(root)?;
    writer.write_array(
        "images",
        &Array::from_u8(vec![5, CHANNELS, CANVAS, CANVAS], pixels)?,
    )?;
    writer.write_array("split", &per_image(&[0, 0, 1, 2, 0])?)?;
    writer.write_array("img_to_first_box", &per_image(&[1, 3, 4, 4, 6])?)?;
    writer.write_array("img_to_last_box", &per_image(&last)?)?;
    writer.write_array("image_widths", &per_image(&WIDTHS)?)?;
    writer.write_array("image_heights", &per_image(&HEIGHTS)?)?;
    writer.write_array("original_widths", &per_image(&[8, 6, 8, 4, 8])?)?;
    writer.write_array("original_heights", &per_image(&[8, 8, 4, 6, 8])?)?;
    writer.write_array(
        "boxes",
        &Array::from_i32(vec![6, 4], (0..24).collect())?,
    )?;
    writer.write_array(
        "labels",
        &Array::from_i32(
            vec![6, 3],
            vec![1, 3, 5, 2, 3, 0, 4, 5, 5, 1, 2, 3, 3, 0, 0, 2, 5, 5],
        )?,
    )?;
    writer.write_array("box_to_img", &Array::from_i32(vec![6], vec![1, 1, 2, 4, 4, 5])?)?;
    writer.write_array("lengths", &Array::from_i32(vec![6], vec![2, 2, 1, 3, 1, 1])?)?;
    writer.finish()?;
    Ok(())
}

fn write_metadata(path: &Path) -> anyhow::Result<()> {
    let mut file = MetadataFile::default();
    for (i, word) in ["a", "red", "cat", "sits"].iter().enumerate() {
        file.idx_to_token.insert((i + 1).to_string(), word.to_string());
    }
    for i in 1..=5 {
        file.idx_to_filename.insert(i.to_string(), format!("{i}.jpg"));
    }
    fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    Ok(())
}

fn write_proposals(root: &Path) -> anyhow::Result<()> {
    let mut writer = DiskStoreWriter::new(root)?.without_checksums();
    writer.write_array("img_to_first_box", &Array::from_i32(vec![5], vec![1, 2, 2, 2, 3])?)?;
    writer.write_array("img_to_last_box", &Array::from_i32(vec![5], vec![1, 1, 1, 2, 2])?)?;
    writer.write_array(
        "boxes",
        &Array::from_f32(
            vec![2, 5],
            vec![2.0, 2.0, 4.0, 6.0, 0.9, 0.0, 0.0, 2.0, 2.0, 0.4],
        )?,
    )?;
    writer.finish()?;
    Ok(())
}

fn fixture(root: &Path) -> anyhow::Result<()> {
    write_index(&root.join("index"), [2, 3, 3, 5, 6])?;
    write_metadata(&root.join("metadata.json"))?;
    write_proposals(&root.join("proposals"))?;
    Ok(())
}

fn open_loader(root: &Path, mode: StoreMode, preload: bool, opts: LoaderOptions) -> anyhow::Result<RegionLoader> {
    let store = DiskStore::open(&root.join("index"), mode)?;
    let metadata = MetadataDocument::load(&root.join("metadata.json"))?;
    let index = DatasetIndex::open(
        Box::new(store),
        metadata,
        IndexOptions {
            preload_images: preload,
        },
    )?;
    Ok(RegionLoader::new(index, opts)?)
}

fn test_options() -> LoaderOptions {
    LoaderOptions {
        pixel_mean: MEAN.to_vec(),
        seed: Some(11),
        log_every: None,
        ..LoaderOptions::default()
    }
}

fn expected_image(image: usize) -> Vec<f32> {
    let (w, h) = (WIDTHS[image - 1] as usize, HEIGHTS[image - 1] as usize);
    let mut out = Vec::new();
    for (c, m) in MEAN.iter().enumerate() {
        for y in 0..h {
            for x in 0..w {
                out.push(pixel(image, c, y, x) as f32 - m);
            }
        }
    }
    out
}

#[test]
fn sequential_train_iteration_wraps() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let mut loader = open_loader(tmp.path(), StoreMode::Mmap, false, test_options())?;

    let mut seen = Vec::new();
    for _ in 0..4 {
        let batch = loader.get_batch(Split::Train, true)?;
        seen.push((batch.info.image_index, batch.info.split_bounds));
    }
    assert_eq!(seen, vec![(1, (1, 3)), (2, (2, 3)), (5, (3, 3)), (1, (1, 3))]);

    loader.get_batch(Split::Train, true)?;
    loader.reset_iterator(Split::Train);
    assert_eq!(loader.get_batch(Split::Train, true)?.info.image_index, 1);
    Ok(())
}

#[test]
fn splits_cover_every_image_exactly_once() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let loader = open_loader(tmp.path(), StoreMode::Mmap, false, test_options())?;
    let assignment = loader.splits().assignment();
    let mut all: Vec<usize> = Split::ALL
        .iter()
        .flat_map(|s| assignment.images(*s).to_vec())
        .collect();
    all.sort_unstable();
    assert_eq!(all, vec![1, 2, 3, 4, 5]);
    assert_eq!(assignment.images(Split::Val), &[3]);
    assert_eq!(assignment.images(Split::Test), &[4]);
    Ok(())
}

#[test]
fn batch_contents_match_across_modes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    for (mode, preload) in [
        (StoreMode::Mmap, false),
        (StoreMode::Mmap, true),
        (StoreMode::Streamed, false),
        (StoreMode::Streamed, true),
    ] {
        let mut loader = open_loader(tmp.path(), mode, preload, test_options())?;
        assert_eq!(loader.index().is_preloaded(), preload);
        for split in Split::ALL {
            let n = loader.splits().split_len(split);
            for _ in 0..n {
                let batch = loader.get_batch(split, true)?;
                let ix = batch.info.image_index;
                assert_eq!(batch.info.split, split);
                assert_eq!(batch.info.filename, format!("{ix}.jpg"));
                assert_eq!(
                    batch.image.shape(),
                    [1, CHANNELS, HEIGHTS[ix - 1] as usize, WIDTHS[ix - 1] as usize]
                );
                assert_eq!(batch.image.data, expected_image(ix), "{mode:?} preload={preload} image {ix}");
            }
        }
    }
    Ok(())
}

#[test]
fn regions_follow_inclusive_offsets() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let mut loader = open_loader(tmp.path(), StoreMode::Streamed, false, test_options())?;

    let first = loader.get_batch(Split::Train, true)?;
    assert_eq!(first.regions.boxes_shape(), [1, 2, 4]);
    assert_eq!(first.regions.labels_shape(), [1, 2, 3]);
    assert_eq!(first.regions.box_at(1), Some([4.0, 5.0, 6.0, 7.0]));
    assert_eq!(
        loader.vocab().decode_rows(&first.regions.labels, 3),
        vec!["a cat".to_string(), "red cat".to_string()]
    );

    let empty = loader.get_batch(Split::Val, true)?;
    assert_eq!(empty.info.image_index, 3);
    assert_eq!(empty.regions.count, 0);
    assert_eq!(empty.regions.boxes_shape(), [1, 0, 4]);

    let test = loader.get_batch(Split::Test, true)?;
    assert_eq!(test.regions.count, 2);
    assert_eq!(test.info.ori_width, 4);
    assert_eq!(test.info.ori_height, 6);
    Ok(())
}

#[test]
fn decode_sequence_truncates_at_end_marker() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let loader = open_loader(tmp.path(), StoreMode::Mmap, false, test_options())?;
    assert_eq!(loader.vocab_size(), 4);
    assert_eq!(loader.seq_length(), 3);
    assert_eq!(loader.max_image_size(), CANVAS);

    // Columns: [2, 3, 5] and [4, 0, 1].
    let decoded = loader.decode_sequence(&[2, 4, 3, 0, 5, 1], [3, 2])?;
    assert_eq!(decoded, vec!["red cat".to_string(), "sits".to_string()]);
    Ok(())
}

#[test]
fn debug_cap_limits_every_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let opts = LoaderOptions {
        debug_max_images: Some(2),
        ..test_options()
    };
    let mut loader = open_loader(tmp.path(), StoreMode::Mmap, false, opts)?;
    let order: Vec<usize> = (0..3)
        .map(|_| loader.get_batch(Split::Train, true).map(|b| b.info.image_index))
        .collect::<Result<_, _>>()?;
    assert_eq!(order, vec![1, 2, 1]);
    // Reported split size is not capped.
    assert_eq!(loader.get_batch(Split::Train, true)?.info.split_bounds.1, 3);

    for _ in 0..20 {
        let ix = loader.get_batch(Split::Train, false)?.info.image_index;
        assert!(ix == 1 || ix == 2, "random draw {ix} outside capped train split");
    }

    // train = {1, 2}, val = {3, 4}, test = {5}; cap of one image per split.
    let opts = LoaderOptions {
        split: SplitPolicy::Fractions { train: 0.25, val: 0.5 },
        debug_max_images: Some(1),
        ..test_options()
    };
    let mut loader = open_loader(tmp.path(), StoreMode::Mmap, false, opts)?;
    assert_eq!(loader.splits().effective_len(Split::Val), 1);
    for _ in 0..3 {
        let info = loader.get_batch(Split::Val, true)?.info;
        assert_eq!((info.image_index, info.split_bounds), (3, (1, 2)));
    }
    for _ in 0..10 {
        assert_eq!(loader.get_batch(Split::Val, false)?.info.image_index, 3);
    }
    Ok(())
}

#[test]
fn proposals_are_rescaled_per_image() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let proposals = ProposalStore::open(Box::new(DiskStore::open(
        &tmp.path().join("proposals"),
        StoreMode::Mmap,
    )?))?;
    let mut loader =
        open_loader(tmp.path(), StoreMode::Mmap, false, test_options())?.with_proposals(proposals);

    let first = loader.get_batch(Split::Train, true)?;
    let p = first.proposals.expect("proposal source configured");
    assert_eq!(p.shape(), [1, 1, 5]);
    assert_eq!(p.boxes[0], [2.0, 2.5, 2.0, 3.0, 0.9]);

    let second = loader.get_batch(Split::Train, true)?;
    assert_eq!(second.proposals.map(|p| p.count()), Some(0));

    let test = loader.get_batch(Split::Test, true)?;
    assert_eq!(test.proposals.map(|p| p.boxes), Some(vec![[0.5, 0.5, 1.0, 1.0, 0.4]]));
    Ok(())
}

#[test]
fn loader_opens_from_config_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let cfg_path = tmp.path().join("region-dataset.toml");
    fs::write(
        &cfg_path,
        "index_dir = \"index\"\nmetadata_path = \"metadata.json\"\nproposals_dir = \"proposals\"\n\
         store_mode = \"streamed\"\npreload_images = true\npixel_mean = [1.0, 2.0, 3.0]\n\
         seed = 3\nlog_every = 0\n\n[split]\npolicy = \"fractions\"\ntrain = 0.5\nval = 0.25\n",
    )?;
    let cfg = LoaderConfig::from_path(&cfg_path)?;
    assert_eq!(cfg.split, SplitPolicy::Fractions { train: 0.5, val: 0.25 });

    let mut loader = RegionLoader::from_config(&cfg)?;
    assert!(loader.index().is_preloaded());
    let a = loader.splits().assignment();
    assert_eq!(a.images(Split::Train), &[1, 2, 3]);
    assert_eq!(a.images(Split::Val), &[4]);
    assert_eq!(a.images(Split::Test), &[5]);

    let batch = loader.get_batch(Split::Val, true)?;
    assert_eq!(batch.info.image_index, 4);
    assert!(batch.proposals.is_some());
    assert_eq!(batch.image.data, expected_image(4));
    Ok(())
}

#[test]
fn empty_split_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let opts = LoaderOptions {
        split: SplitPolicy::Fractions { train: 1.0, val: 0.0 },
        ..test_options()
    };
    let mut loader = open_loader(tmp.path(), StoreMode::Mmap, false, opts)?;
    assert!(matches!(
        loader.get_batch(Split::Val, true),
        Err(RegionDatasetError::EmptySplit(Split::Val))
    ));
    assert!(matches!(
        loader.get_batch(Split::Test, false),
        Err(RegionDatasetError::EmptySplit(Split::Test))
    ));
    assert_eq!(loader.get_batch(Split::Train, true)?.info.split_bounds, (1, 5));
    Ok(())
}

#[test]
fn out_of_bounds_offsets_are_caught() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_index(&tmp.path().join("index"), [2, 3, 3, 5, 9])?;
    write_metadata(&tmp.path().join("metadata.json"))?;

    let strict = LoaderOptions {
        strict_bounds: true,
        ..test_options()
    };
    assert!(matches!(
        open_loader(tmp.path(), StoreMode::Mmap, false, strict),
        Err(e) if matches!(
            e.downcast_ref::<RegionDatasetError>(),
            Some(RegionDatasetError::Validation(_))
        )
    ));

    let mut lenient = open_loader(tmp.path(), StoreMode::Mmap, false, test_options())?;
    lenient.get_batch(Split::Train, true)?;
    lenient.get_batch(Split::Train, true)?;
    assert!(matches!(
        lenient.get_batch(Split::Train, true),
        Err(RegionDatasetError::OffsetsOutOfBounds { image: 5, .. })
    ));
    Ok(())
}

#[test]
fn corrupted_array_fails_checksum() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let labels = tmp.path().join("index").join("labels.bin");
    let mut bytes = fs::read(&labels)?;
    bytes[0] ^= 0xff;
    fs::write(&labels, bytes)?;
    for mode in [StoreMode::Mmap, StoreMode::Streamed] {
        assert!(matches!(
            DiskStore::open(&tmp.path().join("index"), mode),
            Err(RegionDatasetError::Checksum { ref name, .. }) if name == "labels"
        ));
    }
    Ok(())
}

#[cfg(feature = "burn-runtime")]
#[test]
fn batch_converts_to_burn_tensors() -> anyhow::Result<()> {
    use burn::backend::ndarray::NdArray;

    let tmp = tempfile::tempdir()?;
    fixture(tmp.path())?;
    let proposals = ProposalStore::open(Box::new(DiskStore::open(
        &tmp.path().join("proposals"),
        StoreMode::Mmap,
    )?))?;
    let mut loader =
        open_loader(tmp.path(), StoreMode::Mmap, false, test_options())?.with_proposals(proposals);
    let batch = loader.get_batch(Split::Train, true)?;
    let device = Default::default();
    let tensors = batch.to_burn::<NdArray<f32>>(&device);
    assert_eq!(tensors.image.dims(), [1, 3, 4, 4]);
    assert_eq!(tensors.boxes.dims(), [1, 2, 4]);
    assert_eq!(tensors.labels.dims(), [1, 2, 3]);
    assert_eq!(tensors.proposals.map(|p| p.dims()), Some([1, 1, 5]));
    Ok(())
}
