//! Loader configuration: TOML file plus environment overrides.

use crate::batch::{LoaderOptions, DEFAULT_LOG_EVERY_BATCHES, VGG_MEAN_BGR};
use crate::disk::StoreMode;
use crate::splits::SplitPolicy;
use crate::types::{DatasetResult, RegionDatasetError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "region-dataset.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory of the main array store.
    pub index_dir: PathBuf,
    /// JSON metadata document (vocabulary + filenames).
    pub metadata_path: PathBuf,
    /// Optional directory of a proposal array store.
    pub proposals_dir: Option<PathBuf>,
    pub split: SplitPolicy,
    pub preload_images: bool,
    /// Cap on the train split's effective size; 0 or absent means no cap.
    pub debug_max_images: Option<usize>,
    /// Per-channel mean, in the stored image's channel order.
    pub pixel_mean: Vec<f32>,
    pub seed: Option<u64>,
    pub store_mode: StoreMode,
    /// Validate every offset range and image size at construction.
    pub strict_bounds: bool,
    /// Progress log interval in batches; 0 disables it.
    pub log_every: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let data_root = PathBuf::from("data");
        Self {
            index_dir: data_root.join("index"),
            metadata_path: data_root.join("metadata.json"),
            proposals_dir: None,
            split: SplitPolicy::Indicator,
            preload_images: false,
            debug_max_images: None,
            pixel_mean: VGG_MEAN_BGR.to_vec(),
            seed: None,
            store_mode: StoreMode::Mmap,
            strict_bounds: false,
            log_every: DEFAULT_LOG_EVERY_BATCHES,
        }
    }
}

impl LoaderConfig {
    /// Load `$REGION_DATASET_CONFIG`, else [`DEFAULT_CONFIG_NAME`] if present,
    /// else defaults; then apply environment overrides.
    pub fn load() -> DatasetResult<Self> {
        let mut cfg = match std::env::var("REGION_DATASET_CONFIG") {
            Ok(path) => Self::from_path(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_NAME).exists() => {
                Self::from_path(Path::new(DEFAULT_CONFIG_NAME))?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| RegionDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut cfg: LoaderConfig = toml::from_str(&raw).map_err(|e| RegionDatasetError::Config {
            path: path.to_path_buf(),
            source: e,
        })?;
        // Relative paths resolve against the config file's directory.
        if let Some(base) = path.parent() {
            cfg.index_dir = resolve(base, &cfg.index_dir);
            cfg.metadata_path = resolve(base, &cfg.metadata_path);
            cfg.proposals_dir = cfg.proposals_dir.map(|p| resolve(base, &p));
        }
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        fn var(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.trim().is_empty())
        }
        if let Some(v) = var("REGION_DATASET_PRELOAD").and_then(|v| parse_flag(&v)) {
            self.preload_images = v;
        }
        if let Some(v) = var("REGION_DATASET_MAX_IMAGES").and_then(|v| v.trim().parse().ok()) {
            self.debug_max_images = Some(v);
        }
        if let Some(v) = var("REGION_DATASET_SEED").and_then(|v| v.trim().parse().ok()) {
            self.seed = Some(v);
        }
        if let Some(v) = var("REGION_DATASET_LOG_EVERY").and_then(|v| parse_log_every(&v)) {
            self.log_every = v;
        }
        if let Some(mode) = StoreMode::from_env() {
            self.store_mode = mode;
        }
    }

    pub fn validate(&self) -> DatasetResult<()> {
        self.split.validate()?;
        if self.pixel_mean.is_empty() {
            return Err(RegionDatasetError::InvalidConfig(
                "pixel_mean must name at least one channel".to_string(),
            ));
        }
        if self.pixel_mean.iter().any(|m| !m.is_finite()) {
            return Err(RegionDatasetError::InvalidConfig(format!(
                "pixel_mean contains non-finite values: {:?}",
                self.pixel_mean
            )));
        }
        Ok(())
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            split: self.split,
            debug_max_images: self.debug_max_images,
            pixel_mean: self.pixel_mean.clone(),
            seed: self.seed,
            strict_bounds: self.strict_bounds,
            log_every: Some(self.log_every).filter(|&n| n > 0),
        }
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() || base.as_os_str().is_empty() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_log_every(raw: &str) -> Option<usize> {
    if raw.trim().eq_ignore_ascii_case("off") {
        return Some(0);
    }
    raw.trim().parse().ok()
}
