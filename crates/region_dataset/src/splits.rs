//! Train/val/test assignment and per-split read cursors.

use crate::types::{DatasetResult, RegionDatasetError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn id(&self) -> usize {
        match self {
            Split::Train => 0,
            Split::Val => 1,
            Split::Test => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i64> for Split {
    type Error = RegionDatasetError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Split::Train),
            1 => Ok(Split::Val),
            2 => Ok(Split::Test),
            other => Err(RegionDatasetError::InvalidSplit(other)),
        }
    }
}

/// How images are assigned to splits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Use the per-image `split` array (values 0/1/2).
    #[default]
    Indicator,
    /// Contiguous blocks by image index; test takes the remainder.
    Fractions { train: f64, val: f64 },
}

impl SplitPolicy {
    pub fn validate(&self) -> DatasetResult<()> {
        if let SplitPolicy::Fractions { train, val } = *self {
            let ok = |f: f64| f.is_finite() && (0.0..=1.0).contains(&f);
            if !ok(train) || !ok(val) {
                return Err(RegionDatasetError::InvalidConfig(format!(
                    "split fractions must lie in [0, 1], got train={train} val={val}"
                )));
            }
            if train + val > 1.0 + f64::EPSILON {
                return Err(RegionDatasetError::InvalidConfig(format!(
                    "train + val fractions exceed 1 ({train} + {val})"
                )));
            }
        }
        Ok(())
    }
}

/// Disjoint, index-ordered lists of 1-based image ids per split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAssignment {
    lists: [Vec<usize>; 3],
}

impl SplitAssignment {
    /// `labels[i]` is the split id of image `i + 1`.
    pub fn from_indicator(labels: &[i64]) -> DatasetResult<Self> {
        let mut lists: [Vec<usize>; 3] = Default::default();
        for (i, &value) in labels.iter().enumerate() {
            let split = Split::try_from(value).map_err(|_| RegionDatasetError::InvalidSplitLabel {
                image: i + 1,
                value,
            })?;
            lists[split.id()].push(i + 1);
        }
        Ok(Self { lists })
    }

    /// Images `1..=b1` train, `b1+1..=b2` val, the rest test, where
    /// `b1 = ceil(n * train)` and `b2 = ceil(n * (train + val))`.
    pub fn from_fractions(n: usize, train: f64, val: f64) -> DatasetResult<Self> {
        SplitPolicy::Fractions { train, val }.validate()?;
        let bound = |f: f64| ((n as f64 * f).ceil() as usize).min(n);
        let b1 = bound(train);
        let b2 = bound(train + val).max(b1);
        Ok(Self {
            lists: [
                (1..=b1).collect(),
                (b1 + 1..=b2).collect(),
                (b2 + 1..=n).collect(),
            ],
        })
    }

    pub fn from_policy(
        policy: &SplitPolicy,
        n: usize,
        labels: Option<&[i64]>,
    ) -> DatasetResult<Self> {
        match *policy {
            SplitPolicy::Indicator => {
                let labels = labels.ok_or_else(|| RegionDatasetError::MissingArray("split".into()))?;
                if labels.len() != n {
                    return Err(RegionDatasetError::ShapeMismatch {
                        name: "split".to_string(),
                        shape: vec![labels.len()],
                        expected: format!("[{n}]"),
                    });
                }
                Self::from_indicator(labels)
            }
            SplitPolicy::Fractions { train, val } => Self::from_fractions(n, train, val),
        }
    }

    pub fn images(&self, split: Split) -> &[usize] {
        &self.lists[split.id()]
    }

    pub fn len(&self, split: Split) -> usize {
        self.lists[split.id()].len()
    }

    pub fn total(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    pub fn split_of(&self, image: usize) -> Option<Split> {
        Split::ALL
            .into_iter()
            .find(|s| self.images(*s).binary_search(&image).is_ok())
    }
}

/// A resolved draw from a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPosition {
    pub split: Split,
    /// 1-based position within the split.
    pub position: usize,
    /// 1-based global image index.
    pub image: usize,
    pub split_len: usize,
}

/// Owns the split assignment and one sequential cursor per split.
#[derive(Debug, Clone)]
pub struct SplitManager {
    assignment: SplitAssignment,
    /// 0-based next position per split.
    cursors: [usize; 3],
    max_images: Option<usize>,
    rng: StdRng,
}

impl SplitManager {
    pub fn new(assignment: SplitAssignment, debug_max_images: Option<usize>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            assignment,
            cursors: [0; 3],
            max_images: debug_max_images.filter(|&m| m > 0),
            rng,
        }
    }

    pub fn assignment(&self) -> &SplitAssignment {
        &self.assignment
    }

    pub fn split_len(&self, split: Split) -> usize {
        self.assignment.len(split)
    }

    /// Split size after the optional debug cap.
    pub fn effective_len(&self, split: Split) -> usize {
        let len = self.assignment.len(split);
        self.max_images.map_or(len, |max| len.min(max))
    }

    /// 1-based position the next sequential draw will return.
    pub fn cursor(&self, split: Split) -> usize {
        self.cursors[split.id()] + 1
    }

    pub fn reset(&mut self, split: Split) {
        self.cursors[split.id()] = 0;
    }

    /// Sequential (wrapping) draw when `iterate`, uniform random draw otherwise.
    pub fn next_position(&mut self, split: Split, iterate: bool) -> DatasetResult<SplitPosition> {
        let max = self.effective_len(split);
        if max == 0 {
            return Err(RegionDatasetError::EmptySplit(split));
        }
        let pos = if iterate {
            let cursor = &mut self.cursors[split.id()];
            let pos = *cursor % max;
            *cursor = if pos + 1 >= max { 0 } else { pos + 1 };
            pos
        } else {
            self.rng.random_range(0..max)
        };
        Ok(SplitPosition {
            split,
            position: pos + 1,
            image: self.assignment.images(split)[pos],
            split_len: self.assignment.len(split),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_partitions_every_image_once() {
        let labels = [0, 2, 1, 0, 0, 2, 1];
        let a = SplitAssignment::from_indicator(&labels).unwrap();
        assert_eq!(a.images(Split::Train), &[1, 4, 5]);
        assert_eq!(a.images(Split::Val), &[3, 7]);
        assert_eq!(a.images(Split::Test), &[2, 6]);
        for image in 1..=labels.len() {
            let hits = Split::ALL
                .iter()
                .filter(|s| a.images(**s).contains(&image))
                .count();
            assert_eq!(hits, 1, "image {image}");
        }
    }

    #[test]
    fn indicator_rejects_unknown_label() {
        assert!(matches!(
            SplitAssignment::from_indicator(&[0, 3]),
            Err(RegionDatasetError::InvalidSplitLabel { image: 2, value: 3 })
        ));
    }

    #[test]
    fn fractions_use_ceiling_boundaries() {
        let a = SplitAssignment::from_fractions(10, 0.5, 0.25).unwrap();
        assert_eq!(a.images(Split::Train), &[1, 2, 3, 4, 5]);
        assert_eq!(a.images(Split::Val), &[6, 7, 8]);
        assert_eq!(a.images(Split::Test), &[9, 10]);
        assert_eq!(a.total(), 10);
    }

    #[test]
    fn fractions_allow_empty_val() {
        let a = SplitAssignment::from_fractions(4, 0.5, 0.0).unwrap();
        assert_eq!(a.len(Split::Val), 0);
        assert_eq!(a.images(Split::Test), &[3, 4]);
    }

    #[test]
    fn fractions_are_validated() {
        assert!(SplitAssignment::from_fractions(4, 0.8, 0.5).is_err());
        assert!(SplitAssignment::from_fractions(4, -0.1, 0.5).is_err());
    }

    #[test]
    fn split_id_conversion() {
        assert_eq!(Split::try_from(1).unwrap(), Split::Val);
        assert!(matches!(
            Split::try_from(3),
            Err(RegionDatasetError::InvalidSplit(3))
        ));
    }

    #[test]
    fn sequential_cursor_wraps() {
        let a = SplitAssignment::from_indicator(&[1, 0, 1, 1]).unwrap();
        let mut m = SplitManager::new(a, None, Some(1));
        let got: Vec<usize> = (0..4)
            .map(|_| m.next_position(Split::Val, true).unwrap().position)
            .collect();
        assert_eq!(got, vec![1, 2, 3, 1]);
        m.reset(Split::Val);
        let p = m.next_position(Split::Val, true).unwrap();
        assert_eq!((p.position, p.image, p.split_len), (1, 1, 3));
    }

    #[test]
    fn debug_cap_limits_every_split() {
        let a = SplitAssignment::from_fractions(6, 0.5, 0.5).unwrap();
        let mut m = SplitManager::new(a, Some(2), Some(7));
        assert_eq!(m.effective_len(Split::Train), 2);
        assert_eq!(m.effective_len(Split::Val), 2);
        assert_eq!(m.effective_len(Split::Test), 0);
        let got: Vec<usize> = (0..3)
            .map(|_| m.next_position(Split::Train, true).unwrap().image)
            .collect();
        assert_eq!(got, vec![1, 2, 1]);
        for _ in 0..50 {
            let p = m.next_position(Split::Train, false).unwrap();
            assert!((1..=2).contains(&p.position));
            assert_eq!(p.split_len, 3);
        }
    }

    #[test]
    fn debug_cap_wraps_val_iteration() {
        let a = SplitAssignment::from_indicator(&[1, 1, 1, 0]).unwrap();
        let mut m = SplitManager::new(a, Some(1), Some(1));
        assert_eq!(m.effective_len(Split::Val), 1);
        let got: Vec<(usize, usize)> = (0..3)
            .map(|_| {
                let p = m.next_position(Split::Val, true).unwrap();
                (p.position, p.split_len)
            })
            .collect();
        assert_eq!(got, vec![(1, 3), (1, 3), (1, 3)]);
        for _ in 0..10 {
            assert_eq!(m.next_position(Split::Val, false).unwrap().image, 1);
        }
    }

    #[test]
    fn random_draw_leaves_cursor_alone() {
        let a = SplitAssignment::from_fractions(5, 1.0, 0.0).unwrap();
        let mut m = SplitManager::new(a, None, Some(3));
        m.next_position(Split::Train, true).unwrap();
        for _ in 0..20 {
            let p = m.next_position(Split::Train, false).unwrap();
            assert!((1..=5).contains(&p.position));
        }
        assert_eq!(m.cursor(Split::Train), 2);
    }

    #[test]
    fn empty_split_is_an_error() {
        let a = SplitAssignment::from_fractions(3, 1.0, 0.0).unwrap();
        let mut m = SplitManager::new(a, None, None);
        assert!(matches!(
            m.next_position(Split::Test, false),
            Err(RegionDatasetError::EmptySplit(Split::Test))
        ));
    }

    #[test]
    fn policy_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrap {
            split: SplitPolicy,
        }
        let w: Wrap = toml::from_str("[split]\npolicy = \"fractions\"\ntrain = 0.8\nval = 0.1\n").unwrap();
        assert_eq!(w.split, SplitPolicy::Fractions { train: 0.8, val: 0.1 });
        let w: Wrap = toml::from_str("[split]\npolicy = \"indicator\"\n").unwrap();
        assert_eq!(w.split, SplitPolicy::Indicator);
    }
}
