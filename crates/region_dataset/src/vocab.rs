//! Token vocabulary and sequence decoding.

use crate::types::{DatasetResult, RegionDatasetError};
use std::collections::BTreeMap;

/// Token ids `1..=V` mapped to words. Any id outside that range ends a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<String>,
}

impl Vocabulary {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// Build from an id map that must cover `1..=max_id` without gaps.
    pub fn from_id_map(map: BTreeMap<usize, String>) -> DatasetResult<Self> {
        let mut tokens = Vec::with_capacity(map.len());
        for (expected, (id, token)) in (1..).zip(map) {
            if id != expected {
                return Err(RegionDatasetError::VocabularyGap(expected));
            }
            tokens.push(token);
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Conventional end-of-sequence id (`V + 1`).
    pub fn end_token(&self) -> i32 {
        self.tokens.len() as i32 + 1
    }

    pub fn token(&self, id: i32) -> Option<&str> {
        if id < 1 {
            return None;
        }
        self.tokens.get(id as usize - 1).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.tokens.iter().enumerate().map(|(i, t)| (i + 1, t.as_str()))
    }

    /// Number of real words before the first end marker.
    pub fn sequence_length(&self, seq: &[i32]) -> usize {
        seq.iter().take_while(|&&id| self.token(id).is_some()).count()
    }

    pub fn decode_one(&self, seq: &[i32]) -> String {
        let words: Vec<&str> = seq.iter().map_while(|&id| self.token(id)).collect();
        words.join(" ")
    }

    /// Decode `count` sequences stored column-wise in a `[seq_len, count]` matrix.
    pub fn decode_sequence(&self, seqs: &[i32], shape: [usize; 2]) -> DatasetResult<Vec<String>> {
        let [seq_len, count] = shape;
        if seq_len.checked_mul(count) != Some(seqs.len()) {
            return Err(RegionDatasetError::ShapeMismatch {
                name: "sequences".to_string(),
                shape: vec![seqs.len()],
                expected: format!("{seq_len}x{count} elements"),
            });
        }
        Ok((0..count)
            .map(|n| {
                let column: Vec<i32> = (0..seq_len).map(|t| seqs[t * count + n]).collect();
                self.decode_one(&column)
            })
            .collect())
    }

    /// Decode row-major `[rows, seq_len]` label matrices (the layout of region labels).
    pub fn decode_rows(&self, labels: &[i32], seq_len: usize) -> Vec<String> {
        if seq_len == 0 {
            return Vec::new();
        }
        labels.chunks(seq_len).map(|row| self.decode_one(row)).collect()
    }
}
