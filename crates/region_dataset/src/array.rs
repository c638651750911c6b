//! Typed n-dimensional array values and range-partial slicing.

use crate::types::{DatasetResult, RegionDatasetError};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    U8,
    I32,
    F32,
}

impl DType {
    pub fn size_of(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 => 4,
            DType::F32 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::F32 => "f32",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Little,
    Big,
}

/// Flat, row-major element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    U8(Vec<u8>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl ArrayData {
    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        match dtype {
            DType::U8 => ArrayData::U8(Vec::with_capacity(capacity)),
            DType::I32 => ArrayData::I32(Vec::with_capacity(capacity)),
            DType::F32 => ArrayData::F32(Vec::with_capacity(capacity)),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::U8(_) => DType::U8,
            ArrayData::I32(_) => DType::I32,
            ArrayData::F32(_) => DType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::U8(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `idx` widened to `f32`. Panics if `idx` is out of bounds.
    pub fn get_f32(&self, idx: usize) -> f32 {
        match self {
            ArrayData::U8(v) => v[idx] as f32,
            ArrayData::I32(v) => v[idx] as f32,
            ArrayData::F32(v) => v[idx],
        }
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            ArrayData::U8(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::I32(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::F32(v) => v.clone(),
        }
    }

    /// Integer view; float elements are truncated toward zero.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        match self {
            ArrayData::U8(v) => v.iter().map(|&x| x as i64).collect(),
            ArrayData::I32(v) => v.iter().map(|&x| x as i64).collect(),
            ArrayData::F32(v) => v.iter().map(|&x| x as i64).collect(),
        }
    }

    pub fn to_i32_vec(&self) -> Vec<i32> {
        match self {
            ArrayData::U8(v) => v.iter().map(|&x| x as i32).collect(),
            ArrayData::I32(v) => v.clone(),
            ArrayData::F32(v) => v.iter().map(|&x| x as i32).collect(),
        }
    }

    /// Append `src[range]`; both sides must share a dtype.
    pub(crate) fn extend_from(&mut self, src: &ArrayData, range: Range<usize>) -> DatasetResult<()> {
        match (self, src) {
            (ArrayData::U8(dst), ArrayData::U8(s)) => dst.extend_from_slice(&s[range]),
            (ArrayData::I32(dst), ArrayData::I32(s)) => dst.extend_from_slice(&s[range]),
            (ArrayData::F32(dst), ArrayData::F32(s)) => dst.extend_from_slice(&s[range]),
            (dst, s) => {
                return Err(RegionDatasetError::Other(format!(
                    "dtype mismatch copying {} into {}",
                    s.dtype().as_str(),
                    dst.dtype().as_str()
                )))
            }
        }
        Ok(())
    }

    /// Decode raw bytes (a whole number of elements) and append them.
    pub(crate) fn extend_from_bytes(&mut self, bytes: &[u8], endianness: Endianness) {
        match self {
            ArrayData::U8(v) => v.extend_from_slice(bytes),
            ArrayData::I32(v) => v.extend(bytes.chunks_exact(4).map(|c| {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(c);
                match endianness {
                    Endianness::Little => i32::from_le_bytes(arr),
                    Endianness::Big => i32::from_be_bytes(arr),
                }
            })),
            ArrayData::F32(v) => v.extend(bytes.chunks_exact(4).map(|c| {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(c);
                match endianness {
                    Endianness::Little => f32::from_le_bytes(arr),
                    Endianness::Big => f32::from_be_bytes(arr),
                }
            })),
        }
    }

    pub(crate) fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            ArrayData::U8(v) => v.clone(),
            ArrayData::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    data: ArrayData,
}

impl Array {
    pub fn new(shape: Vec<usize>, data: ArrayData) -> DatasetResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(RegionDatasetError::Other(format!(
                "shape {:?} holds {} elements but data has {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> DatasetResult<Self> {
        Self::new(shape, ArrayData::U8(data))
    }

    pub fn from_i32(shape: Vec<usize>, data: Vec<i32>) -> DatasetResult<Self> {
        Self::new(shape, ArrayData::I32(data))
    }

    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> DatasetResult<Self> {
        Self::new(shape, ArrayData::F32(data))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// Copy out the sub-array selected by one half-open range per dimension.
    pub fn slice(&self, name: &str, ranges: &[Range<usize>]) -> DatasetResult<Array> {
        let out_shape = check_ranges(name, &self.shape, ranges)?;
        let mut out = ArrayData::with_capacity(self.dtype(), out_shape.iter().product());
        for_each_run(&self.shape, ranges, |start, len| {
            out.extend_from(&self.data, start..start + len)
        })?;
        Array::new(out_shape, out)
    }
}

/// Validate `ranges` against `shape` and return the selected shape.
pub(crate) fn check_ranges(
    name: &str,
    shape: &[usize],
    ranges: &[Range<usize>],
) -> DatasetResult<Vec<usize>> {
    if ranges.len() != shape.len() {
        return Err(RegionDatasetError::ShapeMismatch {
            name: name.to_string(),
            shape: shape.to_vec(),
            expected: format!("{} ranges", ranges.len()),
        });
    }
    ranges
        .iter()
        .zip(shape)
        .enumerate()
        .map(|(dim, (r, &extent))| {
            if r.start > r.end || r.end > extent {
                Err(RegionDatasetError::RangeOutOfBounds {
                    name: name.to_string(),
                    dim,
                    start: r.start,
                    end: r.end,
                    extent,
                })
            } else {
                Ok(r.end - r.start)
            }
        })
        .collect()
}

/// Visit every contiguous run of the selection along the last dimension.
///
/// `f` receives (first flat element index, run length). Ranges must already
/// be validated with [`check_ranges`].
pub(crate) fn for_each_run<F>(shape: &[usize], ranges: &[Range<usize>], mut f: F) -> DatasetResult<()>
where
    F: FnMut(usize, usize) -> DatasetResult<()>,
{
    let ndim = shape.len();
    if ndim == 0 || ranges.iter().any(|r| r.start == r.end) {
        return Ok(());
    }
    let mut strides = vec![1usize; ndim];
    for d in (0..ndim - 1).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    let last = &ranges[ndim - 1];
    let run_len = last.end - last.start;
    let mut idx: Vec<usize> = ranges[..ndim - 1].iter().map(|r| r.start).collect();
    loop {
        let base: usize = idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
        f(base + last.start, run_len)?;

        // Odometer over the leading dimensions.
        let mut d = ndim - 1;
        loop {
            if d == 0 {
                return Ok(());
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < ranges[d].end {
                break;
            }
            idx[d] = ranges[d].start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: Vec<usize>) -> Array {
        let n = shape.iter().product::<usize>();
        Array::from_i32(shape, (0..n as i32).collect()).unwrap()
    }

    #[test]
    fn slice_picks_inner_block() {
        let a = iota(vec![2, 3, 4]);
        let s = a.slice("a", &[1..2, 0..2, 1..3]).unwrap();
        assert_eq!(s.shape(), &[1, 2, 2]);
        assert_eq!(s.data(), &ArrayData::I32(vec![13, 14, 17, 18]));
    }

    #[test]
    fn empty_range_yields_empty_array() {
        let a = iota(vec![5, 4]);
        let s = a.slice("a", &[2..2, 0..4]).unwrap();
        assert_eq!(s.shape(), &[0, 4]);
        assert!(s.data().is_empty());
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let a = iota(vec![5, 4]);
        let err = a.slice("boxes", &[3..6, 0..4]).unwrap_err();
        assert!(matches!(
            err,
            RegionDatasetError::RangeOutOfBounds { dim: 0, end: 6, extent: 5, .. }
        ));
    }

    #[test]
    fn wrong_rank_is_rejected() {
        let a = iota(vec![5, 4]);
        assert!(a.slice("a", &[0..1]).is_err());
    }

    #[test]
    fn bytes_round_trip_through_little_endian() {
        let data = ArrayData::F32(vec![1.5, -2.0]);
        let mut back = ArrayData::with_capacity(DType::F32, 2);
        back.extend_from_bytes(&data.to_le_bytes(), Endianness::Little);
        assert_eq!(back, data);
    }
}
