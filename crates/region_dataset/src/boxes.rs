//! Box format conversions.
//!
//! `xywh` is (top-left x, top-left y, width, height); `xcycwh` is
//! (center x, center y, width, height).

pub fn xywh_to_xcycwh(b: [f32; 4]) -> [f32; 4] {
    [b[0] + b[2] / 2.0, b[1] + b[3] / 2.0, b[2], b[3]]
}

pub fn xcycwh_to_xywh(b: [f32; 4]) -> [f32; 4] {
    [b[0] - b[2] / 2.0, b[1] - b[3] / 2.0, b[2], b[3]]
}

pub fn scale(b: [f32; 4], factor: f32) -> [f32; 4] {
    [b[0] * factor, b[1] * factor, b[2] * factor, b[3] * factor]
}

/// Rescale an `xywh + score` proposal by `factor` and convert it to `xcycwh + score`.
/// The score is left untouched.
pub fn rescale_proposal(row: [f32; 5], factor: f32) -> [f32; 5] {
    let b = xywh_to_xcycwh(scale([row[0], row[1], row[2], row[3]], factor));
    [b[0], b[1], b[2], b[3], row[4]]
}
