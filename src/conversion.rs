//! Internal conversion helpers.
//!
//! Time-base arithmetic shared by the seek engine and the FFmpeg adapter,
//! plus compaction of padded RGBA planes into tightly packed images.

use ffmpeg_next::Rational;
use image::RgbaImage;

use crate::{decoder::RgbaPlane, error::ScrubError};

/// Convert a rational to `f64`, mapping a zero denominator to zero.
pub fn rational_to_f64(value: Rational) -> f64 {
    if value.denominator() == 0 {
        0.0
    } else {
        value.numerator() as f64 / value.denominator() as f64
    }
}

/// Map a stream timestamp to an absolute frame number.
///
/// `round(fps × (timestamp − start) × time_base)`. The result is absolute:
/// callers subtract the stream's first frame number to get a logical index.
pub fn timestamp_to_frame_number(
    timestamp: i64,
    start_offset: i64,
    time_base: Rational,
    frames_per_second: f64,
) -> i64 {
    let seconds = (timestamp - start_offset) as f64 * rational_to_f64(time_base);
    (frames_per_second * seconds).round() as i64
}

/// Map a logical frame index to the stream timestamp it is presented at.
///
/// Inverse of [`timestamp_to_frame_number`] once `first_frame_number` is added
/// back. Used as the target of container seeks.
pub fn frame_index_to_stream_timestamp(
    frame_index: i64,
    first_frame_number: i64,
    start_offset: i64,
    time_base: Rational,
    frames_per_second: f64,
) -> i64 {
    let tick = rational_to_f64(time_base);
    if frames_per_second <= 0.0 || tick <= 0.0 {
        return start_offset;
    }
    let seconds = (frame_index + first_frame_number) as f64 / frames_per_second;
    start_offset + (seconds / tick + 0.5).floor() as i64
}

/// Round a 100 ns tick count to milliseconds.
pub fn ticks_to_millis(ticks: u64) -> u64 {
    ticks.saturating_add(5_000) / 10_000
}

/// Round a 100 ns tick count to microseconds.
pub fn ticks_to_micros(ticks: u64) -> u64 {
    ticks.saturating_add(5) / 10
}

/// Copy an RGBA plane into a tightly packed [`RgbaImage`].
///
/// Rows are copied one by one when the plane's stride carries padding.
pub fn compact_rows(plane: &RgbaPlane) -> Result<RgbaImage, ScrubError> {
    let row_bytes = plane.width as usize * 4;
    let height = plane.height as usize;

    if plane.stride < row_bytes {
        return Err(ScrubError::PixelConversion(format!(
            "stride {} is shorter than a {}-pixel row",
            plane.stride, plane.width
        )));
    }
    let required = if height == 0 {
        0
    } else {
        plane.stride * (height - 1) + row_bytes
    };
    if plane.data.len() < required {
        return Err(ScrubError::PixelConversion(format!(
            "plane holds {} bytes, {required} needed for {}x{}",
            plane.data.len(),
            plane.width,
            plane.height
        )));
    }

    let buffer = if plane.stride == row_bytes {
        plane.data[..row_bytes * height].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * height);
        for row in 0..height {
            let row_start = row * plane.stride;
            buffer.extend_from_slice(&plane.data[row_start..row_start + row_bytes]);
        }
        buffer
    };

    RgbaImage::from_raw(plane.width, plane.height, buffer).ok_or_else(|| {
        ScrubError::PixelConversion(format!(
            "buffer does not match {}x{} RGBA",
            plane.width, plane.height
        ))
    })
}
