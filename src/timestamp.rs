//! Embedded wall-clock timestamps.
//!
//! Some capture pipelines burn the capture time into every frame: a 64-bit
//! count of 100 ns ticks written along the top pixel row, most significant bit
//! first, two pixels per bit. A bit is set when the red channels of its two
//! pixels sum to more than [`BIT_THRESHOLD`].
//!
//! Some encoders shift the pattern down by one row, so row 1 is tried when
//! row 0 decodes to zero. Frames without a pattern get a timestamp estimated
//! from their index and the stream's frame rate.
//!
//! # Example
//!
//! ```
//! use framescrub::timestamp::{FrameTimestamp, encode_embedded};
//! use image::RgbaImage;
//!
//! let mut image = RgbaImage::new(160, 4);
//! encode_embedded(&mut image, 0, 17_000_000_000_000_000);
//!
//! let stamp = FrameTimestamp::resolve(&image, 0, 30.0);
//! assert!(stamp.embedded);
//! assert_eq!(stamp.millis, 1_700_000_000_000);
//! ```

use image::{Rgba, RgbaImage};

use crate::conversion::{ticks_to_micros, ticks_to_millis};

/// Number of bits in an embedded timestamp.
pub const TIMESTAMP_BITS: u32 = 64;
/// Horizontal pixels used per bit.
pub const PIXELS_PER_BIT: u32 = 2;
/// A bit is set when the summed red channel of its pixels exceeds this.
pub const BIT_THRESHOLD: u32 = 220;
/// Rows searched for a timestamp, in order.
const CANDIDATE_ROWS: [u32; 2] = [0, 1];

/// Decode the raw 100 ns tick count embedded in a frame.
///
/// Returns `None` when every candidate row decodes to zero or the image is
/// too small to carry a timestamp.
pub fn decode_embedded(image: &RgbaImage) -> Option<u64> {
    if image.width() < TIMESTAMP_BITS * PIXELS_PER_BIT {
        return None;
    }
    CANDIDATE_ROWS
        .iter()
        .filter(|&&row| row < image.height())
        .map(|&row| decode_row(image, row))
        .find(|&ticks| ticks != 0)
}

fn decode_row(image: &RgbaImage, row: u32) -> u64 {
    (0..TIMESTAMP_BITS).fold(0u64, |ticks, bit| {
        let column = bit * PIXELS_PER_BIT;
        let sum = u32::from(image.get_pixel(column, row)[0])
            + u32::from(image.get_pixel(column + 1, row)[0]);
        (ticks << 1) | u64::from(sum > BIT_THRESHOLD)
    })
}

/// Write a 100 ns tick count into `row` using the embedded pattern.
///
/// Set bits are painted white and clear bits black. Does nothing when the
/// image cannot hold the pattern.
pub fn encode_embedded(image: &mut RgbaImage, row: u32, ticks: u64) {
    if image.width() < TIMESTAMP_BITS * PIXELS_PER_BIT || row >= image.height() {
        return;
    }
    for bit in 0..TIMESTAMP_BITS {
        let set = (ticks >> (TIMESTAMP_BITS - 1 - bit)) & 1 == 1;
        let value = if set { 255 } else { 0 };
        for offset in 0..PIXELS_PER_BIT {
            image.put_pixel(bit * PIXELS_PER_BIT + offset, row, Rgba([value, value, value, 255]));
        }
    }
}

/// The wall-clock time of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimestamp {
    /// Milliseconds.
    pub millis: u64,
    /// Microseconds.
    pub micros: u64,
    /// Whether the value was decoded from pixels rather than estimated.
    pub embedded: bool,
}

impl FrameTimestamp {
    /// Build a timestamp from a decoded tick count.
    pub fn from_ticks(ticks: u64) -> Self {
        Self {
            millis: ticks_to_millis(ticks),
            micros: ticks_to_micros(ticks),
            embedded: true,
        }
    }

    /// Estimate a timestamp from a frame index, relative to the first frame.
    pub fn estimate(frame_index: i64, frames_per_second: f64) -> Self {
        if frames_per_second <= 0.0 || frame_index <= 0 {
            return Self {
                millis: 0,
                micros: 0,
                embedded: false,
            };
        }
        let seconds = frame_index as f64 / frames_per_second;
        Self {
            millis: (seconds * 1_000.0).round() as u64,
            micros: (seconds * 1_000_000.0).round() as u64,
            embedded: false,
        }
    }

    /// Decode the timestamp embedded in `image`, or estimate one.
    ///
    /// A decoded value whose microsecond form rounds to zero is treated as
    /// absent and replaced by the estimate.
    pub fn resolve(image: &RgbaImage, frame_index: i64, frames_per_second: f64) -> Self {
        match decode_embedded(image).map(Self::from_ticks) {
            Some(stamp) if stamp.micros != 0 => stamp,
            _ => Self::estimate(frame_index, frames_per_second),
        }
    }
}
