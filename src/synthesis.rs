//! Frames between frames.
//!
//! Given two neighbouring frames and the motion between them, a frame at a
//! fractional position `t` is approximated by sliding the scene along the
//! motion vector. With blending, both neighbours are moved to the
//! intermediate position and mixed with weights `(1 − t, t)`; without it,
//! only the earlier frame is moved.
//!
//! Pixels that slide in from outside the frame are opaque black.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::{
    cache::{CacheKey, FrameRecord},
    motion::MotionVector,
    region::Roi,
};

const BORDER: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Translate an image by a sub-pixel offset.
///
/// `shifted(x, y) = source(x − dx, y − dy)`, sampled bilinearly.
pub fn shift_image(source: &RgbaImage, dx: f64, dy: f64) -> RgbaImage {
    if dx == 0.0 && dy == 0.0 {
        return source.clone();
    }
    let (width, height) = source.dimensions();
    let max_x = f64::from(width) - 1.0;
    let max_y = f64::from(height) - 1.0;

    RgbaImage::from_fn(width, height, |x, y| {
        let sample_x = f64::from(x) - dx;
        let sample_y = f64::from(y) - dy;
        if sample_x < 0.0 || sample_y < 0.0 || sample_x > max_x || sample_y > max_y {
            return BORDER;
        }
        bilinear(source, sample_x, sample_y)
    })
}

fn bilinear(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let left = x.floor();
    let top = y.floor();
    let fx = x - left;
    let fy = y - top;
    let left = left as u32;
    let top = top as u32;
    let right = (left + 1).min(source.width() - 1);
    let bottom = (top + 1).min(source.height() - 1);

    let top_left = source.get_pixel(left, top).0;
    let top_right = source.get_pixel(right, top).0;
    let bottom_left = source.get_pixel(left, bottom).0;
    let bottom_right = source.get_pixel(right, bottom).0;

    let mut out = [0u8; 4];
    for channel in 0..4 {
        let upper = f64::from(top_left[channel]) * (1.0 - fx) + f64::from(top_right[channel]) * fx;
        let lower =
            f64::from(bottom_left[channel]) * (1.0 - fx) + f64::from(bottom_right[channel]) * fx;
        out[channel] = (upper * (1.0 - fy) + lower * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Mix two equally sized images with weights `(1 − t, t)`.
pub fn blend_images(first: &RgbaImage, second: &RgbaImage, t: f64) -> RgbaImage {
    let weight = t.clamp(0.0, 1.0);
    let (width, height) = first.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        let a = first.get_pixel(x, y).0;
        let b = if x < second.width() && y < second.height() {
            second.get_pixel(x, y).0
        } else {
            BORDER.0
        };
        let mut out = [0u8; 4];
        for channel in 0..4 {
            let value = f64::from(a[channel]) * (1.0 - weight) + f64::from(b[channel]) * weight;
            out[channel] = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgba(out)
    })
}

/// Inputs of one synthesis.
#[derive(Debug, Clone, Copy)]
pub struct Synthesis<'a> {
    /// The earlier frame.
    pub earlier: &'a FrameRecord,
    /// The later frame.
    pub later: &'a FrameRecord,
    /// Position between the two, `0` at `earlier` and `1` at `later`.
    pub t: f64,
    /// Motion from `earlier` to `later`.
    pub motion: MotionVector,
    /// ROI the motion was computed against.
    pub roi: Roi,
    /// Whether to mix both frames instead of moving only the earlier one.
    pub blend: bool,
}

impl Synthesis<'_> {
    /// Produce the frame at position `t`, stored under `key`.
    ///
    /// An invalid motion vector moves nothing, so the result degrades to the
    /// earlier frame (or a cross-fade when blending).
    pub fn render(&self, key: CacheKey) -> FrameRecord {
        let t = self.t.clamp(0.0, 1.0);
        let (dx, dy) = if self.motion.valid {
            (self.motion.dx, self.motion.dy)
        } else {
            (0.0, 0.0)
        };

        let pixels = if self.blend {
            let forward = shift_image(&self.earlier.pixels, t * dx, t * dy);
            let backward = shift_image(&self.later.pixels, -(1.0 - t) * dx, -(1.0 - t) * dy);
            blend_images(&forward, &backward, t)
        } else {
            shift_image(&self.earlier.pixels, t * dx, t * dy)
        };

        let earlier_us = self.earlier.timestamp_us as f64;
        let later_us = self.later.timestamp_us as f64;
        let timestamp_us = (earlier_us + (later_us - earlier_us) * t + 0.5).max(0.0) as u64;
        let earlier_ms = self.earlier.timestamp_ms as f64;
        let later_ms = self.later.timestamp_ms as f64;
        let timestamp_ms = (earlier_ms + (later_ms - earlier_ms) * t + 0.5).max(0.0) as u64;
        let frame_index =
            self.earlier.frame_index + (self.later.frame_index - self.earlier.frame_index) * t;

        FrameRecord {
            key,
            width: self.earlier.width,
            height: self.earlier.height,
            fps: self.earlier.fps,
            total_frames: self.earlier.total_frames,
            frame_index,
            pixels: Arc::new(pixels),
            timestamp_ms,
            timestamp_us,
            embedded_timestamp: self.earlier.embedded_timestamp && self.later.embedded_timestamp,
            roi: Some(self.roi),
            motion: MotionVector {
                elapsed_us: self.later.timestamp_us as i64 - self.earlier.timestamp_us as i64,
                ..self.motion
            },
        }
    }
}
