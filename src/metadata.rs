//! Stream metadata types.
//!
//! [`StreamMetadata`] is what a [`DecoderAdapter`](crate::DecoderAdapter)
//! reports when a stream is opened. The raw fields mirror what containers
//! expose, including values that are commonly missing or zero. The derived
//! accessors resolve those gaps through fixed fallback chains so the seek
//! engine always has a usable frame rate and frame count.
//!
//! [`StreamInfo`] is the summary a [`Scrubber`](crate::Scrubber) records after
//! opening a stream and probing its first and last frames.

use ffmpeg_next::Rational;

use crate::conversion::rational_to_f64;

/// Values at or below this are treated as "not reported".
pub const NEGLIGIBLE_RATE: f64 = 0.000025;

/// Raw metadata of the tracked video stream.
///
/// Durations and offsets are kept in the units the container reports them in:
/// `stream_duration` and `start_offset` are in `time_base` ticks,
/// `container_duration` is in seconds.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct StreamMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame rate declared by the stream (`r_frame_rate`).
    pub frame_rate: Rational,
    /// Frame rate guessed by the container layer.
    pub guessed_frame_rate: Rational,
    /// Time base of the stream's timestamps.
    pub time_base: Rational,
    /// Frame count stored in the container, or zero when absent.
    pub reported_frame_count: u64,
    /// Container duration in seconds, or zero when absent.
    pub container_duration: f64,
    /// Stream duration in `time_base` ticks, or zero when absent.
    pub stream_duration: i64,
    /// Timestamp of the stream start in `time_base` ticks.
    pub start_offset: i64,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
}

impl StreamMetadata {
    /// Resolved frames per second.
    ///
    /// Tries the declared rate, then the guessed rate, then the reciprocal of
    /// the time base, and returns the first one above [`NEGLIGIBLE_RATE`].
    pub fn frames_per_second(&self) -> f64 {
        let declared = rational_to_f64(self.frame_rate);
        if declared > NEGLIGIBLE_RATE {
            return declared;
        }
        let guessed = rational_to_f64(self.guessed_frame_rate);
        if guessed > NEGLIGIBLE_RATE {
            return guessed;
        }
        let tick = rational_to_f64(self.time_base);
        if tick > 0.0 { 1.0 / tick } else { 0.0 }
    }

    /// Resolved duration in seconds.
    ///
    /// Falls back from the container duration to the stream duration scaled by
    /// the time base.
    pub fn duration_seconds(&self) -> f64 {
        if self.container_duration > NEGLIGIBLE_RATE {
            return self.container_duration;
        }
        self.stream_duration as f64 * rational_to_f64(self.time_base)
    }

    /// Resolved total frame count.
    ///
    /// Uses the container's count when present, else `round(duration × fps)`.
    pub fn total_frames(&self) -> i64 {
        if self.reported_frame_count > 0 {
            return self.reported_frame_count as i64;
        }
        (self.duration_seconds() * self.frames_per_second() + 0.5).floor() as i64
    }
}

/// Summary of an open stream.
///
/// `frame_count` is the number of frames the scrubber found addressable, which
/// can be one less than the container's estimate when the trailing frame does
/// not decode.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub struct StreamInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Resolved frames per second.
    pub fps: f64,
    /// Number of addressable frames.
    pub frame_count: u64,
    /// Wall-clock timestamp of the first frame, in milliseconds.
    pub first_timestamp_ms: u64,
    /// Wall-clock timestamp of the last addressable frame, in milliseconds.
    pub last_timestamp_ms: u64,
}
