//! Error types for the `framescrub` crate.
//!
//! This module defines [`ScrubError`], the unified error type returned by all
//! fallible operations in the crate. Variants are grouped the way callers
//! react to them: open failures are fatal for a stream, decode and seek
//! failures abort a single request, and range errors are rejected before any
//! decoding happens.

use std::path::PathBuf;

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `framescrub` operations.
///
/// Every public method that can fail returns `Result<T, ScrubError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScrubError {
    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::Scrubber::open_stream`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a decodable video stream.
    #[error("No video stream found in {path}")]
    NoVideoStream {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// The stream is missing metadata required to address frames.
    #[error("Stream metadata unavailable for {path}: {reason}")]
    MetadataUnavailable {
        /// Path of the offending file.
        path: PathBuf,
        /// Which piece of metadata could not be resolved.
        reason: String,
    },

    /// A read or decode attempt ceiling was exceeded while grabbing a frame.
    ///
    /// The stream position is marked stale; a fresh seek may succeed.
    #[error("Decoding gave up after {attempts} {stage} attempts")]
    DecodeExhausted {
        /// `"packet read"`, `"frame decode"` or `"end of stream"`.
        stage: &'static str,
        /// Number of attempts made before giving up.
        attempts: usize,
    },

    /// A seek could not be completed.
    #[error("Seek failed: {0}")]
    SeekFailure(String),

    /// Two frames whose order is known have non-increasing timestamps.
    #[error(
        "Malformed video frames detected at frame {first_index} ({first_ms} ms) and frame {second_index} ({second_ms} ms)"
    )]
    CorruptTimestampOrdering {
        /// Index of the earlier frame.
        first_index: u64,
        /// Index of the later frame.
        second_index: u64,
        /// Timestamp of the earlier frame in milliseconds.
        first_ms: u64,
        /// Timestamp of the later frame in milliseconds.
        second_ms: u64,
    },

    /// The requested frame position lies outside the stream.
    #[error("Frame position {position} is out of range (stream has {frame_count} frames)")]
    FrameOutOfRange {
        /// The position that was requested.
        position: f64,
        /// The number of addressable frames in the stream.
        frame_count: u64,
    },

    /// The requested wall-clock timestamp lies outside the stream.
    #[error("Requested timestamp {timestamp_ms} not within file bounds: [{first_ms},{last_ms}]")]
    TimestampOutOfRange {
        /// The timestamp that was requested, in milliseconds.
        timestamp_ms: u64,
        /// Timestamp of the first frame, in milliseconds.
        first_ms: u64,
        /// Timestamp of the last frame, in milliseconds.
        last_ms: u64,
    },

    /// An operation referenced a stream that is not open.
    #[error("Stream is not open: {0}")]
    StreamNotOpen(PathBuf),

    /// Decoded pixel data could not be turned into an RGBA image.
    #[error("Pixel conversion failed: {0}")]
    PixelConversion(String),

    /// A generic FFmpeg error.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

impl ScrubError {
    /// Whether this error is a rejected out-of-range request.
    ///
    /// Range errors are raised before any decoding takes place.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            ScrubError::FrameOutOfRange { .. } | ScrubError::TimestampOutOfRange { .. }
        )
    }
}

impl From<FfmpegError> for ScrubError {
    fn from(error: FfmpegError) -> Self {
        ScrubError::FfmpegError(error.to_string())
    }
}
