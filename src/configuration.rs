//! Scrubbing configuration.
//!
//! [`ScrubOptions`] is a builder that carries the tunable thresholds of the
//! seek engine, the frame cache and the motion estimator. Every field has a
//! default matching the behaviour the engine was tuned for, so
//! `ScrubOptions::default()` is what most callers want.
//!
//! # Example
//!
//! ```
//! use framescrub::{MotionOptions, ScrubOptions, SeekOptions};
//!
//! let options = ScrubOptions::new()
//!     .with_cache_capacity(64)
//!     .with_seek(SeekOptions::default().with_forward_window(48))
//!     .with_motion(MotionOptions::default().with_min_score(0.7));
//!
//! assert_eq!(options.cache_capacity(), 64);
//! ```

/// Default number of decoded frames retained for short backward seeks.
pub const DEFAULT_RING_CAPACITY: usize = 32;
/// Default number of cached frame records.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Tuning for the seek engine.
///
/// The forward and backward windows decide when a seek is served by
/// sequential decoding instead of a keyframe backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekOptions {
    /// Number of decoded frames kept in the ring buffer.
    pub ring_capacity: usize,
    /// Forward gaps strictly below this are decoded sequentially.
    pub forward_window: i64,
    /// Backward gaps strictly below this use a single exact-timestamp seek.
    pub backward_window: i64,
    /// Non-video packets tolerated per grab before giving up.
    pub max_read_attempts: usize,
    /// Packets fed to the decoder without output per grab before giving up.
    pub max_decode_attempts: usize,
    /// Initial backward offset, in frames, of the keyframe backoff.
    pub initial_backoff: i64,
}

impl Default for SeekOptions {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            forward_window: 32,
            backward_window: 32,
            max_read_attempts: 4096,
            max_decode_attempts: 64,
            initial_backoff: 16,
        }
    }
}

impl SeekOptions {
    /// Set the ring buffer capacity. Zero is raised to one.
    #[must_use]
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    /// Set the sequential forward-decode window.
    #[must_use]
    pub fn with_forward_window(mut self, frames: i64) -> Self {
        self.forward_window = frames.max(1);
        self
    }

    /// Set the short backward-seek window.
    #[must_use]
    pub fn with_backward_window(mut self, frames: i64) -> Self {
        self.backward_window = frames.max(1);
        self
    }

    /// Set the read and decode attempt ceilings.
    #[must_use]
    pub fn with_attempt_limits(mut self, max_read_attempts: usize, max_decode_attempts: usize) -> Self {
        self.max_read_attempts = max_read_attempts.max(1);
        self.max_decode_attempts = max_decode_attempts.max(1);
        self
    }

    /// Set the initial keyframe backoff.
    #[must_use]
    pub fn with_initial_backoff(mut self, frames: i64) -> Self {
        self.initial_backoff = frames.max(1);
        self
    }
}

/// Tuning for the patch-correlation motion estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionOptions {
    /// Side length of the square patch taken from the centre of the ROI.
    pub patch_size: u32,
    /// Maximum displacement searched along each axis, in pixels.
    pub search_radius: u32,
    /// Minimum normalised cross-correlation for a vector to be valid.
    pub min_score: f64,
}

impl Default for MotionOptions {
    fn default() -> Self {
        Self {
            patch_size: 48,
            search_radius: 24,
            min_score: 0.65,
        }
    }
}

impl MotionOptions {
    /// Set the patch side length. Values below 3 are raised to 3.
    #[must_use]
    pub fn with_patch_size(mut self, patch_size: u32) -> Self {
        self.patch_size = patch_size.max(3);
        self
    }

    /// Set the search radius.
    #[must_use]
    pub fn with_search_radius(mut self, search_radius: u32) -> Self {
        self.search_radius = search_radius;
        self
    }

    /// Set the validity threshold, clamped to `[-1, 1]`.
    #[must_use]
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score.clamp(-1.0, 1.0);
        self
    }
}

/// Configuration for a [`Scrubber`](crate::Scrubber).
#[derive(Debug, Clone)]
pub struct ScrubOptions {
    pub(crate) seek: SeekOptions,
    pub(crate) motion: MotionOptions,
    pub(crate) cache_capacity: usize,
    pub(crate) default_roi_width: u32,
    pub(crate) fractional_tolerance: f64,
}

impl Default for ScrubOptions {
    fn default() -> Self {
        Self {
            seek: SeekOptions::default(),
            motion: MotionOptions::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            default_roi_width: 256,
            fractional_tolerance: 0.01,
        }
    }
}

impl ScrubOptions {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the seek engine settings.
    #[must_use]
    pub fn with_seek(mut self, seek: SeekOptions) -> Self {
        self.seek = seek;
        self
    }

    /// Replace the motion estimator settings.
    #[must_use]
    pub fn with_motion(mut self, motion: MotionOptions) -> Self {
        self.motion = motion;
        self
    }

    /// Set how many frame records the cache holds. Zero is raised to one.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    /// Set the width of the centred ROI used when none is supplied.
    #[must_use]
    pub fn with_default_roi_width(mut self, width: u32) -> Self {
        self.default_roi_width = width.max(1);
        self
    }

    /// Set how close to an integer a position must be to skip synthesis.
    ///
    /// Clamped to `[0, 0.5)`.
    #[must_use]
    pub fn with_fractional_tolerance(mut self, tolerance: f64) -> Self {
        self.fractional_tolerance = tolerance.clamp(0.0, 0.499);
        self
    }

    /// Seek engine settings.
    pub fn seek(&self) -> &SeekOptions {
        &self.seek
    }

    /// Motion estimator settings.
    pub fn motion(&self) -> &MotionOptions {
        &self.motion
    }

    /// Frame cache capacity.
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Width of the default ROI.
    pub fn default_roi_width(&self) -> u32 {
        self.default_roi_width
    }

    /// Fraction tolerance around integer positions.
    pub fn fractional_tolerance(&self) -> f64 {
        self.fractional_tolerance
    }
}
