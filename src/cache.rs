//! Bounded cache of computed frames.
//!
//! Every frame the scrubber hands out, whether decoded, ROI-tagged or
//! synthesized, is stored here under a [`CacheKey`] that folds in everything
//! that changes the result: the stream, the position at microframe precision,
//! the ROI, the blend mode and whether the seek was approximate. Lookups
//! refresh recency; inserting past capacity evicts the least recently used
//! record.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::RgbaImage;
use lru::LruCache;

use crate::{motion::MotionVector, region::Roi};

/// Positions are keyed at this many steps per frame.
const POSITION_STEPS_PER_FRAME: f64 = 1_000_000.0;

/// Identity of a cached frame result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Path the stream was opened with.
    pub stream: PathBuf,
    /// Frame position multiplied by 10^6 and rounded.
    pub position_micro: i64,
    /// ROI the result was produced for, if one was requested.
    pub roi: Option<Roi>,
    /// Whether the result is a blend of both neighbours.
    pub blend: bool,
    /// Whether the frame came from an approximate (keyframe) seek.
    pub approximate: bool,
}

impl CacheKey {
    /// Key for a frame position.
    pub fn new(stream: &Path, position: f64) -> Self {
        Self {
            stream: stream.to_path_buf(),
            position_micro: (position * POSITION_STEPS_PER_FRAME).round() as i64,
            roi: None,
            blend: false,
            approximate: false,
        }
    }

    /// Tag the key with a ROI.
    #[must_use]
    pub fn with_roi(mut self, roi: Option<Roi>) -> Self {
        self.roi = roi;
        self
    }

    /// Tag the key with the blend flag.
    #[must_use]
    pub fn with_blend(mut self, blend: bool) -> Self {
        self.blend = blend;
        self
    }

    /// Tag the key with the approximate-seek flag.
    #[must_use]
    pub fn with_approximate(mut self, approximate: bool) -> Self {
        self.approximate = approximate;
        self
    }

    /// The keyed position as a frame number.
    pub fn position(&self) -> f64 {
        self.position_micro as f64 / POSITION_STEPS_PER_FRAME
    }
}

impl Display for CacheKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}-{:.6}", self.stream.display(), self.position())?;
        if self.approximate {
            write!(formatter, "-closeTo")?;
        }
        if self.blend {
            write!(formatter, "-blend")?;
        }
        if let Some(roi) = self.roi {
            write!(formatter, "-{roi}")?;
        }
        Ok(())
    }
}

/// A computed frame and everything derived from it.
///
/// Pixels are shared: cloning a record is cheap and never copies the image.
#[derive(Debug, Clone)]
#[must_use]
pub struct FrameRecord {
    /// The key this record is stored under.
    pub key: CacheKey,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second of the stream.
    pub fps: f64,
    /// Addressable frames in the stream.
    pub total_frames: u64,
    /// Frame position; fractional for synthesized frames.
    pub frame_index: f64,
    /// Tightly packed RGBA pixels.
    pub pixels: Arc<RgbaImage>,
    /// Wall-clock timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Wall-clock timestamp in microseconds.
    pub timestamp_us: u64,
    /// Whether the timestamp was read from the frame rather than estimated
    /// from its index.
    pub embedded_timestamp: bool,
    /// ROI the motion vector was computed against.
    pub roi: Option<Roi>,
    /// Motion towards the next frame, or the motion used for synthesis.
    pub motion: MotionVector,
}

impl FrameRecord {
    /// Copy of this record stored under another key.
    ///
    /// The pixel buffer is shared with the original.
    pub fn rekeyed(&self, key: CacheKey) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }
}

/// Least-recently-used store of [`FrameRecord`]s.
pub struct FrameCache {
    entries: LruCache<CacheKey, FrameRecord>,
}

impl FrameCache {
    /// Create a cache holding at most `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up a record and mark it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<FrameRecord> {
        let record = self.entries.get(key).cloned();
        if record.is_some() {
            log::trace!("Frame cache hit: {key}");
        }
        record
    }

    /// Whether a record is present, without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Store a record under its own key, replacing any previous one.
    pub fn put(&mut self, record: FrameRecord) {
        let key = record.key.clone();
        match self.entries.push(key.clone(), record) {
            Some((evicted, _)) if evicted != key => log::debug!("Frame cache evicted {evicted}"),
            _ => {}
        }
    }

    /// Remove every record belonging to `stream`. Returns how many went.
    pub fn purge_stream(&mut self, stream: &Path) -> usize {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.stream == stream)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.entries.pop(key);
        }
        doomed.len()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
