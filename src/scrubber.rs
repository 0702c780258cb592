//! The scrubbing facade.
//!
//! A [`Scrubber`] owns every open stream and one shared frame cache. Callers
//! ask for frames by position, which may be fractional, or by wall-clock
//! timestamp; the scrubber answers from the cache when it can and otherwise
//! drives the stream's seek engine, extracts the frame's timestamp and, for
//! positions between frames, estimates motion and synthesizes the frame.
//!
//! Range checks happen here, before any decoding: positions outside
//! `[0, frame_count − 1]` and timestamps outside the stream's first and last
//! frame are rejected rather than clamped.

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    cache::{CacheKey, FrameCache, FrameRecord},
    configuration::ScrubOptions,
    decoder::DecoderAdapter,
    error::ScrubError,
    ffmpeg::FfmpegSource,
    metadata::{NEGLIGIBLE_RATE, StreamInfo},
    motion::{MotionEstimator, MotionVector, PatchCorrelation},
    region::Roi,
    resolver::find_bounding_frames,
    seek::SeekEngine,
    synthesis::Synthesis,
    timestamp::FrameTimestamp,
};

/// Opens a decoder adapter for a path.
pub type Opener<A> = Box<dyn Fn(&Path) -> Result<A, ScrubError>>;

/// A request for the frame at a position.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub struct FrameRequest {
    /// Frame position; fractional positions are synthesized.
    pub position: f64,
    /// ROI for motion estimation; also tags the cached result.
    pub roi: Option<Roi>,
    /// Mix both neighbours when synthesizing.
    pub blend: bool,
    /// Accept the first frame after a keyframe seek instead of the exact one.
    pub approximate: bool,
}

impl FrameRequest {
    /// Request the frame at `position`.
    pub fn at(position: f64) -> Self {
        Self {
            position,
            roi: None,
            blend: false,
            approximate: false,
        }
    }

    /// Set the ROI.
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Set the blend flag.
    pub fn with_blend(mut self, blend: bool) -> Self {
        self.blend = blend;
        self
    }

    /// Set the approximate-seek flag.
    pub fn with_approximate(mut self, approximate: bool) -> Self {
        self.approximate = approximate;
        self
    }
}

/// A request for the frame shown at a wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct TimestampRequest {
    /// Target wall-clock time in milliseconds.
    pub timestamp_ms: u64,
    /// ROI for motion estimation.
    pub roi: Option<Roi>,
    /// Mix both neighbours when synthesizing.
    pub blend: bool,
}

impl TimestampRequest {
    /// Request the frame at `timestamp_ms`.
    pub fn at(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            roi: None,
            blend: false,
        }
    }

    /// Set the ROI.
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Set the blend flag.
    pub fn with_blend(mut self, blend: bool) -> Self {
        self.blend = blend;
        self
    }
}

struct StreamHandle<A: DecoderAdapter> {
    engine: SeekEngine<A>,
    info: StreamInfo,
    /// Set once any frame of the stream decoded an embedded timestamp.
    embedded_seen: bool,
}

/// Frame access for any number of open streams.
///
/// Not thread-safe: share it behind a mutex, or use one scrubber per thread.
///
/// # Example
///
/// ```no_run
/// use framescrub::{FrameRequest, ScrubOptions, Scrubber, TimestampRequest};
///
/// let mut scrubber = Scrubber::new(ScrubOptions::default());
/// scrubber.open_stream("finish.mp4")?;
///
/// let frame = scrubber.frame("finish.mp4", FrameRequest::at(150.5).with_blend(true))?;
/// println!("frame {} at {} ms", frame.frame_index, frame.timestamp_ms);
///
/// let info = scrubber.stream_info("finish.mp4")?;
/// let frame = scrubber.frame_at_timestamp(
///     "finish.mp4",
///     TimestampRequest::at(info.first_timestamp_ms + 1_000),
/// )?;
/// # Ok::<(), framescrub::ScrubError>(())
/// ```
pub struct Scrubber<A: DecoderAdapter = FfmpegSource> {
    options: ScrubOptions,
    streams: HashMap<PathBuf, StreamHandle<A>>,
    cache: FrameCache,
    opener: Opener<A>,
    estimator: Box<dyn MotionEstimator>,
}

impl Scrubber<FfmpegSource> {
    /// Create a scrubber that decodes with FFmpeg.
    pub fn new(options: ScrubOptions) -> Self {
        Self::with_opener(options, |path| FfmpegSource::open(path))
    }
}

impl<A: DecoderAdapter> Debug for Scrubber<A> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter
            .debug_struct("Scrubber")
            .field("options", &self.options)
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .field("cached_frames", &self.cache.len())
            .finish()
    }
}

impl<A: DecoderAdapter> Scrubber<A> {
    /// Create a scrubber that opens streams with `opener`.
    pub fn with_opener<F>(options: ScrubOptions, opener: F) -> Self
    where
        F: Fn(&Path) -> Result<A, ScrubError> + 'static,
    {
        Self {
            cache: FrameCache::new(options.cache_capacity),
            estimator: Box::new(PatchCorrelation::new(options.motion)),
            streams: HashMap::new(),
            opener: Box::new(opener),
            options,
        }
    }

    /// Replace the motion estimator.
    #[must_use]
    pub fn with_estimator<E: MotionEstimator + 'static>(mut self, estimator: E) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// The scrubber's configuration.
    pub fn options(&self) -> &ScrubOptions {
        &self.options
    }

    /// Whether `path` is open.
    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        self.streams.contains_key(path.as_ref())
    }

    /// Number of records in the frame cache.
    pub fn cached_frames(&self) -> usize {
        self.cache.len()
    }

    /// Open a stream and probe its first and last frames.
    ///
    /// Opening a path that is already open does nothing. When the last frame
    /// the metadata promises cannot be decoded, the one before it is tried
    /// and the stream is shortened accordingly.
    ///
    /// # Errors
    ///
    /// - [`ScrubError::FileOpen`] or [`ScrubError::NoVideoStream`] from the
    ///   adapter.
    /// - [`ScrubError::MetadataUnavailable`] if the frame rate, frame count
    ///   or bounding frames cannot be established.
    pub fn open_stream<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ScrubError> {
        let path = path.as_ref();
        if self.streams.contains_key(path) {
            log::debug!("Stream already open: {}", path.display());
            return Ok(());
        }

        let adapter = (self.opener)(path)?;
        let metadata = adapter.metadata();
        if metadata.frames_per_second() <= NEGLIGIBLE_RATE {
            return Err(ScrubError::MetadataUnavailable {
                path: path.to_path_buf(),
                reason: "no usable frame rate".to_string(),
            });
        }
        if metadata.total_frames() <= 0 {
            return Err(ScrubError::MetadataUnavailable {
                path: path.to_path_buf(),
                reason: "frame count is zero and cannot be derived from the duration".to_string(),
            });
        }
        let (width, height) = (metadata.width, metadata.height);

        let mut engine =
            SeekEngine::new(adapter, self.options.seek).map_err(|error| ScrubError::MetadataUnavailable {
                path: path.to_path_buf(),
                reason: format!("unable to decode the first frame: {error}"),
            })?;
        let fps = engine.fps();
        let estimated = engine.total_frames();

        let mut embedded_seen = false;
        let first = load_base(
            &mut engine,
            &mut self.cache,
            &mut embedded_seen,
            path,
            0,
            false,
            estimated as u64,
        )
        .map_err(|error| ScrubError::MetadataUnavailable {
            path: path.to_path_buf(),
            reason: format!("unable to get first frame info: {error}"),
        })?;

        let mut last = None;
        for candidate in [estimated - 1, estimated - 2] {
            if candidate < 0 {
                break;
            }
            match load_base(
                &mut engine,
                &mut self.cache,
                &mut embedded_seen,
                path,
                candidate,
                false,
                estimated as u64,
            ) {
                Ok(record) => {
                    last = Some(record);
                    break;
                }
                Err(error) => log::warn!(
                    "Unable to read frame {candidate} of {}: {error}. Doing one less",
                    path.display()
                ),
            }
        }
        let last = last.ok_or_else(|| ScrubError::MetadataUnavailable {
            path: path.to_path_buf(),
            reason: "unable to get last frame info".to_string(),
        })?;

        let info = StreamInfo {
            width,
            height,
            fps,
            frame_count: last.frame_index as u64 + 1,
            first_timestamp_ms: first.timestamp_ms,
            last_timestamp_ms: last.timestamp_ms,
        };
        for record in [first, last] {
            if record.total_frames != info.frame_count {
                self.cache.put(FrameRecord {
                    total_frames: info.frame_count,
                    ..record
                });
            }
        }
        log::info!(
            "Opened stream {}: {}x{}, {:.3} fps, {} frames, timestamps [{}, {}] ms",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count,
            info.first_timestamp_ms,
            info.last_timestamp_ms
        );

        self.streams.insert(
            path.to_path_buf(),
            StreamHandle {
                engine,
                info,
                embedded_seen,
            },
        );
        Ok(())
    }

    /// Close a stream, releasing its decoder and its cached frames.
    ///
    /// # Errors
    ///
    /// Returns [`ScrubError::StreamNotOpen`] if `path` is not open.
    pub fn close_stream<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ScrubError> {
        let path = path.as_ref();
        if self.streams.remove(path).is_none() {
            return Err(ScrubError::StreamNotOpen(path.to_path_buf()));
        }
        let purged = self.cache.purge_stream(path);
        log::debug!("Closed stream {} ({purged} cached frames dropped)", path.display());
        Ok(())
    }

    /// Summary of an open stream.
    ///
    /// # Errors
    ///
    /// Returns [`ScrubError::StreamNotOpen`] if `path` is not open.
    pub fn stream_info<P: AsRef<Path>>(&self, path: P) -> Result<StreamInfo, ScrubError> {
        let path = path.as_ref();
        self.streams
            .get(path)
            .map(|handle| handle.info)
            .ok_or_else(|| ScrubError::StreamNotOpen(path.to_path_buf()))
    }

    /// The frame at a position.
    ///
    /// Positions within the fractional tolerance of an integer are served as
    /// that decoded frame; others are synthesized from their two neighbours.
    ///
    /// # Errors
    ///
    /// - [`ScrubError::StreamNotOpen`] if `path` is not open.
    /// - [`ScrubError::FrameOutOfRange`] if the position is outside the
    ///   stream.
    /// - Decode and seek errors from the stream's engine.
    pub fn frame<P: AsRef<Path>>(&mut self, path: P, request: FrameRequest) -> Result<FrameRecord, ScrubError> {
        let path = path.as_ref();
        let handle = self
            .streams
            .get_mut(path)
            .ok_or_else(|| ScrubError::StreamNotOpen(path.to_path_buf()))?;
        let frame_count = handle.info.frame_count;

        if !request.position.is_finite()
            || request.position < 0.0
            || request.position > (frame_count - 1) as f64
        {
            return Err(ScrubError::FrameOutOfRange {
                position: request.position,
                frame_count,
            });
        }

        let whole = request.position.floor();
        let fraction = request.position - whole;
        let tolerance = self.options.fractional_tolerance;
        let requested_roi = request.roi.filter(|roi| !roi.is_empty());

        if fraction <= tolerance || fraction >= 1.0 - tolerance {
            let index = request.position.round() as i64;
            let key = CacheKey::new(path, index as f64)
                .with_roi(requested_roi)
                .with_approximate(request.approximate);
            if let Some(record) = self.cache.get(&key) {
                return Ok(record);
            }

            let base = load_base(
                &mut handle.engine,
                &mut self.cache,
                &mut handle.embedded_seen,
                path,
                index,
                request.approximate,
                frame_count,
            )?;
            let Some(roi) = requested_roi else {
                return Ok(base);
            };
            let mut variant = base.rekeyed(key);
            let roi = Some(roi.clamped_to(base.width, base.height));
            if base.roi != roi {
                variant.motion = MotionVector::default();
            }
            variant.roi = roi;
            self.cache.put(variant.clone());
            return Ok(variant);
        }

        let key = CacheKey::new(path, request.position)
            .with_roi(requested_roi)
            .with_blend(request.blend);
        if let Some(record) = self.cache.get(&key) {
            return Ok(record);
        }

        let index = whole as i64;
        let engine = &mut handle.engine;
        let embedded_seen = &mut handle.embedded_seen;
        let earlier = load_base(engine, &mut self.cache, embedded_seen, path, index, false, frame_count)?;
        let later = load_base(engine, &mut self.cache, embedded_seen, path, index + 1, false, frame_count)?;

        let roi = Roi::resolve(
            request.roi,
            earlier.width,
            earlier.height,
            self.options.default_roi_width,
        );
        let motion = if earlier.motion.valid && earlier.roi == Some(roi) {
            log::trace!("Reusing motion of frame {index} for {roi}");
            earlier.motion
        } else {
            self.estimator.estimate(&earlier.pixels, &later.pixels, roi)
        };

        let synthesized = Synthesis {
            earlier: &earlier,
            later: &later,
            t: fraction,
            motion,
            roi,
            blend: request.blend,
        }
        .render(key);

        let mut annotated = earlier.clone();
        annotated.motion = MotionVector {
            elapsed_us: synthesized.motion.elapsed_us,
            ..motion
        };
        annotated.roi = Some(roi);
        self.cache.put(annotated);
        self.cache.put(synthesized.clone());

        log::debug!(
            "Synthesized frame {:.3} of {} (blend={}, motion valid={})",
            synthesized.frame_index,
            path.display(),
            request.blend,
            motion.valid
        );
        Ok(synthesized)
    }

    /// The frame shown at a wall-clock time.
    ///
    /// Finds the two frames around the timestamp, then returns the earlier
    /// frame, the later frame, or a frame synthesized between them.
    ///
    /// # Errors
    ///
    /// - [`ScrubError::StreamNotOpen`] if `path` is not open.
    /// - [`ScrubError::TimestampOutOfRange`] if the timestamp lies outside
    ///   the first and last frame.
    /// - [`ScrubError::CorruptTimestampOrdering`] if the frames around the
    ///   timestamp are out of order.
    pub fn frame_at_timestamp<P: AsRef<Path>>(
        &mut self,
        path: P,
        request: TimestampRequest,
    ) -> Result<FrameRecord, ScrubError> {
        let path = path.as_ref();
        let handle = self
            .streams
            .get_mut(path)
            .ok_or_else(|| ScrubError::StreamNotOpen(path.to_path_buf()))?;
        let info = handle.info;
        let target = request.timestamp_ms;

        if target < info.first_timestamp_ms || target > info.last_timestamp_ms {
            return Err(ScrubError::TimestampOutOfRange {
                timestamp_ms: target,
                first_ms: info.first_timestamp_ms,
                last_ms: info.last_timestamp_ms,
            });
        }
        if info.frame_count < 2 {
            let mut frame_request = FrameRequest::at(0.0).with_blend(request.blend);
            frame_request.roi = request.roi;
            return self.frame(path, frame_request);
        }

        let span = info.last_timestamp_ms.saturating_sub(info.first_timestamp_ms);
        let guess = if span == 0 {
            0
        } else {
            ((target - info.first_timestamp_ms) as f64 / span as f64 * (info.frame_count - 1) as f64) as u64
        };

        let engine = &mut handle.engine;
        let embedded_seen = &mut handle.embedded_seen;
        let cache = &mut self.cache;
        let frame_count = info.frame_count;
        let mut probe = |index: u64| {
            load_base(engine, cache, embedded_seen, path, index as i64, false, frame_count)
                .map(|record| record.timestamp_ms)
        };
        let bracket = find_bounding_frames(&mut probe, target, guess, frame_count)?;

        let earlier = load_base(engine, cache, embedded_seen, path, bracket.low as i64, false, frame_count)?;
        let later = load_base(engine, cache, embedded_seen, path, bracket.high as i64, false, frame_count)?;
        let span_us = later.timestamp_us as f64 - earlier.timestamp_us as f64;
        let fraction = if span_us > 0.0 {
            ((target as f64 * 1_000.0 - earlier.timestamp_us as f64) / span_us).clamp(0.0, 1.0)
        } else {
            0.0
        };
        log::debug!(
            "Timestamp {target} ms resolves to frame {:.4} of {}",
            earlier.frame_index + fraction,
            path.display()
        );

        let mut frame_request = FrameRequest::at(bracket.low as f64 + fraction).with_blend(request.blend);
        frame_request.roi = request.roi;
        self.frame(path, frame_request)
    }
}

/// Fetch a decoded frame through the cache.
///
/// Records are keyed by the requested index; the stored `frame_index` is the
/// index the engine actually positioned on. `embedded_seen` tracks whether the
/// stream has carried embedded timestamps, so a frame that later falls back to
/// an estimate is reported.
fn load_base<A: DecoderAdapter>(
    engine: &mut SeekEngine<A>,
    cache: &mut FrameCache,
    embedded_seen: &mut bool,
    path: &Path,
    index: i64,
    approximate: bool,
    total_frames: u64,
) -> Result<FrameRecord, ScrubError> {
    let key = CacheKey::new(path, index as f64).with_approximate(approximate);
    if let Some(record) = cache.get(&key) {
        return Ok(record);
    }

    let seeked = engine.seek(index, approximate)?;
    let stamp = FrameTimestamp::resolve(&seeked.image, seeked.index, engine.fps());
    if stamp.embedded {
        *embedded_seen = true;
    } else if *embedded_seen {
        log::warn!(
            "Frame {} of {} has no embedded timestamp, using the estimate {} ms",
            seeked.index,
            path.display(),
            stamp.millis
        );
    }
    let record = FrameRecord {
        key,
        width: seeked.image.width(),
        height: seeked.image.height(),
        fps: engine.fps(),
        total_frames,
        frame_index: seeked.index as f64,
        pixels: Arc::new(seeked.image),
        timestamp_ms: stamp.millis,
        timestamp_us: stamp.micros,
        embedded_timestamp: stamp.embedded,
        roi: None,
        motion: MotionVector::default(),
    };
    log::trace!(
        "Decoded frame {} of {} ({} ms, embedded={})",
        seeked.index,
        path.display(),
        stamp.millis,
        stamp.embedded
    );
    cache.put(record.clone());
    Ok(record)
}
