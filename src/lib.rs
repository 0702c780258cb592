//! # framescrub
//!
//! Frame-accurate scrubbing of compressed video, powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! `framescrub` answers two questions quickly and repeatably: *what does frame
//! `n` look like*, and *what did the camera see at wall-clock time `t`*. Both
//! work between frames too: a position like `150.5`, or a timestamp that
//! falls between two frames, is answered with a frame synthesized from its
//! neighbours using the estimated motion of the scene. That is what a
//! photo-finish camera needs to place a finish instant more finely than its
//! frame rate allows.
//!
//! ## Quick Start
//!
//! ### Fetch a Frame
//!
//! ```no_run
//! use framescrub::{FrameRequest, ScrubOptions, Scrubber};
//!
//! let mut scrubber = Scrubber::new(ScrubOptions::default());
//! scrubber.open_stream("finish.mp4")?;
//!
//! let frame = scrubber.frame("finish.mp4", FrameRequest::at(120.0))?;
//! frame.pixels.save("frame_120.png").ok();
//! # Ok::<(), framescrub::ScrubError>(())
//! ```
//!
//! ### Between Two Frames
//!
//! ```no_run
//! use framescrub::{FrameRequest, Roi, ScrubOptions, Scrubber};
//!
//! let mut scrubber = Scrubber::new(ScrubOptions::default());
//! scrubber.open_stream("finish.mp4")?;
//!
//! let request = FrameRequest::at(120.25)
//!     .with_roi(Roi::new(600, 0, 256, 1080))
//!     .with_blend(true);
//! let frame = scrubber.frame("finish.mp4", request)?;
//! println!("{} µs, motion {:?}", frame.timestamp_us, frame.motion);
//! # Ok::<(), framescrub::ScrubError>(())
//! ```
//!
//! ### By Wall-Clock Time
//!
//! Frames carrying a burnt-in timestamp (see [`timestamp`]) can be addressed
//! by that time; frames without one are timed from their index and the frame
//! rate.
//!
//! ```no_run
//! use framescrub::{ScrubOptions, Scrubber, TimestampRequest};
//!
//! let mut scrubber = Scrubber::new(ScrubOptions::default());
//! scrubber.open_stream("finish.mp4")?;
//!
//! let info = scrubber.stream_info("finish.mp4")?;
//! let frame = scrubber.frame_at_timestamp(
//!     "finish.mp4",
//!     TimestampRequest::at(info.first_timestamp_ms + 2_500),
//! )?;
//! # Ok::<(), framescrub::ScrubError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`SeekEngine`] turns frame indices into decoded frames on top of any
//!   [`DecoderAdapter`]; [`FfmpegSource`] is the FFmpeg implementation.
//! - [`FrameCache`] keeps the most recently used results.
//! - [`MotionEstimator`] and [`Synthesis`] produce frames between frames.
//! - [`resolver`] brackets a wall-clock time between two frames.
//! - [`Scrubber`] ties these together behind a handle table keyed by path.
//!
//! Everything runs synchronously on the calling thread.
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`](https://crates.io/crates/log) facade.
//! FFmpeg's own stderr output is controlled with [`set_ffmpeg_log_level`].

pub mod cache;
pub mod configuration;
mod conversion;
pub mod decoder;
pub mod error;
pub mod ffmpeg;
pub mod metadata;
pub mod motion;
pub mod region;
pub mod resolver;
pub mod scrubber;
pub mod seek;
pub mod synthesis;
pub mod timestamp;

pub use cache::{CacheKey, FrameCache, FrameRecord};
pub use configuration::{MotionOptions, ScrubOptions, SeekOptions};
pub use decoder::{DecoderAdapter, DemuxedPacket, FrameRead, PacketRead, RgbaPlane};
pub use error::ScrubError;
pub use ffmpeg::{FfmpegLogLevel, FfmpegSource, set_ffmpeg_log_level};
pub use ffmpeg_next::Rational;
pub use metadata::{StreamInfo, StreamMetadata};
pub use motion::{MotionEstimator, MotionVector, PatchCorrelation};
pub use region::Roi;
pub use resolver::{Bracket, FrameProbe, find_bounding_frames};
pub use scrubber::{FrameRequest, Scrubber, TimestampRequest};
pub use seek::{BackoffState, KeyframeBackoff, SeekEngine, SeekedFrame};
pub use synthesis::{Synthesis, blend_images, shift_image};
pub use timestamp::FrameTimestamp;
