//! FFmpeg integration.
//!
//! [`FfmpegSource`] is the [`DecoderAdapter`] used by
//! [`Scrubber::new`](crate::Scrubber::new): it opens a container with
//! `ffmpeg-next`, tracks the best video stream and converts frames to RGBA
//! with a lazily created scaler.
//!
//! FFmpeg also has its own logging, separate from the `log` crate. It prints
//! warnings to stderr by default; [`set_ffmpeg_log_level`] tunes it without
//! importing `ffmpeg-next` directly.
//!
//! ```no_run
//! use framescrub::FfmpegLogLevel;
//!
//! framescrub::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! ```

use std::{
    os::raw::c_int,
    path::{Path, PathBuf},
};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    error::EAGAIN,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};

use crate::{
    decoder::{DecoderAdapter, DemuxedPacket, FrameRead, PacketRead, RgbaPlane},
    error::ScrubError,
    metadata::StreamMetadata,
};

/// FFmpeg internal log verbosity, most quiet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Only unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

/// Set what FFmpeg itself prints to stderr.
///
/// Does not affect diagnostics emitted through the `log` crate.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

impl DemuxedPacket for Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }

    fn pts(&self) -> Option<i64> {
        Packet::pts(self)
    }

    fn dts(&self) -> Option<i64> {
        Packet::dts(self)
    }
}

/// Key of the scaler's input configuration.
type ScalerInput = (Pixel, u32, u32);

/// A video stream decoded with FFmpeg.
///
/// Owns the container, the decoder and the RGBA scaler; all are released
/// when the source is dropped.
pub struct FfmpegSource {
    path: PathBuf,
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    metadata: StreamMetadata,
    scaler: Option<(ScalerInput, ScalingContext)>,
}

impl FfmpegSource {
    /// Open `path` and prepare a decoder for its best video stream.
    ///
    /// # Errors
    ///
    /// - [`ScrubError::FileOpen`] if FFmpeg cannot open the file or build a
    ///   decoder for it.
    /// - [`ScrubError::NoVideoStream`] if the file has no video stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ScrubError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening video file: {}", path.display());

        ffmpeg_next::init().map_err(|error| ScrubError::FileOpen {
            path: path.clone(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let input = ffmpeg_next::format::input(&path).map_err(|error| ScrubError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;

        let container_duration = if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg_sys_next::AV_TIME_BASE)
        } else {
            0.0
        };

        let (stream_index, decoder, metadata) = {
            let stream = input
                .streams()
                .best(Type::Video)
                .ok_or_else(|| ScrubError::NoVideoStream { path: path.clone() })?;

            let decoder = CodecContext::from_parameters(stream.parameters())
                .and_then(|context| context.decoder().video())
                .map_err(|error| ScrubError::FileOpen {
                    path: path.clone(),
                    reason: format!("Failed to create video decoder: {error}"),
                })?;

            // SAFETY: both pointers come from live ffmpeg-next wrappers that
            // outlive the call; a null frame is allowed.
            let guessed_frame_rate = Rational::from(unsafe {
                ffmpeg_sys_next::av_guess_frame_rate(
                    input.as_ptr() as *mut _,
                    stream.as_ptr() as *mut _,
                    std::ptr::null_mut(),
                )
            });

            let start_offset = match stream.start_time() {
                ffmpeg_sys_next::AV_NOPTS_VALUE => 0,
                start => start,
            };

            let metadata = StreamMetadata {
                width: decoder.width(),
                height: decoder.height(),
                frame_rate: stream.rate(),
                guessed_frame_rate,
                time_base: stream.time_base(),
                reported_frame_count: stream.frames().max(0) as u64,
                container_duration,
                stream_duration: stream.duration().max(0),
                start_offset,
                codec: decoder
                    .codec()
                    .map(|codec| codec.name().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            };
            (stream.index(), decoder, metadata)
        };

        log::info!(
            "Opened video stream {stream_index} of {} ({}x{}, codec={}, time_base={})",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.codec,
            metadata.time_base
        );

        Ok(Self {
            path,
            input,
            decoder,
            stream_index,
            metadata,
            scaler: None,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DecoderAdapter for FfmpegSource {
    type Packet = Packet;
    type Frame = VideoFrame;

    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn read_packet(&mut self) -> Result<PacketRead<Packet>, ScrubError> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(PacketRead::Packet(packet)),
            Err(FfmpegError::Eof) => Ok(PacketRead::EndOfStream),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(PacketRead::Again),
            Err(error) => Err(error.into()),
        }
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), ScrubError> {
        self.decoder.send_packet(packet).map_err(ScrubError::from)
    }

    fn send_eof(&mut self) -> Result<(), ScrubError> {
        match self.decoder.send_eof() {
            Ok(()) | Err(FfmpegError::Eof) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn receive_frame(&mut self) -> Result<FrameRead<VideoFrame>, ScrubError> {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let timestamp = frame.timestamp().or_else(|| frame.pts());
                Ok(FrameRead::Frame { frame, timestamp })
            }
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(FrameRead::NeedMoreInput),
            Err(FfmpegError::Eof) => Ok(FrameRead::Drained),
            Err(error) => Err(error.into()),
        }
    }

    fn seek_near(&mut self, timestamp: i64) -> Result<(), ScrubError> {
        // SAFETY: the format context is owned by `self.input` and stays valid
        // for the duration of the call.
        let result = unsafe {
            ffmpeg_sys_next::av_seek_frame(
                self.input.as_mut_ptr(),
                self.stream_index as c_int,
                timestamp,
                ffmpeg_sys_next::AVSEEK_FLAG_BACKWARD as c_int,
            )
        };
        if result < 0 {
            return Err(ScrubError::SeekFailure(FfmpegError::from(result).to_string()));
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn to_rgba(&mut self, frame: &VideoFrame) -> Result<RgbaPlane, ScrubError> {
        let input = (frame.format(), frame.width(), frame.height());
        let stale = match &self.scaler {
            Some((configured, _)) => *configured != input,
            None => true,
        };
        if stale {
            let context = ScalingContext::get(
                input.0,
                input.1,
                input.2,
                Pixel::RGBA,
                input.1,
                input.2,
                ScalingFlags::BILINEAR,
            )?;
            self.scaler = Some((input, context));
        }

        let mut rgba = VideoFrame::empty();
        match self.scaler.as_mut() {
            Some((_, scaler)) => scaler.run(frame, &mut rgba)?,
            None => return Err(ScrubError::PixelConversion("no scaler available".to_string())),
        }

        Ok(RgbaPlane {
            width: rgba.width(),
            height: rgba.height(),
            stride: rgba.stride(0),
            data: rgba.data(0).to_vec(),
        })
    }
}
