//! Synthetic video stream shared by the integration tests.
//!
//! `SyntheticStream` implements `DecoderAdapter` without FFmpeg. It models the
//! parts of a real demuxer/decoder pair the seek engine has to cope with:
//! keyframe groups, decoder output delay, loss of references after a flush,
//! interleaved packets of other streams and padded RGBA rows. Every frame shows
//! a textured scene sliding right by `velocity` pixels per frame, so motion
//! between frames is known exactly.

#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use framescrub::{
    DecoderAdapter, DemuxedPacket, FrameRead, PacketRead, Rational, RgbaPlane, ScrubError,
    StreamMetadata, timestamp::encode_embedded,
};
use image::{Rgba, RgbaImage};

pub const TICKS_PER_SECOND: i32 = 90_000;
pub const BASE_TICKS: u64 = 17_000_000_000_000_000;

/// Burnt-in clock written into every frame.
#[derive(Debug, Clone)]
pub struct EmbeddedClock {
    pub row: u32,
    pub base_ticks: u64,
    pub step_ticks: u64,
    pub jitter_ticks: u64,
    /// Frames whose clock repeats the value of an earlier frame: `(frame, copy_of)`.
    pub glitches: Vec<(usize, usize)>,
    /// Frames rendered without a clock.
    pub blanked: Vec<usize>,
}

impl EmbeddedClock {
    pub fn uniform(row: u32) -> Self {
        Self {
            row,
            base_ticks: BASE_TICKS,
            step_ticks: 333_333,
            jitter_ticks: 0,
            glitches: Vec::new(),
            blanked: Vec::new(),
        }
    }

    pub fn jittered(row: u32) -> Self {
        Self {
            jitter_ticks: 40_000,
            ..Self::uniform(row)
        }
    }

    pub fn ticks(&self, frame: usize) -> u64 {
        let source = self
            .glitches
            .iter()
            .find(|(glitched, _)| *glitched == frame)
            .map(|(_, copy_of)| *copy_of)
            .unwrap_or(frame);
        let jitter = ((source * 7) % 5) as u64 * self.jitter_ticks;
        self.base_ticks + source as u64 * self.step_ticks + jitter
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub frames: usize,
    pub fps: i32,
    pub width: u32,
    pub height: u32,
    pub gop: usize,
    pub decoder_delay: usize,
    /// One audio packet after every `n` video packets.
    pub audio_every: Option<usize>,
    /// `(after_frame, count)`: a run of audio packets after one video packet.
    pub audio_burst: Option<(usize, usize)>,
    pub stride_padding: usize,
    pub embedded: Option<EmbeddedClock>,
    pub velocity: f64,
    pub start_offset: i64,
    /// Frames the first presented frame is shifted from the stream start.
    pub first_frame_offset: i64,
    /// Frame count written in the container; `None` reports the real count.
    pub reported_frames: Option<u64>,
    pub container_duration: f64,
    /// Keyframe seeks land on the first keyframe at or after the target.
    pub seek_lands_late: bool,
    pub fail_seeks: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frames: 300,
            fps: 30,
            width: 160,
            height: 64,
            gop: 12,
            decoder_delay: 2,
            audio_every: Some(3),
            audio_burst: None,
            stride_padding: 16,
            embedded: None,
            velocity: 2.0,
            start_offset: 0,
            first_frame_offset: 0,
            reported_frames: None,
            container_duration: 0.0,
            seek_lands_late: false,
            fail_seeks: false,
        }
    }
}

impl SyntheticConfig {
    pub fn ticks_per_frame(&self) -> i64 {
        i64::from(TICKS_PER_SECOND / self.fps)
    }

    pub fn pts(&self, frame: usize) -> i64 {
        self.start_offset + (frame as i64 + self.first_frame_offset) * self.ticks_per_frame()
    }

    pub fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            width: self.width,
            height: self.height,
            frame_rate: Rational::new(self.fps, 1),
            guessed_frame_rate: Rational::new(self.fps, 1),
            time_base: Rational::new(1, TICKS_PER_SECOND),
            reported_frame_count: self.reported_frames.unwrap_or(self.frames as u64),
            container_duration: self.container_duration,
            stream_duration: self.frames as i64 * self.ticks_per_frame(),
            start_offset: self.start_offset,
            codec: "synthetic".to_string(),
        }
    }

    /// Tightly packed pixels of `frame`.
    pub fn render(&self, frame: usize) -> RgbaImage {
        let shift = self.velocity * frame as f64;
        let mut image = RgbaImage::from_fn(self.width, self.height, |x, y| {
            if y < 2 {
                Rgba([0, 0, 0, 255])
            } else {
                texture(f64::from(x) - shift, f64::from(y))
            }
        });
        if let Some(clock) = &self.embedded {
            if !clock.blanked.contains(&frame) {
                encode_embedded(&mut image, clock.row, clock.ticks(frame));
            }
        }
        image
    }
}

/// Smooth, non-repeating test texture.
pub fn texture(x: f64, y: f64) -> Rgba<u8> {
    let a = (0.37 * x + 0.11 * y).sin();
    let b = (0.083 * x - 0.29 * y + 1.3).sin();
    let c = (0.23 * x + 0.05 * y + 0.7).sin();
    let channel = |value: f64| value.round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(128.0 + 50.0 * a + 40.0 * b + 30.0 * c),
        channel(128.0 + 45.0 * b - 35.0 * c + 20.0 * a),
        channel(128.0 + 40.0 * c + 30.0 * a - 25.0 * b),
        255,
    ])
}

/// Pseudo-random noise, different for every seed.
pub fn noise(x: u32, y: u32, seed: u32) -> Rgba<u8> {
    let mut value = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed.wrapping_mul(2_246_822_519);
    value = (value ^ (value >> 13)).wrapping_mul(1_274_126_177);
    value ^= value >> 16;
    Rgba([value as u8, (value >> 8) as u8, (value >> 16) as u8, 255])
}

#[derive(Debug, Clone)]
pub struct SyntheticPacket {
    stream: usize,
    frame: usize,
    pts: i64,
    key: bool,
}

impl DemuxedPacket for SyntheticPacket {
    fn stream_index(&self) -> usize {
        self.stream
    }

    fn pts(&self) -> Option<i64> {
        Some(self.pts)
    }

    fn dts(&self) -> Option<i64> {
        Some(self.pts)
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticFrame {
    pub index: usize,
}

/// Counters observable after the stream is moved into an engine.
#[derive(Debug, Default)]
pub struct Stats {
    pub seeks: usize,
    pub packets_sent: usize,
    pub conversions: usize,
    pub opens: usize,
}

pub struct SyntheticStream {
    config: SyntheticConfig,
    metadata: StreamMetadata,
    packets: Vec<SyntheticPacket>,
    cursor: usize,
    pending: VecDeque<(usize, i64)>,
    has_reference: bool,
    eof: bool,
    stats: Rc<RefCell<Stats>>,
}

impl SyntheticStream {
    pub fn new(config: SyntheticConfig) -> Self {
        Self::with_stats(config, Rc::new(RefCell::new(Stats::default())))
    }

    pub fn with_stats(config: SyntheticConfig, stats: Rc<RefCell<Stats>>) -> Self {
        let mut packets = Vec::new();
        for frame in 0..config.frames {
            packets.push(SyntheticPacket {
                stream: 0,
                frame,
                pts: config.pts(frame),
                key: frame % config.gop == 0,
            });
            if let Some(every) = config.audio_every {
                if (frame + 1) % every == 0 {
                    packets.push(SyntheticPacket {
                        stream: 1,
                        frame,
                        pts: config.pts(frame),
                        key: true,
                    });
                }
            }
            if let Some((after, count)) = config.audio_burst {
                if frame == after {
                    for _ in 0..count {
                        packets.push(SyntheticPacket {
                            stream: 1,
                            frame,
                            pts: config.pts(frame),
                            key: true,
                        });
                    }
                }
            }
        }
        stats.borrow_mut().opens += 1;
        Self {
            metadata: config.metadata(),
            config,
            packets,
            cursor: 0,
            pending: VecDeque::new(),
            has_reference: false,
            eof: false,
            stats,
        }
    }

    /// Report `metadata` instead of the metadata derived from the config.
    pub fn with_metadata(mut self, metadata: StreamMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn stats(&self) -> Rc<RefCell<Stats>> {
        Rc::clone(&self.stats)
    }
}

impl DecoderAdapter for SyntheticStream {
    type Packet = SyntheticPacket;
    type Frame = SyntheticFrame;

    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    fn stream_index(&self) -> usize {
        0
    }

    fn read_packet(&mut self) -> Result<PacketRead<SyntheticPacket>, ScrubError> {
        match self.packets.get(self.cursor) {
            Some(packet) => {
                self.cursor += 1;
                Ok(PacketRead::Packet(packet.clone()))
            }
            None => Ok(PacketRead::EndOfStream),
        }
    }

    fn send_packet(&mut self, packet: &SyntheticPacket) -> Result<(), ScrubError> {
        self.stats.borrow_mut().packets_sent += 1;
        if packet.key {
            self.has_reference = true;
        }
        if self.has_reference {
            self.pending.push_back((packet.frame, packet.pts));
        }
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), ScrubError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<FrameRead<SyntheticFrame>, ScrubError> {
        if self.pending.len() > self.config.decoder_delay || (self.eof && !self.pending.is_empty()) {
            if let Some((index, pts)) = self.pending.pop_front() {
                return Ok(FrameRead::Frame {
                    frame: SyntheticFrame { index },
                    timestamp: Some(pts),
                });
            }
        }
        if self.eof {
            Ok(FrameRead::Drained)
        } else {
            Ok(FrameRead::NeedMoreInput)
        }
    }

    fn seek_near(&mut self, timestamp: i64) -> Result<(), ScrubError> {
        self.stats.borrow_mut().seeks += 1;
        if self.config.fail_seeks {
            return Err(ScrubError::SeekFailure("synthetic seek refused".to_string()));
        }
        let keyframes = self
            .packets
            .iter()
            .enumerate()
            .filter(|(_, packet)| packet.stream == 0 && packet.key);
        let landing = if self.config.seek_lands_late {
            keyframes
                .clone()
                .find(|(_, packet)| packet.pts >= timestamp)
                .or_else(|| keyframes.last())
        } else {
            keyframes
                .clone()
                .filter(|(_, packet)| packet.pts <= timestamp)
                .last()
                .or_else(|| {
                    self.packets
                        .iter()
                        .enumerate()
                        .find(|(_, packet)| packet.stream == 0 && packet.key)
                })
        };
        self.cursor = landing.map(|(position, _)| position).unwrap_or(0);
        Ok(())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.has_reference = false;
        self.eof = false;
    }

    fn to_rgba(&mut self, frame: &SyntheticFrame) -> Result<RgbaPlane, ScrubError> {
        self.stats.borrow_mut().conversions += 1;
        let image = self.config.render(frame.index);
        let row_bytes = self.config.width as usize * 4;
        let stride = row_bytes + self.config.stride_padding;
        let mut data = vec![0xAB; stride * self.config.height as usize];
        for (row, chunk) in image.as_raw().chunks(row_bytes).enumerate() {
            data[row * stride..row * stride + row_bytes].copy_from_slice(chunk);
        }
        Ok(RgbaPlane {
            width: self.config.width,
            height: self.config.height,
            stride,
            data,
        })
    }
}

/// Mean absolute channel difference over the interior of two images.
pub fn interior_difference(first: &RgbaImage, second: &RgbaImage, margin: u32) -> f64 {
    let mut total = 0.0;
    let mut count = 0.0;
    for y in margin.max(2)..first.height() - margin {
        for x in margin..first.width() - margin {
            let a = first.get_pixel(x, y).0;
            let b = second.get_pixel(x, y).0;
            for channel in 0..3 {
                total += (f64::from(a[channel]) - f64::from(b[channel])).abs();
                count += 1.0;
            }
        }
    }
    total / count
}
