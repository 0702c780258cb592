//! Frame-accurate seeking.
//!
//! Compressed streams can only be entered at keyframes, and containers only
//! seek by timestamp. [`SeekEngine`] turns that into "give me frame `n`":
//!
//! 1. The current frame, or a recently decoded one kept in the ring buffer,
//!    is returned without decoding.
//! 2. Short forward jumps decode sequentially.
//! 3. Short backward jumps seek once to the target's exact timestamp and
//!    decode forward a bounded number of frames.
//! 4. Anything else runs a [`KeyframeBackoff`]: seek a little before the
//!    target, and if the decoder lands past it, back off further and retry.
//!
//! Frame indices are derived from timestamps, not counted, so the index
//! reported for a frame is always the one its timestamp maps to.

use std::collections::VecDeque;

use image::RgbaImage;

use crate::{
    configuration::SeekOptions,
    conversion::{compact_rows, frame_index_to_stream_timestamp, timestamp_to_frame_number},
    decoder::{DecoderAdapter, DemuxedPacket, FrameRead, PacketRead},
    error::ScrubError,
    metadata::StreamMetadata,
};

/// The backoff gives up once its offset reaches this many frames.
pub const MAX_BACKOFF: i64 = (i32::MAX / 4) as i64;

/// Backoffs below this double; larger ones grow by half.
const BACKOFF_DOUBLING_LIMIT: i64 = 16;

/// States of a keyframe backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    /// First container seek, `delta` frames before the target.
    Probe {
        /// Current backward offset in frames.
        delta: i64,
    },
    /// The previous probe landed past the target; seek again further back.
    OvershootRetry {
        /// Grown backward offset in frames.
        delta: i64,
    },
    /// Landed at or before the target; decode forward to it.
    ForwardCatchup,
    /// Positioned on the target (or, for approximate seeks, near it).
    Done,
    /// The backoff is exhausted.
    Failed,
}

/// The keyframe backoff as an explicit state machine.
///
/// The engine asks for [`probe_index`](Self::probe_index), seeks there, decodes
/// one frame and reports where it landed with
/// [`on_landing`](Self::on_landing). The machine decides whether to retry,
/// catch up or stop; its retry bound does not depend on the decoder.
#[derive(Debug, Clone)]
pub struct KeyframeBackoff {
    target: i64,
    approximate: bool,
    state: BackoffState,
}

impl KeyframeBackoff {
    /// Start a backoff towards `target`.
    ///
    /// Approximate seeks probe the target itself and stop after one landing.
    pub fn new(target: i64, initial_delta: i64, approximate: bool) -> Self {
        let delta = if approximate { 0 } else { initial_delta.max(1) };
        Self {
            target,
            approximate,
            state: BackoffState::Probe { delta },
        }
    }

    /// The current state.
    pub fn state(&self) -> BackoffState {
        self.state
    }

    /// Frame index to seek to, while a probe is pending.
    pub fn probe_index(&self) -> Option<i64> {
        match self.state {
            BackoffState::Probe { delta } | BackoffState::OvershootRetry { delta } => {
                Some((self.target - delta).max(0))
            }
            _ => None,
        }
    }

    /// Report the index the decoder landed on after a probe.
    ///
    /// `landed` is negative when the landing position is unknown.
    pub fn on_landing(&mut self, landed: i64) -> BackoffState {
        let (Some(probe), BackoffState::Probe { delta } | BackoffState::OvershootRetry { delta }) =
            (self.probe_index(), self.state)
        else {
            return self.state;
        };

        self.state = if self.approximate || landed == self.target {
            BackoffState::Done
        } else if landed < 0 || landed > self.target {
            if probe == 0 || delta >= MAX_BACKOFF {
                BackoffState::Failed
            } else {
                BackoffState::OvershootRetry {
                    delta: grow_backoff(delta),
                }
            }
        } else {
            BackoffState::ForwardCatchup
        };
        self.state
    }

    /// Report that forward decoding reached the target.
    pub fn on_caught_up(&mut self) -> BackoffState {
        if self.state == BackoffState::ForwardCatchup {
            self.state = BackoffState::Done;
        }
        self.state
    }
}

fn grow_backoff(delta: i64) -> i64 {
    if delta < BACKOFF_DOUBLING_LIMIT {
        delta * 2
    } else {
        delta * 3 / 2
    }
}

/// A decoded frame retained for short backward seeks.
struct RingEntry<F> {
    index: i64,
    frame: F,
}

/// Where a located frame lives.
#[derive(Debug, Clone, Copy)]
enum Location {
    Current,
    Ring(usize),
}

/// A frame returned by a seek, converted to RGBA.
#[derive(Debug, Clone)]
pub struct SeekedFrame {
    /// Logical index of the frame.
    pub index: i64,
    /// Tightly packed pixels.
    pub image: RgbaImage,
}

/// Decode state of one open stream.
pub struct SeekEngine<A: DecoderAdapter> {
    adapter: A,
    options: SeekOptions,
    fps: f64,
    total_frames: i64,
    /// Absolute frame number of the first decoded frame.
    first_frame_number: Option<i64>,
    /// Index of `current`, or -1 when unknown.
    current_index: i64,
    /// Timestamp of `current` in stream ticks.
    last_timestamp: Option<i64>,
    current: Option<A::Frame>,
    ring: VecDeque<RingEntry<A::Frame>>,
    /// Timestamp of the last video packet sent to the decoder.
    last_packet_timestamp: Option<i64>,
    eof_sent: bool,
}

impl<A: DecoderAdapter> SeekEngine<A> {
    /// Take ownership of an adapter and decode the first frame.
    ///
    /// The first frame anchors the index axis: its timestamp maps to index 0.
    ///
    /// # Errors
    ///
    /// Returns [`ScrubError::SeekFailure`] when the stream has no usable frame
    /// rate or frame count, and decode errors when the first frame cannot be
    /// read.
    pub fn new(adapter: A, options: SeekOptions) -> Result<Self, ScrubError> {
        let metadata = adapter.metadata();
        let fps = metadata.frames_per_second();
        let total_frames = metadata.total_frames();
        if fps <= 0.0 {
            return Err(ScrubError::SeekFailure("stream has no usable frame rate".to_string()));
        }
        if total_frames <= 0 {
            return Err(ScrubError::SeekFailure("stream reports no frames".to_string()));
        }

        let mut engine = Self {
            adapter,
            ring: VecDeque::with_capacity(options.ring_capacity + 1),
            options,
            fps,
            total_frames,
            first_frame_number: None,
            current_index: -1,
            last_timestamp: None,
            current: None,
            last_packet_timestamp: None,
            eof_sent: false,
        };
        engine.grab_frame()?;
        log::debug!(
            "Seek engine primed: fps={fps:.3} frames={total_frames} first={:?}",
            engine.first_frame_number
        );
        Ok(engine)
    }

    /// Resolved frames per second.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Frame count estimated from metadata.
    pub fn total_frames(&self) -> i64 {
        self.total_frames
    }

    /// Index of the last decoded frame, or -1 when unknown.
    pub fn current_index(&self) -> i64 {
        self.current_index
    }

    /// Stream timestamp of the last decoded frame.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Number of frames held in the ring buffer.
    pub fn buffered_frames(&self) -> usize {
        self.ring.len()
    }

    /// Metadata of the underlying stream.
    pub fn metadata(&self) -> &StreamMetadata {
        self.adapter.metadata()
    }

    /// Position the stream on `target` and return that frame as RGBA.
    ///
    /// `target` is clamped to `[0, total_frames − 1]`. With `approximate`,
    /// the engine stops at the first frame decoded after a keyframe seek.
    ///
    /// # Errors
    ///
    /// - [`ScrubError::DecodeExhausted`] when a grab exceeds its ceilings.
    /// - [`ScrubError::SeekFailure`] when the backoff is exhausted or the
    ///   container seek fails.
    pub fn seek(&mut self, target: i64, approximate: bool) -> Result<SeekedFrame, ScrubError> {
        let location = self.locate(target, approximate)?;
        let (index, frame) = match location {
            Location::Current => (self.current_index, self.current.as_ref()),
            Location::Ring(slot) => match self.ring.get(slot) {
                Some(entry) => (entry.index, Some(&entry.frame)),
                None => (-1, None),
            },
        };
        let frame = frame.ok_or_else(|| ScrubError::SeekFailure(format!("no frame held for index {target}")))?;
        let plane = self.adapter.to_rgba(frame)?;
        Ok(SeekedFrame {
            index,
            image: compact_rows(&plane)?,
        })
    }

    fn locate(&mut self, target: i64, approximate: bool) -> Result<Location, ScrubError> {
        let target = target.clamp(0, self.total_frames - 1);

        if target == self.current_index && self.current.is_some() {
            return Ok(Location::Current);
        }

        if !approximate {
            if let Some(slot) = self.ring.iter().rposition(|entry| entry.index == target) {
                log::trace!("Frame {target} served from ring buffer");
                return Ok(Location::Ring(slot));
            }
        }

        if self.current_index >= 0 {
            let gap = target - self.current_index;
            if gap > 0 && gap < self.options.forward_window {
                if self.decode_forward_to(target)? {
                    return Ok(Location::Current);
                }
            } else if gap < 0 && -gap < self.options.backward_window && !approximate {
                if self.short_backward_seek(target)? {
                    return Ok(Location::Current);
                }
            }
        }

        self.keyframe_backoff(target, approximate)?;
        Ok(Location::Current)
    }

    /// Decode sequentially until `target` is current.
    ///
    /// Returns `false` if decoding failed or skipped past the target, leaving
    /// the caller to fall back to a keyframe seek.
    fn decode_forward_to(&mut self, target: i64) -> Result<bool, ScrubError> {
        while self.current_index >= 0 && self.current_index < target {
            if let Err(error) = self.grab_frame() {
                log::debug!("Sequential decode towards {target} stopped: {error}");
                return Ok(false);
            }
        }
        Ok(self.current_index == target)
    }

    /// One exact-timestamp seek followed by a bounded forward decode.
    fn short_backward_seek(&mut self, target: i64) -> Result<bool, ScrubError> {
        self.seek_container(target)?;
        for _ in 0..self.options.backward_window.max(1) - 1 {
            if let Err(error) = self.grab_frame() {
                log::debug!("Short backward seek to {target} stopped: {error}");
                return Ok(false);
            }
            if self.current_index >= target {
                break;
            }
        }
        Ok(self.current_index == target)
    }

    fn keyframe_backoff(&mut self, target: i64, approximate: bool) -> Result<(), ScrubError> {
        let mut backoff = KeyframeBackoff::new(target, self.options.initial_backoff, approximate);

        loop {
            match backoff.state() {
                BackoffState::Probe { .. } | BackoffState::OvershootRetry { .. } => {
                    let probe = backoff.probe_index().unwrap_or(0);
                    self.seek_container(probe)?;
                    self.grab_frame()?;
                    let landed = self.current_index;
                    log::trace!("Backoff probe {probe} for {target} landed on {landed}");
                    backoff.on_landing(landed);
                }
                BackoffState::ForwardCatchup => {
                    while self.current_index < target {
                        self.grab_frame()?;
                    }
                    if self.current_index != target {
                        log::warn!(
                            "Frame {target} is missing from the stream, positioned on {} instead",
                            self.current_index
                        );
                    }
                    backoff.on_caught_up();
                }
                BackoffState::Done => return Ok(()),
                BackoffState::Failed => {
                    self.current_index = -1;
                    return Err(ScrubError::SeekFailure(format!(
                        "keyframe backoff could not position before frame {target}"
                    )));
                }
            }
        }
    }

    /// Seek the container to the keyframe at or before frame `index`.
    fn seek_container(&mut self, index: i64) -> Result<(), ScrubError> {
        let metadata = self.adapter.metadata();
        let timestamp = frame_index_to_stream_timestamp(
            index,
            self.first_frame_number.unwrap_or(0),
            metadata.start_offset,
            metadata.time_base,
            self.fps,
        );
        if self.total_frames > 1 {
            self.adapter.seek_near(timestamp).map_err(|error| {
                self.current_index = -1;
                ScrubError::SeekFailure(format!("container seek to frame {index} failed: {error}"))
            })?;
        }
        self.adapter.flush();
        self.eof_sent = false;
        self.last_packet_timestamp = None;
        self.current_index = -1;
        Ok(())
    }

    /// Decode the next frame and make it current.
    ///
    /// On failure the position becomes unknown.
    fn grab_frame(&mut self) -> Result<(), ScrubError> {
        let (frame, timestamp) = match self.next_frame() {
            Ok(decoded) => decoded,
            Err(error) => {
                self.current_index = -1;
                return Err(error);
            }
        };

        let timestamp = timestamp.or(self.last_packet_timestamp);
        let index = match timestamp {
            Some(timestamp) => {
                let metadata = self.adapter.metadata();
                let absolute = timestamp_to_frame_number(
                    timestamp,
                    metadata.start_offset,
                    metadata.time_base,
                    self.fps,
                );
                let first = *self.first_frame_number.get_or_insert(absolute);
                absolute - first
            }
            None if self.current_index >= 0 => self.current_index + 1,
            None => {
                self.first_frame_number.get_or_insert(0);
                -1
            }
        };

        self.current_index = index;
        self.last_timestamp = timestamp;
        if index >= 0 {
            self.ring.push_back(RingEntry {
                index,
                frame: frame.clone(),
            });
            while self.ring.len() > self.options.ring_capacity {
                self.ring.pop_front();
            }
        }
        self.current = Some(frame);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<(A::Frame, Option<i64>), ScrubError> {
        if let FrameRead::Frame { frame, timestamp } = self.adapter.receive_frame()? {
            return Ok((frame, timestamp));
        }

        let stream_index = self.adapter.stream_index();
        let mut read_attempts = 0;
        let mut decode_attempts = 0;
        loop {
            if self.eof_sent {
                return match self.adapter.receive_frame()? {
                    FrameRead::Frame { frame, timestamp } => Ok((frame, timestamp)),
                    FrameRead::NeedMoreInput | FrameRead::Drained => Err(ScrubError::DecodeExhausted {
                        stage: "end of stream",
                        attempts: decode_attempts,
                    }),
                };
            }

            let packet = match self.adapter.read_packet()? {
                PacketRead::Packet(packet) => packet,
                PacketRead::Again => {
                    read_attempts += 1;
                    if read_attempts > self.options.max_read_attempts {
                        return Err(ScrubError::DecodeExhausted {
                            stage: "packet read",
                            attempts: read_attempts,
                        });
                    }
                    continue;
                }
                PacketRead::EndOfStream => {
                    self.adapter.send_eof()?;
                    self.eof_sent = true;
                    continue;
                }
            };

            if packet.stream_index() != stream_index {
                read_attempts += 1;
                if read_attempts > self.options.max_read_attempts {
                    log::warn!(
                        "Skipped {read_attempts} packets of other streams without finding video"
                    );
                    return Err(ScrubError::DecodeExhausted {
                        stage: "packet read",
                        attempts: read_attempts,
                    });
                }
                continue;
            }

            self.adapter.send_packet(&packet)?;
            if let Some(timestamp) = packet.pts().filter(|&pts| pts != 0).or(packet.dts()) {
                self.last_packet_timestamp = Some(timestamp);
            }

            match self.adapter.receive_frame()? {
                FrameRead::Frame { frame, timestamp } => return Ok((frame, timestamp)),
                FrameRead::NeedMoreInput | FrameRead::Drained => {
                    decode_attempts += 1;
                    if decode_attempts > self.options.max_decode_attempts {
                        return Err(ScrubError::DecodeExhausted {
                            stage: "frame decode",
                            attempts: decode_attempts,
                        });
                    }
                }
            }
        }
    }
}
