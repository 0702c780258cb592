//! The decoder adapter contract.
//!
//! The seek engine does not talk to a codec library directly. It drives any
//! type implementing [`DecoderAdapter`]: something that can demux packets,
//! decode them into frames, seek the container near a timestamp and convert a
//! frame to RGBA. [`FfmpegSource`](crate::FfmpegSource) is the production
//! implementation.
//!
//! The contract follows the send/receive decoding model: packets are pushed
//! with [`send_packet`](DecoderAdapter::send_packet) and frames are polled
//! with [`receive_frame`](DecoderAdapter::receive_frame), which may ask for
//! more input before producing anything.

use crate::{error::ScrubError, metadata::StreamMetadata};

/// A demuxed container packet.
pub trait DemuxedPacket {
    /// Index of the stream this packet belongs to.
    fn stream_index(&self) -> usize;

    /// Presentation timestamp, when the container provides one.
    fn pts(&self) -> Option<i64>;

    /// Decode timestamp, when the container provides one.
    fn dts(&self) -> Option<i64>;
}

/// Outcome of reading one packet from the container.
#[derive(Debug)]
pub enum PacketRead<P> {
    /// A packet from any stream.
    Packet(P),
    /// The demuxer is temporarily unable to deliver a packet; try again.
    Again,
    /// The container has no more packets.
    EndOfStream,
}

/// Outcome of polling the decoder for a frame.
#[derive(Debug)]
pub enum FrameRead<F> {
    /// A decoded frame and its presentation timestamp, if known.
    Frame {
        /// The decoded frame.
        frame: F,
        /// Best-effort presentation timestamp in stream time-base ticks.
        timestamp: Option<i64>,
    },
    /// The decoder needs more packets before it can output a frame.
    NeedMoreInput,
    /// The decoder has been drained after end of stream.
    Drained,
}

/// A decoded frame converted to interleaved RGBA.
///
/// `stride` is the distance in bytes between the starts of two rows and may
/// exceed `width × 4`.
#[derive(Debug, Clone)]
pub struct RgbaPlane {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row, including padding.
    pub stride: usize,
    /// Pixel bytes, `stride × height` long (the last row may be unpadded).
    pub data: Vec<u8>,
}

/// A source of decoded video frames for one stream.
///
/// Implementors own all codec state. Dropping the adapter must release every
/// native resource it holds.
pub trait DecoderAdapter {
    /// Container packet type.
    type Packet: DemuxedPacket;
    /// Decoded frame type. `Clone` must produce an independent deep copy.
    type Frame: Clone;

    /// Metadata of the tracked video stream.
    fn metadata(&self) -> &StreamMetadata;

    /// Index of the tracked video stream within the container.
    fn stream_index(&self) -> usize;

    /// Read the next packet of any stream.
    fn read_packet(&mut self) -> Result<PacketRead<Self::Packet>, ScrubError>;

    /// Feed a packet of the tracked stream to the decoder.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), ScrubError>;

    /// Signal end of input so buffered frames can drain.
    fn send_eof(&mut self) -> Result<(), ScrubError>;

    /// Poll the decoder for an output frame.
    fn receive_frame(&mut self) -> Result<FrameRead<Self::Frame>, ScrubError>;

    /// Seek the container to the nearest keyframe at or before `timestamp`.
    ///
    /// `timestamp` is in the tracked stream's time base.
    fn seek_near(&mut self, timestamp: i64) -> Result<(), ScrubError>;

    /// Discard all decoder state buffered before a seek.
    fn flush(&mut self);

    /// Convert a decoded frame to RGBA.
    fn to_rgba(&mut self, frame: &Self::Frame) -> Result<RgbaPlane, ScrubError>;
}
