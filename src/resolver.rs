//! Locating a wall-clock timestamp on the frame axis.
//!
//! Frame timestamps are monotonic but not evenly spaced, so a linear guess
//! from the stream bounds is only a starting point. The search probes the
//! guess, gallops away from it with doubling steps until the target is
//! bracketed, then bisects the bracket down to two adjacent frames. Probes go
//! through a [`FrameProbe`], which in the scrubber is backed by the frame
//! cache so repeated searches over the same region cost no decoding.

use crate::error::ScrubError;

/// Source of frame timestamps for the search.
pub trait FrameProbe {
    /// Wall-clock timestamp of frame `index`, in milliseconds.
    fn timestamp_ms(&mut self, index: u64) -> Result<u64, ScrubError>;
}

impl<F> FrameProbe for F
where
    F: FnMut(u64) -> Result<u64, ScrubError>,
{
    fn timestamp_ms(&mut self, index: u64) -> Result<u64, ScrubError> {
        self(index)
    }
}

/// Two adjacent frames around a target timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    /// Index of the earlier frame; its timestamp is at or before the target.
    pub low: u64,
    /// `low + 1`.
    pub high: u64,
    /// Timestamp of `low` in milliseconds.
    pub low_ms: u64,
    /// Timestamp of `high` in milliseconds.
    pub high_ms: u64,
}

/// Find the adjacent frames whose timestamps bracket `target_ms`.
///
/// `guess` is clamped to `[0, frame_count − 2]`. The returned bracket
/// satisfies `low_ms ≤ target_ms` and, unless the target is at or past the
/// last frame, `target_ms < high_ms`.
///
/// # Errors
///
/// - [`ScrubError::FrameOutOfRange`] if the stream has fewer than two frames.
/// - [`ScrubError::CorruptTimestampOrdering`] if two probed frames are out of
///   order.
/// - [`ScrubError::TimestampOutOfRange`] if the first frame is already later
///   than the target.
/// - Any error returned by the probe.
pub fn find_bounding_frames<P: FrameProbe + ?Sized>(
    probe: &mut P,
    target_ms: u64,
    guess: u64,
    frame_count: u64,
) -> Result<Bracket, ScrubError> {
    if frame_count < 2 {
        return Err(ScrubError::FrameOutOfRange {
            position: guess as f64,
            frame_count,
        });
    }
    let last = frame_count - 1;
    let guess = guess.min(frame_count - 2);
    let guess_ms = probe.timestamp_ms(guess)?;

    let (mut low, mut high) = if guess_ms <= target_ms {
        gallop_forward(probe, target_ms, guess, guess_ms, last)?
    } else {
        gallop_backward(probe, target_ms, guess, guess_ms)?
    };

    while low + 1 < high {
        let middle = low + (high - low) / 2;
        if probe.timestamp_ms(middle)? <= target_ms {
            low = middle;
        } else {
            high = middle;
        }
    }

    let low = low.min(last - 1);
    let low_ms = probe.timestamp_ms(low)?;
    let high_ms = probe.timestamp_ms(low + 1)?;
    if low_ms > target_ms {
        return Err(ScrubError::TimestampOutOfRange {
            timestamp_ms: target_ms,
            first_ms: low_ms,
            last_ms: probe.timestamp_ms(last)?,
        });
    }
    check_order(low, low_ms, low + 1, high_ms)?;

    log::debug!("Timestamp {target_ms} ms lies between frames {low} ({low_ms} ms) and {} ({high_ms} ms)", low + 1);
    Ok(Bracket {
        low,
        high: low + 1,
        low_ms,
        high_ms,
    })
}

/// Grow `[low, high]` forward until `high` is past the target or the end.
fn gallop_forward<P: FrameProbe + ?Sized>(
    probe: &mut P,
    target_ms: u64,
    guess: u64,
    guess_ms: u64,
    last: u64,
) -> Result<(u64, u64), ScrubError> {
    let mut low = guess;
    let mut low_ms = guess_ms;
    let mut high = guess + 1;
    loop {
        let high_ms = probe.timestamp_ms(high)?;
        check_order(low, low_ms, high, high_ms)?;
        if high_ms > target_ms {
            return Ok((low, high));
        }
        if high == last {
            return Ok((last - 1, last));
        }
        low = high;
        low_ms = high_ms;
        high = (high + (high - guess + 1)).min(last);
    }
}

/// Grow `[low, high]` backward until `low` is at or before the target or zero.
fn gallop_backward<P: FrameProbe + ?Sized>(
    probe: &mut P,
    target_ms: u64,
    guess: u64,
    guess_ms: u64,
) -> Result<(u64, u64), ScrubError> {
    let mut high = guess;
    let mut high_ms = guess_ms;
    if guess == 0 {
        return Ok((0, 0));
    }
    let mut low = guess - 1;
    loop {
        let low_ms = probe.timestamp_ms(low)?;
        check_order(low, low_ms, high, high_ms)?;
        if low_ms <= target_ms || low == 0 {
            return Ok((low, high));
        }
        high = low;
        high_ms = low_ms;
        low = low.saturating_sub(2 * (guess - low + 1));
    }
}

fn check_order(first_index: u64, first_ms: u64, second_index: u64, second_ms: u64) -> Result<(), ScrubError> {
    if second_ms <= first_ms {
        log::warn!(
            "Timestamps do not increase between frame {first_index} ({first_ms} ms) and frame {second_index} ({second_ms} ms)"
        );
        return Err(ScrubError::CorruptTimestampOrdering {
            first_index,
            second_index,
            first_ms,
            second_ms,
        });
    }
    Ok(())
}
