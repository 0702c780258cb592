//! Regions of interest.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// A rectangular window of a frame, in pixel coordinates.
///
/// ROIs scope motion estimation. Two ROIs are equal only when all four
/// coordinates match, and a cached motion vector is reused only for an equal
/// ROI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Roi {
    /// Create a ROI.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the ROI covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// A full-height vertical slice centred horizontally.
    ///
    /// The slice is `min(frame_width, max_width)` wide.
    pub fn centered_slice(frame_width: u32, frame_height: u32, max_width: u32) -> Self {
        let width = frame_width.min(max_width);
        Self::new(frame_width / 2 - width / 2, 0, width, frame_height)
    }

    /// Shrink and move the ROI so it lies inside a frame.
    #[must_use]
    pub fn clamped_to(self, frame_width: u32, frame_height: u32) -> Self {
        let width = self.width.min(frame_width);
        let height = self.height.min(frame_height);
        Self::new(
            self.x.min(frame_width - width),
            self.y.min(frame_height - height),
            width,
            height,
        )
    }

    /// The ROI a request should use.
    ///
    /// A missing or empty ROI is replaced by [`Roi::centered_slice`]; any ROI
    /// is then clamped to the frame.
    pub fn resolve(requested: Option<Roi>, frame_width: u32, frame_height: u32, default_width: u32) -> Self {
        match requested {
            Some(roi) if !roi.is_empty() => roi.clamped_to(frame_width, frame_height),
            Some(roi) => {
                log::warn!("Ignoring empty ROI {roi}, using a centred {default_width}px slice");
                Self::centered_slice(frame_width, frame_height, default_width)
            }
            None => Self::centered_slice(frame_width, frame_height, default_width),
        }
    }
}

impl Display for Roi {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}-{}-{}-{}", self.x, self.y, self.width, self.height)
    }
}
