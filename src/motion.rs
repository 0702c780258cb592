//! Translational motion between two frames.
//!
//! [`PatchCorrelation`] takes a square patch from the centre of the ROI in
//! the earlier frame and looks for it in the later frame within a bounded
//! radius, scoring every candidate offset by normalised cross-correlation of
//! luma. The best integer offset is refined to sub-pixel precision by fitting
//! a parabola through the scores either side of it on each axis.

use image::RgbaImage;

use crate::{configuration::MotionOptions, region::Roi};

/// Patches whose luma deviation is below this are considered featureless.
const FLAT_PATCH_DEVIATION: f64 = 1e-3;

/// Translational motion from one frame to the next.
///
/// `dx` and `dy` are in pixels per frame interval: content at `(x, y)` in the
/// earlier frame appears at `(x + dx, y + dy)` in the later one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionVector {
    /// Horizontal displacement in pixels.
    pub dx: f64,
    /// Vertical displacement in pixels.
    pub dy: f64,
    /// Time between the two frames in microseconds; zero until synthesized.
    pub elapsed_us: i64,
    /// Whether the estimate cleared the score threshold.
    pub valid: bool,
    /// Correlation score of the chosen offset.
    pub score: f64,
}

impl MotionVector {
    /// A vector marked invalid, carrying the best score seen.
    pub fn invalid(score: f64) -> Self {
        Self {
            score,
            ..Self::default()
        }
    }
}

/// Estimates the motion between two frames inside a region of interest.
pub trait MotionEstimator {
    /// Estimate the motion from `earlier` to `later` within `roi`.
    ///
    /// Never fails: an unusable input yields an invalid vector.
    fn estimate(&self, earlier: &RgbaImage, later: &RgbaImage, roi: Roi) -> MotionVector;
}

/// Patch search scored by normalised cross-correlation.
#[derive(Debug, Clone, Default)]
pub struct PatchCorrelation {
    options: MotionOptions,
}

impl PatchCorrelation {
    /// Create an estimator with the given options.
    pub fn new(options: MotionOptions) -> Self {
        Self { options }
    }

    /// The estimator's options.
    pub fn options(&self) -> &MotionOptions {
        &self.options
    }
}

impl MotionEstimator for PatchCorrelation {
    fn estimate(&self, earlier: &RgbaImage, later: &RgbaImage, roi: Roi) -> MotionVector {
        if earlier.dimensions() != later.dimensions() {
            log::warn!(
                "Cannot estimate motion between {:?} and {:?} frames",
                earlier.dimensions(),
                later.dimensions()
            );
            return MotionVector::invalid(0.0);
        }
        let (width, height) = earlier.dimensions();
        if width == 0 || height == 0 {
            return MotionVector::invalid(0.0);
        }
        let roi = roi.clamped_to(width, height);
        let size = self.options.patch_size.min(roi.width).min(roi.height);
        if size < 3 {
            return MotionVector::invalid(0.0);
        }

        let patch_x = roi.x + (roi.width - size) / 2;
        let patch_y = roi.y + (roi.height - size) / 2;
        let Some(template) = Template::new(&LumaWindow::new(earlier, patch_x, patch_y, size, size))
        else {
            log::debug!("Motion patch at ({patch_x}, {patch_y}) is featureless");
            return MotionVector::invalid(0.0);
        };

        let radius = self.options.search_radius;
        let window_x = patch_x.saturating_sub(radius);
        let window_y = patch_y.saturating_sub(radius);
        let window = LumaWindow::new(
            later,
            window_x,
            window_y,
            (patch_x + size + radius).min(width) - window_x,
            (patch_y + size + radius).min(height) - window_y,
        );

        let scores = ScoreGrid::search(&template, &window, patch_x, patch_y, radius as i64);
        let Some((best_dx, best_dy, best_score)) = scores.peak() else {
            return MotionVector::invalid(0.0);
        };
        if best_score < self.options.min_score {
            log::debug!("Motion peak score {best_score:.3} below {}", self.options.min_score);
            return MotionVector::invalid(best_score);
        }

        let refine_x = parabolic_offset(
            scores.at(best_dx - 1, best_dy),
            best_score,
            scores.at(best_dx + 1, best_dy),
        );
        let refine_y = parabolic_offset(
            scores.at(best_dx, best_dy - 1),
            best_score,
            scores.at(best_dx, best_dy + 1),
        );

        let vector = MotionVector {
            dx: best_dx as f64 + refine_x,
            dy: best_dy as f64 + refine_y,
            elapsed_us: 0,
            valid: true,
            score: best_score,
        };
        log::debug!(
            "Motion in {roi}: dx={:.3} dy={:.3} score={best_score:.3}",
            vector.dx,
            vector.dy
        );
        vector
    }
}

/// Vertex offset of the parabola through three equally spaced samples.
///
/// Returns zero when a neighbour is missing or the samples do not form a
/// maximum. The offset is clamped to one pixel.
fn parabolic_offset(left: Option<f64>, centre: f64, right: Option<f64>) -> f64 {
    let (Some(left), Some(right)) = (left, right) else {
        return 0.0;
    };
    let curvature = left - 2.0 * centre + right;
    if curvature >= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) / curvature).clamp(-1.0, 1.0)
}

/// Luma of a rectangular window of a frame.
struct LumaWindow {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    values: Vec<f64>,
}

impl LumaWindow {
    fn new(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Self {
        let mut values = Vec::with_capacity((width * height) as usize);
        for row in y..y + height {
            for column in x..x + width {
                let [r, g, b, _] = image.get_pixel(column, row).0;
                values.push(0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b));
            }
        }
        Self {
            x,
            y,
            width,
            height,
            values,
        }
    }

    fn value(&self, column: u32, row: u32) -> f64 {
        self.values[((row - self.y) * self.width + (column - self.x)) as usize]
    }
}

/// Zero-mean patch with its norm.
struct Template {
    size: u32,
    centred: Vec<f64>,
    norm: f64,
}

impl Template {
    fn new(patch: &LumaWindow) -> Option<Self> {
        let count = patch.values.len() as f64;
        let mean = patch.values.iter().sum::<f64>() / count;
        let centred: Vec<f64> = patch.values.iter().map(|value| value - mean).collect();
        let norm = centred.iter().map(|value| value * value).sum::<f64>().sqrt();
        if norm / count.sqrt() < FLAT_PATCH_DEVIATION {
            return None;
        }
        Some(Self {
            size: patch.width,
            centred,
            norm,
        })
    }

    /// Correlation with the same-sized patch of `window` at `(x, y)`.
    fn correlate(&self, window: &LumaWindow, x: u32, y: u32) -> f64 {
        let count = f64::from(self.size * self.size);
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        let mut cross = 0.0;
        let mut index = 0;
        for row in y..y + self.size {
            for column in x..x + self.size {
                let value = window.value(column, row);
                sum += value;
                sum_squares += value * value;
                cross += self.centred[index] * value;
                index += 1;
            }
        }
        let variance = sum_squares - sum * sum / count;
        if variance <= FLAT_PATCH_DEVIATION * FLAT_PATCH_DEVIATION * count {
            return 0.0;
        }
        cross / (self.norm * variance.sqrt())
    }
}

/// Scores for every offset in `[-radius, radius]²`; `None` where the
/// displaced patch would leave the frame.
struct ScoreGrid {
    radius: i64,
    scores: Vec<Option<f64>>,
}

impl ScoreGrid {
    fn search(template: &Template, window: &LumaWindow, patch_x: u32, patch_y: u32, radius: i64) -> Self {
        let side = (2 * radius + 1) as usize;
        let mut scores = vec![None; side * side];
        let window_right = i64::from(window.x + window.width);
        let window_bottom = i64::from(window.y + window.height);
        let size = i64::from(template.size);

        for dy in -radius..=radius {
            let y = i64::from(patch_y) + dy;
            if y < i64::from(window.y) || y + size > window_bottom {
                continue;
            }
            for dx in -radius..=radius {
                let x = i64::from(patch_x) + dx;
                if x < i64::from(window.x) || x + size > window_right {
                    continue;
                }
                let slot = ((dy + radius) as usize) * side + (dx + radius) as usize;
                scores[slot] = Some(template.correlate(window, x as u32, y as u32));
            }
        }
        Self { radius, scores }
    }

    fn at(&self, dx: i64, dy: i64) -> Option<f64> {
        if dx.abs() > self.radius || dy.abs() > self.radius {
            return None;
        }
        let side = 2 * self.radius + 1;
        self.scores[((dy + self.radius) * side + dx + self.radius) as usize]
    }

    /// Highest score; ties go to the offset nearest zero.
    fn peak(&self) -> Option<(i64, i64, f64)> {
        let mut best: Option<(i64, i64, f64)> = None;
        for dy in -self.radius..=self.radius {
            for dx in -self.radius..=self.radius {
                let Some(score) = self.at(dx, dy) else {
                    continue;
                };
                let better = match best {
                    None => true,
                    Some((best_dx, best_dy, best_score)) => {
                        score > best_score + 1e-12
                            || ((score - best_score).abs() <= 1e-12
                                && dx * dx + dy * dy < best_dx * best_dx + best_dy * best_dy)
                    }
                };
                if better {
                    best = Some((dx, dy, score));
                }
            }
        }
        best
    }
}
