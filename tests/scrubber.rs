//! Scrubber tests against the synthetic stream.
//!
//! The default synthetic stream has 300 frames at 30 fps whose content slides
//! right by two pixels per frame.

mod common;

use std::{cell::Cell, path::Path, rc::Rc};

use common::{EmbeddedClock, SyntheticConfig, SyntheticStream, interior_difference, texture};
use framescrub::{
    FrameRequest, MotionEstimator, MotionOptions, MotionVector, PatchCorrelation, Rational, Roi,
    ScrubError, ScrubOptions, Scrubber, StreamMetadata, TimestampRequest,
};
use image::RgbaImage;

const CLIP: &str = "finish.mp4";

fn scrubber_with(config: SyntheticConfig, options: ScrubOptions) -> Scrubber<SyntheticStream> {
    let mut scrubber =
        Scrubber::with_opener(options, move |_: &Path| Ok(SyntheticStream::new(config.clone())));
    scrubber.open_stream(CLIP).expect("open");
    scrubber
}

fn scrubber(config: SyntheticConfig) -> Scrubber<SyntheticStream> {
    scrubber_with(config, ScrubOptions::default())
}

fn millis(ticks: u64) -> u64 {
    (ticks + 5_000) / 10_000
}

fn micros(ticks: u64) -> u64 {
    (ticks + 5) / 10
}

/// Counts how often the wrapped estimator runs.
struct CountingEstimator {
    inner: PatchCorrelation,
    calls: Rc<Cell<usize>>,
}

impl MotionEstimator for CountingEstimator {
    fn estimate(&self, earlier: &RgbaImage, later: &RgbaImage, roi: Roi) -> MotionVector {
        self.calls.set(self.calls.get() + 1);
        self.inner.estimate(earlier, later, roi)
    }
}

// ── Opening and closing ──────────────────────────────────────────

#[test]
fn open_reports_stream_bounds() {
    let scrubber = scrubber(SyntheticConfig::default());
    let info = scrubber.stream_info(CLIP).expect("info");

    assert_eq!((info.width, info.height), (160, 64));
    assert!((info.fps - 30.0).abs() < 1e-9);
    assert_eq!(info.frame_count, 300);
    assert_eq!(info.first_timestamp_ms, 0);
    assert_eq!(info.last_timestamp_ms, 9_967);
}

#[test]
fn open_is_idempotent() {
    let stats = Rc::new(std::cell::RefCell::new(common::Stats::default()));
    let shared = Rc::clone(&stats);
    let mut scrubber = Scrubber::with_opener(ScrubOptions::default(), move |_: &Path| {
        Ok(SyntheticStream::with_stats(SyntheticConfig::default(), Rc::clone(&shared)))
    });

    scrubber.open_stream(CLIP).expect("open");
    scrubber.open_stream(CLIP).expect("open again");
    assert!(scrubber.is_open(CLIP));
    assert_eq!(stats.borrow().opens, 1);
}

#[test]
fn undecodable_last_frame_shortens_the_stream() {
    let config = SyntheticConfig {
        reported_frames: Some(301),
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);
    let info = scrubber.stream_info(CLIP).expect("info");
    assert_eq!(info.frame_count, 300);

    let last = scrubber.frame(CLIP, FrameRequest::at(299.0)).expect("frame");
    assert_eq!(last.total_frames, 300);
    assert!(scrubber.frame(CLIP, FrameRequest::at(300.0)).is_err());
}

#[test]
fn single_frame_stream_opens() {
    let config = SyntheticConfig {
        frames: 1,
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);
    let info = scrubber.stream_info(CLIP).expect("info");
    assert_eq!(info.frame_count, 1);

    let frame = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(info.first_timestamp_ms))
        .expect("frame");
    assert_eq!(frame.frame_index, 0.0);

    let roi = Roi::new(0, 0, 32, 32);
    let frame = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(info.first_timestamp_ms).with_roi(roi))
        .expect("frame");
    assert_eq!(frame.roi, Some(roi));
    assert_eq!(frame.key.roi, Some(roi));
}

#[test]
fn opener_errors_propagate() {
    let mut scrubber = Scrubber::with_opener(ScrubOptions::default(), |path: &Path| {
        Err::<SyntheticStream, _>(ScrubError::FileOpen {
            path: path.to_path_buf(),
            reason: "missing".to_string(),
        })
    });
    let error = scrubber.open_stream(CLIP).expect_err("open should fail");
    assert!(matches!(error, ScrubError::FileOpen { .. }));
    assert!(!scrubber.is_open(CLIP));
}

#[test]
fn stream_without_frame_rate_is_rejected() {
    let mut scrubber = Scrubber::with_opener(ScrubOptions::default(), |_: &Path| {
        let config = SyntheticConfig::default();
        let metadata = StreamMetadata {
            frame_rate: Rational::new(0, 1),
            guessed_frame_rate: Rational::new(0, 1),
            time_base: Rational::new(0, 1),
            ..config.metadata()
        };
        Ok(SyntheticStream::new(config).with_metadata(metadata))
    });
    let error = scrubber.open_stream(CLIP).expect_err("open should fail");
    assert!(matches!(error, ScrubError::MetadataUnavailable { .. }), "{error}");
}

#[test]
fn stream_without_frame_count_is_rejected() {
    let mut scrubber = Scrubber::with_opener(ScrubOptions::default(), |_: &Path| {
        let config = SyntheticConfig::default();
        let metadata = StreamMetadata {
            reported_frame_count: 0,
            container_duration: 0.0,
            stream_duration: 0,
            ..config.metadata()
        };
        Ok(SyntheticStream::new(config).with_metadata(metadata))
    });
    let error = scrubber.open_stream(CLIP).expect_err("open should fail");
    assert!(matches!(error, ScrubError::MetadataUnavailable { .. }), "{error}");
}

#[test]
fn close_releases_the_stream_and_its_frames() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    scrubber.frame(CLIP, FrameRequest::at(10.0)).expect("frame");
    assert!(scrubber.cached_frames() > 0);

    scrubber.close_stream(CLIP).expect("close");
    assert!(!scrubber.is_open(CLIP));
    assert_eq!(scrubber.cached_frames(), 0);

    let error = scrubber.frame(CLIP, FrameRequest::at(10.0)).expect_err("closed");
    assert!(matches!(error, ScrubError::StreamNotOpen(_)));
}

#[test]
fn closing_one_stream_keeps_the_other() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    scrubber.open_stream("other.mp4").expect("open");
    scrubber.frame("other.mp4", FrameRequest::at(3.0)).expect("frame");

    scrubber.close_stream(CLIP).expect("close");
    assert!(scrubber.cached_frames() > 0);
    assert!(scrubber.frame("other.mp4", FrameRequest::at(4.0)).is_ok());
}

#[test]
fn unknown_streams_are_reported() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    assert!(matches!(
        scrubber.close_stream("nope.mp4"),
        Err(ScrubError::StreamNotOpen(_))
    ));
    assert!(matches!(
        scrubber.stream_info("nope.mp4"),
        Err(ScrubError::StreamNotOpen(_))
    ));
    assert!(matches!(
        scrubber.frame_at_timestamp("nope.mp4", TimestampRequest::at(0)),
        Err(ScrubError::StreamNotOpen(_))
    ));
}

// ── Integer positions ────────────────────────────────────────────

#[test]
fn every_frame_in_order_has_increasing_timestamps() {
    let config = SyntheticConfig::default();
    let mut scrubber = scrubber(config.clone());

    let mut previous = None;
    for index in 0..300 {
        let frame = scrubber.frame(CLIP, FrameRequest::at(index as f64)).expect("frame");
        assert_eq!(frame.frame_index, index as f64);
        assert_eq!(frame.total_frames, 300);
        assert_eq!(frame.timestamp_ms, ((index as f64) * 1_000.0 / 30.0).round() as u64);
        if let Some(previous) = previous {
            let spacing = frame.timestamp_ms - previous;
            assert!((33..=34).contains(&spacing), "spacing {spacing} at {index}");
        }
        previous = Some(frame.timestamp_ms);
        if index % 50 == 0 {
            assert_eq!(*frame.pixels, config.render(index));
        }
    }
}

#[test]
fn repeated_requests_return_identical_frames() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    let first = scrubber.frame(CLIP, FrameRequest::at(42.0)).expect("frame");

    for index in 100..141 {
        scrubber.frame(CLIP, FrameRequest::at(f64::from(index))).expect("frame");
    }
    assert!(scrubber.cached_frames() <= 32);

    let again = scrubber.frame(CLIP, FrameRequest::at(42.0)).expect("frame");
    assert_eq!(*first.pixels, *again.pixels);
    assert_eq!(first.timestamp_ms, again.timestamp_ms);
    assert_eq!(first.timestamp_us, again.timestamp_us);
}

#[test]
fn out_of_range_positions_are_rejected() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    for position in [-1.0, 299.5, 300.0, f64::NAN, f64::INFINITY] {
        let error = scrubber
            .frame(CLIP, FrameRequest::at(position))
            .expect_err("out of range");
        assert!(error.is_out_of_range(), "{position}: {error}");
        assert!(matches!(
            error,
            ScrubError::FrameOutOfRange {
                frame_count: 300,
                ..
            }
        ));
    }
}

#[test]
fn positions_near_an_integer_snap_to_it() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    let exact = scrubber.frame(CLIP, FrameRequest::at(151.0)).expect("frame");

    let below = scrubber.frame(CLIP, FrameRequest::at(150.995)).expect("frame");
    assert_eq!(below.frame_index, 151.0);
    assert_eq!(below.timestamp_us, exact.timestamp_us);

    let above = scrubber.frame(CLIP, FrameRequest::at(151.004)).expect("frame");
    assert_eq!(above.frame_index, 151.0);
}

#[test]
fn roi_variants_do_not_alias() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    let left = Roi::new(0, 0, 64, 64);
    let right = Roi::new(96, 0, 64, 64);

    let plain = scrubber.frame(CLIP, FrameRequest::at(5.0)).expect("frame");
    let with_left = scrubber.frame(CLIP, FrameRequest::at(5.0).with_roi(left)).expect("frame");
    let with_right = scrubber.frame(CLIP, FrameRequest::at(5.0).with_roi(right)).expect("frame");

    assert_eq!(plain.roi, None);
    assert_eq!(with_left.roi, Some(left));
    assert_eq!(with_right.roi, Some(right));
    assert_ne!(with_left.key, with_right.key);
    assert_eq!(*with_left.pixels, *plain.pixels);

    let left_again = scrubber.frame(CLIP, FrameRequest::at(5.0).with_roi(left)).expect("frame");
    assert_eq!(left_again.roi, Some(left));
}

#[test]
fn approximate_requests_are_cached_apart_from_exact_ones() {
    let mut scrubber = scrubber(SyntheticConfig::default());

    let approximate = scrubber
        .frame(CLIP, FrameRequest::at(200.0).with_approximate(true))
        .expect("frame");
    assert_eq!(approximate.frame_index, 192.0);
    assert_eq!(approximate.timestamp_ms, 6_400);

    let exact = scrubber.frame(CLIP, FrameRequest::at(200.0)).expect("frame");
    assert_eq!(exact.frame_index, 200.0);
}

// ── Fractional positions ─────────────────────────────────────────

#[test]
fn midpoint_blend_is_synthesized_from_both_neighbours() {
    let config = SyntheticConfig::default();
    let mut scrubber = scrubber(config.clone());

    let earlier = scrubber.frame(CLIP, FrameRequest::at(150.0)).expect("frame");
    let later = scrubber.frame(CLIP, FrameRequest::at(151.0)).expect("frame");
    let middle = scrubber
        .frame(CLIP, FrameRequest::at(150.5).with_blend(true))
        .expect("frame");

    assert_eq!(middle.frame_index, 150.5);
    assert_eq!(earlier.timestamp_us, 5_000_000);
    assert_eq!(later.timestamp_us, 5_033_333);
    assert_eq!(middle.timestamp_us, 5_016_667);
    assert_eq!(middle.timestamp_ms, 5_017);
    assert!(middle.timestamp_ms > earlier.timestamp_ms && middle.timestamp_ms < later.timestamp_ms);

    assert!(middle.motion.valid);
    assert!((middle.motion.dx - 2.0).abs() < 0.2, "dx {}", middle.motion.dx);
    assert!(middle.motion.dy.abs() < 0.2, "dy {}", middle.motion.dy);
    assert_eq!(middle.motion.elapsed_us, 33_333);

    let expected = RgbaImage::from_fn(config.width, config.height, |x, y| {
        if y < 2 {
            image::Rgba([0, 0, 0, 255])
        } else {
            texture(f64::from(x) - 301.0, f64::from(y))
        }
    });
    let difference = interior_difference(&middle.pixels, &expected, 8);
    assert!(difference < 4.0, "mean difference {difference}");
}

#[test]
fn blend_flag_is_part_of_the_identity() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    let moved = scrubber.frame(CLIP, FrameRequest::at(80.5)).expect("frame");
    let blended = scrubber
        .frame(CLIP, FrameRequest::at(80.5).with_blend(true))
        .expect("frame");

    assert!(!moved.key.blend);
    assert!(blended.key.blend);
    assert_ne!(*moved.pixels, *blended.pixels);
}

#[test]
fn motion_is_reused_for_the_same_roi() {
    let calls = Rc::new(Cell::new(0));
    let estimator = CountingEstimator {
        inner: PatchCorrelation::new(MotionOptions::default()),
        calls: Rc::clone(&calls),
    };
    let config = SyntheticConfig::default();
    let mut scrubber =
        Scrubber::with_opener(ScrubOptions::default(), move |_: &Path| Ok(SyntheticStream::new(config.clone())))
            .with_estimator(estimator);
    scrubber.open_stream(CLIP).expect("open");

    let roi = Roi::new(40, 0, 80, 64);
    scrubber.frame(CLIP, FrameRequest::at(150.5).with_roi(roi)).expect("frame");
    assert_eq!(calls.get(), 1);

    let reused = scrubber.frame(CLIP, FrameRequest::at(150.25).with_roi(roi)).expect("frame");
    assert_eq!(calls.get(), 1);
    assert!(reused.motion.valid);
    assert_eq!(reused.roi, Some(roi));

    scrubber
        .frame(CLIP, FrameRequest::at(150.75).with_roi(Roi::new(20, 0, 80, 64)))
        .expect("frame");
    assert_eq!(calls.get(), 2);
}

#[test]
fn earlier_frame_keeps_the_estimated_motion() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    scrubber.frame(CLIP, FrameRequest::at(20.5)).expect("frame");

    let earlier = scrubber.frame(CLIP, FrameRequest::at(20.0)).expect("frame");
    assert!(earlier.motion.valid);
    assert_eq!(earlier.motion.elapsed_us, 33_333);
    assert_eq!(earlier.roi, Some(Roi::new(0, 0, 160, 64)));
}

#[test]
fn roi_variant_does_not_inherit_motion_of_another_roi() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    let estimated_in = Roi::new(40, 0, 80, 64);
    scrubber
        .frame(CLIP, FrameRequest::at(20.5).with_roi(estimated_in))
        .expect("frame");

    let same = scrubber
        .frame(CLIP, FrameRequest::at(20.0).with_roi(estimated_in))
        .expect("frame");
    assert_eq!(same.roi, Some(estimated_in));
    assert!(same.motion.valid);

    let other = Roi::new(0, 0, 30, 20);
    let different = scrubber
        .frame(CLIP, FrameRequest::at(20.0).with_roi(other))
        .expect("frame");
    assert_eq!(different.roi, Some(other));
    assert!(!different.motion.valid);
    assert_eq!(different.motion, MotionVector::default());
    assert_eq!(*different.pixels, *same.pixels);
}

#[test]
fn still_scene_synthesizes_the_earlier_frame() {
    let config = SyntheticConfig {
        velocity: 0.0,
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config.clone());

    let frame = scrubber.frame(CLIP, FrameRequest::at(10.3)).expect("frame");
    assert!((frame.frame_index - 10.3).abs() < 1e-9);
    assert!(frame.motion.dx.abs() < 0.05);
    assert!(interior_difference(&frame.pixels, &config.render(10), 2) < 1.0);
}

// ── Timestamp requests ───────────────────────────────────────────

#[test]
fn embedded_timestamps_bound_the_stream() {
    let clock = EmbeddedClock::jittered(0);
    let config = SyntheticConfig {
        embedded: Some(clock.clone()),
        ..SyntheticConfig::default()
    };
    let scrubber = scrubber(config);
    let info = scrubber.stream_info(CLIP).expect("info");

    assert_eq!(info.first_timestamp_ms, millis(clock.ticks(0)));
    assert_eq!(info.last_timestamp_ms, millis(clock.ticks(299)));
}

#[test]
fn timestamp_of_a_frame_returns_that_frame() {
    let clock = EmbeddedClock::jittered(0);
    let config = SyntheticConfig {
        embedded: Some(clock.clone()),
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);

    let target = millis(clock.ticks(100));
    let frame = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(target))
        .expect("frame");
    assert_eq!(frame.frame_index, 100.0);
    assert_eq!(frame.timestamp_ms, target);
    assert_eq!(frame.timestamp_us, micros(clock.ticks(100)));
}

#[test]
fn timestamp_between_frames_is_synthesized() {
    let clock = EmbeddedClock::jittered(1);
    let config = SyntheticConfig {
        embedded: Some(clock.clone()),
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);

    let low = millis(clock.ticks(100));
    let high = millis(clock.ticks(101));
    let target = low + (high - low) / 4;
    let frame = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(target).with_blend(true))
        .expect("frame");

    assert!(
        frame.frame_index > 100.2 && frame.frame_index < 100.3,
        "index {}",
        frame.frame_index
    );
    assert!(frame.timestamp_ms >= low && frame.timestamp_ms < high);
    assert!(frame.key.blend);
}

#[test]
fn timestamps_are_searched_without_embedded_clocks() {
    let mut scrubber = scrubber(SyntheticConfig::default());

    let frame = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(2_000))
        .expect("frame");
    assert_eq!(frame.frame_index, 60.0);
    assert_eq!(frame.timestamp_ms, 2_000);
    assert!(!frame.embedded_timestamp);
}

#[test]
fn frame_missing_its_clock_falls_back_to_an_estimate() {
    let clock = EmbeddedClock {
        blanked: vec![120],
        ..EmbeddedClock::uniform(0)
    };
    let config = SyntheticConfig {
        embedded: Some(clock.clone()),
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);

    let before = scrubber.frame(CLIP, FrameRequest::at(119.0)).expect("frame");
    assert!(before.embedded_timestamp);
    assert_eq!(before.timestamp_ms, millis(clock.ticks(119)));

    let blanked = scrubber.frame(CLIP, FrameRequest::at(120.0)).expect("frame");
    assert!(!blanked.embedded_timestamp);
    assert_eq!(blanked.timestamp_ms, 4_000);
    assert_eq!(blanked.timestamp_us, 4_000_000);

    let after = scrubber.frame(CLIP, FrameRequest::at(121.0)).expect("frame");
    assert!(after.embedded_timestamp);
    assert_eq!(after.timestamp_ms, millis(clock.ticks(121)));
}

#[test]
fn last_timestamp_returns_the_last_frame() {
    let mut scrubber = scrubber(SyntheticConfig::default());
    let info = scrubber.stream_info(CLIP).expect("info");

    let frame = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(info.last_timestamp_ms))
        .expect("frame");
    assert_eq!(frame.frame_index, 299.0);
}

#[test]
fn timestamps_outside_the_stream_are_rejected() {
    let clock = EmbeddedClock::uniform(0);
    let config = SyntheticConfig {
        embedded: Some(clock.clone()),
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);
    let info = scrubber.stream_info(CLIP).expect("info");

    for target in [info.first_timestamp_ms - 1, info.last_timestamp_ms + 1] {
        let error = scrubber
            .frame_at_timestamp(CLIP, TimestampRequest::at(target))
            .expect_err("out of range");
        assert!(error.is_out_of_range());
        assert!(matches!(error, ScrubError::TimestampOutOfRange { .. }), "{error}");
    }
}

#[test]
fn repeated_clock_values_are_reported_as_corruption() {
    let clock = EmbeddedClock {
        glitches: vec![(150, 148)],
        ..EmbeddedClock::uniform(0)
    };
    let config = SyntheticConfig {
        embedded: Some(clock.clone()),
        ..SyntheticConfig::default()
    };
    let mut scrubber = scrubber(config);

    let target = millis(clock.ticks(149)) + 10;
    let error = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(target))
        .expect_err("corrupt");
    assert!(
        matches!(
            error,
            ScrubError::CorruptTimestampOrdering {
                first_index: 149,
                second_index: 150,
                ..
            }
        ),
        "{error}"
    );
}

#[test]
fn timestamp_search_reuses_cached_probes() {
    let stats = Rc::new(std::cell::RefCell::new(common::Stats::default()));
    let shared = Rc::clone(&stats);
    let config = SyntheticConfig {
        embedded: Some(EmbeddedClock::jittered(0)),
        ..SyntheticConfig::default()
    };
    let mut scrubber = Scrubber::with_opener(
        ScrubOptions::default().with_cache_capacity(256),
        move |_: &Path| Ok(SyntheticStream::with_stats(config.clone(), Rc::clone(&shared))),
    );
    scrubber.open_stream(CLIP).expect("open");
    let info = scrubber.stream_info(CLIP).expect("info");

    let target = info.first_timestamp_ms + 4_321;
    let first = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(target))
        .expect("frame");
    let conversions = stats.borrow().conversions;

    let second = scrubber
        .frame_at_timestamp(CLIP, TimestampRequest::at(target))
        .expect("frame");
    assert_eq!(stats.borrow().conversions, conversions);
    assert_eq!(first.frame_index, second.frame_index);
    assert_eq!(*first.pixels, *second.pixels);
}
