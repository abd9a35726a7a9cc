use std::rc::Rc;

use approx::assert_relative_eq;
use stream_chart::api::{
    AdaptiveSeriesBuffer, Clock, ManualClock, SeriesBufferConfig, UpdateCoordinator,
    UpdateCoordinatorConfig,
};
use stream_chart::core::{DataPoint, SharedTimeRange, TimeRangeConfig, TimeRangeTopic};
use stream_chart::render::{NullRenderer, RedrawFrame, Renderer};
use stream_chart::{ChartError, ChartResult};

fn point(t: f64, v: f64) -> DataPoint {
    DataPoint::sample("time", t, "value", Some(v))
}

struct Harness {
    clock: Rc<ManualClock>,
    range: SharedTimeRange,
    coordinator: UpdateCoordinator<NullRenderer>,
}

fn build(config: UpdateCoordinatorConfig) -> Harness {
    build_with_range(TimeRangeConfig::new(), config)
}

fn build_with_range(range_config: TimeRangeConfig, config: UpdateCoordinatorConfig) -> Harness {
    let clock = Rc::new(ManualClock::new(0.0));
    let range = SharedTimeRange::new(range_config).expect("range");
    let dyn_clock: Rc<dyn Clock> = clock.clone();
    let coordinator = UpdateCoordinator::new(NullRenderer::default(), &range, config, dyn_clock)
        .expect("coordinator init");
    Harness {
        clock,
        range,
        coordinator,
    }
}

fn series(harness: &Harness, limit: Option<usize>) -> AdaptiveSeriesBuffer {
    AdaptiveSeriesBuffer::new(
        &harness.range,
        SeriesBufferConfig::new().with_downsample_limit(limit),
    )
    .expect("series init")
}

fn last_frame(harness: &Harness) -> RedrawFrame {
    harness
        .coordinator
        .renderer()
        .last_frame()
        .cloned()
        .expect("frame rendered")
}

#[test]
fn near_simultaneous_updates_collapse_into_one_redraw() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    let b = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach a");
    harness.coordinator.attach("b", &b).expect("attach b");

    a.push(&[point(0.0, 1.0), point(1000.0, 2.0)], true);
    a.push(&[point(1500.0, 2.5)], true);
    b.push(&[point(500.0, 5.0)], true);
    assert!(harness.coordinator.is_scheduled());
    assert_eq!(harness.coordinator.pending_series_count(), 2);

    assert_eq!(harness.coordinator.poll().expect("poll"), 0);
    harness.clock.advance(16.0);
    assert_eq!(harness.coordinator.poll().expect("poll"), 1);
    assert_eq!(harness.coordinator.poll().expect("poll"), 0);

    let frame = last_frame(&harness);
    assert_eq!(harness.coordinator.frames_rendered(), 1);
    assert_eq!(frame.series.len(), 2);
    assert_eq!(frame.series("a").expect("a payload").data.len(), 3);
    assert_eq!(frame.x_domain, Some((0.0, 1500.0)));
    assert_eq!(frame.duration_ms, 0.0);
    assert_eq!(frame.slide, None);
    let (lo, hi) = frame.y_domain().expect("y ticks");
    assert!(lo <= 1.0 && hi >= 5.0);
    assert_eq!(harness.coordinator.pending_series_count(), 0);
}

#[test]
fn redraw_duration_tracks_feed_rate_up_to_the_cap() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 1.0), point(1000.0, 1.0)], true);
    harness.clock.set(16.0);
    harness.coordinator.poll().expect("first redraw");

    harness.clock.set(20.0);
    a.push(&[point(1001.0, 1.0)], true);
    harness.clock.set(36.0);
    harness.coordinator.poll().expect("bursty redraw");
    assert_relative_eq!(last_frame(&harness).duration_ms, 20.0);

    harness.clock.set(56.0);
    harness.coordinator.poll().expect("transition end");
    harness.clock.set(5000.0);
    a.push(&[point(2000.0, 1.0)], true);
    harness.clock.set(5016.0);
    harness.coordinator.poll().expect("sparse redraw");
    assert_relative_eq!(last_frame(&harness).duration_ms, 750.0);
}

#[test]
fn domain_shift_slides_and_queues_the_next_target() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 1.0), point(1000.0, 2.0)], true);
    harness.clock.set(16.0);
    harness.coordinator.poll().expect("first redraw");

    harness.clock.set(1016.0);
    a.push(&[point(2000.0, 3.0)], true);
    harness.clock.set(1032.0);
    assert_eq!(harness.coordinator.poll().expect("slide redraw"), 1);

    let frame = last_frame(&harness);
    assert_eq!(frame.x_domain, Some((0.0, 2000.0)));
    assert_relative_eq!(frame.duration_ms, 750.0);
    let slide = frame.slide.expect("slide transform");
    assert_relative_eq!(slide.translate, 0.0);
    assert_relative_eq!(slide.scale, 2.0);
    assert!(harness.coordinator.is_sliding());
    assert!(harness.coordinator.is_in_flight());

    harness.clock.set(1100.0);
    a.push(&[point(3000.0, 4.0)], true);
    assert_eq!(harness.coordinator.queued_domain(), Some((0.0, 3000.0)));
    assert_eq!(harness.coordinator.poll().expect("mid slide"), 0);

    harness.clock.set(1407.0);
    assert_relative_eq!(harness.coordinator.current_transform().scale, 1.5);

    harness.clock.set(1782.0);
    assert_eq!(harness.coordinator.poll().expect("follow-up"), 1);
    let follow_up = last_frame(&harness);
    assert_eq!(follow_up.x_domain, Some((0.0, 3000.0)));
    assert_relative_eq!(follow_up.duration_ms, 750.0);
    assert_relative_eq!(follow_up.slide.expect("chained slide").scale, 1.5);
    assert_eq!(harness.coordinator.queued_domain(), None);
    assert_eq!(harness.coordinator.frames_rendered(), 3);
}

#[test]
fn transition_end_without_new_work_renders_nothing() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 1.0), point(1000.0, 1.0)], true);
    harness.clock.set(16.0);
    harness.coordinator.poll().expect("first");
    harness.clock.set(516.0);
    a.push(&[point(2000.0, 1.0)], true);
    harness.clock.set(532.0);
    harness.coordinator.poll().expect("second");
    assert_eq!(harness.coordinator.next_deadline(), Some(1048.0));

    harness.clock.set(1048.0);
    assert_eq!(harness.coordinator.poll().expect("settle"), 0);
    assert!(!harness.coordinator.is_sliding());
    assert!(!harness.coordinator.is_in_flight());
    assert!(harness.coordinator.current_transform().is_identity());
}

#[test]
fn without_animation_updates_draw_immediately() {
    let mut harness = build(UpdateCoordinatorConfig::new().with_animate(false));
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 1.0), point(1000.0, 2.0)], true);
    assert!(!harness.coordinator.is_scheduled());
    let frame = last_frame(&harness);
    assert_eq!(frame.series("a").expect("payload").data.len(), 2);
    assert_eq!(frame.duration_ms, 0.0);
    assert_eq!(frame.slide, None);

    let before = harness.coordinator.frames_rendered();
    a.push(&[point(500.0, 1.0)], true);
    assert_eq!(harness.coordinator.frames_rendered(), before);
    a.push(&[point(1000.0, 3.0)], true);
    assert_eq!(harness.coordinator.frames_rendered(), before + 1);
}

#[test]
fn without_animation_a_sliding_window_draws_once_per_push() {
    let mut harness = build_with_range(
        TimeRangeConfig::new().with_window_ms(1000.0),
        UpdateCoordinatorConfig::new().with_animate(false),
    );
    let a = series(&harness, None);
    let b = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach a");
    harness.coordinator.attach("b", &b).expect("attach b");

    b.push(&[point(3500.0, 1.0), point(4500.0, 2.0)], true);
    assert_eq!(harness.coordinator.frames_rendered(), 1);

    a.push(&[point(5000.0, 3.0)], true);
    assert_eq!(harness.coordinator.frames_rendered(), 2);
    assert!(!harness.range.is_notifying());

    let frame = last_frame(&harness);
    assert_eq!(frame.x_domain, Some((4000.0, 5000.0)));
    assert_eq!(frame.series.len(), 2);
    assert_eq!(frame.series("a").expect("a payload").data.len(), 1);
    assert_eq!(frame.series("b").expect("b payload").data.len(), 1);
    assert_eq!(harness.coordinator.pending_series_count(), 0);
}

#[test]
fn float_noise_extents_still_render() {
    let mut harness = build(UpdateCoordinatorConfig::new().with_animate(false));
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 0.3), point(1000.0, 0.1 + 0.2)], true);
    assert_eq!(harness.coordinator.frames_rendered(), 1);
    let (lo, hi) = last_frame(&harness).y_domain().expect("y ticks");
    assert!(lo <= 0.3 && hi >= 0.1 + 0.2);
}

#[test]
fn degenerate_domain_is_padded_with_vertical_compensation() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");

    a.push(&[point(100.0, 7.0)], true);
    harness.clock.advance(16.0);
    harness.coordinator.poll().expect("redraw");
    let frame = last_frame(&harness);
    assert_eq!(frame.x_domain, Some((95.0, 105.0)));
    assert_relative_eq!(frame.vertical_scale, 4.0);
    let (lo, hi) = frame.y_domain().expect("y ticks");
    assert!(lo < 7.0 && hi > 7.0);
}

#[test]
fn downsampled_series_raise_a_warning_until_reset() {
    let mut harness = build(UpdateCoordinatorConfig::new().with_animate(false));
    let a = series(&harness, Some(2));
    harness.coordinator.attach("a", &a).expect("attach");

    let batch: Vec<DataPoint> = (0..8).map(|i| point(i as f64, 1.0)).collect();
    a.push(&batch, true);
    assert_eq!(harness.coordinator.downsample_warning(), Some(4));
    assert_eq!(last_frame(&harness).downsample_warning, Some(4));

    a.reset();
    assert_eq!(harness.coordinator.downsample_warning(), None);
    assert_eq!(last_frame(&harness).downsample_warning, None);
}

#[test]
fn attaching_a_populated_series_queues_its_snapshot() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    a.push(&[point(0.0, 1.0), point(50.0, 2.0)], true);

    harness.coordinator.attach("a", &a).expect("attach");
    assert_eq!(harness.coordinator.pending_series_count(), 1);
    harness.clock.advance(16.0);
    assert_eq!(harness.coordinator.poll().expect("poll"), 1);
    assert_eq!(last_frame(&harness).x_domain, Some((0.0, 50.0)));
}

#[test]
fn attach_rejects_duplicates_and_foreign_ranges() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");
    assert!(matches!(
        harness.coordinator.attach("a", &a),
        Err(ChartError::InvalidConfig(_))
    ));

    let other_range = SharedTimeRange::new(TimeRangeConfig::new()).expect("range");
    let foreign = AdaptiveSeriesBuffer::new(&other_range, SeriesBufferConfig::new())
        .expect("series");
    assert!(harness.coordinator.attach("foreign", &foreign).is_err());
    assert_eq!(harness.coordinator.series_ids().collect::<Vec<_>>(), vec!["a"]);
}

#[test]
fn detached_series_no_longer_queue_updates() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");
    assert!(harness.coordinator.detach("a"));
    assert!(!harness.coordinator.detach("a"));

    a.push(&[point(0.0, 1.0)], true);
    assert_eq!(harness.coordinator.pending_series_count(), 0);
}

#[test]
fn teardown_stops_reacting_to_events() {
    let mut harness = build(UpdateCoordinatorConfig::default());
    let a = series(&harness, None);
    harness.coordinator.attach("a", &a).expect("attach");
    a.push(&[point(0.0, 1.0)], true);
    assert!(harness.coordinator.is_scheduled());
    assert_eq!(harness.range.subscriber_count(TimeRangeTopic::RangeChanged), 2);

    harness.coordinator.teardown();
    harness.coordinator.teardown();
    assert!(harness.coordinator.is_torn_down());
    assert_eq!(harness.range.subscriber_count(TimeRangeTopic::RangeChanged), 1);

    a.push(&[point(10.0, 1.0)], true);
    harness.clock.advance(1000.0);
    assert_eq!(harness.coordinator.poll().expect("poll"), 0);
    assert_eq!(harness.coordinator.frames_rendered(), 0);
    assert!(harness.coordinator.attach("b", &a).is_err());
}

#[test]
fn dropping_the_coordinator_releases_the_range() {
    let harness = build(UpdateCoordinatorConfig::default());
    let range = harness.range.clone();
    assert_eq!(range.subscriber_count(TimeRangeTopic::RangeChanged), 1);
    drop(harness);
    assert_eq!(range.subscriber_count(TimeRangeTopic::RangeChanged), 0);
}

#[test]
fn unsupported_axis_position_fails_at_setup() {
    let err = UpdateCoordinatorConfig::new()
        .with_time_axis_position_str("left")
        .expect_err("vertical axis");
    assert!(matches!(
        err,
        ChartError::UnsupportedConfiguration { ref setting, .. } if setting == "time_axis_position"
    ));
}

struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(&mut self, _frame: &RedrawFrame) -> ChartResult<()> {
        Err(ChartError::InvalidData("surface lost".to_owned()))
    }
}

#[test]
fn renderer_errors_surface_from_poll() {
    let clock = Rc::new(ManualClock::new(0.0));
    let range = SharedTimeRange::new(TimeRangeConfig::new()).expect("range");
    let dyn_clock: Rc<dyn Clock> = clock.clone();
    let mut coordinator = UpdateCoordinator::new(
        FailingRenderer,
        &range,
        UpdateCoordinatorConfig::default(),
        dyn_clock,
    )
    .expect("coordinator init");
    let a = AdaptiveSeriesBuffer::new(&range, SeriesBufferConfig::new()).expect("series");
    coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 1.0)], true);
    clock.advance(16.0);
    assert!(coordinator.poll().is_err());
}

#[derive(Default)]
struct FlakyRenderer {
    failures_left: usize,
    frames: Vec<RedrawFrame>,
}

impl Renderer for FlakyRenderer {
    fn render(&mut self, frame: &RedrawFrame) -> ChartResult<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(ChartError::InvalidData("surface lost".to_owned()));
        }
        self.frames.push(frame.clone());
        Ok(())
    }
}

#[test]
fn rejected_frames_are_retried_with_their_work() {
    let clock = Rc::new(ManualClock::new(0.0));
    let range = SharedTimeRange::new(TimeRangeConfig::new()).expect("range");
    let dyn_clock: Rc<dyn Clock> = clock.clone();
    let renderer = FlakyRenderer {
        failures_left: 1,
        ..FlakyRenderer::default()
    };
    let mut coordinator =
        UpdateCoordinator::new(renderer, &range, UpdateCoordinatorConfig::default(), dyn_clock)
            .expect("coordinator init");
    let a = AdaptiveSeriesBuffer::new(&range, SeriesBufferConfig::new()).expect("series");
    coordinator.attach("a", &a).expect("attach");

    a.push(&[point(0.0, 1.0), point(100.0, 2.0)], true);
    clock.advance(16.0);
    assert!(coordinator.poll().is_err());
    assert_eq!(coordinator.frames_rendered(), 0);
    assert_eq!(coordinator.pending_series_count(), 1);
    assert_eq!(coordinator.queued_domain(), Some((0.0, 100.0)));

    assert_eq!(coordinator.poll().expect("retry"), 1);
    let renderer = coordinator.renderer();
    let frame = renderer.frames.last().expect("frame rendered");
    assert_eq!(frame.series("a").expect("a payload").data.len(), 2);
    assert_eq!(frame.x_domain, Some((0.0, 100.0)));
    assert!(frame.y_domain().is_some());
}
