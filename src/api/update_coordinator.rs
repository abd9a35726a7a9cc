use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::core::{
    SharedTimeRange, SubscriptionToken, TimeRangeEvent, TimeRangeTopic, calculate_tick_values,
};
use crate::error::{ChartError, ChartResult};
use crate::render::{RedrawFrame, Renderer, SeriesFrame, SlideTransform};

use super::clock::Clock;
use super::coordinator_config::UpdateCoordinatorConfig;
use super::series_buffer::{
    AdaptiveSeriesBuffer, SeriesEvent, SeriesHandle, SeriesTopic, SeriesUpdate,
};
use super::slide_animation::SlideAnimation;

/// X-domain the next redraw should show, with its vertical compensation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RangeTarget {
    domain: (f64, f64),
    vertical_scale: f64,
}

/// Work collected from series and range callbacks between redraws.
///
/// Kept apart from the render state so notifications arriving while a frame
/// is being drawn are still recorded.
#[derive(Debug, Default)]
struct Inbox {
    updates: IndexMap<String, SeriesUpdate>,
    factors: IndexMap<String, usize>,
    range: Option<RangeTarget>,
    dirty: bool,
}

#[derive(Debug)]
struct RenderState<R> {
    renderer: R,
    extents: IndexMap<String, (f64, f64)>,
    target: Option<RangeTarget>,
    rendered_domain: Option<(f64, f64)>,
    slide: Option<SlideAnimation>,
    scheduled_at: Option<f64>,
    in_flight_until: Option<f64>,
    last_redraw_at: Option<f64>,
    frames_rendered: usize,
}

struct CoordinatorShared<R> {
    config: UpdateCoordinatorConfig,
    clock: Rc<dyn Clock>,
    time_range: SharedTimeRange,
    inbox: RefCell<Inbox>,
    state: RefCell<RenderState<R>>,
    torn_down: Cell<bool>,
}

struct Attachment {
    handle: SeriesHandle,
    tokens: [SubscriptionToken; 2],
}

/// Turns per-series `update` notifications into coalesced, animated redraws.
///
/// Timers are modelled by a host-driven [`poll`](Self::poll) against an
/// injected [`Clock`]: the host calls it from its frame or timer loop and the
/// coordinator decides whether a debounced redraw is due, whether an in-flight
/// transition has ended and whether queued work needs a follow-up frame.
pub struct UpdateCoordinator<R: Renderer + 'static> {
    shared: Rc<CoordinatorShared<R>>,
    range_tokens: Option<[SubscriptionToken; 2]>,
    attachments: IndexMap<String, Attachment>,
}

impl<R: Renderer + 'static> UpdateCoordinator<R> {
    pub fn new(
        renderer: R,
        time_range: &SharedTimeRange,
        config: UpdateCoordinatorConfig,
        clock: Rc<dyn Clock>,
    ) -> ChartResult<Self> {
        let config = config.validate()?;
        let initial_target = time_range
            .range()
            .map(|(start, end)| pad_target(&config, start, end));

        let shared = Rc::new(CoordinatorShared {
            config,
            clock,
            time_range: time_range.clone(),
            inbox: RefCell::new(Inbox::default()),
            state: RefCell::new(RenderState {
                renderer,
                extents: IndexMap::new(),
                target: initial_target,
                rendered_domain: None,
                slide: None,
                scheduled_at: None,
                in_flight_until: None,
                last_redraw_at: None,
                frames_rendered: 0,
            }),
            torn_down: Cell::new(false),
        });

        let weak = Rc::downgrade(&shared);
        let range_token = time_range.on(TimeRangeTopic::RangeChanged, move |event| {
            if let (Some(shared), TimeRangeEvent::RangeChanged { start, end }) =
                (weak.upgrade(), event)
            {
                shared.on_range_changed(*start, *end);
            }
        });
        let weak = Rc::downgrade(&shared);
        let settled_token = time_range.on(TimeRangeTopic::Settled, move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.on_settled();
            }
        });

        debug!(
            animate = config.animate,
            axis = %config.time_axis_position,
            "update coordinator created"
        );
        Ok(Self {
            shared,
            range_tokens: Some([range_token, settled_token]),
            attachments: IndexMap::new(),
        })
    }

    /// Starts listening to a series under `series_id`.
    ///
    /// The series must share this coordinator's time range. Its current
    /// snapshot is queued so the next redraw includes it.
    pub fn attach(&mut self, series_id: &str, series: &AdaptiveSeriesBuffer) -> ChartResult<()> {
        if self.shared.torn_down.get() {
            return Err(ChartError::InvalidConfig(
                "cannot attach to a torn down coordinator".to_owned(),
            ));
        }
        if self.attachments.contains_key(series_id) {
            return Err(ChartError::InvalidConfig(format!(
                "series `{series_id}` is already attached"
            )));
        }
        if !series.time_range().same_range(&self.shared.time_range) {
            return Err(ChartError::InvalidConfig(format!(
                "series `{series_id}` uses a different time range"
            )));
        }

        let weak = Rc::downgrade(&self.shared);
        let id = series_id.to_owned();
        let update_token = series.on(SeriesTopic::Update, move |event| {
            if let (Some(shared), SeriesEvent::Update(update)) = (weak.upgrade(), event) {
                shared.on_series_update(&id, update.clone());
            }
        });
        let weak = Rc::downgrade(&self.shared);
        let id = series_id.to_owned();
        let downsample_token = series.on(SeriesTopic::Downsample, move |event| {
            if let (Some(shared), SeriesEvent::Downsample { factor }) = (weak.upgrade(), event) {
                shared.on_downsample(&id, *factor);
            }
        });

        self.attachments.insert(
            series_id.to_owned(),
            Attachment {
                handle: series.handle(),
                tokens: [update_token, downsample_token],
            },
        );

        let factor = series.downsample_factor();
        if factor > 1 {
            self.shared
                .inbox
                .borrow_mut()
                .factors
                .insert(series_id.to_owned(), factor);
        }
        let snapshot = series.snapshot();
        debug!(series = series_id, points = snapshot.data.len(), "series attached");
        if !snapshot.data.is_empty() {
            self.shared.on_series_update(series_id, snapshot);
        }
        Ok(())
    }

    /// Stops listening to a series and drops its queued payload.
    pub fn detach(&mut self, series_id: &str) -> bool {
        let Some(attachment) = self.attachments.shift_remove(series_id) else {
            return false;
        };
        for token in attachment.tokens {
            attachment.handle.off(token);
        }
        {
            let mut inbox = self.shared.inbox.borrow_mut();
            inbox.updates.shift_remove(series_id);
            inbox.factors.shift_remove(series_id);
            inbox.dirty = true;
        }
        if let Ok(mut state) = self.shared.state.try_borrow_mut() {
            state.extents.shift_remove(series_id);
        }
        debug!(series = series_id, "series detached");
        self.shared.schedule();
        true
    }

    /// Unsubscribes from every series and the shared range and drops queued work.
    ///
    /// Later [`poll`](Self::poll) calls are no-ops. Calling it twice is harmless.
    pub fn teardown(&mut self) {
        if self.shared.torn_down.replace(true) {
            return;
        }
        for (_, attachment) in self.attachments.drain(..) {
            for token in attachment.tokens {
                attachment.handle.off(token);
            }
        }
        for token in self.range_tokens.take().into_iter().flatten() {
            self.shared.time_range.off(token);
        }
        *self.shared.inbox.borrow_mut() = Inbox::default();
        if let Ok(mut state) = self.shared.state.try_borrow_mut() {
            state.scheduled_at = None;
            state.in_flight_until = None;
            state.slide = None;
        }
        debug!("update coordinator torn down");
    }

    /// Advances timers; returns how many frames were rendered.
    pub fn poll(&self) -> ChartResult<usize> {
        self.shared.poll()
    }

    /// Earliest time at which [`poll`](Self::poll) has something to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<f64> {
        let state = self.shared.state.borrow();
        match (state.in_flight_until, state.scheduled_at) {
            (Some(until), _) => Some(until),
            (None, scheduled) => scheduled,
        }
    }

    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.shared.state.borrow().scheduled_at.is_some()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.shared.state.borrow().in_flight_until.is_some()
    }

    #[must_use]
    pub fn is_sliding(&self) -> bool {
        self.shared.state.borrow().slide.is_some()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.shared.torn_down.get()
    }

    /// Transform of the running slide at the current clock time.
    #[must_use]
    pub fn current_transform(&self) -> SlideTransform {
        let now = self.shared.clock.now_ms();
        self.shared
            .state
            .borrow()
            .slide
            .map_or_else(SlideTransform::identity, |slide| slide.position(now))
    }

    /// Largest downsample factor above 1 among attached series.
    #[must_use]
    pub fn downsample_warning(&self) -> Option<usize> {
        self.shared.inbox.borrow().downsample_warning()
    }

    #[must_use]
    pub fn pending_series_count(&self) -> usize {
        self.shared.inbox.borrow().updates.len()
    }

    /// Range waiting for the running slide to finish.
    #[must_use]
    pub fn queued_domain(&self) -> Option<(f64, f64)> {
        self.shared.inbox.borrow().range.map(|target| target.domain)
    }

    /// Domain the next frame will show once queued work is applied.
    #[must_use]
    pub fn target_domain(&self) -> Option<(f64, f64)> {
        self.queued_domain()
            .or_else(|| self.shared.state.borrow().target.map(|target| target.domain))
    }

    #[must_use]
    pub fn frames_rendered(&self) -> usize {
        self.shared.state.borrow().frames_rendered
    }

    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.attachments.keys().map(String::as_str)
    }

    #[must_use]
    pub fn config(&self) -> UpdateCoordinatorConfig {
        self.shared.config
    }

    #[must_use]
    pub fn renderer(&self) -> Ref<'_, R> {
        Ref::map(self.shared.state.borrow(), |state| &state.renderer)
    }

    pub fn renderer_mut(&self) -> RefMut<'_, R> {
        RefMut::map(self.shared.state.borrow_mut(), |state| &mut state.renderer)
    }
}

impl<R: Renderer + 'static> Drop for UpdateCoordinator<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Inbox {
    fn downsample_warning(&self) -> Option<usize> {
        self.factors.values().copied().filter(|factor| *factor > 1).max()
    }
}

impl<R: Renderer> CoordinatorShared<R> {
    fn on_series_update(&self, series_id: &str, update: SeriesUpdate) {
        if self.torn_down.get() {
            return;
        }
        {
            let mut inbox = self.inbox.borrow_mut();
            // Only the latest payload per series matters.
            inbox.updates.insert(series_id.to_owned(), update);
            inbox.dirty = true;
        }
        trace!(series = series_id, "series update queued");
        self.schedule();
    }

    fn on_downsample(&self, series_id: &str, factor: usize) {
        if self.torn_down.get() {
            return;
        }
        {
            let mut inbox = self.inbox.borrow_mut();
            if factor > 1 {
                inbox.factors.insert(series_id.to_owned(), factor);
            } else {
                inbox.factors.shift_remove(series_id);
            }
            inbox.dirty = true;
        }
        debug!(series = series_id, factor, "series downsample factor changed");
        self.schedule();
    }

    fn on_range_changed(&self, start: f64, end: f64) {
        if self.torn_down.get() {
            return;
        }
        let target = pad_target(&self.config, start, end);
        {
            let mut inbox = self.inbox.borrow_mut();
            // A range arriving mid-slide waits here until the slide ends.
            inbox.range = Some(target);
            inbox.dirty = true;
        }
        trace!(start, end, "range target queued");
        self.schedule();
    }

    fn on_settled(&self) {
        if self.torn_down.get() || !self.inbox.borrow().dirty {
            return;
        }
        self.schedule();
    }

    fn schedule(&self) {
        if self.torn_down.get() {
            return;
        }
        if !self.config.animate && self.time_range.is_notifying() {
            // Drawn once the cascade settles, with every sibling's payload.
            trace!("range notification running; redraw deferred");
            return;
        }
        let now = self.clock.now_ms();
        let Ok(mut state) = self.state.try_borrow_mut() else {
            // The frame being drawn checks the inbox once it finishes.
            trace!("redraw in progress; follow-up left in inbox");
            return;
        };
        if state.in_flight_until.is_some() || state.scheduled_at.is_some() {
            return;
        }
        if self.config.animate {
            let due = now + self.config.debounce_ms;
            state.scheduled_at = Some(due);
            trace!(due, "redraw scheduled");
        } else if let Err(err) = self.redraw(&mut state, now) {
            warn!(error = %err, "immediate redraw failed");
        }
    }

    fn poll(&self) -> ChartResult<usize> {
        if self.torn_down.get() {
            return Ok(0);
        }
        let now = self.clock.now_ms();
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return Ok(0);
        };

        if let Some(until) = state.in_flight_until {
            if now < until {
                return Ok(0);
            }
            state.in_flight_until = None;
            trace!("redraw transition finished");
        }
        if state.slide.is_some_and(|slide| slide.finished(now)) {
            state.slide = None;
        }

        if !self.inbox.borrow().dirty {
            return Ok(0);
        }
        // Work that arrived while a transition ran is drawn right away.
        let due = *state.scheduled_at.get_or_insert(now);
        if now < due {
            return Ok(0);
        }
        self.redraw(&mut state, now)?;
        Ok(1)
    }

    fn redraw(&self, state: &mut RenderState<R>, now: f64) -> ChartResult<()> {
        let (updates, range, downsample_warning) = {
            let mut inbox = self.inbox.borrow_mut();
            inbox.dirty = false;
            (
                std::mem::take(&mut inbox.updates),
                inbox.range.take(),
                inbox.downsample_warning(),
            )
        };
        state.scheduled_at = None;

        // Render state only changes once the renderer accepts the frame.
        let target = range.or(state.target);
        let running_slide = state.slide.filter(|slide| !slide.finished(now));
        let mut extents = state.extents.clone();
        for (series_id, update) in &updates {
            match update.y_extent {
                Some(extent) => {
                    extents.insert(series_id.clone(), extent);
                }
                None => {
                    extents.shift_remove(series_id);
                }
            }
        }
        let y_ticks = match union_extent(extents.values().copied()) {
            Some((lo, hi)) => fallback_ticks(lo, hi, self.config.y_tick_count),
            None => Vec::new(),
        };

        let duration_ms = if self.config.animate {
            state.last_redraw_at.map_or(0.0, |last| {
                (now - last).clamp(0.0, self.config.max_redraw_duration_ms)
            })
        } else {
            0.0
        };

        let x_domain = target.map(|target| target.domain);
        let vertical_scale = target.map_or(1.0, |target| target.vertical_scale);
        let slide = match (state.rendered_domain, x_domain) {
            (Some(from), Some(to))
                if self.config.animate
                    && duration_ms > 0.0
                    && running_slide.is_none()
                    && from != to =>
            {
                Some(SlideTransform::between_domains(from, to))
            }
            _ => None,
        };

        let frame = RedrawFrame {
            series: updates
                .into_iter()
                .map(|(series_id, update)| SeriesFrame { series_id, update })
                .collect(),
            x_domain,
            y_ticks,
            duration_ms,
            slide,
            vertical_scale,
            downsample_warning,
        };
        if let Err(err) = state.renderer.render(&frame) {
            self.requeue(frame.series, range);
            return Err(err);
        }

        state.target = target;
        state.extents = extents;
        state.slide = match slide {
            Some(transform) => {
                debug!(from = ?state.rendered_domain, to = ?x_domain, duration_ms, "slide started");
                Some(SlideAnimation::new(transform, now, duration_ms))
            }
            None => running_slide,
        };
        state.rendered_domain = x_domain;
        state.last_redraw_at = Some(now);
        state.frames_rendered += 1;
        state.in_flight_until = (duration_ms > 0.0).then_some(now + duration_ms);
        debug!(
            series = frame.series.len(),
            duration_ms,
            frame = state.frames_rendered,
            "redraw complete"
        );

        if state.in_flight_until.is_none() && self.inbox.borrow().dirty {
            state.scheduled_at = Some(now);
        }
        Ok(())
    }

    /// Puts the work of a rejected frame back so the next poll retries it.
    fn requeue(&self, series: Vec<SeriesFrame>, range: Option<RangeTarget>) {
        if self.torn_down.get() {
            return;
        }
        let mut inbox = self.inbox.borrow_mut();
        for SeriesFrame { series_id, update } in series {
            // Payloads queued while the renderer ran are newer.
            inbox.updates.entry(series_id).or_insert(update);
        }
        if inbox.range.is_none() {
            inbox.range = range;
        }
        inbox.dirty = true;
        warn!(series = inbox.updates.len(), "frame rejected; work requeued");
    }
}

/// Tick values for the y extent; a domain the grid cannot represent falls back to its bounds.
fn fallback_ticks(lo: f64, hi: f64, desired_tick_count: usize) -> Vec<f64> {
    calculate_tick_values(lo, hi, desired_tick_count).unwrap_or_else(|err| {
        warn!(error = %err, lo, hi, "y tick calculation failed; using extent bounds");
        if lo < hi { vec![lo, hi] } else { Vec::new() }
    })
}

/// Pads a target narrower than the minimum span symmetrically around its center.
fn pad_target(config: &UpdateCoordinatorConfig, start: f64, end: f64) -> RangeTarget {
    let span = end - start;
    if span >= config.min_slide_span {
        return RangeTarget {
            domain: (start, end),
            vertical_scale: 1.0,
        };
    }
    let center = start + span / 2.0;
    let half = config.min_slide_span / 2.0;
    let vertical_scale = if span > 0.0 {
        (config.min_slide_span / span).min(config.max_vertical_scale)
    } else {
        config.max_vertical_scale
    };
    RangeTarget {
        domain: (center - half, center + half),
        vertical_scale,
    }
}

fn union_extent(extents: impl Iterator<Item = (f64, f64)>) -> Option<(f64, f64)> {
    extents.fold(None, |acc, (lo, hi)| {
        Some(acc.map_or((lo, hi), |(acc_lo, acc_hi): (f64, f64)| {
            (acc_lo.min(lo), acc_hi.max(hi))
        }))
    })
}
