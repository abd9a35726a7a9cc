use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::core::{
    BusEvent, DataPoint, DownsamplePipeline, Escalations, EventBus, SharedTimeRange,
    SubscriptionToken, TimeRangeEvent, TimeRangeTopic, calculate_windowed_domain,
    first_index_at_or_after,
};
use crate::error::ChartResult;

use super::series_config::{SeriesBufferConfig, validate_downsample_limit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesTopic {
    Update,
    Downsample,
    BatchEnd,
    StreamEnd,
}

/// Snapshot handed to renderers on every `update`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesUpdate {
    pub data: Vec<DataPoint>,
    pub interpolation_breaks: Vec<f64>,
    pub x_domain: Option<(f64, f64)>,
    /// Min/max of the non-null values in `data`.
    pub y_extent: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeriesEvent {
    Update(SeriesUpdate),
    Downsample { factor: usize },
    BatchEnd,
    StreamEnd,
}

impl BusEvent for SeriesEvent {
    type Topic = SeriesTopic;

    fn topic(&self) -> SeriesTopic {
        match self {
            Self::Update(_) => SeriesTopic::Update,
            Self::Downsample { .. } => SeriesTopic::Downsample,
            Self::BatchEnd => SeriesTopic::BatchEnd,
            Self::StreamEnd => SeriesTopic::StreamEnd,
        }
    }
}

#[derive(Debug)]
struct SeriesState {
    history: Vec<DataPoint>,
    pipeline: DownsamplePipeline,
    interpolation_breaks: Vec<f64>,
    last_time: Option<f64>,
    x_domain: Option<(f64, f64)>,
    /// `false` once an unrecorded batch was accepted; history alone can no
    /// longer reproduce the visible data.
    history_complete: bool,
}

#[derive(Debug)]
pub(crate) struct SeriesShared {
    time_field: String,
    value_field: String,
    time_range: SharedTimeRange,
    state: RefCell<SeriesState>,
    events: EventBus<SeriesEvent>,
    /// Set while this series drives the shared range from inside `push`.
    dispatching: Cell<bool>,
}

/// Weak handle used by observers to unsubscribe without owning the series.
#[derive(Debug, Clone)]
pub(crate) struct SeriesHandle(Weak<SeriesShared>);

impl SeriesHandle {
    pub(crate) fn off(&self, token: SubscriptionToken) -> bool {
        self.0
            .upgrade()
            .is_some_and(|shared| shared.events.off(token))
    }
}

/// Per-series buffer feeding one chart series.
///
/// Decides between retained history and live streaming from the shared range,
/// keeps the visible slice inside the active window, downsamples progressively
/// past the configured point limit and drives the shared range forward when
/// it sees newer data. Dropping the buffer unsubscribes it from the range.
#[derive(Debug)]
pub struct AdaptiveSeriesBuffer {
    shared: Rc<SeriesShared>,
    range_tokens: [SubscriptionToken; 2],
}

impl AdaptiveSeriesBuffer {
    pub fn new(time_range: &SharedTimeRange, config: SeriesBufferConfig) -> ChartResult<Self> {
        let config = config.validate()?;
        let shared = Rc::new(SeriesShared {
            state: RefCell::new(SeriesState {
                history: Vec::new(),
                pipeline: DownsamplePipeline::new(
                    config.time_field.clone(),
                    config.value_field.clone(),
                    config.downsample_limit,
                ),
                interpolation_breaks: Vec::new(),
                last_time: None,
                x_domain: None,
                history_complete: true,
            }),
            time_field: config.time_field,
            value_field: config.value_field,
            time_range: time_range.clone(),
            events: EventBus::new(),
            dispatching: Cell::new(false),
        });

        let on_range = Rc::downgrade(&shared);
        let range_token = time_range.on(TimeRangeTopic::RangeChanged, move |event| {
            if let (Some(shared), TimeRangeEvent::RangeChanged { start, end }) =
                (on_range.upgrade(), event)
            {
                shared.on_range_changed(*start, *end);
            }
        });
        let on_window = Rc::downgrade(&shared);
        let window_token = time_range.on(TimeRangeTopic::Realtime, move |_| {
            if let Some(shared) = on_window.upgrade() {
                shared.on_window_changed();
            }
        });

        Ok(Self {
            shared,
            range_tokens: [range_token, window_token],
        })
    }

    /// Ingests a batch of points; returns `false` when nothing was accepted.
    ///
    /// `record` controls whether a non-live series keeps the batch in its
    /// history. Out-of-order batches are dropped whole with a warning.
    pub fn push(&self, points: &[DataPoint], record: bool) -> bool {
        self.shared.push(points, record)
    }

    /// Re-filters the visible slice against a new range end.
    pub fn update(&self, max_t: f64) {
        self.shared.update(max_t);
    }

    /// Marks the end of one ingestion batch.
    pub fn batch_end(&self) {
        trace!("series batch end");
        self.shared.events.emit(&SeriesEvent::BatchEnd);
    }

    /// Marks the end of a stream; a resumed stream is never bridged to this one.
    pub fn stream_end(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if let Some(last) = state.last_time {
                if state.interpolation_breaks.last() != Some(&last) {
                    state.interpolation_breaks.push(last);
                }
            }
        }
        debug!("series stream end");
        self.shared.events.emit(&SeriesEvent::StreamEnd);
    }

    /// Clears history, visible data and downsampling state.
    pub fn reset(&self) {
        self.shared.reset();
    }

    /// Changes the downsample limit after construction.
    pub fn set_downsample_limit(&self, limit: Option<usize>) -> ChartResult<()> {
        validate_downsample_limit(limit)?;
        self.shared.set_downsample_limit(limit);
        Ok(())
    }

    pub fn on<F>(&self, topic: SeriesTopic, callback: F) -> SubscriptionToken
    where
        F: FnMut(&SeriesEvent) + 'static,
    {
        self.shared.events.on(topic, callback)
    }

    pub fn off(&self, token: SubscriptionToken) -> bool {
        self.shared.events.off(token)
    }

    #[must_use]
    pub fn visible(&self) -> Vec<DataPoint> {
        self.shared.state.borrow().pipeline.visible().to_vec()
    }

    #[must_use]
    pub fn visible_len(&self) -> usize {
        self.shared.state.borrow().pipeline.visible().len()
    }

    #[must_use]
    pub fn history(&self) -> Vec<DataPoint> {
        self.shared.state.borrow().history.clone()
    }

    #[must_use]
    pub fn downsample_factor(&self) -> usize {
        self.shared.state.borrow().pipeline.factor()
    }

    #[must_use]
    pub fn downsample_limit(&self) -> Option<usize> {
        self.shared.state.borrow().pipeline.limit()
    }

    #[must_use]
    pub fn interpolation_breaks(&self) -> Vec<f64> {
        self.shared.state.borrow().interpolation_breaks.clone()
    }

    #[must_use]
    pub fn x_domain(&self) -> Option<(f64, f64)> {
        self.shared.state.borrow().x_domain
    }

    #[must_use]
    pub fn snapshot(&self) -> SeriesUpdate {
        self.shared.snapshot()
    }

    #[must_use]
    pub fn time_range(&self) -> &SharedTimeRange {
        &self.shared.time_range
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared.time_range.is_live()
    }

    #[must_use]
    pub fn is_windowed(&self) -> bool {
        self.shared.time_range.is_windowed()
    }

    #[must_use]
    pub fn time_field(&self) -> &str {
        &self.shared.time_field
    }

    #[must_use]
    pub fn value_field(&self) -> &str {
        &self.shared.value_field
    }

    pub(crate) fn handle(&self) -> SeriesHandle {
        SeriesHandle(Rc::downgrade(&self.shared))
    }
}

impl Drop for AdaptiveSeriesBuffer {
    fn drop(&mut self) {
        for token in self.range_tokens {
            self.shared.time_range.off(token);
        }
    }
}

impl SeriesShared {
    fn push(&self, points: &[DataPoint], record: bool) -> bool {
        if points.is_empty() {
            return false;
        }

        let mut batch: Vec<(f64, DataPoint)> = points
            .iter()
            .filter_map(|point| point.time(&self.time_field).map(|t| (t, point.clone())))
            .collect();
        if batch.len() < points.len() {
            warn!(
                dropped = points.len() - batch.len(),
                field = %self.time_field,
                "dropping points without a readable time field"
            );
        }
        if !batch.is_sorted_by(|left, right| left.0 <= right.0) {
            batch.sort_by(|left, right| left.0.total_cmp(&right.0));
        }
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return false;
        };
        let (first_t, max_t) = (first.0, last.0);

        let live = self.time_range.is_live();
        let window_ms = self.time_range.window_ms();
        let current_range = self.time_range.range();

        let (escalations, domain, drives_range) = {
            let mut state = self.state.borrow_mut();
            if let Some(last) = state.last_time {
                if first_t < last {
                    warn!(first = first_t, last, "rejecting out-of-order batch");
                    return false;
                }
            }

            if !live {
                if record {
                    state
                        .history
                        .extend(batch.iter().map(|(_, point)| point.clone()));
                } else {
                    state.history_complete = false;
                }
            }

            let mut escalations = Escalations::new();
            for (time, point) in batch {
                if point.value(&self.value_field).is_none() {
                    state.interpolation_breaks.push(time);
                }
                escalations.extend(state.pipeline.ingest(point));
            }
            state.last_time = Some(max_t);

            let min_t = state.pipeline.earliest_time().map_or(first_t, |t| t.min(first_t));
            let domain = match window_ms {
                Some(window_ms) => calculate_windowed_domain(current_range, window_ms, min_t, max_t),
                None => current_range
                    .map_or((min_t, max_t), |(start, end)| (start.min(min_t), end.max(max_t))),
            };
            state.x_domain = Some(domain);
            let drives_range = current_range.is_none_or(|(_, end)| max_t > end);
            (escalations, domain, drives_range)
        };

        trace!(first = first_t, last = max_t, "series batch ingested");
        self.time_range.notify_batch(|| {
            for factor in escalations {
                self.events.emit(&SeriesEvent::Downsample { factor });
            }

            if drives_range {
                self.dispatching.set(true);
                let result = self.time_range.set_range(domain.0, domain.1);
                self.dispatching.set(false);
                if let Err(err) = result {
                    warn!(error = %err, "series could not advance the shared range");
                }
            }
            if let Some((_, end)) = self.time_range.range() {
                self.filter_to_window(end);
            }

            self.events.emit(&SeriesEvent::Update(self.snapshot()));
        });
        true
    }

    fn on_range_changed(&self, start: f64, end: f64) {
        self.state.borrow_mut().x_domain = Some((start, end));
        if self.dispatching.get() {
            // `push` emits once the range settles.
            self.filter_to_window(end);
            return;
        }
        self.update(end);
    }

    fn on_window_changed(&self) {
        if let Some((_, end)) = self.time_range.range() {
            self.update(end);
        }
    }

    fn update(&self, max_t: f64) {
        if self.filter_to_window(max_t) == 0 {
            return;
        }
        self.time_range
            .notify_batch(|| self.events.emit(&SeriesEvent::Update(self.snapshot())));
    }

    fn filter_to_window(&self, max_t: f64) -> usize {
        let Some(window_ms) = self.time_range.window_ms() else {
            return 0;
        };
        let cutoff = max_t - window_ms;
        let mut state = self.state.borrow_mut();
        state.interpolation_breaks.retain(|time| *time >= cutoff);
        state.pipeline.retain_from(cutoff)
    }

    fn reset(&self) {
        let previous_factor = {
            let mut state = self.state.borrow_mut();
            state.history.clear();
            state.interpolation_breaks.clear();
            state.last_time = None;
            state.x_domain = None;
            state.history_complete = true;
            state.pipeline.reset()
        };
        debug!(?previous_factor, "series reset");
        self.time_range.notify_batch(|| {
            if previous_factor.is_some() {
                self.events.emit(&SeriesEvent::Downsample { factor: 1 });
            }
            self.events.emit(&SeriesEvent::Update(self.snapshot()));
        });
    }

    fn set_downsample_limit(&self, limit: Option<usize>) {
        let cutoff = match (self.time_range.window_ms(), self.time_range.range()) {
            (Some(window_ms), Some((_, end))) => Some(end - window_ms),
            _ => None,
        };

        let factor_events: Escalations = {
            let mut state = self.state.borrow_mut();
            // Without a full history the visible data is the only source.
            if self.time_range.is_live() || !state.history_complete || state.history.is_empty() {
                state.pipeline.set_limit(limit)
            } else {
                // Rebuild from retained history so a raised limit can refine.
                let state = &mut *state;
                let previous = state.pipeline.factor();
                state.pipeline.reset();
                state.pipeline.set_limit(limit);
                let first = cutoff.map_or(0, |cutoff| {
                    first_index_at_or_after(&state.history, &self.time_field, cutoff)
                });
                for point in &state.history[first..] {
                    state.pipeline.ingest(point.clone());
                }
                let rebuilt = state.pipeline.factor();
                if rebuilt == previous {
                    Escalations::new()
                } else {
                    Escalations::from_slice(&[rebuilt])
                }
            }
        };

        debug!(?limit, "downsample limit changed");
        self.time_range.notify_batch(|| {
            for factor in &factor_events {
                self.events.emit(&SeriesEvent::Downsample { factor: *factor });
            }
            if !factor_events.is_empty() || !self.time_range.is_live() {
                self.events.emit(&SeriesEvent::Update(self.snapshot()));
            }
        });
    }

    fn snapshot(&self) -> SeriesUpdate {
        let state = self.state.borrow();
        let data = state.pipeline.visible().to_vec();
        let y_extent = data
            .iter()
            .filter_map(|point| point.value(&self.value_field))
            .fold(None, |extent: Option<(f64, f64)>, value| {
                Some(extent.map_or((value, value), |(lo, hi)| (lo.min(value), hi.max(value))))
            });
        SeriesUpdate {
            data,
            interpolation_breaks: state.interpolation_breaks.clone(),
            x_domain: state.x_domain,
            y_extent,
        }
    }
}
