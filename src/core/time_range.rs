use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::event_bus::{BusEvent, EventBus, SubscriptionToken};
use crate::error::{ChartError, ChartResult};

/// Construction settings for a [`SharedTimeRange`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TimeRangeConfig {
    /// Fixed trailing window width in milliseconds; `None` keeps the range elastic.
    pub window_ms: Option<f64>,
    /// Open-ended feed: buffers sharing this range keep no long-term history.
    pub live: bool,
}

impl TimeRangeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_window_ms(mut self, window_ms: f64) -> Self {
        self.window_ms = Some(window_ms);
        self
    }

    #[must_use]
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn validate(self) -> ChartResult<Self> {
        if let Some(window_ms) = self.window_ms {
            validate_window(window_ms)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRangeTopic {
    RangeChanged,
    Realtime,
    Settled,
}

/// Notifications broadcast by a [`SharedTimeRange`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeRangeEvent {
    /// `change:range` with the new visible bounds.
    RangeChanged { start: f64, end: f64 },
    /// `realtime` with the new window width.
    Realtime { window_ms: Option<f64> },
    /// The outermost notification batch ended; every cascade it caused is done.
    Settled,
}

impl BusEvent for TimeRangeEvent {
    type Topic = TimeRangeTopic;

    fn topic(&self) -> TimeRangeTopic {
        match self {
            Self::RangeChanged { .. } => TimeRangeTopic::RangeChanged,
            Self::Realtime { .. } => TimeRangeTopic::Realtime,
            Self::Settled => TimeRangeTopic::Settled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct TimeRangeState {
    range: Option<(f64, f64)>,
    window_ms: Option<f64>,
}

#[derive(Debug)]
struct TimeRangeInner {
    live: bool,
    state: RefCell<TimeRangeState>,
    events: EventBus<TimeRangeEvent>,
    batch_depth: Cell<usize>,
}

/// Time window displayed by every series of a chart.
///
/// Cloning yields another handle to the same range. All mutation goes through
/// [`set_range`](Self::set_range) and [`set_window`](Self::set_window), and each
/// one is broadcast to subscribers before the call returns.
#[derive(Debug, Clone)]
pub struct SharedTimeRange {
    inner: Rc<TimeRangeInner>,
}

impl SharedTimeRange {
    pub fn new(config: TimeRangeConfig) -> ChartResult<Self> {
        let config = config.validate()?;
        Ok(Self {
            inner: Rc::new(TimeRangeInner {
                live: config.live,
                state: RefCell::new(TimeRangeState {
                    range: None,
                    window_ms: config.window_ms,
                }),
                events: EventBus::new(),
                batch_depth: Cell::new(0),
            }),
        })
    }

    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        self.inner.state.borrow().range
    }

    #[must_use]
    pub fn window_ms(&self) -> Option<f64> {
        self.inner.state.borrow().window_ms
    }

    #[must_use]
    pub fn is_windowed(&self) -> bool {
        self.window_ms().is_some()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.live
    }

    /// Replaces the visible range and notifies every `change:range` subscriber.
    pub fn set_range(&self, start: f64, end: f64) -> ChartResult<()> {
        if !start.is_finite() || !end.is_finite() {
            return Err(ChartError::InvalidData(
                "time range bounds must be finite".to_owned(),
            ));
        }
        if start > end {
            return Err(ChartError::InvalidData(
                "time range start must be <= end".to_owned(),
            ));
        }

        self.inner.state.borrow_mut().range = Some((start, end));
        debug!(start, end, "shared time range changed");
        self.notify_batch(|| {
            self.inner
                .events
                .emit(&TimeRangeEvent::RangeChanged { start, end });
        });
        Ok(())
    }

    /// Sets the fixed window width and notifies every `realtime` subscriber.
    pub fn set_window(&self, window_ms: f64) -> ChartResult<()> {
        validate_window(window_ms)?;
        self.apply_window(Some(window_ms));
        Ok(())
    }

    /// Makes the range elastic again.
    pub fn clear_window(&self) {
        self.apply_window(None);
    }

    fn apply_window(&self, window_ms: Option<f64>) {
        self.inner.state.borrow_mut().window_ms = window_ms;
        debug!(?window_ms, "shared time window changed");
        self.notify_batch(|| {
            self.inner.events.emit(&TimeRangeEvent::Realtime { window_ms });
        });
    }

    /// Runs `notify` as one notification burst.
    ///
    /// Bursts nest; `Settled` is emitted once when the outermost one ends, so
    /// subscribers can act on the combined result of a cascade instead of on
    /// each intermediate step.
    pub fn notify_batch<T>(&self, notify: impl FnOnce() -> T) -> T {
        let depth = &self.inner.batch_depth;
        depth.set(depth.get() + 1);
        let result = notify();
        depth.set(depth.get() - 1);
        if depth.get() == 0 {
            trace!("shared time range settled");
            self.inner.events.emit(&TimeRangeEvent::Settled);
        }
        result
    }

    /// Returns `true` while a notification burst is running.
    #[must_use]
    pub fn is_notifying(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    pub fn on<F>(&self, topic: TimeRangeTopic, callback: F) -> SubscriptionToken
    where
        F: FnMut(&TimeRangeEvent) + 'static,
    {
        self.inner.events.on(topic, callback)
    }

    pub fn off(&self, token: SubscriptionToken) -> bool {
        self.inner.events.off(token)
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: TimeRangeTopic) -> usize {
        self.inner.events.subscriber_count(topic)
    }

    /// Returns `true` when both handles point at the same range.
    #[must_use]
    pub fn same_range(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn validate_window(window_ms: f64) -> ChartResult<()> {
    if !window_ms.is_finite() || window_ms <= 0.0 {
        return Err(ChartError::InvalidConfig(
            "time window must be finite and > 0".to_owned(),
        ));
    }
    Ok(())
}
