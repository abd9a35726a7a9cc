pub mod downsample;
pub mod event_bus;
pub mod ticks;
pub mod time_range;
pub mod types;
pub mod windowing;

pub use downsample::{DownsamplePipeline, Escalations, merge_group};
pub use event_bus::{BusEvent, EventBus, SubscriptionToken};
pub use ticks::{calculate_tick_values, nice_step};
pub use time_range::{SharedTimeRange, TimeRangeConfig, TimeRangeEvent, TimeRangeTopic};
pub use types::DataPoint;
pub use windowing::{calculate_windowed_domain, first_index_at_or_after};
