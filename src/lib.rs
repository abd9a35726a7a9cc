//! stream-chart: data-management core for streaming time-series charts.
//!
//! The crate owns everything between a data feed and a drawing surface:
//! nice axis ticks, a time range shared by sibling series, per-series
//! buffers that window and progressively downsample incoming points, and a
//! coordinator that coalesces their notifications into animated redraw
//! frames for a [`render::Renderer`].

pub mod api;
pub mod core;
pub mod error;
pub mod render;
pub mod telemetry;

pub use api::{
    AdaptiveSeriesBuffer, SeriesBufferConfig, UpdateCoordinator, UpdateCoordinatorConfig,
};
pub use crate::core::{DataPoint, SharedTimeRange, TimeRangeConfig, calculate_tick_values};
pub use error::{ChartError, ChartResult};
