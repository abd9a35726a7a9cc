mod clock;
mod coordinator_config;
mod series_buffer;
mod series_config;
mod slide_animation;
mod update_coordinator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator_config::{TimeAxisPosition, UpdateCoordinatorConfig};
pub use series_buffer::{AdaptiveSeriesBuffer, SeriesEvent, SeriesTopic, SeriesUpdate};
pub use series_config::SeriesBufferConfig;
pub use slide_animation::SlideAnimation;
pub use update_coordinator::UpdateCoordinator;
