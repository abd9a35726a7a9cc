mod frame;
mod null_renderer;

pub use frame::{RedrawFrame, SeriesFrame, SlideTransform};
pub use null_renderer::NullRenderer;

use crate::error::ChartResult;

/// Contract implemented by the drawing layer.
///
/// Backends receive one fully materialized [`RedrawFrame`] per coalesced redraw,
/// so drawing code stays isolated from buffering and scheduling logic.
pub trait Renderer {
    fn render(&mut self, frame: &RedrawFrame) -> ChartResult<()>;
}
