use crate::error::ChartResult;
use crate::render::{RedrawFrame, Renderer};

/// Headless renderer used by tests and embedding without a drawing surface.
///
/// It still validates each frame so tests catch malformed redraws, and keeps
/// every frame it was handed.
#[derive(Debug, Default)]
pub struct NullRenderer {
    pub frames: Vec<RedrawFrame>,
}

impl NullRenderer {
    #[must_use]
    pub fn last_frame(&self) -> Option<&RedrawFrame> {
        self.frames.last()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl Renderer for NullRenderer {
    fn render(&mut self, frame: &RedrawFrame) -> ChartResult<()> {
        frame.validate()?;
        self.frames.push(frame.clone());
        Ok(())
    }
}
