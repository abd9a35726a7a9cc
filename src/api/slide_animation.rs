use crate::render::SlideTransform;

/// Running transform animation from an initial offset back to identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideAnimation {
    pub from: SlideTransform,
    pub start_time: f64,
    pub duration: f64,
}

impl SlideAnimation {
    #[must_use]
    pub fn new(from: SlideTransform, start_time: f64, duration: f64) -> Self {
        Self {
            from,
            start_time,
            duration,
        }
    }

    #[must_use]
    pub fn finished(self, now: f64) -> bool {
        if self.duration <= 0.0 {
            return true;
        }
        ((now - self.start_time) / self.duration) >= 1.0
    }

    #[must_use]
    pub fn position(self, now: f64) -> SlideTransform {
        if self.finished(now) {
            return SlideTransform::identity();
        }
        let progress = ((now - self.start_time) / self.duration).clamp(0.0, 1.0);
        self.from.lerp(SlideTransform::identity(), progress)
    }
}
