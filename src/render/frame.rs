use serde::{Deserialize, Serialize};

use crate::api::SeriesUpdate;
use crate::error::{ChartError, ChartResult};

/// Translate+scale applied to already laid-out content, in plot-width units.
///
/// A point drawn at normalized x position `x` appears at `x * scale + translate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlideTransform {
    pub translate: f64,
    pub scale: f64,
}

impl Default for SlideTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SlideTransform {
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            translate: 0.0,
            scale: 1.0,
        }
    }

    /// Transform that makes content laid out for `to` appear where it sat under `from`.
    #[must_use]
    pub fn between_domains(from: (f64, f64), to: (f64, f64)) -> Self {
        let from_span = from.1 - from.0;
        if !from_span.is_finite() || from_span <= 0.0 {
            return Self::identity();
        }
        Self {
            translate: (to.0 - from.0) / from_span,
            scale: (to.1 - to.0) / from_span,
        }
    }

    #[must_use]
    pub fn is_identity(self) -> bool {
        self.translate == 0.0 && self.scale == 1.0
    }

    #[must_use]
    pub fn lerp(self, target: Self, progress: f64) -> Self {
        let progress = progress.clamp(0.0, 1.0);
        Self {
            translate: self.translate + (target.translate - self.translate) * progress,
            scale: self.scale + (target.scale - self.scale) * progress,
        }
    }

    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        x * self.scale + self.translate
    }
}

/// One series' payload inside a redraw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesFrame {
    pub series_id: String,
    pub update: SeriesUpdate,
}

/// Everything the drawing layer needs for one coalesced, animated redraw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedrawFrame {
    /// Series that changed since the previous redraw, latest payload only.
    pub series: Vec<SeriesFrame>,
    pub x_domain: Option<(f64, f64)>,
    /// Nice tick boundaries for the value axis; the first and last bound the axis.
    pub y_ticks: Vec<f64>,
    pub duration_ms: f64,
    /// Transform to apply instantly before animating back to identity.
    pub slide: Option<SlideTransform>,
    /// Compensation for degenerate (padded) x-domains.
    pub vertical_scale: f64,
    /// Largest active downsample factor, when any series is downsampled.
    pub downsample_warning: Option<usize>,
}

impl RedrawFrame {
    #[must_use]
    pub fn y_domain(&self) -> Option<(f64, f64)> {
        Some((*self.y_ticks.first()?, *self.y_ticks.last()?))
    }

    #[must_use]
    pub fn series(&self, series_id: &str) -> Option<&SeriesUpdate> {
        self.series
            .iter()
            .find(|frame| frame.series_id == series_id)
            .map(|frame| &frame.update)
    }

    pub fn validate(&self) -> ChartResult<()> {
        if let Some((start, end)) = self.x_domain {
            if !start.is_finite() || !end.is_finite() || start > end {
                return Err(ChartError::InvalidData(
                    "frame x-domain must be finite and ordered".to_owned(),
                ));
            }
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            return Err(ChartError::InvalidData(
                "frame duration must be finite and >= 0".to_owned(),
            ));
        }
        if !self.vertical_scale.is_finite() || self.vertical_scale <= 0.0 {
            return Err(ChartError::InvalidData(
                "frame vertical scale must be finite and > 0".to_owned(),
            ));
        }
        if self.y_ticks.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ChartError::InvalidData(
                "frame y ticks must be strictly ascending".to_owned(),
            ));
        }
        Ok(())
    }
}
