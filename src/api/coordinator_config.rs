use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChartError, ChartResult};

/// Where the synchronized time axis is displayed.
///
/// Range synchronization slides content horizontally, so only horizontal axis
/// placements are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeAxisPosition {
    #[default]
    Bottom,
    Top,
}

impl TimeAxisPosition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bottom => "bottom",
            Self::Top => "top",
        }
    }
}

impl fmt::Display for TimeAxisPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeAxisPosition {
    type Err = ChartError;

    fn from_str(value: &str) -> ChartResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bottom" => Ok(Self::Bottom),
            "top" => Ok(Self::Top),
            _ => Err(ChartError::UnsupportedConfiguration {
                setting: "time_axis_position".to_owned(),
                value: value.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for TimeAxisPosition {
    type Error = ChartError;

    fn try_from(value: String) -> ChartResult<Self> {
        value.parse()
    }
}

impl From<TimeAxisPosition> for String {
    fn from(position: TimeAxisPosition) -> Self {
        position.as_str().to_owned()
    }
}

/// Redraw scheduling and animation tuning for an [`UpdateCoordinator`](super::UpdateCoordinator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCoordinatorConfig {
    /// Animated redraws are debounced; without animation every update draws at once.
    pub animate: bool,
    pub debounce_ms: f64,
    pub max_redraw_duration_ms: f64,
    /// Target ranges narrower than this are padded symmetrically.
    pub min_slide_span: f64,
    pub y_tick_count: usize,
    /// Upper bound for the vertical compensation applied to padded domains.
    pub max_vertical_scale: f64,
    pub time_axis_position: TimeAxisPosition,
}

impl Default for UpdateCoordinatorConfig {
    fn default() -> Self {
        Self {
            animate: true,
            debounce_ms: 16.0,
            max_redraw_duration_ms: 750.0,
            min_slide_span: 10.0,
            y_tick_count: 5,
            max_vertical_scale: 4.0,
            time_axis_position: TimeAxisPosition::Bottom,
        }
    }
}

impl UpdateCoordinatorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_animate(mut self, animate: bool) -> Self {
        self.animate = animate;
        self
    }

    #[must_use]
    pub fn with_debounce_ms(mut self, debounce_ms: f64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    #[must_use]
    pub fn with_max_redraw_duration_ms(mut self, duration_ms: f64) -> Self {
        self.max_redraw_duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub fn with_min_slide_span(mut self, span: f64) -> Self {
        self.min_slide_span = span;
        self
    }

    #[must_use]
    pub fn with_y_tick_count(mut self, count: usize) -> Self {
        self.y_tick_count = count;
        self
    }

    /// Parses a display position, failing on anything the range sync cannot drive.
    pub fn with_time_axis_position_str(mut self, position: &str) -> ChartResult<Self> {
        self.time_axis_position = position.parse()?;
        Ok(self)
    }

    pub fn validate(self) -> ChartResult<Self> {
        if !self.debounce_ms.is_finite() || self.debounce_ms < 0.0 {
            return Err(ChartError::InvalidConfig(
                "debounce must be finite and >= 0".to_owned(),
            ));
        }
        if !self.max_redraw_duration_ms.is_finite() || self.max_redraw_duration_ms < 0.0 {
            return Err(ChartError::InvalidConfig(
                "max redraw duration must be finite and >= 0".to_owned(),
            ));
        }
        if !self.min_slide_span.is_finite() || self.min_slide_span < 0.0 {
            return Err(ChartError::InvalidConfig(
                "min slide span must be finite and >= 0".to_owned(),
            ));
        }
        if self.y_tick_count == 0 {
            return Err(ChartError::InvalidConfig(
                "y tick count must be > 0".to_owned(),
            ));
        }
        if !self.max_vertical_scale.is_finite() || self.max_vertical_scale < 1.0 {
            return Err(ChartError::InvalidConfig(
                "max vertical scale must be finite and >= 1".to_owned(),
            ));
        }
        Ok(self)
    }

    /// Parses and validates a JSON config; an unknown axis position is an
    /// `UnsupportedConfiguration` error rather than a parse failure.
    pub fn from_json_str(input: &str) -> ChartResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(input).map_err(|e| {
            ChartError::InvalidConfig(format!("failed to parse coordinator config json: {e}"))
        })?;
        if let Some(position) = raw.get("time_axis_position").and_then(|v| v.as_str()) {
            position.parse::<TimeAxisPosition>()?;
        }
        let config: Self = serde_json::from_value(raw).map_err(|e| {
            ChartError::InvalidConfig(format!("invalid coordinator config: {e}"))
        })?;
        config.validate()
    }
}
