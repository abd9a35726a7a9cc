use serde::{Deserialize, Serialize};

use crate::error::{ChartError, ChartResult};

/// Per-series ingestion settings.
///
/// Serializable so hosts can persist series setup next to their own chart
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesBufferConfig {
    pub time_field: String,
    pub value_field: String,
    /// Visible point count above which the series is progressively downsampled.
    pub downsample_limit: Option<usize>,
}

impl Default for SeriesBufferConfig {
    fn default() -> Self {
        Self {
            time_field: "time".to_owned(),
            value_field: "value".to_owned(),
            downsample_limit: None,
        }
    }
}

impl SeriesBufferConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = field.into();
        self
    }

    #[must_use]
    pub fn with_value_field(mut self, field: impl Into<String>) -> Self {
        self.value_field = field.into();
        self
    }

    #[must_use]
    pub fn with_downsample_limit(mut self, limit: Option<usize>) -> Self {
        self.downsample_limit = limit;
        self
    }

    pub fn validate(self) -> ChartResult<Self> {
        if self.time_field.is_empty() || self.value_field.is_empty() {
            return Err(ChartError::InvalidConfig(
                "time and value field names must not be empty".to_owned(),
            ));
        }
        validate_downsample_limit(self.downsample_limit)?;
        Ok(self)
    }

    pub fn from_json_str(input: &str) -> ChartResult<Self> {
        let config: Self = serde_json::from_str(input).map_err(|e| {
            ChartError::InvalidConfig(format!("failed to parse series config json: {e}"))
        })?;
        config.validate()
    }
}

pub(super) fn validate_downsample_limit(limit: Option<usize>) -> ChartResult<()> {
    if limit == Some(0) {
        return Err(ChartError::InvalidConfig(
            "downsample limit must be > 0".to_owned(),
        ));
    }
    Ok(())
}
