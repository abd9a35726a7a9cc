use chrono::DateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChartError, ChartResult};

/// Open record ingested by series buffers.
///
/// Buffers only read the configured time and value fields; every other field
/// travels through untouched so downstream renderers can use it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPoint {
    fields: IndexMap<String, Value>,
}

impl DataPoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a two-field record, the common shape for numeric samples.
    #[must_use]
    pub fn sample(time_field: &str, time: f64, value_field: &str, value: Option<f64>) -> Self {
        Self::new()
            .with_field(time_field, number_or_null(Some(time)))
            .with_field(value_field, number_or_null(value))
    }

    pub fn from_json_str(input: &str) -> ChartResult<Self> {
        serde_json::from_str(input)
            .map_err(|e| ChartError::InvalidData(format!("failed to parse data point json: {e}")))
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// Reads a timestamp in epoch milliseconds.
    ///
    /// Accepts JSON numbers as-is and RFC 3339 strings.
    #[must_use]
    pub fn time(&self, field: &str) -> Option<f64> {
        match self.fields.get(field)? {
            Value::Number(number) => number.as_f64().filter(|t| t.is_finite()),
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|time| time.timestamp_millis() as f64),
            _ => None,
        }
    }

    /// Reads the numeric value; null, missing and non-numeric fields are `None`.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<f64> {
        self.fields
            .get(field)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    }

    pub(crate) fn with_value(&self, field: &str, value: Option<f64>) -> Self {
        let mut merged = self.clone();
        merged.set_field(field, number_or_null(value));
        merged
    }
}

fn number_or_null(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::DataPoint;
    use serde_json::json;

    #[test]
    fn reads_numeric_and_rfc3339_times() {
        let numeric = DataPoint::new().with_field("t", json!(1500));
        assert_eq!(numeric.time("t"), Some(1500.0));

        let text = DataPoint::new().with_field("t", json!("1970-01-01T00:00:02Z"));
        assert_eq!(text.time("t"), Some(2000.0));

        let garbage = DataPoint::new().with_field("t", json!("yesterday"));
        assert_eq!(garbage.time("t"), None);
    }

    #[test]
    fn null_and_missing_values_read_as_none() {
        let point = DataPoint::sample("time", 1.0, "value", None);
        assert_eq!(point.value("value"), None);
        assert_eq!(point.value("other"), None);
        assert!(point.field("value").is_some_and(serde_json::Value::is_null));
    }

    #[test]
    fn extra_fields_survive_value_rewrite() {
        let point = DataPoint::sample("time", 1.0, "value", Some(2.0))
            .with_field("label", json!("cpu"));
        let merged = point.with_value("value", Some(4.5));
        assert_eq!(merged.value("value"), Some(4.5));
        assert_eq!(merged.field("label"), Some(&json!("cpu")));
    }
}
