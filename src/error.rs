use thiserror::Error;

pub type ChartResult<T> = Result<T, ChartError>;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unsupported configuration: {setting}={value}")]
    UnsupportedConfiguration { setting: String, value: String },

    #[error("degenerate tick domain: start={start}, stop={stop}, step={step}")]
    DegenerateTickDomain { start: f64, stop: f64, step: f64 },
}
