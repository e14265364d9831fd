use chrono::NaiveDateTime;

/// Errors raised by the pulse pipeline and the analytics path.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// Two pulses were not strictly increasing in time.
    #[error("invalid inter-pulse interval: {current} is not after {prior}")]
    InvalidInterval {
        prior: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("line {line}: malformed timestamp {text:?}: {source}")]
    MalformedTimestamp {
        line: usize,
        text: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("line {line}: unrecognised detection sample {text:?}")]
    InvalidSample { line: usize, text: String },

    #[error("series contains no valid pulses")]
    EmptySeries,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, MeterError>;
