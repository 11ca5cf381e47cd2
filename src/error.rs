use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstrumentError {
    /// Resource could not be located, claimed or opened, or the adapter is closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport-level I/O fault
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    #[error("Parse error: could not interpret {response:?} as {expected}")]
    Parse { response: String, expected: String },

    /// Rejected locally, before anything reached the device
    #[error("Validation error: {0}")]
    Validation(String),

    /// The instrument answered, but reported a failure
    #[error("Instrument reported error: {0}")]
    Device(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl InstrumentError {
    pub(crate) fn parse(response: &str, expected: impl Into<String>) -> Self {
        InstrumentError::Parse {
            response: response.to_owned(),
            expected: expected.into(),
        }
    }
}

pub type InstrResult<T> = std::result::Result<T, InstrumentError>;
