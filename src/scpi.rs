//! IEEE 488.2 common commands shared by every SCPI instrument.

use std::fmt;

use crate::error::{InstrResult, InstrumentError};
use crate::property::Descriptor;
use crate::util::clean_response;

/// Descriptors available on every SCPI instrument; model tables are layered
/// on top of this one.
pub static COMMON: &[Descriptor] = &[
    Descriptor::text("identity").query("*IDN?"),
    Descriptor::boolean("operation_complete").query("*OPC?"),
    Descriptor::int("event_status").query("*ESR?"),
    Descriptor::int("status_byte").query("*STB?"),
    Descriptor::int("service_request_enable")
        .query("*SRE?")
        .command("*SRE {value}")
        .range(0.0, 255.0),
    Descriptor::int("self_test").query("*TST?"),
];

/// One entry of the instrument error queue, e.g. `-113,"Undefined header"`
#[derive(Debug, Clone, PartialEq)]
pub struct ScpiError {
    pub code: i32,
    pub message: String,
}

impl ScpiError {
    pub fn parse(response: &str) -> InstrResult<ScpiError> {
        let text = response.trim();
        let (code, message) = text.split_once(',').unwrap_or((text, ""));
        let code = code
            .trim()
            .parse::<i32>()
            .map_err(|_| InstrumentError::parse(response, "an error queue entry"))?;

        Ok(ScpiError {
            code,
            message: clean_response(message).to_owned(),
        })
    }

    /// Code 0 means the queue is empty
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl fmt::Display for ScpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.code, self.message)
    }
}

impl From<ScpiError> for InstrumentError {
    fn from(error: ScpiError) -> Self {
        InstrumentError::Device(error.to_string())
    }
}

/// Largest payload a definite length block can announce (nine length digits)
pub const MAX_BLOCK_SIZE: usize = 999_999_999;

/// IEEE 488.2 definite length block: `#<digits><length><payload>`
pub fn definite_length_block(payload: &[u8]) -> InstrResult<Vec<u8>> {
    if payload.len() > MAX_BLOCK_SIZE {
        return Err(InstrumentError::Validation(format!(
            "{} bytes do not fit in one definite length block",
            payload.len()
        )));
    }
    let length = payload.len().to_string();
    let mut block = Vec::with_capacity(2 + length.len() + payload.len());
    block.extend_from_slice(format!("#{}{}", length.len(), length).as_bytes());
    block.extend_from_slice(payload);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_counts_payload_bytes() {
        let block = definite_length_block(&[0xAB; 1200]).unwrap();
        assert_eq!(&block[..6], b"#41200");
        assert_eq!(block.len(), 6 + 1200);
        assert_eq!(definite_length_block(&[]).unwrap(), b"#10".to_vec());
    }

    #[test]
    fn parses_error_queue_entries() {
        let err = ScpiError::parse("-113,\"Undefined header\"\n").unwrap();
        assert_eq!(err.code, -113);
        assert_eq!(err.message, "Undefined header");
        assert!(err.is_error());

        let none = ScpiError::parse("+0,\"No error\"").unwrap();
        assert!(!none.is_error());
    }

    #[test]
    fn bare_code_is_accepted() {
        assert_eq!(ScpiError::parse("0").unwrap().code, 0);
        assert!(ScpiError::parse("No error").is_err());
    }
}
