use std::ffi::CString;
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use tracing::{info, trace};
use visa_rs::enums::attribute::{self, HasAttribute};
use visa_rs::prelude::*;

use super::DeviceInterface;
use crate::error::{InstrResult, InstrumentError};

/// GPIB / USB-TMC / LXI session through the system VISA library.
///
/// The resource manager session is owned here so that it lives exactly as
/// long as the instrument session opened from it.
pub struct VisaDevice {
    resource: String,
    // Declared before the manager: dropped first
    session: Option<visa_rs::Instrument>,
    _manager: DefaultRM,
    // I/O timeout currently set on the session
    io_timeout: Duration,
}

fn timeout_attribute(timeout: Duration) -> InstrResult<attribute::AttrTmoValue> {
    let ms = timeout.as_millis().clamp(1, u32::MAX as u128) as u32;
    attribute::AttrTmoValue::new_checked(ms).ok_or_else(|| {
        InstrumentError::Configuration(format!("VISA cannot use a {:?} timeout", timeout))
    })
}

/// VISA reports an expired I/O timeout as an error status
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
        || format!("{:?}", e).contains("ErrorTmo")
}

impl VisaDevice {
    pub fn open(resource: &str, timeout: Duration) -> InstrResult<VisaDevice> {
        let manager = DefaultRM::new().map_err(|e| {
            InstrumentError::Connection(format!("VISA library unavailable: {:?}", e))
        })?;
        let name = CString::new(resource).map_err(|_| {
            InstrumentError::Connection(format!("Invalid VISA resource {:?}", resource))
        })?;
        let session = manager
            .open(&name.into(), AccessMode::NO_LOCK, timeout)
            .map_err(|e| {
                InstrumentError::Connection(format!("Could not open {}: {:?}", resource, e))
            })?;

        session.set_attr(timeout_attribute(timeout)?).map_err(|e| {
            InstrumentError::Connection(format!(
                "Could not set the I/O timeout of {}: {:?}",
                resource, e
            ))
        })?;

        info!("Opened VISA session {}", resource);
        Ok(VisaDevice {
            resource: resource.to_owned(),
            session: Some(session),
            _manager: manager,
            io_timeout: timeout,
        })
    }

    /// Make the next read block for at most `wait`
    fn set_io_timeout(&mut self, wait: Duration) -> InstrResult<()> {
        if wait == self.io_timeout {
            return Ok(());
        }
        let attr = timeout_attribute(wait)?;
        self.session()?
            .set_attr(attr)
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;
        self.io_timeout = wait;
        Ok(())
    }

    fn session(&mut self) -> InstrResult<&mut visa_rs::Instrument> {
        self.session.as_mut().ok_or_else(|| {
            InstrumentError::Connection(format!("VISA session {} is closed", self.resource))
        })
    }
}

impl DeviceInterface for VisaDevice {
    fn send(&mut self, bytes: &[u8]) -> InstrResult<()> {
        self.session()?
            .write_all(bytes)
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;
        trace!("Sent bytes {:?}", bytes);
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> InstrResult<usize> {
        self.set_io_timeout(wait)?;
        match self.session()?.read(buffer) {
            Ok(size) => {
                trace!("Received bytes {:?}", &buffer[..size]);
                Ok(size)
            }
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(InstrumentError::Communication(format!("{:?}", e))),
        }
    }

    fn flush_buffers(&mut self) -> InstrResult<()> {
        self.session()?
            .flush()
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))
    }

    fn close(&mut self) -> InstrResult<()> {
        if self.session.take().is_some() {
            info!("Closed VISA session {}", self.resource);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_whole_milliseconds() {
        assert!(timeout_attribute(Duration::from_millis(50)).is_ok());
        assert!(timeout_attribute(Duration::from_micros(10)).is_ok());
    }

    #[test]
    fn timed_out_reads_are_recognised() {
        assert!(is_timeout(&io::Error::from(ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(ErrorKind::BrokenPipe)));
    }
}
