pub mod mock;
pub mod serialport;
pub mod tcp;
#[cfg(feature = "visa")]
pub mod visa;

use std::time::Duration;

use crate::error::InstrResult;

/// Byte-level channel to one instrument.
///
/// Implementations own their handle exclusively. The adapter layer handles
/// terminations, deadlines and response framing on top of this.
pub trait DeviceInterface: Send {
    /// Send bytes to the target device
    fn send(&mut self, bytes: &[u8]) -> InstrResult<()>;

    /// Receive whatever the device produced, waiting at most `wait`.
    /// Returns `Ok(0)` when nothing arrived in time.
    fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> InstrResult<usize>;

    /// Discard anything pending in the send/receive buffers
    fn flush_buffers(&mut self) -> InstrResult<()>;

    /// Release the handle
    fn close(&mut self) -> InstrResult<()>;
}

#[cfg(feature = "visa")]
pub(crate) fn open_visa(resource: &str, timeout: Duration) -> InstrResult<Box<dyn DeviceInterface>> {
    Ok(Box::new(visa::VisaDevice::open(resource, timeout)?))
}

#[cfg(not(feature = "visa"))]
pub(crate) fn open_visa(resource: &str, _timeout: Duration) -> InstrResult<Box<dyn DeviceInterface>> {
    Err(crate::error::InstrumentError::Connection(format!(
        "{} needs a VISA library; rebuild with the `visa` feature",
        resource
    )))
}
