use std::io::{Read, Write};
use std::time::Duration;

use tracing::{info, trace};

use super::DeviceInterface;
use crate::error::{InstrResult, InstrumentError};

pub type BaudRate = u32;

/// Serial port / USB-CDC device interface
pub struct SerialPortDevice {
    port_name: String,
    serial_port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPortDevice {
    pub fn open(port: &str, baud: BaudRate, timeout: Duration) -> InstrResult<SerialPortDevice> {
        let serial_port = serialport::new(port, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                InstrumentError::Connection(format!("Could not open serial port {}: {}", port, e))
            })?;

        info!("Opened serial port {} at {} baud", port, baud);
        Ok(SerialPortDevice {
            port_name: port.to_owned(),
            serial_port: Some(serial_port),
        })
    }

    fn port(&mut self) -> InstrResult<&mut Box<dyn serialport::SerialPort>> {
        self.serial_port.as_mut().ok_or_else(|| {
            InstrumentError::Connection(format!("Serial port {} is closed", self.port_name))
        })
    }
}

impl DeviceInterface for SerialPortDevice {
    fn send(&mut self, bytes: &[u8]) -> InstrResult<()> {
        let port = self.port()?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;
        trace!("Sent bytes {:?}", bytes);
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> InstrResult<usize> {
        let port = self.port()?;
        port.set_timeout(wait)
            .map_err(|e| InstrumentError::Communication(format!("Failed to set timeout: {:?}", e)))?;

        let size = port
            .read(buffer)
            // Timeout error is fine, the adapter keeps track of the deadline
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    Ok(0)
                } else {
                    Err(e)
                }
            })
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;

        trace!("Received bytes {:?}", &buffer[..size]);
        Ok(size)
    }

    fn flush_buffers(&mut self) -> InstrResult<()> {
        self.port()?
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| {
                InstrumentError::Communication(format!(
                    "Failed to flush send/receive buffers, {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn close(&mut self) -> InstrResult<()> {
        if self.serial_port.take().is_some() {
            info!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }
}
