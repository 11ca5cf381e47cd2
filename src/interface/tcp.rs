use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{info, trace};

use super::DeviceInterface;
use crate::error::{InstrResult, InstrumentError};

/// Raw SCPI socket (LXI instruments usually listen on port 5025)
pub struct TcpSocketDevice {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpSocketDevice {
    pub fn open(host: &str, port: u16, timeout: Duration) -> InstrResult<TcpSocketDevice> {
        let address = format!("{}:{}", host, port);
        let candidates = (host, port).to_socket_addrs().map_err(|e| {
            InstrumentError::Connection(format!("Could not resolve {}: {}", address, e))
        })?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream
                        .set_write_timeout(Some(timeout))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| InstrumentError::Connection(format!("{:?}", e)))?;
                    info!("Connected to {}", address);
                    return Ok(TcpSocketDevice {
                        address,
                        stream: Some(stream),
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(InstrumentError::Connection(match last_error {
            Some(e) => format!("Could not connect to {}: {}", address, e),
            None => format!("{} did not resolve to any address", address),
        }))
    }

    fn stream(&mut self) -> InstrResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| InstrumentError::Connection(format!("Socket {} is closed", self.address)))
    }
}

impl DeviceInterface for TcpSocketDevice {
    fn send(&mut self, bytes: &[u8]) -> InstrResult<()> {
        self.stream()?
            .write_all(bytes)
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;
        trace!("Sent bytes {:?}", bytes);
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> InstrResult<usize> {
        let address = self.address.clone();
        let stream = self.stream()?;
        // A zero read timeout means "block forever" for std sockets
        stream
            .set_read_timeout(Some(wait.max(Duration::from_millis(1))))
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;

        match stream.read(buffer) {
            Ok(0) => Err(InstrumentError::Communication(format!(
                "{} closed the connection",
                address
            ))),
            Ok(size) => {
                trace!("Received bytes {:?}", &buffer[..size]);
                Ok(size)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) => Err(InstrumentError::Communication(format!("{:?}", e))),
        }
    }

    fn flush_buffers(&mut self) -> InstrResult<()> {
        let stream = self.stream()?;
        stream
            .set_nonblocking(true)
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;

        let mut scratch = [0u8; 256];
        let drained = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(InstrumentError::Communication(format!("{:?}", e))),
            }
        };

        stream
            .set_nonblocking(false)
            .map_err(|e| InstrumentError::Communication(format!("{:?}", e)))?;
        drained
    }

    fn close(&mut self) -> InstrResult<()> {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone; the handle is released either way
            let _ = stream.shutdown(Shutdown::Both);
            info!("Closed connection to {}", self.address);
        }
        Ok(())
    }
}
