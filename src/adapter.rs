use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_TERMINATION, DEFAULT_TIMEOUT_MS,
    POLL_INTERVAL_MS, READ_CHUNK_SIZE,
};
use crate::error::{InstrResult, InstrumentError};
use crate::interface::serialport::SerialPortDevice;
use crate::interface::tcp::TcpSocketDevice;
use crate::interface::{DeviceInterface, open_visa};
use crate::resource::Resource;
use crate::util::split_values;

/// Per-adapter connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub timeout: Duration,
    pub write_termination: String,
    pub read_termination: String,
    /// Only used by serial resources
    pub baud_rate: u32,
    /// Longest response accepted before a read termination shows up
    pub max_response_size: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        AdapterSettings {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            write_termination: DEFAULT_TERMINATION.to_owned(),
            read_termination: DEFAULT_TERMINATION.to_owned(),
            baud_rate: DEFAULT_BAUD_RATE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl AdapterSettings {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_write_termination(mut self, termination: &str) -> Self {
        self.write_termination = termination.to_owned();
        self
    }

    pub fn with_read_termination(mut self, termination: &str) -> Self {
        self.read_termination = termination.to_owned();
        self
    }

    pub fn with_terminations(self, termination: &str) -> Self {
        self.with_write_termination(termination)
            .with_read_termination(termination)
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }
}

/// Owns the connection to one instrument and moves command text over it.
///
/// Dropping the adapter releases the connection.
pub struct Adapter {
    resource: String,
    settings: AdapterSettings,
    device: Option<Box<dyn DeviceInterface>>,
    // Bytes received after the last read termination
    pending: Vec<u8>,
    // The last read gave up before its reply arrived
    reply_overdue: bool,
}

impl Adapter {
    /// Open the resource named by a VISA-style resource string
    pub fn open(resource: &str, settings: AdapterSettings) -> InstrResult<Self> {
        Self::open_resource(resource.parse()?, settings)
    }

    pub fn open_resource(resource: Resource, settings: AdapterSettings) -> InstrResult<Self> {
        let device: Box<dyn DeviceInterface> = match &resource {
            Resource::Serial { port } => Box::new(SerialPortDevice::open(
                port,
                settings.baud_rate,
                settings.timeout,
            )?),
            Resource::Socket { host, port } => {
                Box::new(TcpSocketDevice::open(host, *port, settings.timeout)?)
            }
            Resource::Visa(name) => open_visa(name, settings.timeout)?,
        };

        Ok(Self::from_device(resource.to_string(), device, settings))
    }

    /// Wrap an already opened device interface
    pub fn from_device(
        resource: impl Into<String>,
        device: Box<dyn DeviceInterface>,
        settings: AdapterSettings,
    ) -> Self {
        let resource = resource.into();
        info!("Adapter open on {}", resource);
        Adapter {
            resource,
            settings,
            device: Some(device),
            pending: Vec::new(),
            reply_overdue: false,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.settings.timeout = timeout;
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn device(&mut self) -> InstrResult<&mut Box<dyn DeviceInterface>> {
        let resource = &self.resource;
        self.device
            .as_mut()
            .ok_or_else(|| InstrumentError::Connection(format!("Adapter for {} is closed", resource)))
    }

    /// Send a command followed by the write termination
    pub fn write(&mut self, command: &str) -> InstrResult<()> {
        debug!("{} <- {:?}", self.resource, command);
        let mut bytes = Vec::with_capacity(command.len() + self.settings.write_termination.len());
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(self.settings.write_termination.as_bytes());
        self.device()?.send(&bytes)
    }

    /// Send bytes as they are, without a termination
    pub fn write_raw(&mut self, bytes: &[u8]) -> InstrResult<()> {
        debug!("{} <- {} raw bytes", self.resource, bytes.len());
        self.device()?.send(bytes)
    }

    /// Block until a full response (up to the read termination) arrives or the
    /// timeout elapses. The termination is not part of the returned text.
    pub fn read(&mut self) -> InstrResult<String> {
        let timeout = self.settings.timeout;
        let max_size = self.settings.max_response_size;
        let termination = self.settings.read_termination.clone().into_bytes();
        let deadline = Instant::now() + timeout;
        let mut response = std::mem::take(&mut self.pending);
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        let end = loop {
            if let Some(end) = find_termination(&response, &termination) {
                break end;
            }
            let now = Instant::now();
            if now >= deadline {
                self.pending = response;
                self.reply_overdue = true;
                return Err(InstrumentError::Timeout(timeout));
            }
            let wait = (deadline - now).min(Duration::from_millis(POLL_INTERVAL_MS));
            let size = self.device()?.receive(&mut chunk, wait)?;
            response.extend_from_slice(&chunk[..size]);

            if termination.is_empty() && size > 0 {
                break response.len();
            }
            if response.len() > max_size {
                return Err(InstrumentError::Communication(format!(
                    "Response exceeds {} bytes without a termination",
                    max_size
                )));
            }
        };

        self.pending = response.split_off((end + termination.len()).min(response.len()));
        self.reply_overdue = false;
        response.truncate(end);
        let text = String::from_utf8(response).map_err(|e| {
            InstrumentError::parse(&String::from_utf8_lossy(e.as_bytes()), "UTF-8 text")
        })?;
        debug!("{} -> {:?}", self.resource, text);
        Ok(text)
    }

    /// Write `command` then read its response. A failed read is not retried.
    ///
    /// After a read timed out, whatever the device sent since is discarded
    /// first, so a late reply is never taken for the answer to `command`.
    pub fn query(&mut self, command: &str) -> InstrResult<String> {
        if self.reply_overdue {
            debug!("{} dropping input left from a timed out read", self.resource);
            self.flush()?;
        }
        self.write(command)?;
        self.read()
    }

    /// Query and split the response into numbers
    pub fn values(&mut self, command: &str, separator: char) -> InstrResult<Vec<f64>> {
        let response = self.query(command)?;
        split_values(&response, separator)
    }

    /// Discard unread input, on the device and in the adapter
    pub fn flush(&mut self) -> InstrResult<()> {
        self.pending.clear();
        self.reply_overdue = false;
        self.device()?.flush_buffers()
    }

    /// Release the connection. Closing an already closed adapter does nothing.
    pub fn close(&mut self) -> InstrResult<()> {
        if let Some(mut device) = self.device.take() {
            self.pending.clear();
            device.close()?;
            info!("Adapter closed on {}", self.resource);
        }
        Ok(())
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.resource, e);
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("resource", &self.resource)
            .field("settings", &self.settings)
            .field("open", &self.is_open())
            .finish()
    }
}

fn find_termination(response: &[u8], termination: &[u8]) -> Option<usize> {
    if termination.is_empty() || response.len() < termination.len() {
        return None;
    }
    response
        .windows(termination.len())
        .position(|window| window == termination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;

    fn mock_adapter(mock: &MockTransport, settings: AdapterSettings) -> Adapter {
        Adapter::from_device("MOCK::INSTR", mock.boxed(), settings)
    }

    #[test]
    fn write_appends_termination_once() {
        let mock = MockTransport::new();
        let mut adapter = mock_adapter(&mock, AdapterSettings::default());
        adapter.write("*RST").unwrap();
        assert_eq!(mock.written(), vec!["*RST".to_owned()]);
    }

    #[test]
    fn read_strips_multi_byte_termination() {
        let mock = MockTransport::new().with_reply_termination("\r\n");
        mock.respond_to("*IDN?", "ACME,MODEL,1,2");
        let settings = AdapterSettings::default().with_terminations("\r\n");
        let mut adapter = mock_adapter(&mock, settings);

        assert_eq!(adapter.query("*IDN?").unwrap(), "ACME,MODEL,1,2");
    }

    #[test]
    fn bytes_after_termination_are_kept_for_next_read() {
        let mock = MockTransport::new();
        mock.respond_to("DOUBLE?", "1\n2");
        let mut adapter = mock_adapter(&mock, AdapterSettings::default());

        assert_eq!(adapter.query("DOUBLE?").unwrap(), "1");
        assert_eq!(adapter.read().unwrap(), "2");
    }

    #[test]
    fn values_parse_lists() {
        let mock = MockTransport::new();
        mock.respond_to("TRAC:DATA?", "1.0E-3,2.0E-3,3.0E-3");
        let mut adapter = mock_adapter(&mock, AdapterSettings::default());

        assert_eq!(
            adapter.values("TRAC:DATA?", ',').unwrap(),
            vec![0.001, 0.002, 0.003]
        );
    }

    #[test]
    fn oversized_response_is_refused_unless_allowed() {
        let long = "1.0,".repeat(32);
        let mock = MockTransport::new();
        mock.respond_to("WAV?", &long);
        let settings = AdapterSettings::default().with_max_response_size(64);
        let mut adapter = mock_adapter(&mock, settings);
        assert!(matches!(
            adapter.query("WAV?"),
            Err(InstrumentError::Communication(_))
        ));

        let settings = AdapterSettings::default().with_max_response_size(256);
        let mut adapter = mock_adapter(&mock, settings);
        assert_eq!(adapter.query("WAV?").unwrap(), long);
    }

    #[test]
    fn read_times_out_without_response() {
        let mock = MockTransport::new();
        let settings = AdapterSettings::default().with_timeout(Duration::from_millis(100));
        let mut adapter = mock_adapter(&mock, settings);

        let started = Instant::now();
        let result = adapter.query("NOTHING?");
        assert!(matches!(result, Err(InstrumentError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn closed_adapter_refuses_io() {
        let mock = MockTransport::new();
        let mut adapter = mock_adapter(&mock, AdapterSettings::default());
        adapter.close().unwrap();

        assert!(!adapter.is_open());
        assert!(matches!(
            adapter.write("*CLS"),
            Err(InstrumentError::Connection(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn drop_releases_the_device() {
        let mock = MockTransport::new();
        {
            let _adapter = mock_adapter(&mock, AdapterSettings::default());
        }
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn unknown_visa_resource_fails_at_open() {
        let result = Adapter::open("NOT-A-RESOURCE", AdapterSettings::default());
        assert!(matches!(result, Err(InstrumentError::Connection(_))));
    }
}
