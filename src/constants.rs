pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub(crate) const DEFAULT_BAUD_RATE: u32 = 9600;
pub(crate) const DEFAULT_TERMINATION: &str = "\n";
pub(crate) const SCPI_SOCKET_PORT: u16 = 5025;

/// Upper bound on a single blocking transport read while waiting for a response
pub(crate) const POLL_INTERVAL_MS: u64 = 50;
/// Default limit on one response; adapters can raise it
pub(crate) const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;
pub(crate) const READ_CHUNK_SIZE: usize = 1024;

pub(crate) const OPC_POLL_INTERVAL_MS: u64 = 100;
pub(crate) const ERROR_QUEUE_LIMIT: usize = 64;
