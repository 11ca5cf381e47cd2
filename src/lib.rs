//! Typed command wrappers for laboratory instruments speaking SCPI-like text
//! protocols over serial ports, raw TCP sockets or VISA.
//!
//! An [`Adapter`] owns one connection and moves command text; an
//! [`Instrument`] sits on top of it with a table of property descriptors and
//! turns named, validated values into commands and responses back into
//! values. The drivers in [`models`] build on both.
//!
//! ```no_run
//! use instru::{AdapterSettings, InstrResult};
//! use instru::models::Keithley2450;
//!
//! fn main() -> InstrResult<()> {
//!     let mut smu = Keithley2450::connect("TCPIP0::192.168.1.50::SOCKET", AdapterSettings::default())?;
//!     smu.set_source_function("voltage")?;
//!     smu.set_source_amplitude(1.5, None)?;
//!     smu.enable_source()?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub(crate) mod constants;
pub mod error;
pub mod instrument;
pub mod interface;
pub mod metadata;
pub mod models;
pub mod property;
pub mod resource;
pub mod scpi;
pub(crate) mod util;

pub use adapter::{Adapter, AdapterSettings};
pub use error::{InstrResult, InstrumentError};
pub use instrument::Instrument;
pub use interface::DeviceInterface;
pub use interface::mock::MockTransport;
pub use models::{InstrumentDriver, Model};
pub use property::{Choice, CommandArgs, Descriptor, PropertyTable, Value};
pub use resource::Resource;
pub use scpi::ScpiError;
