//! Drivers for the supported instrument models.
//!
//! Each driver owns an [`Instrument`] built from a layered descriptor table
//! and adds the typed operations of its model on top.

pub mod agilent81110;
pub mod atpg1074;
pub mod awg70000;
pub mod drve10mo;
pub mod dsox6000;
pub mod keithley;
pub mod keithley2450;
pub mod keithley7510;
pub mod keysight33500b;
pub mod pulse;
pub mod rfswitch;

use clap::ValueEnum;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::InstrResult;
use crate::instrument::Instrument;
use crate::property::PropertyTable;

pub use agilent81110::Agilent81110;
pub use atpg1074::Atpg1074;
pub use awg70000::Awg70000;
pub use drve10mo::DrVe10Mo;
pub use dsox6000::Dsox6000;
pub use keithley2450::Keithley2450;
pub use keithley7510::Keithley7510;
pub use keysight33500b::Keysight33500b;
pub use pulse::PulseGenerator;
pub use rfswitch::RfSwitchBox;

/// Common surface of every model driver
pub trait InstrumentDriver: Send {
    fn instrument(&mut self) -> &mut Instrument;

    /// Bring the instrument to a safe state, outputs off
    fn shutdown(&mut self) -> InstrResult<()>;
}

/// Supported instrument models
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Model {
    /// Keithley 2450 SourceMeter
    Keithley2450,

    /// Keithley DMM7510 multimeter
    Keithley7510,

    /// Keysight 33500B waveform generator
    Keysight33500b,

    /// Tektronix AWG70000 arbitrary waveform generator
    Awg70000,

    /// Keysight DSOX6000 oscilloscope
    Dsox6000,

    /// Agilent 81110 pulse generator
    Agilent81110,

    /// Active Technologies ATPG-1074 pulse generator
    Atpg1074,

    /// iXblue DR-VE-10-MO RF amplifier driver
    DrVe10Mo,

    /// Mini-Circuits RF switch box
    RfSwitchBox,
}

impl Model {
    pub fn display_name(self) -> &'static str {
        match self {
            Model::Keithley2450 => keithley2450::NAME,
            Model::Keithley7510 => keithley7510::NAME,
            Model::Keysight33500b => keysight33500b::NAME,
            Model::Awg70000 => awg70000::NAME,
            Model::Dsox6000 => dsox6000::NAME,
            Model::Agilent81110 => agilent81110::NAME,
            Model::Atpg1074 => atpg1074::NAME,
            Model::DrVe10Mo => drve10mo::NAME,
            Model::RfSwitchBox => rfswitch::NAME,
        }
    }

    /// The flat descriptor table an instrument of this model is built with
    pub fn properties(self) -> PropertyTable {
        match self {
            Model::Keithley2450 => Keithley2450::properties(),
            Model::Keithley7510 => Keithley7510::properties(),
            Model::Keysight33500b => Keysight33500b::properties(),
            Model::Awg70000 => Awg70000::properties(),
            Model::Dsox6000 => Dsox6000::properties(),
            Model::Agilent81110 => Agilent81110::properties(),
            Model::Atpg1074 => Atpg1074::properties(),
            Model::DrVe10Mo => DrVe10Mo::properties(),
            Model::RfSwitchBox => RfSwitchBox::properties(),
        }
    }

    /// Adapter settings the model works with out of the box
    pub fn default_settings(self) -> AdapterSettings {
        match self {
            Model::DrVe10Mo => DrVe10Mo::default_settings(),
            Model::RfSwitchBox => RfSwitchBox::default_settings(),
            Model::Dsox6000 => Dsox6000::default_settings(),
            _ => AdapterSettings::default(),
        }
    }

    /// Wrap an open adapter in the driver for this model
    pub fn driver(self, adapter: Adapter) -> Box<dyn InstrumentDriver> {
        match self {
            Model::Keithley2450 => Box::new(Keithley2450::new(adapter)),
            Model::Keithley7510 => Box::new(Keithley7510::new(adapter)),
            Model::Keysight33500b => Box::new(Keysight33500b::new(adapter)),
            Model::Awg70000 => Box::new(Awg70000::new(adapter)),
            Model::Dsox6000 => Box::new(Dsox6000::new(adapter)),
            Model::Agilent81110 => Box::new(Agilent81110::new(adapter)),
            Model::Atpg1074 => Box::new(Atpg1074::new(adapter)),
            Model::DrVe10Mo => Box::new(DrVe10Mo::new(adapter)),
            Model::RfSwitchBox => Box::new(RfSwitchBox::new(adapter)),
        }
    }

    /// Open `resource` with `settings` and build the driver for this model
    pub fn connect(
        self,
        resource: &str,
        settings: AdapterSettings,
    ) -> InstrResult<Box<dyn InstrumentDriver>> {
        let adapter = Adapter::open(resource, settings)?;
        Ok(self.driver(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_model_has_a_populated_table() {
        for model in Model::value_variants() {
            let table = model.properties();
            assert!(!table.is_empty(), "{:?} has no properties", model);
            assert!(!model.display_name().is_empty());
        }
    }

    #[test]
    fn amplifier_defaults_to_fast_serial() {
        let settings = Model::DrVe10Mo.default_settings();
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.write_termination, "\r");
        assert_eq!(Model::Keithley2450.default_settings(), AdapterSettings::default());
    }

    #[test]
    fn scope_accepts_full_memory_waveforms() {
        let settings = Model::Dsox6000.default_settings();
        assert_eq!(settings.max_response_size, dsox6000::WAVEFORM_RESPONSE_SIZE);
        assert!(settings.max_response_size > AdapterSettings::default().max_response_size);
    }
}
