use std::thread;
use std::time::Duration;

use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::codec::{format_one_zero, scpi_number};
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable};
use crate::scpi::COMMON;

use super::InstrumentDriver;
use super::keithley::{FAMILY, KeithleyBuffered};

pub const NAME: &str = "Keithley 2450 SourceMeter";

pub static FUNCTIONS: [Choice; 3] = [
    Choice::new("current", "CURR").also(&["CURR:DC", "CURRENT DC"]),
    Choice::new("voltage", "VOLT").also(&["VOLT:DC", "VOLTAGE DC"]),
    Choice::new("resistance", "RES").also(&["RESISTANCE"]),
];

pub static TERMINALS: [Choice; 2] = [
    Choice::new("front", "FRON").also(&["FRONT"]),
    Choice::new("rear", "REAR"),
];

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::choice("source_function", &FUNCTIONS)
        .query(":SOUR:FUNC?")
        .command(":SOUR:FUNC {value}"),
    Descriptor::choice("sense_function", &FUNCTIONS)
        .query(":SENS:FUNC?")
        .command(":SENS:FUNC \"{value}\""),
    Descriptor::float("source_level")
        .query(":SOUR:{function}?")
        .command(":SOUR:{function} {value}"),
    Descriptor::float("source_range")
        .query(":SOUR:{function}:RANG?")
        .command(":SOUR:{function}:RANG {value}"),
    Descriptor::boolean("source_auto_range")
        .query(":SOUR:{function}:RANG:AUTO?")
        .command(":SOUR:{function}:RANG:AUTO {value}")
        .formatted(format_one_zero),
    Descriptor::boolean("source_high_capacitance")
        .query(":SOUR:{function}:HIGH:CAP?")
        .command(":SOUR:{function}:HIGH:CAP {value}"),
    Descriptor::float("current_limit")
        .unit("A")
        .query(":SOUR:VOLT:ILIM?")
        .command(":SOUR:VOLT:ILIM {value}")
        .range(-1.05, 1.05),
    Descriptor::float("voltage_limit")
        .unit("V")
        .query(":SOUR:CURR:VLIM?")
        .command(":SOUR:CURR:VLIM {value}")
        .range(-210.0, 210.0),
    Descriptor::float("sense_range")
        .query(":SENS:{function}:RANG?")
        .command(":SENS:{function}:RANG:AUTO 0;:SENS:{function}:RANG {value}"),
    Descriptor::boolean("sense_auto_range")
        .query(":SENS:{function}:RANG:AUTO?")
        .command(":SENS:{function}:RANG:AUTO {value}")
        .formatted(format_one_zero),
    Descriptor::float("nplc")
        .query(":SENS:{function}:NPLC?")
        .command(":SENS:{function}:NPLC {value}")
        .range(0.01, 10.0),
    Descriptor::boolean("output")
        .query(":OUTP?")
        .command(":OUTP {value}"),
    Descriptor::choice("terminals", &TERMINALS)
        .query(":ROUT:TERM?")
        .command(":ROUT:TERM {value}"),
];

/// Source-measure unit. Function dependent properties take the function
/// from the caller or, when none is given, from the instrument.
pub struct Keithley2450 {
    instrument: Instrument,
}

impl Keithley2450 {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, FAMILY, PROPERTIES])
    }

    pub fn new(adapter: Adapter) -> Self {
        Keithley2450 {
            instrument: Instrument::new(NAME, adapter, Self::properties()),
        }
    }

    pub fn connect(resource: &str, settings: AdapterSettings) -> InstrResult<Self> {
        Ok(Self::new(Adapter::open(resource, settings)?))
    }

    fn function_token(name: &str) -> InstrResult<&'static str> {
        FUNCTIONS
            .iter()
            .find(|c| c.matches(name))
            .map(|c| c.token)
            .ok_or_else(|| InstrumentError::Validation(format!("Unknown function {:?}", name)))
    }

    fn source_args(&mut self, function: Option<&str>) -> InstrResult<CommandArgs> {
        let name = match function {
            Some(name) => name.to_owned(),
            None => self.source_function()?,
        };
        Ok(CommandArgs::new().with("function", Self::function_token(&name)?))
    }

    fn sense_args(&mut self, function: Option<&str>) -> InstrResult<CommandArgs> {
        let name = match function {
            Some(name) => name.to_owned(),
            None => self.sense_function()?,
        };
        Ok(CommandArgs::new().with("function", Self::function_token(&name)?))
    }

    /// `current`, `voltage` or `resistance`
    pub fn source_function(&mut self) -> InstrResult<String> {
        self.instrument
            .get_text("source_function", &CommandArgs::new())
    }

    pub fn set_source_function(&mut self, function: &str) -> InstrResult<()> {
        self.instrument.set("source_function", function)
    }

    pub fn sense_function(&mut self) -> InstrResult<String> {
        self.instrument
            .get_text("sense_function", &CommandArgs::new())
    }

    pub fn set_sense_function(&mut self, function: &str) -> InstrResult<()> {
        self.instrument.set("sense_function", function)
    }

    /// Source level of the configured source function
    pub fn source_amplitude(&mut self) -> InstrResult<f64> {
        let args = self.source_args(None)?;
        self.instrument.get_f64("source_level", &args)
    }

    pub fn set_source_amplitude(&mut self, level: f64, function: Option<&str>) -> InstrResult<()> {
        let args = self.source_args(function)?;
        self.instrument.set_with("source_level", level, &args)
    }

    pub fn source_range(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let args = self.source_args(function)?;
        self.instrument.get_f64("source_range", &args)
    }

    pub fn set_source_range(&mut self, range: f64, function: Option<&str>) -> InstrResult<()> {
        let args = self.source_args(function)?;
        self.instrument.set_with("source_range", range, &args)
    }

    pub fn set_source_auto_range(&mut self, auto: bool, function: Option<&str>) -> InstrResult<()> {
        let args = self.source_args(function)?;
        self.instrument.set_with("source_auto_range", auto, &args)
    }

    pub fn set_source_high_capacitance(
        &mut self,
        enabled: bool,
        function: Option<&str>,
    ) -> InstrResult<()> {
        let args = self.source_args(function)?;
        self.instrument
            .set_with("source_high_capacitance", enabled, &args)
    }

    /// Compliance limit: a current limit while sourcing voltage, a voltage
    /// limit otherwise.
    pub fn source_compliance(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let property = self.compliance_property(function)?;
        self.instrument.get_f64(property, &CommandArgs::new())
    }

    pub fn set_source_compliance(&mut self, limit: f64, function: Option<&str>) -> InstrResult<()> {
        let property = self.compliance_property(function)?;
        self.instrument.set(property, limit)
    }

    fn compliance_property(&mut self, function: Option<&str>) -> InstrResult<&'static str> {
        let args = self.source_args(function)?;
        Ok(match args.get("function") {
            Some("VOLT") => "current_limit",
            _ => "voltage_limit",
        })
    }

    pub fn sense_range(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let args = self.sense_args(function)?;
        self.instrument.get_f64("sense_range", &args)
    }

    /// Fixed sense range; disables auto-ranging first
    pub fn set_sense_range(&mut self, range: f64, function: Option<&str>) -> InstrResult<()> {
        let args = self.sense_args(function)?;
        self.instrument.set_with("sense_range", range, &args)
    }

    pub fn set_sense_auto_range(&mut self, auto: bool, function: Option<&str>) -> InstrResult<()> {
        let args = self.sense_args(function)?;
        self.instrument.set_with("sense_auto_range", auto, &args)
    }

    /// Integration time in power line cycles
    pub fn nplc(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let args = self.sense_args(function)?;
        self.instrument.get_f64("nplc", &args)
    }

    pub fn set_nplc(&mut self, nplc: f64, function: Option<&str>) -> InstrResult<()> {
        let args = self.sense_args(function)?;
        self.instrument.set_with("nplc", nplc, &args)
    }

    pub fn enable_source(&mut self) -> InstrResult<()> {
        self.instrument.set("output", true)?;
        // Let the output settle
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    pub fn disable_source(&mut self) -> InstrResult<()> {
        self.instrument.set("output", false)
    }

    pub fn source_enabled(&mut self) -> InstrResult<bool> {
        self.instrument.get_bool("output", &CommandArgs::new())
    }

    pub fn use_front_terminals(&mut self) -> InstrResult<()> {
        self.instrument.set("terminals", "front")
    }

    pub fn use_rear_terminals(&mut self) -> InstrResult<()> {
        self.instrument.set("terminals", "rear")
    }

    /// Sound a beep: 65 Hz to 2 MHz, up to 7.9 s
    pub fn beep(&mut self, frequency: f64, duration: f64) -> InstrResult<()> {
        if !(65.0..=2e6).contains(&frequency) {
            return Err(InstrumentError::Validation(format!(
                "Beep frequency {} Hz is outside [65, 2000000]",
                frequency
            )));
        }
        if !(0.0..=7.9).contains(&duration) {
            return Err(InstrumentError::Validation(format!(
                "Beep duration {} s is outside [0, 7.9]",
                duration
            )));
        }
        self.instrument.write(&format!(
            ":SYST:BEEP {}, {}",
            scpi_number(frequency),
            scpi_number(duration)
        ))
    }

    /// Major triad of beeps on `base_frequency`, each lasting `duration` seconds
    pub fn triad(&mut self, base_frequency: f64, duration: f64) -> InstrResult<()> {
        if !(65.0..=2e6 / 1.5).contains(&base_frequency) {
            return Err(InstrumentError::Validation(format!(
                "Triad base frequency {} Hz puts a note outside [65, 2000000]",
                base_frequency
            )));
        }
        let pause = Duration::try_from_secs_f64(duration).map_err(|_| {
            InstrumentError::Validation(format!("Beep duration {} s is not a duration", duration))
        })?;
        for ratio in [1.0, 1.25, 1.5] {
            if ratio > 1.0 {
                thread::sleep(pause);
            }
            self.beep(base_frequency * ratio, duration)?;
        }
        Ok(())
    }

    /// Reset, preset the status model and clear the status registers
    pub fn reset(&mut self) -> InstrResult<()> {
        self.instrument.write("*RST;:STAT:PRES;*CLS")
    }

    /// Clear the error queue and the front panel messages
    pub fn errors_clear(&mut self) -> InstrResult<()> {
        self.instrument.write(":SYST:CLE")?;
        self.instrument.write(":DISP:CLE")?;
        self.instrument.write(":DISP:SCR HOME")
    }
}

impl InstrumentDriver for Keithley2450 {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    fn shutdown(&mut self) -> InstrResult<()> {
        info!("Disabling the source of {}", NAME);
        self.disable_source()?;
        self.instrument.mark_shut_down();
        Ok(())
    }
}

impl KeithleyBuffered for Keithley2450 {}
