use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::codec::format_one_zero;
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable};
use crate::scpi::COMMON;

use super::InstrumentDriver;
use super::keithley::{FAMILY, KeithleyBuffered, TriggerEvent, buffer_args, choice_token};

pub const NAME: &str = "Keithley 7510 Multimeter";

pub static FUNCTIONS: [Choice; 12] = [
    Choice::new("voltage dc", "VOLT:DC").also(&["VOLTAGE", "VOLT"]),
    Choice::new("voltage ac", "VOLT:AC"),
    Choice::new("current dc", "CURR:DC").also(&["CURRENT", "CURR"]),
    Choice::new("current ac", "CURR:AC"),
    Choice::new("resistance", "RES"),
    Choice::new("resistance 4w", "FRES"),
    Choice::new("diode", "DIOD"),
    Choice::new("capacitance", "CAP"),
    Choice::new("temperature", "TEMP"),
    Choice::new("frequency", "FREQ").also(&["FREQ:VOLT"]),
    Choice::new("period", "PER").also(&["PER:VOLT"]),
    Choice::new("continuity", "CONT"),
];

/// Functions the 1 MS/s digitizer can sample
pub static DIGITIZE_FUNCTIONS: [Choice; 3] = [
    Choice::new("voltage", "VOLT").also(&["VOLTAGE"]),
    Choice::new("current", "CURR").also(&["CURRENT"]),
    Choice::new("none", "NONE"),
];

/// AC detector bandwidths in Hz
pub static DETECTOR_BANDWIDTHS: [Choice; 3] = [
    Choice::new("3", "3"),
    Choice::new("30", "30"),
    Choice::new("300", "300"),
];

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::choice("function", &FUNCTIONS)
        .query(":SENS:FUNC?")
        .command(":SENS:FUNC \"{value}\""),
    Descriptor::float("range")
        .query(":SENS:{function}:RANG?")
        .command(":SENS:{function}:RANG {value}"),
    Descriptor::boolean("auto_range")
        .query(":SENS:{function}:RANG:AUTO?")
        .command(":SENS:{function}:RANG:AUTO {value}")
        .formatted(format_one_zero),
    Descriptor::float("nplc")
        .query(":SENS:{function}:NPLC?")
        .command(":SENS:{function}:NPLC {value}")
        .range(0.0005, 12.0),
    Descriptor::float("aperture")
        .unit("s")
        .query(":SENS:{function}:APER?")
        .command(":SENS:{function}:APER {value}"),
    Descriptor::boolean("line_sync")
        .query(":SENS:{function}:LINE:SYNC?")
        .command(":SENS:{function}:LINE:SYNC {value}"),
    Descriptor::choice("detector_bandwidth", &DETECTOR_BANDWIDTHS)
        .unit("Hz")
        .query(":SENS:{function}:DET:BAND?")
        .command(":SENS:{function}:DET:BAND {value}"),
    Descriptor::choice("digitize_function", &DIGITIZE_FUNCTIONS)
        .query(":SENS:DIG:FUNC?")
        .command(":SENS:DIG:FUNC \"{value}\""),
    Descriptor::int("digitize_count")
        .query(":SENS:DIG:COUN?")
        .command(":SENS:DIG:COUN {value}")
        .range(1.0, 55_000_000.0),
    Descriptor::float("sample_rate")
        .unit("Hz")
        .query(":SENS:DIG:{function}:SRAT?")
        .command(":SENS:DIG:{function}:SRAT {value}")
        .range(1000.0, 1_000_000.0),
    Descriptor::text("digitize_stimulus")
        .query(":TRIG:DIG:STIM?")
        .command(":TRIG:DIG:STIM {value}"),
    Descriptor::float("digitized_measurement").query(":READ:DIG? \"{buffer}\""),
];

pub struct Keithley7510 {
    instrument: Instrument,
}

impl Keithley7510 {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, FAMILY, PROPERTIES])
    }

    pub fn new(adapter: Adapter) -> Self {
        Keithley7510 {
            instrument: Instrument::new(NAME, adapter, Self::properties()),
        }
    }

    pub fn connect(resource: &str, settings: AdapterSettings) -> InstrResult<Self> {
        Ok(Self::new(Adapter::open(resource, settings)?))
    }

    /// Placeholder arguments for `function`, or for the configured function
    fn function_args(&mut self, function: Option<&str>) -> InstrResult<CommandArgs> {
        let name = match function {
            Some(name) => name.to_owned(),
            None => self.function()?,
        };
        let token = choice_token(&FUNCTIONS, &name, "function")?;
        Ok(CommandArgs::new().with("function", token))
    }

    pub fn function(&mut self) -> InstrResult<String> {
        self.instrument.get_text("function", &CommandArgs::new())
    }

    pub fn set_function(&mut self, function: &str) -> InstrResult<()> {
        self.instrument.set("function", function)
    }

    pub fn range(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let args = self.function_args(function)?;
        self.instrument.get_f64("range", &args)
    }

    pub fn set_range(&mut self, range: f64, function: Option<&str>) -> InstrResult<()> {
        let args = self.function_args(function)?;
        self.instrument.set_with("range", range, &args)
    }

    pub fn set_auto_range(&mut self, function: Option<&str>) -> InstrResult<()> {
        let args = self.function_args(function)?;
        self.instrument.set_with("auto_range", true, &args)
    }

    pub fn nplc(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let args = self.function_args(function)?;
        self.instrument.get_f64("nplc", &args)
    }

    pub fn set_nplc(&mut self, nplc: f64, function: Option<&str>) -> InstrResult<()> {
        let args = self.function_args(function)?;
        self.instrument.set_with("nplc", nplc, &args)
    }

    pub fn aperture(&mut self, function: Option<&str>) -> InstrResult<f64> {
        let args = self.function_args(function)?;
        self.instrument.get_f64("aperture", &args)
    }

    pub fn set_aperture(&mut self, aperture: f64, function: Option<&str>) -> InstrResult<()> {
        if aperture <= 0.0 {
            return Err(InstrumentError::Validation(format!(
                "Aperture {} s must be positive",
                aperture
            )));
        }
        let args = self.function_args(function)?;
        self.instrument.set_with("aperture", aperture, &args)
    }

    /// Detector bandwidth of an AC function: 3, 30 or 300 Hz
    pub fn set_detector_bandwidth(&mut self, bandwidth: u32, function: Option<&str>) -> InstrResult<()> {
        let args = self.function_args(function)?;
        let function = args.get("function").unwrap_or_default();
        if !function.ends_with(":AC") {
            return Err(InstrumentError::Validation(format!(
                "Detector bandwidth applies to AC functions, not {}",
                function
            )));
        }
        self.instrument
            .set_with("detector_bandwidth", bandwidth.to_string(), &args)
    }

    pub fn digitize_function(&mut self) -> InstrResult<String> {
        self.instrument
            .get_text("digitize_function", &CommandArgs::new())
    }

    /// `voltage`, `current` or `none`
    pub fn set_digitize_function(&mut self, function: &str) -> InstrResult<()> {
        self.instrument.set("digitize_function", function)
    }

    /// Samples taken per digitize trigger, 1 to 55 million
    pub fn set_digitize_count(&mut self, count: u32) -> InstrResult<()> {
        self.instrument.set("digitize_count", count)
    }

    /// Digitizer sample rate of `function`, or of the configured digitize function
    pub fn set_sample_rate(&mut self, rate: f64, function: Option<&str>) -> InstrResult<()> {
        let name = match function {
            Some(name) => name.to_owned(),
            None => self.digitize_function()?,
        };
        let token = choice_token(&DIGITIZE_FUNCTIONS, &name, "digitize function")?;
        if token == "NONE" {
            return Err(InstrumentError::Validation(
                "No digitize function is selected".into(),
            ));
        }
        let args = CommandArgs::new().with("function", token);
        self.instrument.set_with("sample_rate", rate, &args)
    }

    /// Event that starts a digitize capture
    pub fn set_digitize_trigger(&mut self, event: TriggerEvent) -> InstrResult<()> {
        let event = event.token()?;
        self.instrument.set("digitize_stimulus", event.as_str())
    }

    /// Make one digitized reading into `buffer` and return it
    pub fn digitize_read_measurement(&mut self, buffer: &str) -> InstrResult<f64> {
        self.instrument
            .get_f64("digitized_measurement", &buffer_args(buffer))
    }

    pub fn set_line_sync(&mut self, enabled: bool, function: Option<&str>) -> InstrResult<()> {
        let args = self.function_args(function)?;
        self.instrument.set_with("line_sync", enabled, &args)
    }

    pub fn reset(&mut self) -> InstrResult<()> {
        self.instrument.write("*RST")?;
        self.instrument.write("*CLS")
    }

    pub fn errors_clear(&mut self) -> InstrResult<()> {
        self.instrument.write(":SYST:CLE")?;
        self.instrument.write(":DISP:CLE")?;
        self.instrument.write(":DISP:SCR HOME")
    }
}

impl InstrumentDriver for Keithley7510 {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    /// A multimeter has no output to turn off; stop any running trigger model
    fn shutdown(&mut self) -> InstrResult<()> {
        info!("Aborting the trigger model of {}", NAME);
        self.trigger_model_abort()?;
        self.instrument.mark_shut_down();
        Ok(())
    }
}

impl KeithleyBuffered for Keithley7510 {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;

    fn dmm(mock: &MockTransport) -> Keithley7510 {
        Keithley7510::new(Adapter::from_device(
            "TCPIP0::10.0.0.7::5025::SOCKET",
            mock.boxed(),
            AdapterSettings::default(),
        ))
    }

    #[test]
    fn configured_function_drives_the_header() {
        let mock = MockTransport::new();
        mock.respond_to(":SENS:FUNC?", "VOLT:AC");
        mock.respond_to(":SENS:VOLT:AC:RANG?", "1.000000E+01");
        let mut dmm = dmm(&mock);

        assert_eq!(dmm.range(None).unwrap(), 10.0);
    }

    #[test]
    fn set_function_sends_quoted_token() {
        let mock = MockTransport::new();
        let mut dmm = dmm(&mock);

        dmm.set_function("resistance 4w").unwrap();
        assert_eq!(mock.written(), vec![":SENS:FUNC \"FRES\"".to_owned()]);
    }

    #[test]
    fn trace_data_parses_readings() {
        let mock = MockTransport::new();
        mock.respond_to(
            "TRAC:DATA? 1, 3, \"defbuffer1\", READ",
            "1.0E-3,1.1E-3,0.9E-3",
        );
        let mut dmm = dmm(&mock);

        let readings = dmm.trace_data(1, 3, "defbuffer1").unwrap();
        assert_eq!(readings, vec![1.0e-3, 1.1e-3, 0.9e-3]);
    }

    #[test]
    fn unknown_function_is_rejected_locally() {
        let mock = MockTransport::new();
        let mut dmm = dmm(&mock);

        assert!(matches!(
            dmm.set_nplc(1.0, Some("impedance")),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn digitizer_setup_and_reading() {
        let mock = MockTransport::new();
        mock.respond_to(":SENS:DIG:FUNC?", "CURR");
        mock.respond_to(":READ:DIG? \"defbuffer1\"", "2.5E-04");
        let mut dmm = dmm(&mock);

        dmm.set_digitize_function("current").unwrap();
        dmm.set_digitize_count(1000).unwrap();
        dmm.set_sample_rate(500_000.0, None).unwrap();
        dmm.set_digitize_trigger(TriggerEvent::External).unwrap();
        assert_eq!(dmm.digitize_read_measurement("defbuffer1").unwrap(), 2.5e-4);

        assert_eq!(
            mock.written(),
            vec![
                ":SENS:DIG:FUNC \"CURR\"",
                ":SENS:DIG:COUN 1000",
                ":SENS:DIG:FUNC?",
                ":SENS:DIG:CURR:SRAT 500000",
                ":TRIG:DIG:STIM EXT",
                ":READ:DIG? \"defbuffer1\"",
            ]
        );
    }

    #[test]
    fn digitizer_limits_are_enforced() {
        let mock = MockTransport::new();
        let mut dmm = dmm(&mock);

        assert!(matches!(
            dmm.set_sample_rate(2e6, Some("voltage")),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            dmm.set_sample_rate(1e4, Some("none")),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            dmm.set_digitize_count(0),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn detector_bandwidth_is_for_ac_functions() {
        let mock = MockTransport::new();
        let mut dmm = dmm(&mock);

        dmm.set_detector_bandwidth(30, Some("voltage ac")).unwrap();
        assert!(matches!(
            dmm.set_detector_bandwidth(30, Some("resistance")),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            dmm.set_detector_bandwidth(100, Some("current ac")),
            Err(InstrumentError::Validation(_))
        ));
        dmm.set_aperture(0.02, Some("voltage dc")).unwrap();

        assert_eq!(
            mock.written(),
            vec![":SENS:VOLT:AC:DET:BAND 30", ":SENS:VOLT:DC:APER 0.02"]
        );
    }
}
