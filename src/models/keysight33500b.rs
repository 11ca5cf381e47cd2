use std::time::Duration;

use tracing::{debug, info};

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::codec::{format_one_zero, parse_float, scpi_number};
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable, Value};
use crate::scpi::{COMMON, definite_length_block};

use super::InstrumentDriver;

pub const NAME: &str = "Keysight 33500B waveform generator";

pub const CHANNELS: [u32; 2] = [1, 2];

/// Shortest and longest arbitrary waveform, in points
pub const ARB_POINTS: (usize, usize) = (8, 65536);

const NANO: f64 = 1e-9;

pub static FUNCTIONS: [Choice; 9] = [
    Choice::new("sinusoid", "SIN").also(&["SINUSOID"]),
    Choice::new("square", "SQU").also(&["SQUARE"]),
    Choice::new("triangle", "TRI").also(&["TRIANGLE"]),
    Choice::new("ramp", "RAMP"),
    Choice::new("pulse", "PULS").also(&["PULSE"]),
    Choice::new("prbs", "PRBS"),
    Choice::new("noise", "NOIS").also(&["NOISE"]),
    Choice::new("arb", "ARB"),
    Choice::new("dc", "DC"),
];

pub static POLARITIES: [Choice; 2] = [
    Choice::new("positive", "NORM").also(&["NORMAL"]),
    Choice::new("negative", "INV").also(&["INVERTED"]),
];

pub static BURST_MODES: [Choice; 2] = [
    Choice::new("triggered", "TRIG").also(&["TRIGGERED"]),
    Choice::new("gated", "GAT").also(&["GATED"]),
];

pub static TRIGGER_SOURCES: [Choice; 4] = [
    Choice::new("external", "EXT"),
    Choice::new("manual", "BUS"),
    Choice::new("immediate", "IMM"),
    Choice::new("internal", "TIM"),
];

pub static SLOPES: [Choice; 2] = [
    Choice::new("rising", "POS").also(&["POSITIVE"]),
    Choice::new("falling", "NEG").also(&["NEGATIVE"]),
];

/// `INF` for a high impedance load, ohms otherwise
fn format_load(descriptor: &Descriptor, value: &Value) -> InstrResult<String> {
    match value {
        Value::Text(t) if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("infinity") => {
            Ok("INF".to_owned())
        }
        other => other.as_f64().map(scpi_number).ok_or_else(|| {
            InstrumentError::Validation(format!("{} expects ohms or INF", descriptor.name()))
        }),
    }
}

/// The instrument answers 9.9E+37 for an infinite load
fn parse_load(descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    match parse_float(descriptor, response)? {
        Value::Float(v) if v >= 9.9e37 => Ok(Value::Float(f64::INFINITY)),
        other => Ok(other),
    }
}

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::choice("function", &FUNCTIONS)
        .query("SOUR{channel}:FUNC?")
        .command("SOUR{channel}:FUNC {value}"),
    Descriptor::float("frequency")
        .unit("Hz")
        .query("SOUR{channel}:FREQ?")
        .command("SOUR{channel}:FREQ {value}")
        .range(1e-6, 30e6),
    Descriptor::float("amplitude")
        .unit("V")
        .query("SOUR{channel}:VOLT?")
        .command("SOUR{channel}:VOLT {value}")
        .range(1e-3, 10.0),
    Descriptor::float("offset")
        .unit("V")
        .query("SOUR{channel}:VOLT:OFFS?")
        .command("SOUR{channel}:VOLT:OFFS {value}")
        .range(-5.0, 5.0),
    Descriptor::float("high_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:HIGH?")
        .command("SOUR{channel}:VOLT:HIGH {value}")
        .range(-5.0, 5.0),
    Descriptor::float("low_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:LOW?")
        .command("SOUR{channel}:VOLT:LOW {value}")
        .range(-5.0, 5.0),
    Descriptor::boolean("voltage_auto_range")
        .query("SOUR{channel}:VOLT:RANG:AUTO?")
        .command("SOUR{channel}:VOLT:RANG:AUTO {value}")
        .formatted(format_one_zero),
    Descriptor::boolean("output")
        .query("OUTP{channel}?")
        .command("OUTP{channel} {value}")
        .formatted(format_one_zero),
    Descriptor::choice("polarity", &POLARITIES)
        .query("OUTP{channel}:POL?")
        .command("OUTP{channel}:POL {value}"),
    Descriptor::float("load_impedance")
        .unit("ohm")
        .query("OUTP{channel}:LOAD?")
        .command("OUTP{channel}:LOAD {value}")
        .formatted(format_load)
        .parsed(parse_load),
    Descriptor::boolean("burst_state")
        .query("SOUR{channel}:BURS:STAT?")
        .command("SOUR{channel}:BURS:STAT {value}"),
    Descriptor::choice("burst_mode", &BURST_MODES)
        .query("SOUR{channel}:BURS:MODE?")
        .command("SOUR{channel}:BURS:MODE {value}"),
    Descriptor::float("burst_period")
        .unit("s")
        .query("SOUR{channel}:BURS:INT:PER?")
        .command("SOUR{channel}:BURS:INT:PER {value}")
        .range(1e-6, 8000.0),
    Descriptor::int("burst_cycles")
        .query("SOUR{channel}:BURS:NCYC?")
        .command("SOUR{channel}:BURS:NCYC {value}")
        .range(1.0, 1e8),
    Descriptor::float("pulse_width")
        .unit("s")
        .query("SOUR{channel}:FUNC:PULS:WIDT?")
        .command("SOUR{channel}:FUNC:PULS:WIDT {value}")
        .range(16e-9, 1e6),
    Descriptor::float("pulse_period")
        .unit("s")
        .query("SOUR{channel}:FUNC:PULS:PER?")
        .command("SOUR{channel}:FUNC:PULS:PER {value}")
        .range(33e-9, 1e6),
    Descriptor::float("pulse_leading_edge")
        .unit("s")
        .query("SOUR{channel}:FUNC:PULS:TRAN:LEAD?")
        .command("SOUR{channel}:FUNC:PULS:TRAN:LEAD {value}"),
    Descriptor::float("pulse_trailing_edge")
        .unit("s")
        .query("SOUR{channel}:FUNC:PULS:TRAN:TRA?")
        .command("SOUR{channel}:FUNC:PULS:TRAN:TRA {value}"),
    Descriptor::float("arb_sample_rate")
        .unit("Sa/s")
        .query("SOUR{channel}:FUNC:ARB:SRAT?")
        .command("SOUR{channel}:FUNC:ARB:SRAT {value}")
        .range(1e-6, 250e6),
    Descriptor::float("arb_amplitude")
        .unit("V")
        .query("SOUR{channel}:FUNC:ARB:PTP?")
        .command("SOUR{channel}:FUNC:ARB:PTP {value}"),
    Descriptor::text("arb_waveform")
        .query("SOUR{channel}:FUNC:ARB?")
        .command("SOUR{channel}:FUNC:ARB {value}"),
    Descriptor::choice("trigger_source", &TRIGGER_SOURCES)
        .query("TRIG{channel}:SOUR?")
        .command("TRIG{channel}:SOUR {value}"),
    Descriptor::float("trigger_level")
        .unit("V")
        .query("TRIG{channel}:LEV?")
        .command("TRIG{channel}:LEV {value}"),
    Descriptor::choice("trigger_slope", &SLOPES)
        .query("TRIG{channel}:SLOP?")
        .command("TRIG{channel}:SLOP {value}"),
    Descriptor::float("trigger_delay")
        .unit("s")
        .query("TRIG{channel}:DEL?")
        .command("TRIG{channel}:DEL {value}"),
    Descriptor::boolean("sync")
        .query("OUTP:SYNC?")
        .command("OUTP:SYNC {value}"),
];

/// How waveform points travel to the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Comma separated text
    Ascii,
    /// IEEE 488.2 definite length block of big-endian f32
    Binary,
}

/// Two channel function/arbitrary waveform generator
pub struct Keysight33500b {
    instrument: Instrument,
}

impl Keysight33500b {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, PROPERTIES])
    }

    pub fn new(adapter: Adapter) -> Self {
        Keysight33500b {
            instrument: Instrument::new(NAME, adapter, Self::properties()),
        }
    }

    pub fn connect(resource: &str, settings: AdapterSettings) -> InstrResult<Self> {
        Ok(Self::new(Adapter::open(resource, settings)?))
    }

    fn channel(channel: u32) -> InstrResult<CommandArgs> {
        if !CHANNELS.contains(&channel) {
            return Err(InstrumentError::Validation(format!(
                "{} has no channel {}",
                NAME, channel
            )));
        }
        Ok(CommandArgs::channel(channel))
    }

    pub fn set(&mut self, property: &str, value: impl Into<Value>, channel: u32) -> InstrResult<()> {
        let args = Self::channel(channel)?;
        self.instrument.set_with(property, value, &args)
    }

    pub fn get_f64(&mut self, property: &str, channel: u32) -> InstrResult<f64> {
        let args = Self::channel(channel)?;
        self.instrument.get_f64(property, &args)
    }

    pub fn function(&mut self, channel: u32) -> InstrResult<String> {
        let args = Self::channel(channel)?;
        self.instrument.get_text("function", &args)
    }

    pub fn set_function(&mut self, function: &str, channel: u32) -> InstrResult<()> {
        self.set("function", function, channel)
    }

    pub fn set_output(&mut self, enabled: bool, channel: u32) -> InstrResult<()> {
        self.set("output", enabled, channel)
    }

    pub fn output(&mut self, channel: u32) -> InstrResult<bool> {
        let args = Self::channel(channel)?;
        self.instrument.get_bool("output", &args)
    }

    pub fn polarity(&mut self, channel: u32) -> InstrResult<String> {
        let args = Self::channel(channel)?;
        self.instrument.get_text("polarity", &args)
    }

    /// Set the load in ohms; `f64::INFINITY` selects high impedance
    pub fn set_load_impedance(&mut self, ohms: f64, channel: u32) -> InstrResult<()> {
        if ohms.is_infinite() {
            self.set("load_impedance", "INF", channel)
        } else {
            self.set("load_impedance", ohms, channel)
        }
    }

    /// Auto-range once at the present settings, then hold the range
    pub fn perform_auto_range(&mut self, channel: u32) -> InstrResult<()> {
        Self::channel(channel)?;
        self.instrument
            .write(&format!("SOUR{}:VOLT:RANG:AUTO ONCE", channel))
    }

    pub fn set_pulse_edges(&mut self, leading: f64, trailing: f64, channel: u32) -> InstrResult<()> {
        self.set("pulse_leading_edge", leading, channel)?;
        self.set("pulse_trailing_edge", trailing, channel)
    }

    /// Square pulse of `amplitude` (negative for a negative pulse) and
    /// `width` on top of `offset`. The polarity is switched first when
    /// needed, and the period stretched to fit the width.
    pub fn config_single_pulse_by_amp(
        &mut self,
        amplitude: f64,
        width: f64,
        offset: f64,
        channel: u32,
    ) -> InstrResult<()> {
        let wanted = if amplitude < 0.0 { "negative" } else { "positive" };
        if self.polarity(channel)? != wanted {
            self.set("low_level", -0.001, channel)?;
            self.set("high_level", 0.001, channel)?;
            self.set("polarity", wanted, channel)?;
        }

        if amplitude < 0.0 {
            self.set("low_level", amplitude, channel)?;
            self.set("high_level", offset, channel)?;
        } else {
            self.set("low_level", 0.0, channel)?;
            self.set("high_level", amplitude, channel)?;
            self.set("low_level", offset, channel)?;
        }

        if self.get_f64("pulse_period", channel)? < width * 1.1 + 16.0 * NANO {
            self.set("pulse_period", width * 1.1 + 20.0 * NANO, channel)?;
        }
        self.set("pulse_width", width, channel)
    }

    /// Single-shot triggered pulse output
    pub fn config_as_pulse_generator(&mut self, max_amplitude: f64, channel: u32) -> InstrResult<()> {
        self.set_function("pulse", channel)?;
        self.set("pulse_period", 100.0 * NANO, channel)?;
        self.set_pulse_edges(8.4 * NANO, 8.4 * NANO, channel)?;

        self.config_single_pulse_by_amp(max_amplitude, 20.0 * NANO, 0.0, channel)?;
        self.perform_auto_range(channel)?;
        self.config_single_pulse_by_amp(0.001, 20.0 * NANO, 0.0, channel)?;

        self.set("burst_state", true, channel)?;
        self.set("burst_cycles", 1, channel)?;
        self.set("burst_mode", "triggered", channel)?;

        self.instrument.write("DISP:UNIT:VOLT HIGH")?;
        self.instrument.write("DISP:UNIT:RATE PER")
    }

    /// Load `points` (each in -1.0..=1.0) into volatile memory as `name`
    pub fn arbitrary_upload(
        &mut self,
        name: &str,
        points: &[f32],
        mode: UploadMode,
        channel: u32,
    ) -> InstrResult<()> {
        Self::channel(channel)?;
        if name.is_empty() || name.len() > 12 {
            return Err(InstrumentError::Validation(format!(
                "Waveform name {:?} must be 1 to 12 characters",
                name
            )));
        }
        if !(ARB_POINTS.0..=ARB_POINTS.1).contains(&points.len()) {
            return Err(InstrumentError::Validation(format!(
                "Waveform needs {} to {} points, got {}",
                ARB_POINTS.0,
                ARB_POINTS.1,
                points.len()
            )));
        }
        if let Some(p) = points.iter().find(|p| !(-1.0..=1.0).contains(*p)) {
            return Err(InstrumentError::Validation(format!(
                "Waveform point {} is outside [-1, 1]",
                p
            )));
        }

        debug!("Uploading {} points as {}", points.len(), name);
        match mode {
            UploadMode::Ascii => {
                let data: Vec<String> = points.iter().map(|p| p.to_string()).collect();
                self.instrument.write(&format!(
                    "SOUR{}:DATA:ARB {}, {}",
                    channel,
                    name,
                    data.join(", ")
                ))
            }
            UploadMode::Binary => {
                self.instrument.write("FORM:BORD NORM")?;
                let mut message = format!("SOUR{}:DATA:ARB {}, ", channel, name).into_bytes();
                message.extend_from_slice(&binary_block(points)?);
                message.push(b'\n');
                self.instrument.write_raw(&message)
            }
        }
    }

    pub fn volatile_clear(&mut self, channel: u32) -> InstrResult<()> {
        Self::channel(channel)?;
        self.instrument
            .write(&format!("SOUR{}:DATA:VOL:CLE", channel))
    }

    /// Bus trigger, waiting for it to be handled
    pub fn trigger(&mut self) -> InstrResult<()> {
        self.instrument.write("*TRG;*WAI")
    }

    pub fn wait_for_operation_complete(&mut self, limit: Duration) -> InstrResult<()> {
        self.instrument.wait_for_operation_complete(limit)
    }

    pub fn set_display(&mut self, text: &str) -> InstrResult<()> {
        self.instrument
            .write(&format!("DISP:TEXT \"{}\"", text.replace('"', "'")))
    }

    pub fn clear_display(&mut self) -> InstrResult<()> {
        self.instrument.write("DISP:TEXT:CLE")
    }

    pub fn beep(&mut self) -> InstrResult<()> {
        self.instrument.write("SYST:BEEP")
    }

    pub fn reset(&mut self) -> InstrResult<()> {
        self.instrument.write("ABORT")?;
        self.instrument.write("*RST")?;
        self.instrument.write("*CLS")
    }
}

/// Definite length block of big-endian f32
fn binary_block(points: &[f32]) -> InstrResult<Vec<u8>> {
    let payload: Vec<u8> = points.iter().flat_map(|p| p.to_be_bytes()).collect();
    definite_length_block(&payload)
}

impl InstrumentDriver for Keysight33500b {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    fn shutdown(&mut self) -> InstrResult<()> {
        for channel in CHANNELS {
            self.set_output(false, channel)?;
        }
        info!("Both outputs of {} are off", NAME);
        self.instrument.mark_shut_down();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;

    fn awg(mock: &MockTransport) -> Keysight33500b {
        Keysight33500b::new(Adapter::from_device(
            "USB0::0x0957::0x2807::MY57400000::INSTR",
            mock.boxed(),
            AdapterSettings::default(),
        ))
    }

    #[test]
    fn channel_lands_in_header() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        awg.set("frequency", 1e3, 2).unwrap();
        awg.set_function("square", 1).unwrap();
        assert_eq!(
            mock.written(),
            vec!["SOUR2:FREQ 1000".to_owned(), "SOUR1:FUNC SQU".to_owned()]
        );
    }

    #[test]
    fn missing_channel_is_rejected() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        assert!(matches!(
            awg.set_output(true, 3),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn infinite_load_round_trip() {
        let mock = MockTransport::new();
        mock.respond_to("OUTP1:LOAD?", "9.9E+37");
        let mut awg = awg(&mock);

        awg.set_load_impedance(f64::INFINITY, 1).unwrap();
        assert_eq!(mock.written(), vec!["OUTP1:LOAD INF".to_owned()]);
        assert_eq!(awg.get_f64("load_impedance", 1).unwrap(), f64::INFINITY);
    }

    #[test]
    fn binary_block_header_counts_bytes() {
        let block = binary_block(&[0.0; 8]).unwrap();
        assert_eq!(&block[..4], b"#232");
        assert_eq!(block.len(), 4 + 32);
    }

    #[test]
    fn binary_upload_goes_out_raw() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        awg.arbitrary_upload("STEP", &[0.0, 0.5, 1.0, 1.0, 0.5, 0.0, -0.5, -1.0], UploadMode::Binary, 1)
            .unwrap();
        let written = mock.written();
        assert_eq!(written.len(), 2);
        assert!(written[1].starts_with("SOUR1:DATA:ARB STEP, #232"));
    }

    #[test]
    fn upload_rejects_out_of_range_points() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        let result = awg.arbitrary_upload("BAD", &[2.0; 8], UploadMode::Ascii, 1);
        assert!(matches!(result, Err(InstrumentError::Validation(_))));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn negative_pulse_flips_polarity_first() {
        let mock = MockTransport::echo();
        mock.store("OUTP1:POL", "NORM");
        mock.store("SOUR1:FUNC:PULS:PER", "1E-6");
        let mut awg = awg(&mock);

        awg.config_single_pulse_by_amp(-1.0, 50e-9, 0.0, 1).unwrap();
        let written = mock.written();
        assert!(written.contains(&"OUTP1:POL INV".to_owned()));
        assert_eq!(written.last().unwrap(), "SOUR1:FUNC:PULS:WIDT 5E-8");
    }
}
