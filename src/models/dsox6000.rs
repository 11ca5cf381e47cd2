use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable};
use crate::scpi::COMMON;
use crate::util::split_values;

use super::InstrumentDriver;

pub const NAME: &str = "DSOX6000 series oscilloscope";

pub const CHANNELS: [u32; 4] = [1, 2, 3, 4];

/// Full-memory ASCII waveforms run to tens of megabytes
pub const WAVEFORM_RESPONSE_SIZE: usize = 128 * 1024 * 1024;

/// Value the scope reports for a measurement it could not make
pub const INVALID_MEASUREMENT: f64 = 9.9e37;

/// Automatic measurements: property name and SCPI mnemonic
pub const MEASUREMENTS: [(&str, &str); 11] = [
    ("vpp", "VPP"),
    ("vmax", "VMAX"),
    ("vmin", "VMIN"),
    ("vtop", "VTOP"),
    ("vbase", "VBAS"),
    ("vamplitude", "VAMP"),
    ("rise_time", "RISE"),
    ("fall_time", "FALL"),
    ("positive_width", "PWID"),
    ("negative_width", "NWID"),
    ("overshoot", "OVER"),
];

pub static TRIGGER_MODES: [Choice; 3] = [
    Choice::new("edge", "EDGE"),
    Choice::new("eburst", "EBUR").also(&["EBURST"]),
    Choice::new("glitch", "GLIT").also(&["GLITCH"]),
];

pub static TRIGGER_SOURCES: [Choice; 5] = [
    Choice::new("channel1", "CHAN1"),
    Choice::new("channel2", "CHAN2"),
    Choice::new("channel3", "CHAN3"),
    Choice::new("channel4", "CHAN4"),
    Choice::new("external", "EXT").also(&["EXTERNAL"]),
];

pub static SLOPES: [Choice; 4] = [
    Choice::new("positive", "POS").also(&["POSITIVE", "RISING"]),
    Choice::new("negative", "NEG").also(&["NEGATIVE", "FALLING"]),
    Choice::new("either", "EITH").also(&["EITHER"]),
    Choice::new("alternate", "ALT").also(&["ALTERNATE"]),
];

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::float("vpp").unit("V").query(":MEAS:VPP? CHAN{channel}"),
    Descriptor::float("vmax").unit("V").query(":MEAS:VMAX? CHAN{channel}"),
    Descriptor::float("vmin").unit("V").query(":MEAS:VMIN? CHAN{channel}"),
    Descriptor::float("vtop").unit("V").query(":MEAS:VTOP? CHAN{channel}"),
    Descriptor::float("vbase").unit("V").query(":MEAS:VBAS? CHAN{channel}"),
    Descriptor::float("vamplitude").unit("V").query(":MEAS:VAMP? CHAN{channel}"),
    Descriptor::float("rise_time").unit("s").query(":MEAS:RISE? CHAN{channel}"),
    Descriptor::float("fall_time").unit("s").query(":MEAS:FALL? CHAN{channel}"),
    Descriptor::float("positive_width").unit("s").query(":MEAS:PWID? CHAN{channel}"),
    Descriptor::float("negative_width").unit("s").query(":MEAS:NWID? CHAN{channel}"),
    Descriptor::float("overshoot").unit("%").query(":MEAS:OVER? CHAN{channel}"),
    Descriptor::float("preshoot").unit("%").query(":MEAS:PRE? CHAN{channel}"),
    Descriptor::float("timebase_scale")
        .unit("s/div")
        .query(":TIM:SCAL?")
        .command(":TIM:SCAL {value}")
        .range(1e-12, 50.0),
    Descriptor::float("timebase_delay")
        .unit("s")
        .query(":TIM:DEL?")
        .command(":TIM:DEL {value}"),
    Descriptor::choice("trigger_mode", &TRIGGER_MODES)
        .query(":TRIG:MODE?")
        .command(":TRIG:MODE {value}"),
    Descriptor::choice("trigger_source", &TRIGGER_SOURCES)
        .query(":TRIG:SOUR?")
        .command(":TRIG:SOUR {value}"),
    Descriptor::choice("trigger_slope", &SLOPES)
        .query(":TRIG:SLOP?")
        .command(":TRIG:SLOP {value}"),
    Descriptor::float("trigger_level")
        .unit("V")
        .query(":TRIG:LEV?")
        .command(":TRIG:LEV {value}"),
    Descriptor::float("x_increment").unit("s").query(":WAV:XINC?"),
];

pub struct Dsox6000 {
    instrument: Instrument,
}

impl Dsox6000 {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, PROPERTIES])
    }

    pub fn default_settings() -> AdapterSettings {
        AdapterSettings::default().with_max_response_size(WAVEFORM_RESPONSE_SIZE)
    }

    pub fn new(adapter: Adapter) -> Self {
        Dsox6000 {
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

    /// One automatic measurement (`vpp`, `rise_time`, ...) on `channel`.
    /// A measurement the scope could not make is a `Device` error.
    pub fn measure(&mut self, measurement: &str, channel: u32) -> InstrResult<f64> {
        let args = Self::channel(channel)?;
        let value = self.instrument.get_f64(measurement, &args)?;
        if value >= INVALID_MEASUREMENT {
            return Err(InstrumentError::Device(format!(
                "{} could not measure {} on channel {}",
                NAME, measurement, channel
            )));
        }
        Ok(value)
    }

    /// Add `measurement` to the continuously displayed ones
    pub fn install_measurement(&mut self, measurement: &str, channel: u32) -> InstrResult<()> {
        Self::channel(channel)?;
        let mnemonic = MEASUREMENTS
            .iter()
            .find(|(name, _)| *name == measurement)
            .map(|(_, mnemonic)| *mnemonic)
            .ok_or_else(|| {
                InstrumentError::Validation(format!("Unknown measurement {:?}", measurement))
            })?;
        self.instrument
            .write(&format!(":MEAS:{} CHAN{}", mnemonic, channel))
    }

    pub fn clear_measurements(&mut self) -> InstrResult<()> {
        self.instrument.write(":MEAS:CLE")
    }

    /// Results of the displayed measurements, first to last
    pub fn measurement_results(&mut self) -> InstrResult<Vec<f64>> {
        self.instrument.write(":MEAS:STAT CURR")?;
        self.instrument.values(":MEAS:RES?", ',')
    }

    pub fn trigger_arm_single(&mut self) -> InstrResult<()> {
        self.instrument.write(":SING")
    }

    /// Samples of `channel` in volts, without the x axis
    /// (see the `x_increment` property)
    pub fn waveform_data(&mut self, channel: u32) -> InstrResult<Vec<f64>> {
        Self::channel(channel)?;
        self.instrument.write(":WAV:FORM ASC")?;
        self.instrument.write(":WAV:POIN:MODE MAX")?;
        self.instrument
            .write(&format!(":WAV:SOUR CHAN{}", channel))?;
        let response = self.instrument.ask(":WAV:DATA?")?;
        split_values(strip_block_header(&response)?, ',')
    }
}

/// ASCII waveform data still carries a `#<n><length>` block header
fn strip_block_header(response: &str) -> InstrResult<&str> {
    let Some(rest) = response.strip_prefix('#') else {
        return Ok(response);
    };
    let digits = rest
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| InstrumentError::parse(response, "a definite length block"))?;
    rest.get(1 + digits as usize..)
        .ok_or_else(|| InstrumentError::parse(response, "a definite length block"))
}

impl InstrumentDriver for Dsox6000 {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    /// Nothing to turn off on a scope
    fn shutdown(&mut self) -> InstrResult<()> {
        info!("{} needs no shutdown sequence", NAME);
        self.instrument.mark_shut_down();
        Ok(())
    }
}
