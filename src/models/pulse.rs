//! Pulse generator family.
//!
//! [`FAMILY`] holds the generic SCPI pulse generator commands; each model
//! layers its own overrides on top. [`PulseGenerator`] provides the family
//! operations over whatever table the model ends up with.

use crate::error::{InstrResult, InstrumentError};
use crate::property::{Choice, CommandArgs, Descriptor, Value};

use super::InstrumentDriver;

pub static POLARITIES: [Choice; 2] = [
    Choice::new("positive", "NORM").also(&["NORMAL"]),
    Choice::new("negative", "INV").also(&["INVERTED"]),
];

pub static TRIGGER_SOURCES: [Choice; 4] = [
    Choice::new("external", "EXT"),
    Choice::new("manual", "MAN"),
    Choice::new("immediate", "IMM"),
    Choice::new("internal", "INT"),
];

pub static SLOPES: [Choice; 2] = [
    Choice::new("rising", "POS").also(&["POSITIVE", "RIS", "RISING"]),
    Choice::new("falling", "NEG").also(&["NEGATIVE", "FALL", "FALLING"]),
];

pub static FAMILY: &[Descriptor] = &[
    Descriptor::boolean("output")
        .query("OUTP{channel}:STAT?")
        .command("OUTP{channel}:STAT {value}"),
    Descriptor::float("amplitude")
        .unit("V")
        .query("SOUR{channel}:VOLT:AMPL?")
        .command("SOUR{channel}:VOLT:AMPL {value}"),
    Descriptor::float("offset")
        .unit("V")
        .query("SOUR{channel}:VOLT:OFFS?")
        .command("SOUR{channel}:VOLT:OFFS {value}"),
    Descriptor::float("high_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:HIGH?")
        .command("SOUR{channel}:VOLT:HIGH {value}"),
    Descriptor::float("low_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:LOW?")
        .command("SOUR{channel}:VOLT:LOW {value}"),
    Descriptor::float("pulse_width")
        .unit("s")
        .query("SOUR{channel}:PULS:WIDT?")
        .command("SOUR{channel}:PULS:WIDT {value}"),
    Descriptor::float("delay")
        .unit("s")
        .query("SOUR{channel}:PULS:DEL?")
        .command("SOUR{channel}:PULS:DEL {value}"),
    Descriptor::choice("polarity", &POLARITIES)
        .query("OUTP{channel}:POL?")
        .command("OUTP{channel}:POL {value}"),
    Descriptor::float("load_impedance")
        .unit("ohm")
        .query("OUTP{channel}:IMP:EXT?")
        .command("OUTP{channel}:IMP:EXT {value}")
        .range(0.3, 1e6),
    Descriptor::choice("trigger_source", &TRIGGER_SOURCES)
        .query("ARM:SOUR?")
        .command("ARM:SOUR {value}"),
    Descriptor::float("trigger_threshold")
        .unit("V")
        .query("ARM:LEV?")
        .command("ARM:LEV {value}"),
    Descriptor::choice("trigger_slope", &SLOPES)
        .query("ARM:SLOP?")
        .command("ARM:SLOP {value}"),
];

/// Operations shared by the pulse generator family
pub trait PulseGenerator: InstrumentDriver {
    /// Output channel numbers
    fn channels(&self) -> &'static [u32];

    /// Level used to park the output while the polarity is switched
    fn parking_level(&self) -> f64;

    /// Start generating on trigger. A no-op on models that are always armed.
    fn trigger_arm(&mut self) -> InstrResult<()> {
        Ok(())
    }

    fn trigger_disarm(&mut self) -> InstrResult<()> {
        Ok(())
    }

    /// Placeholder arguments for `pulse` on `channel`
    fn pulse_args(&self, channel: u32, pulse: u32) -> InstrResult<CommandArgs> {
        if !self.channels().contains(&channel) {
            return Err(InstrumentError::Validation(format!(
                "No output channel {} (available: {:?})",
                channel,
                self.channels()
            )));
        }
        Ok(CommandArgs::channel(channel).with("pulse", pulse))
    }

    fn set_channel(&mut self, property: &str, value: Value, channel: u32) -> InstrResult<()> {
        let args = self.pulse_args(channel, 1)?;
        self.instrument().set_with(property, value, &args)
    }

    fn get_channel(&mut self, property: &str, channel: u32) -> InstrResult<Value> {
        let args = self.pulse_args(channel, 1)?;
        self.instrument().get_with(property, &args)
    }

    fn set_output(&mut self, enabled: bool, channel: u32) -> InstrResult<()> {
        self.set_channel("output", enabled.into(), channel)
    }

    fn output(&mut self, channel: u32) -> InstrResult<bool> {
        let args = self.pulse_args(channel, 1)?;
        self.instrument().get_bool("output", &args)
    }

    fn polarity(&mut self, channel: u32) -> InstrResult<String> {
        let args = self.pulse_args(channel, 1)?;
        self.instrument().get_text("polarity", &args)
    }

    /// `positive` or `negative`
    fn set_polarity(&mut self, polarity: &str, channel: u32) -> InstrResult<()> {
        self.set_channel("polarity", polarity.into(), channel)
    }

    fn set_pulse_width(&mut self, width: f64, pulse: u32, channel: u32) -> InstrResult<()> {
        let args = self.pulse_args(channel, pulse)?;
        self.instrument().set_with("pulse_width", width, &args)
    }

    fn pulse_width(&mut self, pulse: u32, channel: u32) -> InstrResult<f64> {
        let args = self.pulse_args(channel, pulse)?;
        self.instrument().get_f64("pulse_width", &args)
    }

    fn set_delay(&mut self, delay: f64, pulse: u32, channel: u32) -> InstrResult<()> {
        let args = self.pulse_args(channel, pulse)?;
        self.instrument().set_with("delay", delay, &args)
    }

    /// Square pulse from `offset` to `amplitude` (below `offset` for a
    /// negative amplitude) lasting `width` seconds.
    fn config_single_pulse_by_amp(
        &mut self,
        amplitude: f64,
        width: f64,
        offset: f64,
        channel: u32,
    ) -> InstrResult<()> {
        let parking = self.parking_level();
        let wanted = if amplitude >= 0.0 { "positive" } else { "negative" };

        if self.polarity(channel)? != wanted {
            if amplitude >= 0.0 {
                self.set_channel("low_level", Value::Float(0.0), channel)?;
                self.set_channel("high_level", parking.into(), channel)?;
            } else {
                self.set_channel("high_level", Value::Float(0.0), channel)?;
                self.set_channel("low_level", (-parking).into(), channel)?;
            }
            self.set_polarity(wanted, channel)?;
        }

        // Order the two writes so that high stays above low at every step
        if amplitude >= 0.0 {
            self.set_channel("high_level", amplitude.into(), channel)?;
            self.set_channel("low_level", offset.into(), channel)?;
        } else {
            self.set_channel("low_level", amplitude.into(), channel)?;
            self.set_channel("high_level", offset.into(), channel)?;
        }

        self.set_pulse_width(width, 1, channel)
    }

    /// Turn every output off
    fn disable_outputs(&mut self) -> InstrResult<()> {
        for channel in self.channels() {
            self.set_output(false, *channel)?;
        }
        Ok(())
    }
}
