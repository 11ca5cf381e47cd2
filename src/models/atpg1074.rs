use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::InstrResult;
use crate::instrument::Instrument;
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable};
use crate::scpi::COMMON;

use super::InstrumentDriver;
use super::pulse::{FAMILY, PulseGenerator, SLOPES};

pub const NAME: &str = "AT PG 1074";

const CHANNELS: &[u32] = &[1, 2, 3, 4];

/// Smallest amplitude the outputs produce
pub const MIN_AMPLITUDE: f64 = 0.01;

/// Shortest pulse the outputs produce
pub const MIN_PULSE_WIDTH: f64 = 0.7e-9;

pub static POLARITIES: [Choice; 2] = [
    Choice::new("positive", "OFF").also(&["0"]),
    Choice::new("negative", "ON").also(&["1"]),
];

pub static PULSE_MODES: [Choice; 5] = [
    Choice::new("single", "SINGLE").also(&["SING"]),
    Choice::new("double", "DOUBLE").also(&["DOUB"]),
    Choice::new("triple", "TRIPLE").also(&["TRIP"]),
    Choice::new("quadruple", "QUADRUPLE").also(&["QUAD"]),
    Choice::new("external width", "EXTERNALWIDTH").also(&["EXTW"]),
];

pub static TRIGGER_MODES: [Choice; 4] = [
    Choice::new("gated", "GATED").also(&["GAT"]),
    Choice::new("single", "SINGLE").also(&["SING"]),
    Choice::new("burst", "BURST").also(&["BURS"]),
    Choice::new("continuous", "CONTINUOUS").also(&["CONT"]),
];

pub static TRIGGER_SOURCES: [Choice; 3] = [
    Choice::new("internal", "TIM").also(&["TIMER"]),
    Choice::new("external", "EXT").also(&["EXTERNAL"]),
    Choice::new("manual", "MAN").also(&["MANUAL"]),
];

pub static MARKER_POLARITIES: [Choice; 2] = [
    Choice::new("positive", "POS").also(&["POSITIVE"]),
    Choice::new("negative", "NEG").also(&["NEGATIVE"]),
];

pub static OVERRIDES: &[Descriptor] = &[
    Descriptor::choice("polarity", &POLARITIES)
        .query("SOUR{channel}:INV?")
        .command("SOUR{channel}:INV {value}"),
    Descriptor::float("amplitude")
        .unit("V")
        .query("SOUR{channel}:VOLT:AMPL?")
        .command("SOUR{channel}:VOLT:AMPL {value}")
        .range(MIN_AMPLITUDE, 5.0),
    Descriptor::float("offset")
        .unit("V")
        .query("SOUR{channel}:VOLT:LEV:IMM:OFFS?")
        .command("SOUR{channel}:VOLT:LEV:IMM:OFFS {value}"),
    Descriptor::float("high_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:LEV:IMM:HIGH?")
        .command("SOUR{channel}:VOLT:LEV:IMM:HIGH {value}V"),
    Descriptor::float("low_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:LEV:IMM:LOW?")
        .command("SOUR{channel}:VOLT:LEV:IMM:LOW {value}V"),
    Descriptor::float("delay")
        .unit("s")
        .query("SOUR{channel}:PULS{pulse}:DEL?")
        .command("SOUR{channel}:PULS{pulse}:DEL {value}s"),
    Descriptor::float("pulse_width")
        .unit("s")
        .query("SOUR{channel}:PULS{pulse}:WID?")
        .command("SOUR{channel}:PULS{pulse}:WID {value}")
        .range(MIN_PULSE_WIDTH, 1.0),
    Descriptor::float("load_impedance")
        .unit("ohm")
        .query("SOUR{channel}:LOAD:IMP?")
        .command("SOUR{channel}:LOAD:IMP {value}")
        .range(0.3, 1e6),
    Descriptor::boolean("load_compensation")
        .query("SOUR{channel}:LOAD:COMP?")
        .command("SOUR{channel}:LOAD:COMP {value}"),
    Descriptor::choice("pulse_mode", &PULSE_MODES)
        .query("OUTP{channel}:PULS:MODE?")
        .command("OUTP{channel}:PULS:MODE {value}"),
    Descriptor::choice("trigger_mode", &TRIGGER_MODES)
        .query("TRIG:MODE?")
        .command("TRIG:MODE {value}"),
    Descriptor::choice("trigger_source", &TRIGGER_SOURCES)
        .query("TRIG:SOUR?")
        .command("TRIG:SOUR {value}"),
    Descriptor::choice("trigger_slope", &SLOPES)
        .query("TRIG:SLOP?")
        .command("TRIG:SLOP {value}"),
    Descriptor::float("trigger_threshold")
        .unit("V")
        .query("TRIG:THRE?")
        .command("TRIG:THRE {value}V"),
    Descriptor::float("initial_delay")
        .unit("s")
        .query("SOURce{channel}:INITDEL?")
        .command("SOURce{channel}:INITDEL {value}"),
    Descriptor::int("burst_cycles")
        .query("SOUR{channel}:BURS:NCYC?")
        .command("SOUR{channel}:BURS:NCYC {value}")
        .range(1.0, 1e6),
    Descriptor::float("period")
        .unit("s")
        .query("SOUR{channel}:PER?")
        .command("SOUR{channel}:PER {value}"),
    Descriptor::choice("marker_polarity", &MARKER_POLARITIES)
        .query("TRIG:OUTP:POL?")
        .command("TRIG:OUTP:POL {value}"),
    Descriptor::float("marker_amplitude")
        .unit("V")
        .query("TRIG:OUTP:AMPL?")
        .command("TRIG:OUTP:AMPL {value}"),
    Descriptor::float("marker_delay")
        .unit("s")
        .query("TRIG:OUTP:DEL?")
        .command("TRIG:OUTP:DEL {value}"),
];

pub struct Atpg1074 {
    instrument: Instrument,
}

impl Atpg1074 {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, FAMILY, OVERRIDES])
    }

    pub fn new(adapter: Adapter) -> Self {
        Atpg1074 {
            instrument: Instrument::new(NAME, adapter, Self::properties()),
        }
    }

    pub fn connect(resource: &str, settings: AdapterSettings) -> InstrResult<Self> {
        Ok(Self::new(Adapter::open(resource, settings)?))
    }

    /// `single`, `double`, `triple`, `quadruple` or `external width`
    pub fn set_pulse_mode(&mut self, mode: &str, channel: u32) -> InstrResult<()> {
        self.set_channel("pulse_mode", mode.into(), channel)
    }

    /// Generate `cycles` pulses per trigger on `channel`
    pub fn config_burst(&mut self, cycles: u32, period: f64, channel: u32) -> InstrResult<()> {
        let args = self.pulse_args(channel, 1)?;
        self.instrument
            .set_with("trigger_mode", "burst", &CommandArgs::new())?;
        self.instrument.set_with("burst_cycles", cycles, &args)?;
        self.instrument.set_with("period", period, &args)
    }

    pub fn set_marker(&mut self, polarity: &str, amplitude: f64, delay: f64) -> InstrResult<()> {
        let args = CommandArgs::new();
        self.instrument.set_with("marker_polarity", polarity, &args)?;
        self.instrument.set_with("marker_amplitude", amplitude, &args)?;
        self.instrument.set_with("marker_delay", delay, &args)
    }

    pub fn trigger(&mut self) -> InstrResult<()> {
        self.instrument.write("*TRG")
    }
}

impl InstrumentDriver for Atpg1074 {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    fn shutdown(&mut self) -> InstrResult<()> {
        self.trigger_disarm()?;
        self.disable_outputs()?;
        info!("Outputs of {} are off", NAME);
        self.instrument.mark_shut_down();
        Ok(())
    }
}

impl PulseGenerator for Atpg1074 {
    fn channels(&self) -> &'static [u32] {
        CHANNELS
    }

    fn parking_level(&self) -> f64 {
        MIN_AMPLITUDE
    }

    fn trigger_arm(&mut self) -> InstrResult<()> {
        self.instrument.write("PULSEGENControl:START")
    }

    fn trigger_disarm(&mut self) -> InstrResult<()> {
        self.instrument.write("PULSEGENControl:STOP")
    }
}
