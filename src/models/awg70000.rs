//! Tektronix AWG70000 series arbitrary waveform generator.
//!
//! Waveforms and sequences are built in the instrument's waveform list and
//! sequence list, then assigned to a channel and played.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::codec::{integral, scpi_number};
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable, Value};
use crate::scpi::{COMMON, MAX_BLOCK_SIZE, definite_length_block};
use crate::util::clean_response;

use super::InstrumentDriver;

pub const NAME: &str = "Tektronix AWG70000 arbitrary waveform generator";

pub const CHANNELS: [u32; 2] = [1, 2];
pub const MARKERS: [u32; 2] = [1, 2];

/// Directory files sent with `send_binary_file` land in by default
pub const DEFAULT_FILE_DIRECTORY: &str = "\\Users\\OEM\\Documents";

/// Largest repeat count of a sequence step
pub const MAX_REPEAT_COUNT: u32 = 1 << 20;
pub const MAX_SEQUENCE_STEPS: u32 = 16383;

/// Time allowed for waveform list and mass memory operations to settle
const OPERATION_LIMIT: Duration = Duration::from_secs(60);
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(100);

const MARKER1_BIT: u8 = 0b0100_0000;
const MARKER2_BIT: u8 = 0b1000_0000;

pub static MODES: [Choice; 2] = [
    Choice::new("awg", "AWG"),
    Choice::new("fgen", "FGEN"),
];

/// DAC bits; the rest of the ten carry markers
pub static RESOLUTIONS: [Choice; 3] = [
    Choice::new("8", "8"),
    Choice::new("9", "9"),
    Choice::new("10", "10"),
];

pub static TRIGGER_SOURCES: [Choice; 3] = [
    Choice::new("a", "ATR").also(&["ATRIGGER", "EXTERNAL A"]),
    Choice::new("b", "BTR").also(&["BTRIGGER", "EXTERNAL B"]),
    Choice::new("internal", "ITR").also(&["ITRIGGER", "TIMER"]),
];

pub static SLOPES: [Choice; 2] = [
    Choice::new("rising", "POS").also(&["POSITIVE"]),
    Choice::new("falling", "NEG").also(&["NEGATIVE"]),
];

pub static IMPEDANCES: [Choice; 2] = [
    Choice::new("50ohm", "50"),
    Choice::new("high", "1000").also(&["1KOHM"]),
];

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::choice("mode", &MODES)
        .query("INST:MODE?")
        .command("INST:MODE {value}"),
    Descriptor::float("sample_rate")
        .unit("Hz")
        .query("CLOC:SRAT?")
        .command("CLOC:SRAT {value}")
        .range(1.49e3, 50e9),
    Descriptor::int("run_state").query("AWGC:RST?"),
    Descriptor::text("current_directory")
        .query("MMEM:CDIR?")
        .command("MMEM:CDIR \"{value}\""),
    Descriptor::choice("dac_resolution", &RESOLUTIONS)
        .query("SOUR{channel}:DAC:RES?")
        .command("SOUR{channel}:DAC:RES {value}"),
    Descriptor::boolean("output")
        .query("OUTP{channel}:STAT?")
        .command("OUTP{channel}:STAT {value}"),
    Descriptor::float("amplitude")
        .unit("V")
        .query("SOUR{channel}:VOLT:AMPL?")
        .command("SOUR{channel}:VOLT:AMPL {value}")
        .range(0.25, 0.5),
    Descriptor::float("offset")
        .unit("V")
        .query("SOUR{channel}:VOLT:LEV:IMM:OFFS?")
        .command("SOUR{channel}:VOLT:LEV:IMM:OFFS {value}"),
    Descriptor::float("low_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:LEV:IMM:LOW?")
        .command("SOUR{channel}:VOLT:LEV:IMM:LOW {value}V"),
    Descriptor::float("high_level")
        .unit("V")
        .query("SOUR{channel}:VOLT:LEV:IMM:HIGH?")
        .command("SOUR{channel}:VOLT:LEV:IMM:HIGH {value}V"),
    Descriptor::float("marker_amplitude")
        .unit("V")
        .query("SOUR{channel}:MARK{marker}:VOLT:AMPL?")
        .command("SOUR{channel}:MARK{marker}:VOLT:AMPL {value}"),
    Descriptor::float("marker_high")
        .unit("V")
        .query("SOUR{channel}:MARK{marker}:VOLT:HIGH?")
        .command("SOUR{channel}:MARK{marker}:VOLT:HIGH {value}"),
    Descriptor::float("marker_low")
        .unit("V")
        .query("SOUR{channel}:MARK{marker}:VOLT:LOW?")
        .command("SOUR{channel}:MARK{marker}:VOLT:LOW {value}"),
    Descriptor::float("marker_offset")
        .unit("V")
        .query("SOUR{channel}:MARK{marker}:VOLT:OFFS?")
        .command("SOUR{channel}:MARK{marker}:VOLT:OFFS {value}"),
    Descriptor::choice("trigger_source", &TRIGGER_SOURCES)
        .query("SOUR{channel}:TINP?")
        .command("SOUR{channel}:TINP {value}"),
    Descriptor::choice("trigger_slope", &SLOPES)
        .query("TRIG:SLOP? {input}")
        .command("TRIG:SLOP {value}, {input}"),
    Descriptor::float("trigger_level")
        .unit("V")
        .query("TRIG:LEV? {input}")
        .command("TRIG:LEV {value}, {input}")
        .range(-5.0, 5.0),
    Descriptor::choice("trigger_impedance", &IMPEDANCES)
        .query("TRIG:IMP? {input}")
        .command("TRIG:IMP {value}, {input}"),
];

/// External trigger inputs, or both of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerInput {
    A,
    B,
    Both,
}

impl TriggerInput {
    fn tokens(self) -> &'static [&'static str] {
        match self {
            TriggerInput::A => &["ATR"],
            TriggerInput::B => &["BTR"],
            TriggerInput::Both => &["ATR", "BTR"],
        }
    }

    /// The single input a query can address
    fn single(self) -> InstrResult<&'static str> {
        match self {
            TriggerInput::Both => Err(InstrumentError::Validation(
                "Only one trigger input can be queried at a time".into(),
            )),
            other => Ok(other.tokens()[0]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    WaitingForTrigger,
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Stopped => "stopped",
            RunState::WaitingForTrigger => "waiting for trigger",
            RunState::Running => "running",
        })
    }
}

/// Trigger a sequence step jumps on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTrigger {
    A,
    B,
    Internal,
    Off,
}

impl JumpTrigger {
    fn token(self) -> &'static str {
        match self {
            JumpTrigger::A => "ATR",
            JumpTrigger::B => "BTR",
            JumpTrigger::Internal => "ITR",
            JumpTrigger::Off => "OFF",
        }
    }
}

/// Where a sequence step jumps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    Next,
    First,
    Last,
    /// Stop the sequence and play 0 V
    End,
    Step(u32),
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpTarget::Next => f.write_str("NEXT"),
            JumpTarget::First => f.write_str("FIRS"),
            JumpTarget::Last => f.write_str("LAST"),
            JumpTarget::End => f.write_str("END"),
            JumpTarget::Step(step) => write!(f, "{}", step),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Times(u32),
    /// Play until stopped
    Infinite,
}

impl fmt::Display for RepeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatCount::Times(n) => write!(f, "{}", n),
            RepeatCount::Infinite => f.write_str("INF"),
        }
    }
}

/// Marker lines played alongside a waveform, one flag per sample
#[derive(Debug, Clone, Copy)]
pub struct Markers<'a> {
    pub marker1: &'a [bool],
    pub marker2: &'a [bool],
}

pub struct Awg70000 {
    instrument: Instrument,
}

impl Awg70000 {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, PROPERTIES])
    }

    pub fn new(adapter: Adapter) -> Self {
        Awg70000 {
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

    fn marker(channel: u32, marker: u32) -> InstrResult<CommandArgs> {
        if !MARKERS.contains(&marker) {
            return Err(InstrumentError::Validation(format!(
                "{} has no marker {}",
                NAME, marker
            )));
        }
        Ok(Self::channel(channel)?.with("marker", marker))
    }

    pub fn set(&mut self, property: &str, value: impl Into<Value>, channel: u32) -> InstrResult<()> {
        let args = Self::channel(channel)?;
        self.instrument.set_with(property, value, &args)
    }

    pub fn get_f64(&mut self, property: &str, channel: u32) -> InstrResult<f64> {
        let args = Self::channel(channel)?;
        self.instrument.get_f64(property, &args)
    }

    pub fn current_directory(&mut self) -> InstrResult<String> {
        self.instrument
            .get_text("current_directory", &CommandArgs::new())
    }

    /// Directory of the programmatic interface; a leading `c:` is dropped
    pub fn set_current_directory(&mut self, directory: &str) -> InstrResult<()> {
        let directory = match directory.get(..2) {
            Some(drive) if drive.eq_ignore_ascii_case("c:") && directory.len() > 2 => &directory[2..],
            _ => directory,
        };
        self.instrument.set("current_directory", directory)
    }

    /// `awg` or `fgen`
    pub fn mode(&mut self) -> InstrResult<String> {
        self.instrument.get_text("mode", &CommandArgs::new())
    }

    pub fn set_mode(&mut self, mode: &str) -> InstrResult<()> {
        self.instrument.set("mode", mode)
    }

    pub fn sample_rate(&mut self) -> InstrResult<f64> {
        self.instrument
            .get_f64("sample_rate", &CommandArgs::new())
    }

    pub fn set_sample_rate(&mut self, rate: f64) -> InstrResult<()> {
        self.instrument.set("sample_rate", rate)
    }

    pub fn run_state(&mut self) -> InstrResult<RunState> {
        let state = self
            .instrument
            .get_f64("run_state", &CommandArgs::new())?;
        match integral(state) {
            Some(0) => Ok(RunState::Stopped),
            Some(1) => Ok(RunState::WaitingForTrigger),
            Some(2) => Ok(RunState::Running),
            _ => Err(InstrumentError::parse(&state.to_string(), "a run state 0, 1 or 2")),
        }
    }

    /// Write `contents` to `filename` on the instrument disk, in `directory`
    /// or [`DEFAULT_FILE_DIRECTORY`]
    pub fn send_binary_file(
        &mut self,
        contents: &[u8],
        filename: &str,
        directory: Option<&str>,
        overwrite: bool,
    ) -> InstrResult<()> {
        let block = definite_length_block(contents)?;
        let mut message = format!("MMEM:DATA \"{}\",", filename).into_bytes();
        if message.len() + block.len() > MAX_BLOCK_SIZE {
            return Err(InstrumentError::Validation(format!(
                "{} is too large to send in one transfer",
                filename
            )));
        }
        message.extend_from_slice(&block);
        message.push(b'\n');

        self.set_current_directory(directory.unwrap_or(DEFAULT_FILE_DIRECTORY))?;
        if overwrite {
            // deleting a missing file queues error -256; keep the dialog quiet
            self.instrument.write("SYST:ERR:DIAL 0")?;
            self.instrument
                .write(&format!("MMEM:DEL \"{}\"", filename))?;
            self.instrument.write("SYST:ERR:DIAL 1")?;
        }

        debug!("Sending {} bytes as {}", contents.len(), filename);
        self.instrument.write_raw(&message)?;
        self.instrument.wait_for_operation_complete(OPERATION_LIMIT)
    }

    pub fn waveform_list(&mut self) -> InstrResult<Vec<String>> {
        let response = self.instrument.ask("WLIS:LIST?")?;
        Ok(names(&response))
    }

    pub fn waveform_list_clear(&mut self) -> InstrResult<()> {
        self.instrument.write("WLIS:WAV:DEL ALL")
    }

    /// Empty waveform of `size` points in the waveform list
    pub fn new_waveform(&mut self, name: &str, size: usize) -> InstrResult<()> {
        self.instrument
            .write(&format!("WLIS:WAV:NEW \"{}\", {}", name, size))
    }

    pub fn waveform_set_to_channel(&mut self, name: &str, channel: u32) -> InstrResult<()> {
        Self::channel(channel)?;
        if !self.waveform_list()?.iter().any(|w| w == name) {
            return Err(InstrumentError::Validation(format!(
                "No waveform {:?} in the waveform list",
                name
            )));
        }
        self.instrument
            .write(&format!("SOUR{}:CASS:WAV \"{}\"", channel, name))
    }

    /// Create `name` in the waveform list from `samples` in volts, scaled for a
    /// channel playing `amplitude` volts peak to peak
    pub fn send_waveform(
        &mut self,
        name: &str,
        samples: &[f64],
        markers: Option<Markers<'_>>,
        amplitude: f64,
    ) -> InstrResult<()> {
        let data = waveform_data(samples, amplitude)?;
        let marker_data = markers
            .map(|m| marker_data(samples.len(), m))
            .transpose()?;

        self.new_waveform(name, samples.len())?;
        self.instrument.wait_for_operation_complete(OPERATION_LIMIT)?;

        let mut message =
            format!("WLIS:WAV:DATA \"{}\",0,{},", name, samples.len()).into_bytes();
        message.extend_from_slice(&definite_length_block(&data)?);
        message.push(b'\n');
        self.instrument.write_raw(&message)?;

        if let Some(marker_data) = marker_data {
            let mut message =
                format!("WLIS:WAV:MARK:DATA \"{}\",0,{},", name, marker_data.len()).into_bytes();
            message.extend_from_slice(&definite_length_block(&marker_data)?);
            message.push(b'\n');
            self.instrument.write_raw(&message)?;
        }
        info!("Waveform {} of {} points is in the waveform list", name, samples.len());
        Ok(())
    }

    /// Load a `.wfmx` file from the instrument disk into the waveform list
    pub fn waveform_load_from_disk(&mut self, path: &str) -> InstrResult<()> {
        self.instrument
            .write(&format!("MMEM:OPEN \"{}\"", path.replace('\\', "\\\\")))?;
        self.instrument.wait_for_operation_complete(OPERATION_LIMIT)
    }

    /// Names in the sequence list, in order
    pub fn sequence_list(&mut self) -> InstrResult<Vec<String>> {
        let size = self.instrument.ask("SLIS:SIZE?")?;
        let size = clean_response(&size)
            .parse::<u32>()
            .map_err(|_| InstrumentError::parse(&size, "a sequence list size"))?;
        (1..=size)
            .map(|n| {
                let name = self.instrument.ask(&format!("SLIS:NAME? {}", n))?;
                Ok(clean_response(&name).to_owned())
            })
            .collect()
    }

    pub fn sequence_list_delete(&mut self, sequence: &str) -> InstrResult<()> {
        self.instrument
            .write(&format!("SLIS:SEQ:DEL \"{}\"", sequence))
    }

    pub fn sequence_list_clear(&mut self) -> InstrResult<()> {
        self.instrument.write("SLIS:SEQ:DEL ALL")
    }

    /// New sequence of `steps` steps (1 to 16383) and `tracks` tracks (1 or 2)
    pub fn sequence_list_new(&mut self, sequence: &str, steps: u32, tracks: u32) -> InstrResult<()> {
        if !(1..=MAX_SEQUENCE_STEPS).contains(&steps) {
            return Err(InstrumentError::Validation(format!(
                "A sequence has 1 to {} steps, not {}",
                MAX_SEQUENCE_STEPS, steps
            )));
        }
        if !(1..=2).contains(&tracks) {
            return Err(InstrumentError::Validation(format!(
                "A sequence has 1 or 2 tracks, not {}",
                tracks
            )));
        }
        self.instrument.write(&format!(
            "SLIS:SEQ:NEW \"{}\", {}, {}",
            sequence, steps, tracks
        ))
    }

    /// Insert `count` steps at `location`, filling any gap before it
    pub fn sequence_step_add(&mut self, sequence: &str, location: u32, count: u32) -> InstrResult<()> {
        self.instrument.write(&format!(
            "SLIS:SEQ:STEP:ADD \"{}\", {}, {}",
            sequence, location, count
        ))
    }

    pub fn sequence_set_step_waveform(
        &mut self,
        sequence: &str,
        step: u32,
        waveform: &str,
        track: u32,
    ) -> InstrResult<()> {
        self.instrument.write(&format!(
            "SLIS:SEQ:STEP{}:TASS{}:WAV \"{}\", \"{}\"",
            step, track, sequence, waveform
        ))
    }

    /// Jump to `target` when `trigger` arrives during `step`
    pub fn sequence_set_step_jump(
        &mut self,
        sequence: &str,
        step: u32,
        trigger: JumpTrigger,
        target: JumpTarget,
    ) -> InstrResult<()> {
        self.instrument.write(&format!(
            "SLIS:SEQ:STEP{}:EJIN \"{}\", {}",
            step,
            sequence,
            trigger.token()
        ))?;
        if trigger != JumpTrigger::Off {
            self.instrument.write(&format!(
                "SLIS:SEQ:STEP{}:EJUM \"{}\", {}",
                step, sequence, target
            ))?;
        }
        Ok(())
    }

    pub fn sequence_set_step_repeat(
        &mut self,
        sequence: &str,
        step: u32,
        count: RepeatCount,
    ) -> InstrResult<()> {
        if let RepeatCount::Times(n) = count {
            if !(1..=MAX_REPEAT_COUNT).contains(&n) {
                return Err(InstrumentError::Validation(format!(
                    "Repeat count {} is outside 1 to {}",
                    n, MAX_REPEAT_COUNT
                )));
            }
        }
        self.instrument.write(&format!(
            "SLIS:SEQ:STEP{}:RCO \"{}\", {}",
            step, sequence, count
        ))
    }

    pub fn sequence_step_repeat(&mut self, sequence: &str, step: u32) -> InstrResult<RepeatCount> {
        let response = self
            .instrument
            .ask(&format!("SLIS:SEQ:STEP{}:RCO? \"{}\"", step, sequence))?;
        let text = clean_response(&response);
        if text.eq_ignore_ascii_case("INF") || text.eq_ignore_ascii_case("INFINITE") {
            return Ok(RepeatCount::Infinite);
        }
        text.parse::<u32>()
            .map(RepeatCount::Times)
            .map_err(|_| InstrumentError::parse(&response, "a repeat count or INF"))
    }

    /// Play `track` of `sequence` on `channel`
    pub fn sequence_set_to_channel(&mut self, sequence: &str, track: u32, channel: u32) -> InstrResult<()> {
        Self::channel(channel)?;
        self.instrument.write(&format!(
            "SOUR{}:CASS:SEQ \"{}\", {}",
            channel, sequence, track
        ))
    }

    /// Recommended peak to peak amplitude stored with `sequence`
    pub fn sequence_amplitude(&mut self, sequence: &str) -> InstrResult<f64> {
        let response = self
            .instrument
            .ask(&format!("SLIS:SEQ:AMPL? \"{}\"", sequence))?;
        clean_response(&response)
            .parse::<f64>()
            .map_err(|_| InstrumentError::parse(&response, "an amplitude"))
    }

    pub fn set_sequence_amplitude(&mut self, sequence: &str, amplitude: f64) -> InstrResult<()> {
        self.instrument.write(&format!(
            "SLIS:SEQ:AMPL \"{}\", {}",
            sequence,
            scpi_number(amplitude)
        ))
    }

    /// Load every sequence of a `.seqx` file on the instrument disk
    pub fn sequence_load_from_disk(&mut self, path: &str) -> InstrResult<()> {
        self.instrument.write(&format!(
            "MMEM:OPEN:SASS:SEQ \"{}\"",
            path.replace('\\', "\\\\")
        ))?;
        self.instrument.wait_for_operation_complete(OPERATION_LIMIT)
    }

    pub fn output_resolution(&mut self, channel: u32) -> InstrResult<u32> {
        let bits = self.get_f64("dac_resolution", channel)?;
        integral(bits)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or_else(|| InstrumentError::parse(&bits.to_string(), "a DAC resolution"))
    }

    /// 8, 9 or 10 DAC bits; the remaining bits of ten carry markers
    pub fn set_output_resolution(&mut self, bits: u32, channel: u32) -> InstrResult<()> {
        self.set("dac_resolution", bits.to_string(), channel)
    }

    pub fn set_output(&mut self, enabled: bool, channel: u32) -> InstrResult<()> {
        self.set("output", enabled, channel)
    }

    pub fn output(&mut self, channel: u32) -> InstrResult<bool> {
        let args = Self::channel(channel)?;
        self.instrument.get_bool("output", &args)
    }

    pub fn amplitude(&mut self, channel: u32) -> InstrResult<f64> {
        self.get_f64("amplitude", channel)
    }

    /// Peak to peak amplitude, at most 0.5 V
    pub fn set_amplitude(&mut self, amplitude: f64, channel: u32) -> InstrResult<()> {
        self.set("amplitude", amplitude, channel)
    }

    pub fn offset(&mut self, channel: u32) -> InstrResult<f64> {
        self.get_f64("offset", channel)
    }

    pub fn set_offset(&mut self, offset: f64, channel: u32) -> InstrResult<()> {
        self.set("offset", offset, channel)
    }

    pub fn set_low_level(&mut self, level: f64, channel: u32) -> InstrResult<()> {
        self.set("low_level", level, channel)
    }

    pub fn set_high_level(&mut self, level: f64, channel: u32) -> InstrResult<()> {
        self.set("high_level", level, channel)
    }

    /// One of `marker_amplitude`, `marker_high`, `marker_low`, `marker_offset`
    pub fn marker_level(&mut self, property: &str, channel: u32, marker: u32) -> InstrResult<f64> {
        let args = Self::marker(channel, marker)?;
        self.instrument.get_f64(property, &args)
    }

    pub fn set_marker_level(
        &mut self,
        property: &str,
        volts: f64,
        channel: u32,
        marker: u32,
    ) -> InstrResult<()> {
        let args = Self::marker(channel, marker)?;
        self.instrument.set_with(property, volts, &args)
    }

    /// Start playing. With `limit`, wait until the instrument runs or waits
    /// for a trigger.
    pub fn play(&mut self, limit: Option<Duration>) -> InstrResult<()> {
        self.instrument.write("AWGC:RUN")?;
        let Some(limit) = limit else {
            return Ok(());
        };

        let deadline = Instant::now() + limit;
        loop {
            thread::sleep(RUN_POLL_INTERVAL);
            if self.run_state()? != RunState::Stopped {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("{} did not start playing within {:?}", NAME, limit);
                return Err(InstrumentError::Timeout(limit));
            }
        }
    }

    pub fn stop(&mut self) -> InstrResult<()> {
        self.instrument.write("AWGC:STOP")
    }

    fn set_trigger(&mut self, property: &str, value: Value, input: TriggerInput) -> InstrResult<()> {
        for token in input.tokens() {
            let args = CommandArgs::new().with("input", token);
            self.instrument.set_with(property, value.clone(), &args)?;
        }
        Ok(())
    }

    /// `rising` or `falling`
    pub fn trigger_slope(&mut self, input: TriggerInput) -> InstrResult<String> {
        let args = CommandArgs::new().with("input", input.single()?);
        self.instrument.get_text("trigger_slope", &args)
    }

    pub fn set_trigger_slope(&mut self, slope: &str, input: TriggerInput) -> InstrResult<()> {
        self.set_trigger("trigger_slope", slope.into(), input)
    }

    pub fn trigger_threshold(&mut self, input: TriggerInput) -> InstrResult<f64> {
        let args = CommandArgs::new().with("input", input.single()?);
        self.instrument.get_f64("trigger_level", &args)
    }

    /// Threshold from -5 V to 5 V
    pub fn set_trigger_threshold(&mut self, volts: f64, input: TriggerInput) -> InstrResult<()> {
        self.set_trigger("trigger_level", volts.into(), input)
    }

    /// `50ohm` or `high` (1 kΩ)
    pub fn trigger_impedance(&mut self, input: TriggerInput) -> InstrResult<String> {
        let args = CommandArgs::new().with("input", input.single()?);
        self.instrument.get_text("trigger_impedance", &args)
    }

    pub fn set_trigger_impedance(&mut self, impedance: &str, input: TriggerInput) -> InstrResult<()> {
        self.set_trigger("trigger_impedance", impedance.into(), input)
    }

    /// Generate a trigger event on `input`
    pub fn trigger(&mut self, input: TriggerInput) -> InstrResult<()> {
        for token in input.tokens() {
            self.instrument.write(&format!("TRIG:IMM {}", token))?;
        }
        Ok(())
    }

    /// `a`, `b` or `internal`
    pub fn trigger_source(&mut self, channel: u32) -> InstrResult<String> {
        let args = Self::channel(channel)?;
        self.instrument.get_text("trigger_source", &args)
    }

    pub fn set_trigger_source(&mut self, source: &str, channel: u32) -> InstrResult<()> {
        self.set("trigger_source", source, channel)
    }

    /// Reset, then empty the sequence and waveform lists
    pub fn reset(&mut self) -> InstrResult<()> {
        self.instrument.write("*RST;:STAT:PRES;*CLS")?;
        self.instrument.wait_for_operation_complete(OPERATION_LIMIT)?;
        self.sequence_list_clear()?;
        self.waveform_list_clear()
    }
}

/// Comma separated, quoted names; an empty list answers `""`
fn names(response: &str) -> Vec<String> {
    clean_response(response)
        .split(',')
        .map(|n| clean_response(n).to_owned())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Little-endian f32 samples normalised to -1..=1 of the channel range
fn waveform_data(samples: &[f64], amplitude: f64) -> InstrResult<Vec<u8>> {
    if samples.is_empty() {
        return Err(InstrumentError::Validation("A waveform needs samples".into()));
    }
    if amplitude.is_nan() || amplitude <= 0.0 {
        return Err(InstrumentError::Validation(format!(
            "Channel amplitude {} V must be positive",
            amplitude
        )));
    }
    let scale = 2.0 / amplitude;
    let mut data = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        let scaled = sample * scale;
        if !(-1.0..=1.0).contains(&scaled) {
            return Err(InstrumentError::Validation(format!(
                "Sample {} V exceeds the {} V channel range",
                sample, amplitude
            )));
        }
        data.extend_from_slice(&(scaled as f32).to_le_bytes());
    }
    Ok(data)
}

/// One byte per sample, marker 1 in bit 6 and marker 2 in bit 7
fn marker_data(points: usize, markers: Markers<'_>) -> InstrResult<Vec<u8>> {
    if markers.marker1.len() != points || markers.marker2.len() != points {
        return Err(InstrumentError::Validation(format!(
            "Markers need {} points each, got {} and {}",
            points,
            markers.marker1.len(),
            markers.marker2.len()
        )));
    }
    Ok(markers
        .marker1
        .iter()
        .zip(markers.marker2)
        .map(|(&m1, &m2)| {
            let mut byte = 0;
            if m1 {
                byte |= MARKER1_BIT;
            }
            if m2 {
                byte |= MARKER2_BIT;
            }
            byte
        })
        .collect())
}

impl InstrumentDriver for Awg70000 {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    fn shutdown(&mut self) -> InstrResult<()> {
        self.stop()?;
        for channel in CHANNELS {
            self.set_output(false, channel)?;
        }
        info!("{} stopped, both outputs off", NAME);
        self.instrument.mark_shut_down();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;

    fn awg(mock: &MockTransport) -> Awg70000 {
        Awg70000::new(Adapter::from_device(
            "TCPIP0::10.0.0.9::inst0::INSTR",
            mock.boxed(),
            AdapterSettings::default(),
        ))
    }

    #[test]
    fn waveform_is_scaled_to_the_channel_range() {
        let data = waveform_data(&[0.25, -0.125, 0.0], 0.5).unwrap();
        assert_eq!(data.len(), 12);
        assert_eq!(&data[..4], &1.0f32.to_le_bytes());
        assert_eq!(&data[4..8], &(-0.5f32).to_le_bytes());

        assert!(matches!(
            waveform_data(&[0.3], 0.5),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            waveform_data(&[0.1], 0.0),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn markers_share_one_byte() {
        let markers = Markers {
            marker1: &[true, false, true],
            marker2: &[false, true, true],
        };
        assert_eq!(marker_data(3, markers).unwrap(), vec![0x40, 0x80, 0xC0]);
        assert!(marker_data(4, markers).is_err());
    }

    #[test]
    fn send_waveform_creates_then_fills() {
        let mock = MockTransport::new();
        mock.respond_to("*OPC?", "1");
        let mut awg = awg(&mock);

        let markers = Markers {
            marker1: &[true, false],
            marker2: &[false, false],
        };
        awg.send_waveform("ramp", &[0.0, 0.1], Some(markers), 0.5)
            .unwrap();

        let written = mock.written();
        assert_eq!(written[0], "WLIS:WAV:NEW \"ramp\", 2");
        assert_eq!(written[1], "*OPC?");
        assert!(written[2].starts_with("WLIS:WAV:DATA \"ramp\",0,2,#18"));
        assert!(written[3].starts_with("WLIS:WAV:MARK:DATA \"ramp\",0,2,#12"));
        assert_eq!(written.len(), 4);
    }

    #[test]
    fn waveform_must_be_listed_before_assignment() {
        let mock = MockTransport::new();
        mock.respond_to("WLIS:LIST?", "\"ramp\",\"sine\"");
        let mut awg = awg(&mock);

        awg.waveform_set_to_channel("sine", 2).unwrap();
        assert!(matches!(
            awg.waveform_set_to_channel("square", 1),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(
            mock.written().last().unwrap(),
            "WLIS:LIST?"
        );
        assert!(mock.written().contains(&"SOUR2:CASS:WAV \"sine\"".to_owned()));
    }

    #[test]
    fn sequence_steps() {
        let mock = MockTransport::new();
        mock.respond_to("SLIS:SEQ:STEP2:RCO? \"seq\"", "INF");
        let mut awg = awg(&mock);

        awg.sequence_list_new("seq", 2, 1).unwrap();
        awg.sequence_set_step_waveform("seq", 1, "ramp", 1).unwrap();
        awg.sequence_set_step_jump("seq", 1, JumpTrigger::A, JumpTarget::Step(2))
            .unwrap();
        awg.sequence_set_step_jump("seq", 2, JumpTrigger::Off, JumpTarget::Next)
            .unwrap();
        awg.sequence_set_step_repeat("seq", 2, RepeatCount::Infinite)
            .unwrap();
        awg.sequence_set_to_channel("seq", 1, 1).unwrap();
        assert_eq!(awg.sequence_step_repeat("seq", 2).unwrap(), RepeatCount::Infinite);

        assert_eq!(
            mock.written(),
            vec![
                "SLIS:SEQ:NEW \"seq\", 2, 1",
                "SLIS:SEQ:STEP1:TASS1:WAV \"seq\", \"ramp\"",
                "SLIS:SEQ:STEP1:EJIN \"seq\", ATR",
                "SLIS:SEQ:STEP1:EJUM \"seq\", 2",
                "SLIS:SEQ:STEP2:EJIN \"seq\", OFF",
                "SLIS:SEQ:STEP2:RCO \"seq\", INF",
                "SOUR1:CASS:SEQ \"seq\", 1",
                "SLIS:SEQ:STEP2:RCO? \"seq\"",
            ]
        );

        assert!(matches!(
            awg.sequence_set_step_repeat("seq", 1, RepeatCount::Times(MAX_REPEAT_COUNT + 1)),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            awg.sequence_list_new("seq", 0, 1),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn sequence_list_is_read_by_index() {
        let mock = MockTransport::new();
        mock.respond_to("SLIS:SIZE?", "2");
        mock.respond_to("SLIS:NAME? 1", "\"first\"");
        mock.respond_to("SLIS:NAME? 2", "\"second\"");
        let mut awg = awg(&mock);

        assert_eq!(awg.sequence_list().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn trigger_settings_reach_both_inputs() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        awg.set_trigger_slope("falling", TriggerInput::Both).unwrap();
        awg.set_trigger_threshold(1.5, TriggerInput::A).unwrap();
        awg.set_trigger_impedance("high", TriggerInput::B).unwrap();
        awg.trigger(TriggerInput::A).unwrap();
        assert_eq!(
            mock.written(),
            vec![
                "TRIG:SLOP NEG, ATR",
                "TRIG:SLOP NEG, BTR",
                "TRIG:LEV 1.5, ATR",
                "TRIG:IMP 1000, BTR",
                "TRIG:IMM ATR",
            ]
        );

        assert!(matches!(
            awg.trigger_slope(TriggerInput::Both),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            awg.set_trigger_threshold(6.0, TriggerInput::A),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn amplitude_is_limited() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        assert!(matches!(
            awg.set_amplitude(0.8, 1),
            Err(InstrumentError::Validation(_))
        ));
        awg.set_high_level(0.25, 1).unwrap();
        awg.set_marker_level("marker_offset", 0.1, 2, 1).unwrap();
        assert!(matches!(
            awg.set_marker_level("marker_high", 1.0, 1, 3),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(
            mock.written(),
            vec![
                "SOUR1:VOLT:LEV:IMM:HIGH 0.25V",
                "SOUR2:MARK1:VOLT:OFFS 0.1",
            ]
        );
    }

    #[test]
    fn play_waits_until_running() {
        let mock = MockTransport::new();
        mock.push_response("0");
        mock.push_response("2");
        let mut awg = awg(&mock);

        awg.play(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(
            mock.written(),
            vec!["AWGC:RUN", "AWGC:RST?", "AWGC:RST?"]
        );
    }

    #[test]
    fn binary_file_replaces_the_old_one() {
        let mock = MockTransport::new();
        mock.respond_to("*OPC?", "1");
        let mut awg = awg(&mock);

        awg.send_binary_file(b"abc", "setup.txt", Some("c:\\Temp"), true)
            .unwrap();
        assert_eq!(
            mock.written(),
            vec![
                "MMEM:CDIR \"\\Temp\"",
                "SYST:ERR:DIAL 0",
                "MMEM:DEL \"setup.txt\"",
                "SYST:ERR:DIAL 1",
                "MMEM:DATA \"setup.txt\",#13abc",
                "*OPC?",
            ]
        );
    }

    #[test]
    fn shutdown_stops_and_turns_outputs_off() {
        let mock = MockTransport::new();
        let mut awg = awg(&mock);

        awg.shutdown().unwrap();
        assert_eq!(
            mock.written(),
            vec!["AWGC:STOP", "OUTP1:STAT OFF", "OUTP2:STAT OFF"]
        );
        assert!(awg.instrument().is_shut_down());
    }
}
