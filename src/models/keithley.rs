//! Trigger model, reading buffer and digital I/O commands shared by the
//! Keithley touchscreen instruments (2450, DMM7510).

use std::fmt;
use std::str::FromStr;

use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::codec::{integral, scpi_number};
use crate::property::{Choice, CommandArgs, Descriptor};
use crate::util::{clean_response, split_values};

use super::InstrumentDriver;

/// Reading buffer every measurement lands in unless told otherwise
pub const DEFAULT_BUFFER: &str = "defbuffer1";

/// Trigger model blocks are numbered from 1
pub const TRIGGER_BLOCKS: u32 = 63;

/// Digital I/O lines on the rear panel
pub const DIGITAL_LINES: u32 = 6;

pub static TRIGGER_EDGES: [Choice; 3] = [
    Choice::new("falling", "FALL").also(&["FALLING"]),
    Choice::new("rising", "RIS").also(&["RISING", "RISE"]),
    Choice::new("either", "EITH").also(&["EITHER"]),
];

pub static FILL_MODES: [Choice; 2] = [
    Choice::new("continuous", "CONT").also(&["CONTINUOUS"]),
    Choice::new("once", "ONCE"),
];

/// Level of the pulse asserted on a trigger output
pub static OUTPUT_LOGIC: [Choice; 2] = [
    Choice::new("positive", "POS").also(&["POSITIVE"]),
    Choice::new("negative", "NEG").also(&["NEGATIVE"]),
];

pub static LINE_MODES: [Choice; 3] = [
    Choice::new("digital", "DIG").also(&["DIGITAL"]),
    Choice::new("trigger", "TRIG").also(&["TRIGGER"]),
    Choice::new("synchronous", "SYNC").also(&["SYNCHRONOUS"]),
];

pub static LINE_DIRECTIONS: [Choice; 3] = [
    Choice::new("in", "IN"),
    Choice::new("out", "OUT"),
    Choice::new("open drain", "OPEN").also(&["OPENDRAIN", "OPEN DRAIN"]),
];

pub static BUFFER_STYLES: [Choice; 5] = [
    Choice::new("compact", "COMP").also(&["COMPACT"]),
    Choice::new("standard", "STAN").also(&["STANDARD"]),
    Choice::new("full", "FULL"),
    Choice::new("writable", "WRIT").also(&["WRITABLE"]),
    Choice::new("fullwritable", "FULLWRIT").also(&["FULLWRITABLE"]),
];

/// Elements `TRAC:DATA?` can return for each stored reading
pub static TRACE_ELEMENTS: [Choice; 10] = [
    Choice::new("reading", "READ"),
    Choice::new("relative", "REL"),
    Choice::new("seconds", "SEC"),
    Choice::new("fractional", "FRAC"),
    Choice::new("date", "DATE"),
    Choice::new("time", "TIME"),
    Choice::new("timestamp", "TST"),
    Choice::new("unit", "UNIT"),
    Choice::new("status", "STAT"),
    Choice::new("formatted", "FORM"),
];

pub static FAMILY: &[Descriptor] = &[
    Descriptor::text("trigger_state").query(":TRIG:STAT?"),
    Descriptor::choice("trigger_edge", &TRIGGER_EDGES)
        .query(":TRIG:EXT:IN:EDGE?")
        .command(":TRIG:EXT:IN:EDGE {value}"),
    Descriptor::text("trigger_out_stimulus")
        .query(":TRIG:EXT:OUT:STIM?")
        .command(":TRIG:EXT:OUT:STIM {value}"),
    Descriptor::choice("trigger_out_logic", &OUTPUT_LOGIC)
        .query(":TRIG:EXT:OUT:LOG?")
        .command(":TRIG:EXT:OUT:LOG {value}"),
    Descriptor::text("digital_out_stimulus")
        .query(":TRIG:DIG{line}:OUT:STIM?")
        .command(":TRIG:DIG{line}:OUT:STIM {value}"),
    Descriptor::choice("digital_out_logic", &OUTPUT_LOGIC)
        .query(":TRIG:DIG{line}:OUT:LOG?")
        .command(":TRIG:DIG{line}:OUT:LOG {value}"),
    Descriptor::float("measurement").query("READ? \"{buffer}\""),
    Descriptor::int("buffer_capacity")
        .query(":TRAC:POIN? \"{buffer}\"")
        .command(":TRAC:POIN {value}, \"{buffer}\"")
        .range(0.0, 11_000_000.0),
    Descriptor::int("buffer_count").query(":TRAC:ACT? \"{buffer}\""),
    Descriptor::int("buffer_start").query(":TRAC:ACT:STAR? \"{buffer}\""),
    Descriptor::int("buffer_end").query(":TRAC:ACT:END? \"{buffer}\""),
    Descriptor::choice("buffer_fill_mode", &FILL_MODES)
        .query(":TRAC:FILL:MODE? \"{buffer}\"")
        .command(":TRAC:FILL:MODE {value}, \"{buffer}\""),
];

/// Event a trigger model block, a trigger output or the digitizer waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    None,
    /// Command interface trigger (`*TRG`)
    Command,
    /// Front panel TRIGGER key
    Display,
    /// External trigger in line
    External,
    AnalogTrigger,
    /// Notify block 1 to 8 of the trigger model
    Notify(u8),
    /// Trigger timer 1 to 4
    Timer(u8),
    /// Digital input line 1 to 6
    Digital(u8),
    /// LAN trigger object 1 to 8
    Lan(u8),
    /// Event blender 1 or 2
    Blender(u8),
    /// TSP-Link synchronization line 1 to 3
    TspLink(u8),
}

impl TriggerEvent {
    fn numbered(&self) -> Option<(&'static str, u8, u8)> {
        match *self {
            TriggerEvent::Notify(n) => Some(("NOT", n, 8)),
            TriggerEvent::Timer(n) => Some(("TIM", n, 4)),
            TriggerEvent::Digital(n) => Some(("DIG", n, 6)),
            TriggerEvent::Lan(n) => Some(("LAN", n, 8)),
            TriggerEvent::Blender(n) => Some(("BLEN", n, 2)),
            TriggerEvent::TspLink(n) => Some(("TSPL", n, 3)),
            _ => None,
        }
    }

    /// Event mnemonic, with the numbered events checked against their range
    pub fn token(&self) -> InstrResult<String> {
        if let Some((prefix, n, max)) = self.numbered() {
            if !(1..=max).contains(&n) {
                return Err(InstrumentError::Validation(format!(
                    "{:?} is out of range, expected 1 to {}",
                    self, max
                )));
            }
            return Ok(format!("{}{}", prefix, n));
        }
        Ok(self.to_string())
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.numbered() {
            Some((prefix, n, _)) => write!(f, "{}{}", prefix, n),
            None => f.write_str(match self {
                TriggerEvent::None => "NONE",
                TriggerEvent::Command => "COMM",
                TriggerEvent::Display => "DISP",
                TriggerEvent::External => "EXT",
                _ => "ATR",
            }),
        }
    }
}

impl FromStr for TriggerEvent {
    type Err = InstrumentError;

    /// Accepts short and long mnemonics, e.g. `NOT2` or `notify2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = clean_response(s).to_ascii_uppercase();
        let split = text.find(|c: char| c.is_ascii_digit()).unwrap_or(text.len());
        let (word, number) = text.split_at(split);
        let n = if number.is_empty() {
            None
        } else {
            Some(
                number
                    .parse::<u8>()
                    .map_err(|_| InstrumentError::parse(s, "a trigger event"))?,
            )
        };

        let event = match (word, n) {
            ("NONE", None) => TriggerEvent::None,
            ("COMM" | "COMMAND", None) => TriggerEvent::Command,
            ("DISP" | "DISPLAY", None) => TriggerEvent::Display,
            ("EXT" | "EXTERNAL", None) => TriggerEvent::External,
            ("ATR" | "ATRIGGER", None) => TriggerEvent::AnalogTrigger,
            ("NOT" | "NOTIFY", Some(n)) => TriggerEvent::Notify(n),
            ("TIM" | "TIMER", Some(n)) => TriggerEvent::Timer(n),
            ("DIG" | "DIGIO", Some(n)) => TriggerEvent::Digital(n),
            ("LAN", Some(n)) => TriggerEvent::Lan(n),
            ("BLEN" | "BLENDER", Some(n)) => TriggerEvent::Blender(n),
            ("TSPL" | "TSPLINK", Some(n)) => TriggerEvent::TspLink(n),
            _ => return Err(InstrumentError::parse(s, "a trigger event")),
        };
        Ok(event)
    }
}

/// How many readings a measure block takes before the model moves on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureCount {
    Readings(u32),
    /// Keep measuring in the background until another measure block or the end
    Infinite,
    /// Stop an infinite measure block started earlier
    Stop,
    /// The count configured for the active function
    Auto,
}

impl fmt::Display for MeasureCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureCount::Readings(n) => write!(f, "{}", n),
            MeasureCount::Infinite => f.write_str("INF"),
            MeasureCount::Stop => f.write_str("0"),
            MeasureCount::Auto => f.write_str("AUTO"),
        }
    }
}

pub fn buffer_args(buffer: &str) -> CommandArgs {
    CommandArgs::new().with("buffer", buffer)
}

/// Token of the choice `name` names, or a `Validation` error naming `what`
pub(crate) fn choice_token(choices: &[Choice], name: &str, what: &str) -> InstrResult<&'static str> {
    choices
        .iter()
        .find(|c| c.matches(name))
        .map(|c| c.token)
        .ok_or_else(|| InstrumentError::Validation(format!("Unknown {} {:?}", what, name)))
}

fn check_block(block: u32) -> InstrResult<()> {
    if !(1..=TRIGGER_BLOCKS).contains(&block) {
        return Err(InstrumentError::Validation(format!(
            "Trigger block {} is outside 1 to {}",
            block, TRIGGER_BLOCKS
        )));
    }
    Ok(())
}

fn line_args(line: u32) -> InstrResult<CommandArgs> {
    if !(1..=DIGITAL_LINES).contains(&line) {
        return Err(InstrumentError::Validation(format!(
            "Digital line {} is outside 1 to {}",
            line, DIGITAL_LINES
        )));
    }
    Ok(CommandArgs::new().with("line", line))
}

fn check_user_buffer(name: &str) -> InstrResult<()> {
    if name.is_empty() || name.eq_ignore_ascii_case("defbuffer1") || name.eq_ignore_ascii_case("defbuffer2") {
        return Err(InstrumentError::Validation(format!(
            "{:?} cannot name a user buffer",
            name
        )));
    }
    Ok(())
}

/// Trigger model and buffer operations
pub trait KeithleyBuffered: InstrumentDriver {
    fn trigger_model_start(&mut self) -> InstrResult<()> {
        self.instrument().write("INIT")
    }

    fn trigger_model_pause(&mut self) -> InstrResult<()> {
        self.instrument().write(":TRIG:PAUS")
    }

    fn trigger_model_resume(&mut self) -> InstrResult<()> {
        self.instrument().write(":TRIG:RES")
    }

    fn trigger_model_abort(&mut self) -> InstrResult<()> {
        self.instrument().write(":ABOR")
    }

    fn trigger_model_load_empty(&mut self) -> InstrResult<()> {
        self.instrument().write(":TRIG:LOAD \"EMPTY\"")
    }

    /// Trigger model state, e.g. `idle;idle;0`
    fn trigger_model_state(&mut self) -> InstrResult<String> {
        let state = self
            .instrument()
            .get_text("trigger_state", &CommandArgs::new())?;
        Ok(state.to_lowercase())
    }

    /// Bus trigger (`*TRG`)
    fn trigger(&mut self) -> InstrResult<()> {
        self.instrument().write("*TRG")
    }

    /// Take one reading into `buffer` and return it
    fn read_measurement(&mut self, buffer: &str) -> InstrResult<f64> {
        self.instrument().get_f64("measurement", &buffer_args(buffer))
    }

    /// Readings stored at indices `start..=stop` of `buffer`
    fn trace_data(&mut self, start: u32, stop: u32, buffer: &str) -> InstrResult<Vec<f64>> {
        let command = format!("TRAC:DATA? {}, {}, \"{}\", READ", start, stop, buffer);
        let response = self.instrument().ask(&command)?;
        split_values(&response, ',')
    }

    /// Raw fields of `buffer` entries `start..=stop`, one group of `elements` per reading
    fn trace_elements(
        &mut self,
        start: u32,
        stop: u32,
        buffer: &str,
        elements: &[&str],
    ) -> InstrResult<Vec<Vec<String>>> {
        if elements.is_empty() {
            return Err(InstrumentError::Validation(
                "At least one buffer element is needed".into(),
            ));
        }
        let tokens = elements
            .iter()
            .map(|e| choice_token(&TRACE_ELEMENTS, e, "buffer element"))
            .collect::<InstrResult<Vec<_>>>()?;
        let command = format!(
            "TRAC:DATA? {}, {}, \"{}\", {}",
            start,
            stop,
            buffer,
            tokens.join(", ")
        );
        let response = self.instrument().ask(&command)?;
        let fields: Vec<String> = clean_response(&response)
            .split(',')
            .map(|f| f.trim().to_string())
            .collect();
        if fields.len() % tokens.len() != 0 {
            return Err(InstrumentError::parse(
                &response,
                format!("groups of {} buffer elements", tokens.len()),
            ));
        }
        Ok(fields.chunks(tokens.len()).map(|c| c.to_vec()).collect())
    }

    fn trace_clear(&mut self, buffer: &str) -> InstrResult<()> {
        self.instrument()
            .write(&format!(":TRAC:CLE \"{}\"", buffer))
    }

    /// Number of readings stored in `buffer`
    fn trace_size(&mut self, buffer: &str) -> InstrResult<i64> {
        buffer_index(self.instrument(), "buffer_count", buffer, "a reading count")
    }

    /// Index of the first stored reading of `buffer`
    fn trace_start(&mut self, buffer: &str) -> InstrResult<i64> {
        buffer_index(self.instrument(), "buffer_start", buffer, "a buffer index")
    }

    /// Index of the last stored reading of `buffer`
    fn trace_end(&mut self, buffer: &str) -> InstrResult<i64> {
        buffer_index(self.instrument(), "buffer_end", buffer, "a buffer index")
    }

    fn trace_capacity(&mut self, buffer: &str) -> InstrResult<i64> {
        buffer_index(self.instrument(), "buffer_capacity", buffer, "a buffer capacity")
    }

    fn set_trace_capacity(&mut self, points: u32, buffer: &str) -> InstrResult<()> {
        self.instrument()
            .set_with("buffer_capacity", points, &buffer_args(buffer))
    }

    /// `continuous` or `once`
    fn trace_fill_mode(&mut self, buffer: &str) -> InstrResult<String> {
        self.instrument()
            .get_text("buffer_fill_mode", &buffer_args(buffer))
    }

    fn set_trace_fill_mode(&mut self, mode: &str, buffer: &str) -> InstrResult<()> {
        self.instrument()
            .set_with("buffer_fill_mode", mode, &buffer_args(buffer))
    }

    /// Create the user reading buffer `name` holding `size` readings of `style`
    fn trace_make(&mut self, name: &str, size: u32, style: &str) -> InstrResult<()> {
        check_user_buffer(name)?;
        if size < 10 && size != 0 {
            return Err(InstrumentError::Validation(format!(
                "A reading buffer holds 0 or at least 10 readings, not {}",
                size
            )));
        }
        let style = choice_token(&BUFFER_STYLES, style, "buffer style")?;
        self.instrument()
            .write(&format!(":TRAC:MAKE \"{}\", {}, {}", name, size, style))
    }

    fn trace_delete(&mut self, name: &str) -> InstrResult<()> {
        check_user_buffer(name)?;
        self.instrument()
            .write(&format!(":TRAC:DEL \"{}\"", name))
    }

    /// Trigger block that jumps to `destination` every time it is reached
    fn trigger_block_branch_always(&mut self, block: u32, destination: u32) -> InstrResult<()> {
        check_block(block)?;
        check_block(destination)?;
        self.instrument()
            .write(&format!(":TRIG:BLOC:BRAN:ALW {}, {}", block, destination))
    }

    /// Jump to `destination` the first `count` times the block is reached
    fn trigger_block_branch_counter(
        &mut self,
        block: u32,
        count: u32,
        destination: u32,
    ) -> InstrResult<()> {
        check_block(block)?;
        check_block(destination)?;
        if count == 0 {
            return Err(InstrumentError::Validation(
                "A branch counter needs a count of at least 1".into(),
            ));
        }
        self.instrument().write(&format!(
            ":TRIG:BLOC:BRAN:COUN {}, {}, {}",
            block, count, destination
        ))
    }

    /// Jump to `destination` when `event` has occurred, fall through otherwise
    fn trigger_block_branch_event(
        &mut self,
        block: u32,
        event: TriggerEvent,
        destination: u32,
    ) -> InstrResult<()> {
        check_block(block)?;
        check_block(destination)?;
        let event = event.token()?;
        self.instrument().write(&format!(
            ":TRIG:BLOC:BRAN:EVEN {}, \"{}\", {}",
            block, event, destination
        ))
    }

    fn trigger_block_buffer_clear(&mut self, block: u32, buffer: &str) -> InstrResult<()> {
        check_block(block)?;
        self.instrument()
            .write(&format!(":TRIG:BLOC:BUFF:CLE {}, \"{}\"", block, buffer))
    }

    /// Fixed delay of `delay` seconds, zero or 167 ns to 10 ks
    fn trigger_block_delay_constant(&mut self, block: u32, delay: f64) -> InstrResult<()> {
        check_block(block)?;
        if delay != 0.0 && !(167e-9..=10e3).contains(&delay) {
            return Err(InstrumentError::Validation(format!(
                "Trigger delay {} s is outside 167 ns to 10 ks",
                delay
            )));
        }
        self.instrument().write(&format!(
            ":TRIG:BLOC:DEL:CONS {}, {}",
            block,
            scpi_number(delay)
        ))
    }

    /// Take `count` readings into `buffer`
    fn trigger_block_measure(
        &mut self,
        block: u32,
        buffer: &str,
        count: MeasureCount,
    ) -> InstrResult<()> {
        check_block(block)?;
        self.instrument().write(&format!(
            ":TRIG:BLOC:MEAS {}, \"{}\", {}",
            block, buffer, count
        ))
    }

    /// Generate trigger model event `NOTIFY<id>`
    fn trigger_block_notify(&mut self, block: u32, id: u8) -> InstrResult<()> {
        check_block(block)?;
        TriggerEvent::Notify(id).token()?;
        self.instrument()
            .write(&format!(":TRIG:BLOC:NOT {}, {}", block, id))
    }

    fn trigger_block_nop(&mut self, block: u32) -> InstrResult<()> {
        check_block(block)?;
        self.instrument()
            .write(&format!(":TRIG:BLOC:NOP {}", block))
    }

    /// Hold the model at `block` until `event` occurs. With `clear` set, events
    /// that arrived before the block was reached are discarded.
    fn trigger_block_wait(&mut self, block: u32, event: TriggerEvent, clear: bool) -> InstrResult<()> {
        check_block(block)?;
        let event = event.token()?;
        let clear = if clear { "ENT" } else { "NEV" };
        self.instrument()
            .write(&format!(":TRIG:BLOC:WAIT {}, {}, {}", block, event, clear))
    }

    /// Event that fires the external trigger out line
    fn set_trigger_out_stimulus(&mut self, event: TriggerEvent) -> InstrResult<()> {
        let event = event.token()?;
        self.instrument()
            .set("trigger_out_stimulus", event.as_str())
    }

    fn trigger_out_stimulus(&mut self) -> InstrResult<TriggerEvent> {
        let text = self
            .instrument()
            .get_text("trigger_out_stimulus", &CommandArgs::new())?;
        text.parse()
    }

    /// `positive` or `negative`
    fn set_trigger_out_logic(&mut self, logic: &str) -> InstrResult<()> {
        self.instrument().set("trigger_out_logic", logic)
    }

    fn set_digital_out_stimulus(&mut self, line: u32, event: TriggerEvent) -> InstrResult<()> {
        let args = line_args(line)?;
        let event = event.token()?;
        self.instrument()
            .set_with("digital_out_stimulus", event.as_str(), &args)
    }

    fn set_digital_out_logic(&mut self, line: u32, logic: &str) -> InstrResult<()> {
        let args = line_args(line)?;
        self.instrument()
            .set_with("digital_out_logic", logic, &args)
    }

    /// Configure digital I/O `line` as a `digital`, `trigger` or `synchronous`
    /// line running `in`, `out` or `open drain`
    fn set_digital_io_mode(&mut self, line: u32, mode: &str, direction: &str) -> InstrResult<()> {
        line_args(line)?;
        let mode = choice_token(&LINE_MODES, mode, "digital line mode")?;
        let direction = choice_token(&LINE_DIRECTIONS, direction, "digital line direction")?;
        if mode == "SYNC" && direction == "OPEN" {
            return Err(InstrumentError::Validation(
                "A synchronous line runs in or out, not open drain".into(),
            ));
        }
        self.instrument()
            .write(&format!(":DIG:LINE{}:MODE {}, {}", line, mode, direction))
    }
}

fn buffer_index(
    instrument: &mut Instrument,
    name: &str,
    buffer: &str,
    what: &str,
) -> InstrResult<i64> {
    let value = instrument.get_f64(name, &buffer_args(buffer))?;
    integral(value).ok_or_else(|| InstrumentError::parse(&value.to_string(), what))
}
