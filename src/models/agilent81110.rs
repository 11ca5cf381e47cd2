use std::time::Duration;

use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::InstrResult;
use crate::instrument::Instrument;
use crate::property::{Choice, CommandArgs, Descriptor, PropertyTable};
use crate::scpi::COMMON;

use super::InstrumentDriver;
use super::pulse::{FAMILY, PulseGenerator};

pub const NAME: &str = "Agilent 81110 pulse generator";

const CHANNELS: &[u32] = &[1, 2];

pub static PULSE_MODES: [Choice; 2] = [
    Choice::new("single", "OFF").also(&["0"]),
    Choice::new("double", "ON").also(&["1"]),
];

/// Channel number sits after the mnemonic on this model
pub static OVERRIDES: &[Descriptor] = &[
    Descriptor::float("amplitude")
        .unit("V")
        .query(":VOLT{channel}?")
        .command(":VOLT{channel}:LEV:AMPL {value}"),
    Descriptor::float("offset")
        .unit("V")
        .query(":VOLT{channel}:OFFS?")
        .command(":VOLT{channel}:OFFS {value}V"),
    Descriptor::float("high_level")
        .unit("V")
        .query(":VOLT{channel}:HIGH?")
        .command(":VOLT{channel}:LEV:HIGH {value}")
        .range(-9.9, 10.0),
    Descriptor::float("low_level")
        .unit("V")
        .query(":VOLT{channel}:LOW?")
        .command(":VOLT{channel}:LEV:LOW {value}")
        .range(-10.0, 9.9),
    Descriptor::float("pulse_width")
        .unit("s")
        .query(":PULS:WIDT{channel}?")
        .command(":PULS:WIDT{channel} {value}S"),
    Descriptor::float("delay")
        .unit("s")
        .query(":PULS:DEL{channel}?")
        .command(":PULS:DEL{channel} {value}S"),
    Descriptor::float("leading_edge")
        .unit("s")
        .query(":PULS:TRAN{channel}:LEAD?")
        .command(":PULS:TRAN{channel}:LEAD {value}S"),
    Descriptor::float("trailing_edge")
        .unit("s")
        .query(":PULS:TRAN{channel}:TRA?")
        .command(":PULS:TRAN{channel}:TRA {value}S"),
    Descriptor::boolean("trailing_edge_auto")
        .query(":PULS:TRAN{channel}:TRA:AUTO?")
        .command(":PULS:TRAN{channel}:TRA:AUTO {value}"),
    Descriptor::choice("pulse_mode", &PULSE_MODES)
        .query(":PULS:DOUB{channel}?")
        .command(":PULS:DOUB{channel} {value}"),
    Descriptor::float("output_impedance")
        .unit("ohm")
        .query(":OUTP{channel}:IMP?")
        .command(":OUTP{channel}:IMP {value}"),
    Descriptor::float("trigger_count")
        .query(":TRIG:COUN?")
        .command(":TRIG:COUN {value}")
        .range(1.0, 65536.0),
];

pub struct Agilent81110 {
    instrument: Instrument,
}

impl Agilent81110 {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[COMMON, FAMILY, OVERRIDES])
    }

    pub fn new(adapter: Adapter) -> Self {
        Agilent81110 {
            instrument: Instrument::new(NAME, adapter, Self::properties()),
        }
    }

    pub fn connect(resource: &str, settings: AdapterSettings) -> InstrResult<Self> {
        Ok(Self::new(Adapter::open(resource, settings)?))
    }

    pub fn set_pulse_edges(&mut self, leading: f64, trailing: f64, channel: u32) -> InstrResult<()> {
        let args = self.pulse_args(channel, 1)?;
        self.instrument.set_with("trailing_edge", trailing, &args)?;
        self.instrument.set_with("leading_edge", leading, &args)
    }

    /// `gated` follows the external input, `single` fires once per arm
    pub fn set_trigger_mode(&mut self, gated: bool) -> InstrResult<()> {
        if gated {
            self.instrument.write("TRIG:SOUR EXT")
        } else {
            self.instrument.write("TRIG:SOUR IMM")?;
            self.instrument
                .set_with("trigger_count", 1, &CommandArgs::new())
        }
    }

    pub fn trigger(&mut self) -> InstrResult<()> {
        self.instrument.write("*TRG")
    }

    pub fn reset(&mut self) -> InstrResult<()> {
        self.instrument.write("*RST")?;
        self.instrument.write("*CLS")?;
        self.instrument.write(":STAT:PRES")
    }
}

impl InstrumentDriver for Agilent81110 {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    fn shutdown(&mut self) -> InstrResult<()> {
        self.disable_outputs()?;
        // Give the outputs time to settle before the session goes away
        std::thread::sleep(Duration::from_millis(10));
        info!("Outputs of {} are off", NAME);
        self.instrument.mark_shut_down();
        Ok(())
    }
}

/// Always armed; arming is a no-op
impl PulseGenerator for Agilent81110 {
    fn channels(&self) -> &'static [u32] {
        CHANNELS
    }

    fn parking_level(&self) -> f64 {
        0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstrumentError;
    use crate::interface::mock::MockTransport;

    fn generator(mock: &MockTransport) -> Agilent81110 {
        Agilent81110::new(Adapter::from_device(
            "GPIB0::10::INSTR",
            mock.boxed(),
            AdapterSettings::default(),
        ))
    }

    #[test]
    fn overrides_replace_family_commands() {
        let mock = MockTransport::new();
        let mut generator = generator(&mock);

        generator.set_pulse_width(5e-9, 1, 2).unwrap();
        generator.set_output(true, 1).unwrap();
        assert_eq!(
            mock.written(),
            vec![":PULS:WIDT2 5E-9S".to_owned(), "OUTP1:STAT ON".to_owned()]
        );
    }

    #[test]
    fn positive_pulse_after_negative_polarity() {
        let mock = MockTransport::new();
        mock.respond_to("OUTP1:POL?", "INV");
        let mut generator = generator(&mock);

        generator
            .config_single_pulse_by_amp(2.0, 10e-9, 0.0, 1)
            .unwrap();
        assert_eq!(
            mock.written(),
            vec![
                "OUTP1:POL?".to_owned(),
                ":VOLT1:LEV:LOW 0".to_owned(),
                ":VOLT1:LEV:HIGH 0.1".to_owned(),
                "OUTP1:POL NORM".to_owned(),
                ":VOLT1:LEV:HIGH 2".to_owned(),
                ":VOLT1:LEV:LOW 0".to_owned(),
                ":PULS:WIDT1 1E-8S".to_owned(),
            ]
        );
    }

    #[test]
    fn channel_three_does_not_exist() {
        let mock = MockTransport::new();
        let mut generator = generator(&mock);

        assert!(matches!(
            generator.set_output(true, 3),
            Err(InstrumentError::Validation(_))
        ));
    }

    #[test]
    fn shutdown_disables_both_outputs() {
        let mock = MockTransport::new();
        let mut generator = generator(&mock);

        generator.shutdown().unwrap();
        assert_eq!(
            mock.written(),
            vec!["OUTP1:STAT OFF".to_owned(), "OUTP2:STAT OFF".to_owned()]
        );
    }
}
