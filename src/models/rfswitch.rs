//! Mini-Circuits RF switch box driven through its ASCII command set.
//!
//! Switches are lettered `A` to `H`. Setting a switch answers a status code;
//! `SWPORT?` answers every switch state at once as a bitmask, `A` in bit 0.

use tracing::info;

use crate::adapter::{Adapter, AdapterSettings};
use crate::error::{InstrResult, InstrumentError};
use crate::instrument::Instrument;
use crate::property::codec::{format_one_zero, integral};
use crate::property::{CommandArgs, Descriptor, PropertyTable, Value};
use crate::util::clean_response;

use super::InstrumentDriver;

pub const NAME: &str = "Mini-Circuits RF switch box";

/// Switch letters, in bitmask order
pub const SWITCHES: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

const TERMINATION: &str = "\r\n";

/// `MN=RC-2SPDT-A18` style answers carry the query name before the value
fn parse_labelled(_descriptor: &Descriptor, response: &str) -> InstrResult<Value> {
    let text = clean_response(response);
    let value = text.split_once('=').map_or(text, |(_, value)| value);
    Ok(Value::Text(value.trim().to_owned()))
}

pub static PROPERTIES: &[Descriptor] = &[
    Descriptor::boolean("switch")
        .command("SET{switch}={value}")
        .formatted(format_one_zero),
    Descriptor::int("switches").query("SWPORT?").range(0.0, 255.0),
    Descriptor::text("model").query("MN?").parsed(parse_labelled),
    Descriptor::text("serial_number").query("SN?").parsed(parse_labelled),
];

/// Status code answered to `SET<switch>=<state>`
fn check_reply(command: &str, reply: &str) -> InstrResult<()> {
    if !command.starts_with("SET") {
        return Ok(());
    }
    match reply {
        "1" => Ok(()),
        "0" => Err(InstrumentError::Device(format!(
            "RF switch: {} failed",
            command
        ))),
        "2" => Err(InstrumentError::Device(format!(
            "RF switch: {} failed, 24V DC supply is disconnected",
            command
        ))),
        other => Err(InstrumentError::parse(other, "a switch status code 0, 1 or 2")),
    }
}

fn switch_index(switch: char) -> InstrResult<usize> {
    let letter = switch.to_ascii_uppercase();
    SWITCHES.iter().position(|s| *s == letter).ok_or_else(|| {
        InstrumentError::Validation(format!(
            "No switch {:?}, switches are A to H",
            switch
        ))
    })
}

pub struct RfSwitchBox {
    instrument: Instrument,
}

impl RfSwitchBox {
    pub fn properties() -> PropertyTable {
        PropertyTable::compose(&[PROPERTIES])
    }

    pub fn default_settings() -> AdapterSettings {
        AdapterSettings::default().with_terminations(TERMINATION)
    }

    pub fn new(adapter: Adapter) -> Self {
        let instrument = Instrument::new(NAME, adapter, Self::properties())
            .without_scpi()
            .with_acknowledgement(check_reply);
        RfSwitchBox { instrument }
    }

    pub fn connect(resource: &str) -> InstrResult<Self> {
        Ok(Self::new(Adapter::open(resource, Self::default_settings())?))
    }

    /// Connect the common port of `switch` to port 2 when `state` is set,
    /// to port 1 otherwise
    pub fn set_switch(&mut self, switch: char, state: bool) -> InstrResult<()> {
        let index = switch_index(switch)?;
        let args = CommandArgs::new().with("switch", SWITCHES[index]);
        self.instrument.set_with("switch", state, &args)
    }

    /// Every switch state, switch `A` in bit 0
    pub fn switches(&mut self) -> InstrResult<u8> {
        let mask = self.instrument.get_f64("switches", &CommandArgs::new())?;
        integral(mask)
            .and_then(|m| u8::try_from(m).ok())
            .ok_or_else(|| InstrumentError::parse(&mask.to_string(), "a switch bitmask 0 to 255"))
    }

    pub fn switch(&mut self, switch: char) -> InstrResult<bool> {
        let index = switch_index(switch)?;
        Ok(self.switches()? >> index & 1 == 1)
    }

    pub fn model(&mut self) -> InstrResult<String> {
        self.instrument.get_text("model", &CommandArgs::new())
    }

    pub fn serial_number(&mut self) -> InstrResult<String> {
        self.instrument.get_text("serial_number", &CommandArgs::new())
    }
}

impl InstrumentDriver for RfSwitchBox {
    fn instrument(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    /// Switches keep their state; only the connection is released
    fn shutdown(&mut self) -> InstrResult<()> {
        self.instrument.mark_shut_down();
        info!("Disconnecting {}", NAME);
        self.instrument.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;

    fn switch_box(mock: &MockTransport) -> RfSwitchBox {
        RfSwitchBox::new(Adapter::from_device(
            "TCPIP0::192.168.9.20::23::SOCKET",
            mock.boxed(),
            RfSwitchBox::default_settings(),
        ))
    }

    fn mock() -> MockTransport {
        MockTransport::new().with_reply_termination("\r\n")
    }

    #[test]
    fn set_switch_accepts_success_code() {
        let mock = mock();
        mock.respond_to("SETC=1", "1");
        let mut switch_box = switch_box(&mock);

        switch_box.set_switch('c', true).unwrap();
        assert_eq!(mock.written(), vec!["SETC=1".to_owned()]);
    }

    #[test]
    fn failure_codes_become_device_errors() {
        let mock = mock();
        mock.respond_to("SETA=0", "0");
        mock.respond_to("SETB=0", "2");
        let mut switch_box = switch_box(&mock);

        assert!(matches!(
            switch_box.set_switch('A', false),
            Err(InstrumentError::Device(_))
        ));
        match switch_box.set_switch('B', false) {
            Err(InstrumentError::Device(message)) => assert!(message.contains("24V")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_switch_is_rejected_locally() {
        let mock = mock();
        let mut switch_box = switch_box(&mock);

        assert!(matches!(
            switch_box.set_switch('J', true),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn switch_state_comes_from_bitmask() {
        let mock = mock();
        mock.respond_to("SWPORT?", "5");
        let mut switch_box = switch_box(&mock);

        assert!(switch_box.switch('A').unwrap());
        assert!(!switch_box.switch('B').unwrap());
        assert!(switch_box.switch('C').unwrap());
    }

    #[test]
    fn bitmask_out_of_range_is_a_parse_error() {
        let mock = mock();
        mock.respond_to("SWPORT?", "300");
        let mut switch_box = switch_box(&mock);

        assert!(matches!(
            switch_box.switches(),
            Err(InstrumentError::Parse { .. })
        ));
    }

    #[test]
    fn identity_strips_labels() {
        let mock = mock();
        mock.respond_to("MN?", "MN=RC-4SPDT-A18");
        mock.respond_to("SN?", "SN=11907140021");
        let mut switch_box = switch_box(&mock);

        assert_eq!(switch_box.model().unwrap(), "RC-4SPDT-A18");
        assert_eq!(switch_box.serial_number().unwrap(), "11907140021");
    }

    #[test]
    fn no_scpi_housekeeping() {
        let mock = mock();
        let mut switch_box = switch_box(&mock);

        assert!(switch_box.instrument().check_errors().unwrap().is_empty());
        switch_box.instrument().clear().unwrap();
        switch_box.instrument().reset().unwrap();
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn shutdown_releases_the_connection() {
        let mock = mock();
        let mut switch_box = switch_box(&mock);

        switch_box.shutdown().unwrap();
        assert_eq!(mock.close_count(), 1);
    }
}
