use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::adapter::{Adapter, AdapterSettings};
use crate::constants::{ERROR_QUEUE_LIMIT, OPC_POLL_INTERVAL_MS};
use crate::error::{InstrResult, InstrumentError};
use crate::property::{CommandArgs, Descriptor, PropertyTable, Value};
use crate::scpi::ScpiError;

/// Checks the reply an instrument sends back for every command.
/// Receives the command and the reply.
pub type AckCheck = fn(&str, &str) -> InstrResult<()>;

/// Typed facade over one adapter and a flat property table
#[derive(Debug)]
pub struct Instrument {
    name: String,
    adapter: Adapter,
    properties: PropertyTable,
    scpi: bool,
    acknowledge: Option<AckCheck>,
    shut_down: bool,
}

impl Instrument {
    pub fn new(name: impl Into<String>, adapter: Adapter, properties: PropertyTable) -> Self {
        let name = name.into();
        info!("Initializing {}", name);
        Instrument {
            name,
            adapter,
            properties,
            scpi: true,
            acknowledge: None,
            shut_down: false,
        }
    }

    /// Open `resource` and build the instrument on top of it
    pub fn connect(
        name: impl Into<String>,
        resource: &str,
        settings: AdapterSettings,
        properties: PropertyTable,
    ) -> InstrResult<Self> {
        let adapter = Adapter::open(resource, settings)?;
        Ok(Self::new(name, adapter, properties))
    }

    /// The instrument does not understand IEEE 488.2 common commands
    pub fn without_scpi(mut self) -> Self {
        self.scpi = false;
        self
    }

    /// Every command is answered; `check` inspects each answer
    pub fn with_acknowledgement(mut self, check: AckCheck) -> Self {
        self.acknowledge = Some(check);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub fn adapter(&mut self) -> &mut Adapter {
        &mut self.adapter
    }

    pub fn is_scpi(&self) -> bool {
        self.scpi
    }

    pub fn write(&mut self, command: &str) -> InstrResult<()> {
        match self.acknowledge {
            Some(check) => {
                let reply = self.adapter.query(command)?;
                check(command, reply.trim())
            }
            None => self.adapter.write(command),
        }
    }

    /// Query and return the trimmed response
    pub fn ask(&mut self, command: &str) -> InstrResult<String> {
        let reply = self.adapter.query(command)?;
        let reply = reply.trim();
        if let Some(check) = self.acknowledge {
            check(command, reply)?;
        }
        Ok(reply.to_owned())
    }

    pub fn read(&mut self) -> InstrResult<String> {
        self.adapter.read()
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> InstrResult<()> {
        self.adapter.write_raw(bytes)
    }

    pub fn values(&mut self, command: &str, separator: char) -> InstrResult<Vec<f64>> {
        self.adapter.values(command, separator)
    }

    fn readable(&self, name: &str) -> InstrResult<(&'static Descriptor, &'static str)> {
        let descriptor = self.properties.lookup(name)?;
        let template = descriptor.query_template().ok_or_else(|| {
            InstrumentError::Validation(format!("{} is write-only on {}", name, self.name))
        })?;
        Ok((descriptor, template))
    }

    fn settable(&self, name: &str) -> InstrResult<(&'static Descriptor, &'static str)> {
        let descriptor = self.properties.lookup(name)?;
        let template = descriptor.command_template().ok_or_else(|| {
            InstrumentError::Validation(format!("{} is read-only on {}", name, self.name))
        })?;
        Ok((descriptor, template))
    }

    pub fn get(&mut self, name: &str) -> InstrResult<Value> {
        self.get_with(name, &CommandArgs::new())
    }

    pub fn get_with(&mut self, name: &str, args: &CommandArgs) -> InstrResult<Value> {
        let (descriptor, template) = self.readable(name)?;
        let command = args.render(template, None)?;
        let response = self.ask(&command)?;
        let value = descriptor.decode(&response)?;
        debug!("{}.{} = {}", self.name, name, value);
        Ok(value)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> InstrResult<()> {
        self.set_with(name, value, &CommandArgs::new())
    }

    /// Validate `value` against the property domain, then send it. Nothing is
    /// written when validation fails.
    pub fn set_with(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        args: &CommandArgs,
    ) -> InstrResult<()> {
        let (descriptor, template) = self.settable(name)?;
        let encoded = descriptor.encode(&value.into())?;
        let command = args.render(template, Some(&encoded))?;
        self.write(&command)
    }

    pub fn get_f64(&mut self, name: &str, args: &CommandArgs) -> InstrResult<f64> {
        let value = self.get_with(name, args)?;
        value
            .as_f64()
            .ok_or_else(|| InstrumentError::parse(&value.to_string(), "a number"))
    }

    pub fn get_bool(&mut self, name: &str, args: &CommandArgs) -> InstrResult<bool> {
        let value = self.get_with(name, args)?;
        value
            .as_bool()
            .ok_or_else(|| InstrumentError::parse(&value.to_string(), "on/off"))
    }

    pub fn get_text(&mut self, name: &str, args: &CommandArgs) -> InstrResult<String> {
        match self.get_with(name, args)? {
            Value::Text(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }

    /// Set `set_property` to each of `values` in turn and read `read_property`
    /// after each step. Every value is validated before the first write and
    /// the sweep stops at the first failure.
    pub fn sweep<F>(
        &mut self,
        set_property: &str,
        values: &[f64],
        read_property: &str,
        args: &CommandArgs,
        mut on_step: F,
    ) -> InstrResult<Vec<(f64, Value)>>
    where
        F: FnMut(usize, f64, &Value),
    {
        let (setter, _) = self.settable(set_property)?;
        self.readable(read_property)?;
        for v in values {
            setter.validate(&Value::Float(*v))?;
        }

        let mut readings = Vec::with_capacity(values.len());
        for (step, v) in values.iter().enumerate() {
            self.set_with(set_property, *v, args)?;
            let reading = self.get_with(read_property, args)?;
            on_step(step, *v, &reading);
            readings.push((*v, reading));
        }
        Ok(readings)
    }

    fn require_scpi(&self, what: &str) -> InstrResult<()> {
        if self.scpi {
            Ok(())
        } else {
            Err(InstrumentError::Validation(format!(
                "{} does not support {}",
                self.name, what
            )))
        }
    }

    /// Identification string (`*IDN?`)
    pub fn id(&mut self) -> InstrResult<String> {
        self.require_scpi("*IDN?")?;
        self.ask("*IDN?")
    }

    /// Clear the status registers and error queue. A no-op without SCPI.
    pub fn clear(&mut self) -> InstrResult<()> {
        if !self.scpi {
            return Ok(());
        }
        self.write("*CLS")
    }

    /// A no-op without SCPI
    pub fn reset(&mut self) -> InstrResult<()> {
        if !self.scpi {
            return Ok(());
        }
        self.write("*RST")
    }

    /// Wait until the instrument reports completion or `limit` passes.
    ///
    /// `*OPC?` is only sent again once the previous one has been answered, so
    /// a slow reply never answers a later query.
    pub fn wait_for_operation_complete(&mut self, limit: Duration) -> InstrResult<()> {
        self.require_scpi("*OPC?")?;
        let deadline = Instant::now() + limit;
        self.adapter.write("*OPC?")?;
        loop {
            let answered = match self.adapter.read() {
                Ok(reply) if reply.trim().trim_start_matches('+') == "1" => return Ok(()),
                Ok(_) => true,
                Err(InstrumentError::Timeout(_)) => false,
                Err(e) => return Err(e),
            };
            if Instant::now() >= deadline {
                if !answered {
                    // Drop whatever part of the reply already arrived
                    self.adapter.flush()?;
                }
                warn!("{} still busy after {:?}", self.name, limit);
                return Err(InstrumentError::Timeout(limit));
            }
            if answered {
                std::thread::sleep(Duration::from_millis(OPC_POLL_INTERVAL_MS));
                self.adapter.write("*OPC?")?;
            }
        }
    }

    /// Pop one entry from the error queue (`SYST:ERR?`)
    pub fn next_error(&mut self) -> InstrResult<ScpiError> {
        self.require_scpi("SYST:ERR?")?;
        let reply = self.ask("SYST:ERR?")?;
        ScpiError::parse(&reply)
    }

    /// Drain the error queue and return everything it held
    pub fn check_errors(&mut self) -> InstrResult<Vec<ScpiError>> {
        if !self.scpi {
            return Ok(Vec::new());
        }

        let mut errors = Vec::new();
        for _ in 0..ERROR_QUEUE_LIMIT {
            let error = self.next_error()?;
            if !error.is_error() {
                return Ok(errors);
            }
            warn!("{} reported error {}", self.name, error);
            errors.push(error);
        }

        warn!(
            "{} error queue still not empty after {} reads",
            self.name, ERROR_QUEUE_LIMIT
        );
        Ok(errors)
    }

    /// Record that the instrument has been brought to a safe state
    pub fn mark_shut_down(&mut self) {
        self.shut_down = true;
        info!("Shutting down {}", self.name);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn close(&mut self) -> InstrResult<()> {
        self.adapter.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;
    use crate::property::Choice;
    use crate::scpi::COMMON;

    static MODES: [Choice; 2] = [Choice::new("fast", "FAST"), Choice::new("slow", "SLOW")];

    static BENCH: &[Descriptor] = &[
        Descriptor::float("voltage").query("MEAS:VOLT?"),
        Descriptor::float("level")
            .query("SOUR{channel}:LEV?")
            .command("SOUR{channel}:LEV {value}")
            .range(0.0, 10.0),
        Descriptor::choice("mode", &MODES).command("MODE {value}"),
    ];

    fn bench(mock: &MockTransport) -> Instrument {
        let adapter = Adapter::from_device("MOCK::INSTR", mock.boxed(), AdapterSettings::default());
        Instrument::new("Bench", adapter, PropertyTable::compose(&[COMMON, BENCH]))
    }

    #[test]
    fn get_renders_channel_and_parses() {
        let mock = MockTransport::echo();
        mock.store("SOUR2:LEV", "2.5");
        let mut instrument = bench(&mock);

        let value = instrument
            .get_f64("level", &CommandArgs::channel(2))
            .unwrap();
        assert_eq!(value, 2.5);
        assert_eq!(mock.written(), vec!["SOUR2:LEV?".to_owned()]);
    }

    #[test]
    fn access_direction_is_checked_before_io() {
        let mock = MockTransport::new();
        let mut instrument = bench(&mock);

        assert!(matches!(
            instrument.set("voltage", 1.0),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            instrument.get("mode"),
            Err(InstrumentError::Validation(_))
        ));
        assert!(matches!(
            instrument.get("nonexistent"),
            Err(InstrumentError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn acknowledgement_failure_becomes_device_error() {
        fn reject(command: &str, reply: &str) -> InstrResult<()> {
            if reply == "ERR" {
                Err(InstrumentError::Device(format!("{} was refused", command)))
            } else {
                Ok(())
            }
        }

        let mock = MockTransport::new().with_acknowledgement("ERR");
        let mut instrument = bench(&mock).with_acknowledgement(reject);

        assert!(matches!(
            instrument.set("mode", "fast"),
            Err(InstrumentError::Device(_))
        ));
        assert_eq!(mock.write_count(), 1);
    }

    #[test]
    fn sweep_validates_every_value_first() {
        let mock = MockTransport::echo();
        let mut instrument = bench(&mock);

        let result = instrument.sweep(
            "level",
            &[1.0, 5.0, 11.0],
            "level",
            &CommandArgs::channel(1),
            |_, _, _| {},
        );
        assert!(matches!(result, Err(InstrumentError::Validation(_))));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn sweep_collects_readings_in_order() {
        let mock = MockTransport::echo();
        let mut instrument = bench(&mock);
        let mut steps = Vec::new();

        let readings = instrument
            .sweep(
                "level",
                &[1.0, 2.0],
                "level",
                &CommandArgs::channel(1),
                |step, _, _| steps.push(step),
            )
            .unwrap();

        assert_eq!(
            readings,
            vec![(1.0, Value::Float(1.0)), (2.0, Value::Float(2.0))]
        );
        assert_eq!(steps, vec![0, 1]);
    }

    #[test]
    fn check_errors_drains_until_empty() {
        let mock = MockTransport::new();
        mock.push_response("-222,\"Data out of range\"");
        mock.push_response("-113,\"Undefined header\"");
        mock.push_response("+0,\"No error\"");
        let mut instrument = bench(&mock);

        let errors = instrument.check_errors().unwrap();
        assert_eq!(
            errors.iter().map(|e| e.code).collect::<Vec<_>>(),
            vec![-222, -113]
        );
        assert_eq!(mock.write_count(), 3);
    }

    #[test]
    fn instruments_without_scpi_refuse_id() {
        let mock = MockTransport::new();
        let mut instrument = bench(&mock).without_scpi();

        assert!(matches!(instrument.id(), Err(InstrumentError::Validation(_))));
        assert!(instrument.check_errors().unwrap().is_empty());
        assert!(instrument.clear().is_ok());
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn operation_complete_is_polled() {
        let mock = MockTransport::new();
        mock.push_response("0");
        mock.push_response("1");
        let mut instrument = bench(&mock);

        instrument
            .wait_for_operation_complete(Duration::from_secs(2))
            .unwrap();
        assert_eq!(mock.write_count(), 2);
    }
}
