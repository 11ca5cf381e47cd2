use std::time::{Duration, Instant};

use clap::ValueEnum;
use instru::{
    Adapter, AdapterSettings, Choice, CommandArgs, Descriptor, Instrument, InstrumentError,
    MockTransport, Model, PropertyTable, Value,
};

static SWITCHED: [Choice; 2] = [Choice::new("ON", "ON"), Choice::new("OFF", "OFF")];

static BENCH: &[Descriptor] = &[
    Descriptor::float("voltage").unit("V").query("MEAS:VOLT?"),
    Descriptor::choice("output", &SWITCHED)
        .query("OUTP?")
        .command("OUTP {value}"),
];

fn bench(mock: &MockTransport, timeout: Duration) -> Instrument {
    let adapter = Adapter::from_device(
        "TCPIP0::bench::SOCKET",
        mock.boxed(),
        AdapterSettings::default().with_timeout(timeout),
    );
    Instrument::new("bench", adapter, PropertyTable::compose(&[BENCH]))
}

#[test]
fn voltage_reading_is_parsed() {
    let mock = MockTransport::new();
    mock.respond_to("MEAS:VOLT?", "1.234E+00");
    let mut instrument = bench(&mock, Duration::from_secs(1));

    let voltage = instrument.get_f64("voltage", &CommandArgs::new()).unwrap();
    assert!((voltage - 1.234).abs() < 1e-12);
}

#[test]
fn enumerated_value_outside_the_set_is_never_written() {
    let mock = MockTransport::new();
    let mut instrument = bench(&mock, Duration::from_secs(1));

    let result = instrument.set("output", "STANDBY");
    assert!(matches!(result, Err(InstrumentError::Validation(_))));
    assert_eq!(mock.write_count(), 0);

    instrument.set("output", "off").unwrap();
    assert_eq!(mock.written(), vec!["OUTP OFF".to_owned()]);
}

#[test]
fn slow_device_times_out_promptly() {
    let mock = MockTransport::new().with_latency(Duration::from_secs(2));
    mock.respond_to("MEAS:VOLT?", "1.0");
    let mut instrument = bench(&mock, Duration::from_millis(100));

    let started = Instant::now();
    let result = instrument.get("voltage");
    assert!(matches!(result, Err(InstrumentError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn close_twice_releases_once() {
    let mock = MockTransport::new();
    let mut adapter = Adapter::from_device("bench", mock.boxed(), AdapterSettings::default());

    adapter.close().unwrap();
    adapter.close().unwrap();
    assert!(!adapter.is_open());
    drop(adapter);
    assert_eq!(mock.close_count(), 1);
}

#[test]
fn closed_adapter_refuses_io() {
    let mock = MockTransport::new();
    let mut adapter = Adapter::from_device("bench", mock.boxed(), AdapterSettings::default());
    adapter.close().unwrap();

    assert!(matches!(
        adapter.write("*RST"),
        Err(InstrumentError::Connection(_))
    ));
}

#[test]
fn transport_write_failure_surfaces_as_communication() {
    let raw = MockTransport::new();
    let mut adapter = Adapter::from_device("bench", raw.boxed(), AdapterSettings::default());
    raw.fail_next_write();
    assert!(matches!(
        adapter.write("*CLS"),
        Err(InstrumentError::Communication(_))
    ));
    adapter.write("*CLS").unwrap();
    assert_eq!(raw.written(), vec!["*CLS".to_owned()]);

    let mock = MockTransport::new();
    mock.respond_to("MEAS:VOLT?", "2.5");
    let mut instrument = bench(&mock, Duration::from_secs(1));
    mock.fail_next_write();
    assert!(matches!(
        instrument.set("output", "on"),
        Err(InstrumentError::Communication(_))
    ));
    mock.fail_next_write();
    assert!(matches!(
        instrument.get("voltage"),
        Err(InstrumentError::Communication(_))
    ));
    assert!(mock.written().is_empty());

    assert_eq!(instrument.get_f64("voltage", &CommandArgs::new()).unwrap(), 2.5);
}

#[test]
fn late_reply_is_not_taken_for_the_next_answer() {
    let mock = MockTransport::new().with_latency(Duration::from_millis(150));
    mock.respond_to("MEAS:VOLT?", "1.0");
    mock.respond_to("SOUR1:FREQ?", "1000");
    let mut instrument = bench(&mock, Duration::from_millis(100));

    assert!(matches!(
        instrument.get("voltage"),
        Err(InstrumentError::Timeout(_))
    ));
    // the voltage reading arrives after the query gave up
    std::thread::sleep(Duration::from_millis(100));

    instrument.adapter().set_timeout(Duration::from_secs(1));
    assert_eq!(instrument.ask("SOUR1:FREQ?").unwrap(), "1000");
}

#[test]
fn slow_operation_complete_is_asked_once() {
    let mock = MockTransport::new().with_latency(Duration::from_millis(150));
    mock.respond_to("*OPC?", "1");
    mock.respond_to("SOUR1:FREQ?", "1000");
    let mut instrument = bench(&mock, Duration::from_millis(100));

    instrument
        .wait_for_operation_complete(Duration::from_secs(2))
        .unwrap();
    assert_eq!(mock.written(), vec!["*OPC?".to_owned()]);

    instrument.adapter().set_timeout(Duration::from_secs(1));
    assert_eq!(instrument.ask("SOUR1:FREQ?").unwrap(), "1000");
}

#[test]
fn operation_complete_gives_up_at_the_limit() {
    let mock = MockTransport::new().with_latency(Duration::from_secs(1));
    mock.respond_to("*OPC?", "1");
    let mut instrument = bench(&mock, Duration::from_millis(100));

    let result = instrument.wait_for_operation_complete(Duration::from_millis(300));
    assert!(matches!(result, Err(InstrumentError::Timeout(_))));
    assert_eq!(mock.write_count(), 1);
}

/// Set templates whose last command mirrors the query header, so an echoing
/// device answers the query with what was set
fn mirrors(descriptor: &Descriptor) -> bool {
    let (Some(query), Some(command)) = (descriptor.query_template(), descriptor.command_template())
    else {
        return false;
    };
    let Some(header) = query.strip_suffix('?') else {
        return false;
    };
    let last = command.rsplit(';').next().unwrap_or(command);
    last == format!("{} {{value}}", header) || last == format!("{} \"{{value}}\"", header)
}

fn in_domain_candidates(descriptor: &Descriptor) -> Vec<Value> {
    match descriptor.domain() {
        instru::property::Domain::Range { min, max } => {
            let mid = min + (max - min) / 2.0;
            vec![Value::Float(mid), Value::Float(mid.round())]
        }
        instru::property::Domain::Choices(choices) => {
            choices.iter().map(|c| Value::Text(c.name.to_owned())).collect()
        }
        instru::property::Domain::Any => vec![
            Value::Float(0.25),
            Value::Int(3),
            Value::Bool(true),
            Value::Text("sample".to_owned()),
        ],
    }
}

#[test]
fn every_mirrored_property_round_trips_on_every_model() {
    let args = CommandArgs::channel(1)
        .with("pulse", 1)
        .with("function", "VOLT")
        .with("buffer", "defbuffer1")
        .with("switch", "A")
        .with("line", 1)
        .with("marker", 1)
        .with("input", "ATR");

    for model in Model::value_variants() {
        let settings = model.default_settings();
        let mut mock =
            MockTransport::echo().with_reply_termination(&settings.read_termination);
        if matches!(model, Model::DrVe10Mo | Model::RfSwitchBox) {
            mock = mock.with_acknowledgement("1");
        }
        let adapter = Adapter::from_device("echo", mock.boxed(), settings);
        let mut driver = model.driver(adapter);

        let table = model.properties();
        for descriptor in table.iter().filter(|d| mirrors(d)) {
            let value = in_domain_candidates(descriptor)
                .into_iter()
                .find(|v| descriptor.encode(v).is_ok())
                .unwrap_or_else(|| panic!("no in-domain value for {}", descriptor.name()));

            driver
                .instrument()
                .set_with(descriptor.name(), value.clone(), &args)
                .unwrap_or_else(|e| panic!("{:?} set {}: {}", model, descriptor.name(), e));
            let read = driver
                .instrument()
                .get_with(descriptor.name(), &args)
                .unwrap_or_else(|e| panic!("{:?} get {}: {}", model, descriptor.name(), e));

            let expected = descriptor.validate(&value).unwrap();
            assert!(
                expected.approx_eq(&read, descriptor.numeric_tolerance())
                    || expected.to_string() == read.to_string(),
                "{:?} {}: set {:?}, read {:?}",
                model,
                descriptor.name(),
                expected,
                read
            );
        }
    }
}
