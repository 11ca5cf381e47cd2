use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use instru::metadata::metadata_header;
use instru::{
    AdapterSettings, CommandArgs, InstrResult, InstrumentDriver, InstrumentError, Model, Value,
};
use serde::Serialize;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub(crate) struct ConnectionOptions {
    /// Instrument model
    #[arg(short, long)]
    model: Model,

    /// Resource string, e.g. TCPIP0::10.0.0.5::5025::SOCKET, ASRLCOM3::INSTR or a GPIB address
    #[arg(short, long)]
    resource: String,

    /// Read timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Appended to every command; \r and \n escapes are understood
    #[arg(long)]
    write_termination: Option<String>,

    /// Marks the end of every response; \r and \n escapes are understood
    #[arg(long)]
    read_termination: Option<String>,
}

fn unescape(termination: &str) -> String {
    termination.replace("\\r", "\r").replace("\\n", "\n")
}

impl ConnectionOptions {
    /// Model defaults, with whatever the command line overrides
    fn settings(&self) -> AdapterSettings {
        let mut settings = self.model.default_settings();
        if let Some(ms) = self.timeout_ms {
            settings = settings.with_timeout(Duration::from_millis(ms));
        }
        if let Some(baud) = self.baud {
            settings = settings.with_baud_rate(baud);
        }
        if let Some(termination) = &self.write_termination {
            settings = settings.with_write_termination(&unescape(termination));
        }
        if let Some(termination) = &self.read_termination {
            settings = settings.with_read_termination(&unescape(termination));
        }
        settings
    }

    fn connect(&self) -> InstrResult<Box<dyn InstrumentDriver>> {
        info!(
            "Connecting to {} at {}",
            self.model.display_name(),
            self.resource
        );
        self.model.connect(&self.resource, self.settings())
    }
}

#[derive(Args, Debug, Clone)]
pub(crate) struct PlaceholderOptions {
    /// Output or input channel
    #[arg(short, long)]
    channel: Option<u32>,

    /// Other command placeholders, e.g. --arg function=VOLT --arg buffer=defbuffer1
    #[arg(short, long = "arg", value_parser = parse_key_value)]
    args: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .ok_or_else(|| format!("expected key=value, got {:?}", s))
}

impl PlaceholderOptions {
    fn command_args(&self) -> CommandArgs {
        let mut args = match self.channel {
            Some(channel) => CommandArgs::channel(channel),
            None => CommandArgs::new(),
        };
        for (key, value) in &self.args {
            args = args.with(key, value);
        }
        args
    }
}

/// Integers first, then floats, anything else is text
fn parse_value(text: &str) -> Value {
    if let Ok(v) = text.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Text(text.to_owned())
}

#[derive(Args, Debug, Clone)]
pub(crate) struct QueryOptions {
    #[command(flatten)]
    connection: ConnectionOptions,

    /// Command text, e.g. "*IDN?"
    command: String,
}

pub(crate) fn handle_query(opts: QueryOptions) -> InstrResult<()> {
    let mut driver = opts.connection.connect()?;
    let response = driver.instrument().ask(&opts.command)?;
    println!("{}", response);
    Ok(())
}

#[derive(Args, Debug, Clone)]
pub(crate) struct WriteOptions {
    #[command(flatten)]
    connection: ConnectionOptions,

    /// Command text, e.g. "*RST"
    command: String,
}

pub(crate) fn handle_write(opts: WriteOptions) -> InstrResult<()> {
    let mut driver = opts.connection.connect()?;
    driver.instrument().write(&opts.command)
}

#[derive(Args, Debug, Clone)]
pub(crate) struct PropertyOptions {
    #[command(flatten)]
    connection: ConnectionOptions,

    #[command(flatten)]
    placeholders: PlaceholderOptions,

    /// Property name, see `list`
    property: String,
}

pub(crate) fn handle_get(opts: PropertyOptions) -> InstrResult<()> {
    let mut driver = opts.connection.connect()?;
    let args = opts.placeholders.command_args();
    let value = driver.instrument().get_with(&opts.property, &args)?;
    println!("{}", value);
    Ok(())
}

#[derive(Args, Debug, Clone)]
pub(crate) struct SetOptions {
    #[command(flatten)]
    connection: ConnectionOptions,

    #[command(flatten)]
    placeholders: PlaceholderOptions,

    /// Property name, see `list`
    property: String,

    /// New value
    value: String,
}

pub(crate) fn handle_set(opts: SetOptions) -> InstrResult<()> {
    let mut driver = opts.connection.connect()?;
    let args = opts.placeholders.command_args();
    driver
        .instrument()
        .set_with(&opts.property, parse_value(&opts.value), &args)
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ListOptions {
    /// Instrument model
    #[arg(short, long)]
    model: Model,
}

pub(crate) fn handle_list(opts: ListOptions) {
    println!("{}", opts.model.display_name());
    for descriptor in opts.model.properties().iter() {
        let access = match (descriptor.is_readable(), descriptor.is_settable()) {
            (true, true) => "rw",
            (true, false) => "r ",
            _ => " w",
        };
        println!(
            "  {} {:<24} {:<6} {}",
            access,
            descriptor.name(),
            descriptor.unit_name().unwrap_or(""),
            descriptor.domain()
        );
    }
}

#[derive(Args, Debug, Clone)]
pub(crate) struct SweepOptions {
    #[command(flatten)]
    connection: ConnectionOptions,

    #[command(flatten)]
    placeholders: PlaceholderOptions,

    /// Property stepped through the sweep
    #[arg(long)]
    set: String,

    /// Property read at every step
    #[arg(long)]
    read: String,

    #[arg(long)]
    start: f64,

    #[arg(long)]
    stop: f64,

    /// Number of points, both ends included
    #[arg(long, default_value_t = 11)]
    points: usize,

    /// Write the CSV here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct SweepMetadata<'a> {
    instrument: &'a str,
    resource: &'a str,
    set: &'a str,
    read: &'a str,
    points: usize,
}

fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

pub(crate) fn create_progress_bar(total_steps: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(total_steps);

    let style = ProgressStyle::default_bar()
        .template("[{spinner:.green} {elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(msg.to_owned());

    pb
}

pub(crate) fn handle_sweep(opts: SweepOptions) -> InstrResult<()> {
    if opts.points == 0 {
        return Err(InstrumentError::Validation(
            "A sweep needs at least one point".to_owned(),
        ));
    }

    let values = linspace(opts.start, opts.stop, opts.points);
    let mut driver = opts.connection.connect()?;
    let args = opts.placeholders.command_args();

    let pb = create_progress_bar(values.len() as u64, &format!("{} -> {}", opts.set, opts.read));
    let readings = driver
        .instrument()
        .sweep(&opts.set, &values, &opts.read, &args, |_, _, _| pb.inc(1));
    pb.finish();
    let readings = readings?;

    let mut csv = metadata_header(&SweepMetadata {
        instrument: opts.connection.model.display_name(),
        resource: &opts.connection.resource,
        set: &opts.set,
        read: &opts.read,
        points: values.len(),
    })?;
    csv.push_str(&format!("{},{}\n", opts.set, opts.read));
    for (setpoint, reading) in readings {
        csv.push_str(&format!("{},{}\n", setpoint, reading));
    }

    match opts.output {
        Some(path) => {
            fs::write(&path, csv).map_err(|e| {
                InstrumentError::Configuration(format!(
                    "Could not write {}: {}",
                    path.display(),
                    e
                ))
            })?;
            info!("Sweep written to {}", path.display());
        }
        None => print!("{}", csv),
    }
    Ok(())
}

pub(crate) fn handle_errors(opts: ConnectionOptions) -> InstrResult<()> {
    let mut driver = opts.connect()?;
    let errors = driver.instrument().check_errors()?;
    if errors.is_empty() {
        println!("No error");
    }
    for error in errors {
        println!("{}", error);
    }
    Ok(())
}

pub(crate) fn handle_ports() -> InstrResult<()> {
    let ports = serialport::available_ports().map_err(|e| {
        InstrumentError::Connection(format!("Could not get available ports. Err {:?}", e))
    })?;

    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(info) => println!(
                "ASRL{}::INSTR  usb {:04x}:{:04x} {}",
                port.port_name,
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            _ => println!("ASRL{}::INSTR", port.port_name),
        }
    }
    Ok(())
}
