use clap::{ArgAction, Parser, Subcommand};
use commands::{
    ConnectionOptions, ListOptions, PropertyOptions, QueryOptions, SetOptions, SweepOptions,
    WriteOptions,
};
use instru::InstrResult;
use tracing::Level;

mod commands;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Send a command and print the response
    #[command(name = "query", alias = "q")]
    Query(QueryOptions),

    /// Send a command without reading a response
    #[command(name = "write", alias = "w")]
    Write(WriteOptions),

    /// Read a named property
    #[command(name = "get")]
    Get(PropertyOptions),

    /// Validate and write a named property
    #[command(name = "set")]
    Set(SetOptions),

    /// List the properties a model supports
    #[command(name = "list", alias = "ls")]
    List(ListOptions),

    /// Step one property and read another at each step, as CSV
    #[command(name = "sweep")]
    Sweep(SweepOptions),

    /// Drain and print the instrument error queue
    #[command(name = "errors")]
    Errors(ConnectionOptions),

    /// List serial ports present on this machine
    #[command(name = "ports")]
    Ports,
}

fn main() -> InstrResult<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Query(opts) => commands::handle_query(opts)?,
        Command::Write(opts) => commands::handle_write(opts)?,
        Command::Get(opts) => commands::handle_get(opts)?,
        Command::Set(opts) => commands::handle_set(opts)?,
        Command::List(opts) => commands::handle_list(opts),
        Command::Sweep(opts) => commands::handle_sweep(opts)?,
        Command::Errors(opts) => commands::handle_errors(opts)?,
        Command::Ports => commands::handle_ports()?,
    }

    Ok(())
}
