use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use adblink_auth::KeyStore;
use adblink_channel::TcpChannel;
use adblink_conn::{ConnectConfig, Connection};

use crate::exit::{auth_error, channel_error, conn_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod exec;
pub mod keygen;
pub mod shell;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open an interactive shell on a device.
    Shell(ShellArgs),
    /// Run one command on a device and capture its output.
    Exec(ExecArgs),
    /// Generate or inspect the persisted authentication key pair.
    Keygen(KeygenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Shell(args) => shell::run(args),
        Command::Exec(args) => exec::run(args, format),
        Command::Keygen(args) => keygen::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Device address, host:port (network ADB).
    #[arg(short = 'a', long, value_name = "ADDR", required_unless_present = "usb")]
    pub addr: Option<String>,
    /// Connect over USB instead of TCP (requires the `usb` build feature).
    #[arg(long)]
    pub usb: bool,
    /// Handshake timeout (e.g. 30s, 500ms). The public-key path waits for a
    /// human to approve a prompt on the device.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Directory holding the persisted key pair.
    #[arg(long, env = "ADBLINK_KEY_DIR", value_name = "DIR")]
    pub key_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ShellArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// The command to run, e.g. `pm list packages`.
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Directory holding the persisted key pair.
    #[arg(long, env = "ADBLINK_KEY_DIR", value_name = "DIR")]
    pub key_dir: Option<PathBuf>,
    /// Discard any existing pair and generate a new one.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Establish and authenticate a connection per the shared connect flags.
pub(crate) fn establish(args: &ConnectArgs) -> CliResult<Connection> {
    let timeout = parse_duration(&args.timeout)?;
    let store = KeyStore::in_dir(resolve_key_dir(args.key_dir.clone()));
    let keypair = store
        .load_or_generate()
        .map_err(|err| auth_error("key setup failed", err))?;
    let config = ConnectConfig::default().with_connect_timeout(timeout);

    let connection = if args.usb {
        establish_usb(keypair, config)?
    } else {
        let addr = args
            .addr
            .as_deref()
            .ok_or_else(|| CliError::new(USAGE, "an address is required without --usb"))?;
        let channel =
            TcpChannel::connect(addr).map_err(|err| channel_error("connect failed", err))?;
        Connection::with_config(channel, keypair, config)
    };

    connection
        .connect()
        .map_err(|err| conn_error("handshake failed", err))?;
    Ok(connection)
}

#[cfg(feature = "usb")]
fn establish_usb(
    keypair: adblink_auth::AdbKeyPair,
    config: ConnectConfig,
) -> CliResult<Connection> {
    use adblink_channel::{RusbBackend, UsbChannel};

    let backend =
        RusbBackend::open_first().map_err(|err| channel_error("no usb device", err))?;
    Ok(Connection::with_config(
        UsbChannel::new(backend),
        keypair,
        config,
    ))
}

#[cfg(not(feature = "usb"))]
fn establish_usb(
    _keypair: adblink_auth::AdbKeyPair,
    _config: ConnectConfig,
) -> CliResult<Connection> {
    Err(CliError::new(
        USAGE,
        "this build has no usb support (rebuild with --features usb)",
    ))
}

pub(crate) fn resolve_key_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".adblink"),
        None => PathBuf::from(".adblink"),
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
