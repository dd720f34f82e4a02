mod settings;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use i2con_core::proto::{BusId, Command, Payload, Status, DEFAULT_PORT};
use i2con_core::{
    shutdown_channel, BusProvider, Client, ClientConfig, ClientError, Direction, MemoryBus, Server, ServerConfig,
};
use serde::Serialize;
use settings::Settings;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUS: BusId = 1;

#[derive(Parser)]
#[command(name = "i2con", version, about = "Remote I2C register access over TCP")]
struct Cli {
    /// Settings file; defaults to <config dir>/i2con/settings.json
    #[arg(long, global = true, env = "I2CON_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Serve the local I2C buses
    Serve(ServeArgs),
    /// Read a byte register
    Read8(Target),
    /// Read a word register
    Read16(Target),
    /// Write a byte register
    Write8(WriteArgs),
    /// Write a word register
    Write16(WriteArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<IpAddr>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Socket read/write timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Serve simulated devices instead of /dev/i2c-*, as BUS:ADDRESS
    #[arg(long, value_parser = parse_device)]
    simulate: Vec<(BusId, u16)>,
}

#[derive(Args)]
struct Connection {
    #[arg(short = 'H', long, env = "I2CON_HOST")]
    host: Option<String>,
    #[arg(short, long, allow_negative_numbers = true)]
    bus: Option<BusId>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Socket timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Print the reply as JSON
    #[arg(long)]
    json: bool,
    /// Print every frame exchanged
    #[arg(long)]
    trace: bool,
}

#[derive(Args)]
struct Target {
    #[command(flatten)]
    conn: Connection,
    #[arg(value_parser = parse_u16)]
    address: u16,
    #[arg(value_parser = parse_u8)]
    register: u8,
}

#[derive(Args)]
struct WriteArgs {
    #[command(flatten)]
    target: Target,
    #[arg(value_parser = parse_u16)]
    value: u16,
}

#[derive(Serialize)]
struct Outcome {
    command: Command,
    address: u16,
    register: u8,
    status: Status,
    payload: Payload,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.settings.as_deref())?;

    match cli.command {
        Cmd::Serve(args) => serve(args, &settings),
        Cmd::Read8(t) => transfer(Command::Read8, t, None, &settings),
        Cmd::Read16(t) => transfer(Command::Read16, t, None, &settings),
        Cmd::Write8(w) => {
            let value = u8::try_from(w.value).with_context(|| format!("{:#x} does not fit in a byte", w.value))?;
            transfer(Command::Write8, w.target, Some(Payload::Byte(value)), &settings)
        }
        Cmd::Write16(w) => transfer(Command::Write16, w.target, Some(Payload::Word(w.value)), &settings),
    }
}

fn serve(args: ServeArgs, settings: &Settings) -> Result<()> {
    let defaults = ServerConfig::default();
    let cfg = ServerConfig {
        bind: args.bind.or(settings.bind).unwrap_or(defaults.bind),
        port: args.port.or(settings.port).unwrap_or(DEFAULT_PORT),
        io_timeout: args.timeout.or(settings.timeout_secs).map(Duration::from_secs),
        ..defaults
    };

    if !args.simulate.is_empty() {
        let sim = args
            .simulate
            .iter()
            .fold(MemoryBus::new(), |sim, &(bus, address)| sim.with_device(bus, address));
        log::info!("simulating {} device(s)", args.simulate.len());
        return run_server(sim, cfg);
    }

    #[cfg(target_os = "linux")]
    {
        run_server(i2con_core::bus::linux::LinuxI2c::new(), cfg)
    }
    #[cfg(not(target_os = "linux"))]
    {
        bail!("hardware buses are only supported on Linux; use --simulate")
    }
}

fn run_server<P: BusProvider + 'static>(provider: P, cfg: ServerConfig) -> Result<()> {
    let addr = cfg.socket_addr();
    let server = Server::new(provider, cfg);
    // No remote stop; the process runs until killed.
    let (_shutdown, token) = shutdown_channel();
    server.run(&token).with_context(|| format!("serving on {addr}"))
}

fn transfer(command: Command, target: Target, payload: Option<Payload>, settings: &Settings) -> Result<()> {
    let conn = &target.conn;
    let Some(host) = conn.host.clone().or_else(|| settings.host.clone()) else {
        bail!("no host given; pass --host or set \"host\" in the settings file");
    };
    let bus = conn.bus.or(settings.bus).unwrap_or(DEFAULT_BUS);
    let cfg = ClientConfig {
        port: conn.port.or(settings.port).unwrap_or(DEFAULT_PORT),
        connect_timeout: conn.timeout.or(settings.timeout_secs).map(Duration::from_secs),
        io_timeout: conn.timeout.or(settings.timeout_secs).map(Duration::from_secs),
        transcript_capacity: if conn.trace { 16 } else { 0 },
        ..Default::default()
    };

    let mut client = Client::new(cfg);
    client.connect(&host, bus).with_context(|| format!("connecting to {host}"))?;

    let (address, register) = (target.address, target.register);
    let result = match (command, payload) {
        (Command::Read8, _) => client.read8(address, register).map(Payload::Byte),
        (Command::Read16, _) => client.read16(address, register).map(Payload::Word),
        (Command::Write8, Some(Payload::Byte(v))) => client.write8(address, register, v).map(|()| Payload::Byte(v)),
        (Command::Write16, Some(Payload::Word(v))) => client.write16(address, register, v).map(|()| Payload::Word(v)),
        _ => bail!("{command:?} is not a register transfer"),
    };
    client.disconnect();

    if let Some(log) = client.transcript() {
        for entry in log.entries() {
            let dir = match entry.direction {
                Direction::Tx => "TX",
                Direction::Rx => "RX",
            };
            eprintln!("[{}] {dir} {}", entry.timestamp, hex::encode_upper(entry.bytes));
        }
    }

    let (status, payload) = match result {
        Ok(payload) => (Status::Ok, payload),
        Err(ClientError::Status { status, .. }) => (status, Payload::Empty),
        Err(e) => return Err(e).context(format!("{command:?} {address:#04x}/{register:#04x}")),
    };

    if conn.json {
        let outcome = Outcome {
            command,
            address,
            register,
            status,
            payload,
        };
        println!("{}", serde_json::to_string(&outcome)?);
    } else if status.is_ok() {
        match payload {
            Payload::Byte(b) if !command.is_write() => println!("{b:#04x}"),
            Payload::Word(w) if !command.is_write() => println!("{w:#06x}"),
            _ => {}
        }
    }

    if !status.is_ok() {
        bail!("{command:?} {address:#04x}/{register:#04x} failed: {status}");
    }
    Ok(())
}

fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_number(s)?).map_err(|_| format!("{s} is out of range (max 0xffff)"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_number(s)?).map_err(|_| format!("{s} is out of range (max 0xff)"))
}

fn parse_device(s: &str) -> Result<(BusId, u16), String> {
    let (bus, address) = s.split_once(':').ok_or_else(|| format!("expected BUS:ADDRESS, got {s:?}"))?;
    let bus = bus.trim().parse::<BusId>().map_err(|e| format!("invalid bus {bus:?}: {e}"))?;
    Ok((bus, parse_u16(address)?))
}
