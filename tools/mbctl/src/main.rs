//! mbctl - Modbus command-line master and slave
//!
//! Master commands issue a single request and print the result; `serve`
//! runs a slave from a register map until Ctrl+C.

mod client;
mod logging;
mod serve;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;

use modbus_engine::FunctionCode;

/// Environment prefix for config overrides, e.g. `MBCTL_TIMEOUT_MS=500`
pub const ENV_PREFIX: &str = "MBCTL_";

#[derive(Parser)]
#[command(name = "mbctl")]
#[command(about = "Modbus RTU/TCP master and slave")]
#[command(
    long_about = "Issue Modbus requests against a device or serve a register map as a slave.\n\
    Link settings come from --config (yaml/toml/json) and MBCTL_* environment\n\
    variables, then command-line flags."
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Configuration file (master or slave, depending on the command)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,
}

/// Link and addressing options shared by the master commands
#[derive(Args, Debug, Clone, Default)]
pub struct LinkArgs {
    /// TCP host
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Serial device; selects RTU
    #[arg(long)]
    pub serial: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Unit id to address (0 broadcasts on RTU)
    #[arg(short, long)]
    pub unit: Option<u8>,

    /// Response timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Coils,
    Discrete,
    Holding,
    Input,
}

impl Table {
    pub fn function(self) -> FunctionCode {
        match self {
            Table::Coils => FunctionCode::ReadCoils,
            Table::Discrete => FunctionCode::ReadDiscreteInputs,
            Table::Holding => FunctionCode::ReadHoldingRegisters,
            Table::Input => FunctionCode::ReadInputRegisters,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Read coils, discrete inputs, holding or input registers")]
    Read {
        #[arg(value_enum)]
        table: Table,

        /// Start address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u16)]
        address: u16,

        #[arg(default_value_t = 1)]
        quantity: u16,

        #[command(flatten)]
        link: LinkArgs,
    },

    #[command(about = "Write a single coil")]
    WriteCoil {
        #[arg(value_parser = parse_u16)]
        address: u16,

        #[arg(value_parser = parse_bool, action = clap::ArgAction::Set)]
        value: bool,

        #[command(flatten)]
        link: LinkArgs,
    },

    #[command(about = "Write a single holding register")]
    WriteRegister {
        #[arg(value_parser = parse_u16)]
        address: u16,

        #[arg(value_parser = parse_u16)]
        value: u16,

        #[command(flatten)]
        link: LinkArgs,
    },

    #[command(about = "Write consecutive coils, e.g. 1,0,1")]
    WriteCoils {
        #[arg(value_parser = parse_u16)]
        address: u16,

        #[arg(value_delimiter = ',', value_parser = parse_bool, required = true)]
        values: Vec<bool>,

        #[command(flatten)]
        link: LinkArgs,
    },

    #[command(about = "Write consecutive holding registers, e.g. 10,0x20,30")]
    WriteRegisters {
        #[arg(value_parser = parse_u16)]
        address: u16,

        #[arg(value_delimiter = ',', value_parser = parse_u16, required = true)]
        values: Vec<u16>,

        #[command(flatten)]
        link: LinkArgs,
    },

    #[command(about = "Serve a register map as a Modbus slave")]
    Serve {
        /// Override the configured unit id
        #[arg(short, long)]
        unit: Option<u8>,

        /// Override the configured TCP port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid 16-bit value '{s}': {e}"))
}

fn parse_bool(s: &str) -> std::result::Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(format!("invalid coil value '{s}' (expected 1/0, on/off, true/false)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Serve { unit, port } => {
            let config = serve::load(cli.config.as_deref(), unit, port)?;
            let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
            logging::init(level, !cli.no_color);
            serve::run(config).await
        },
        command => {
            let config = client::load(cli.config.as_deref())?;
            let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
            logging::init(level, !cli.no_color);
            client::run(config, command).await
        },
    };

    if let Err(e) = &result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
