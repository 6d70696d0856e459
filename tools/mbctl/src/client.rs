//! Master commands

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;
use tracing::debug;

use modbus_engine::config::{SerialConfig, TcpConfig};
use modbus_engine::framing::WireFormat;
use modbus_engine::transport::connect_tcp;
use modbus_engine::{load_config, AsyncLink, AsyncMaster, MasterConfig, Request, TransportConfig};

use crate::{Commands, LinkArgs, Table, ENV_PREFIX};

pub fn load(path: Option<&Path>) -> Result<MasterConfig> {
    match path {
        Some(path) => load_config(path, ENV_PREFIX)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(MasterConfig::default()),
    }
}

/// Fold command-line link flags over the loaded configuration
pub fn apply_link_args(config: &mut MasterConfig, link: &LinkArgs) {
    if let Some(port) = &link.serial {
        let mut serial = match &config.transport {
            TransportConfig::Rtu(existing) => existing.clone(),
            TransportConfig::Tcp(_) => SerialConfig {
                port: port.clone(),
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Default::default(),
            },
        };
        serial.port = port.clone();
        config.transport = TransportConfig::Rtu(serial);
    } else if link.host.is_some() || link.port.is_some() {
        if let TransportConfig::Rtu(_) = config.transport {
            config.transport = TransportConfig::Tcp(TcpConfig::default());
        }
    }

    match &mut config.transport {
        TransportConfig::Tcp(tcp) => {
            if let Some(host) = &link.host {
                tcp.host = host.clone();
            }
            if let Some(port) = link.port {
                tcp.port = port;
            }
        },
        TransportConfig::Rtu(serial) => {
            if let Some(baud) = link.baud {
                serial.baud_rate = baud;
            }
        },
    }

    if let Some(unit) = link.unit {
        config.unit_id = unit;
    }
    if let Some(timeout) = link.timeout {
        config.timeout_ms = timeout;
    }
}

/// The request a master command issues, plus its link flags
fn request_for(command: Commands) -> Result<(Request, LinkArgs)> {
    let pair = match command {
        Commands::Read {
            table,
            address,
            quantity,
            link,
        } => {
            let request = Request::read(table.function(), address, quantity)
                .context("not a read function")?;
            (request, link)
        },
        Commands::WriteCoil {
            address,
            value,
            link,
        } => (Request::write_single_coil(address, value), link),
        Commands::WriteRegister {
            address,
            value,
            link,
        } => (Request::write_single_register(address, value), link),
        Commands::WriteCoils {
            address,
            values,
            link,
        } => (Request::write_multiple_coils(address, &values), link),
        Commands::WriteRegisters {
            address,
            values,
            link,
        } => (Request::write_multiple_registers(address, &values), link),
        Commands::Serve { .. } => anyhow::bail!("serve is not a master command"),
    };
    Ok(pair)
}

pub async fn run(mut config: MasterConfig, command: Commands) -> Result<()> {
    let table = match &command {
        Commands::Read { table, .. } => Some(*table),
        _ => None,
    };
    let (request, link) = request_for(command)?;
    apply_link_args(&mut config, &link);
    debug!("Master config: {:?}", config);

    let timeout = config.timeout();
    match &config.transport {
        TransportConfig::Tcp(tcp) => {
            let stream = connect_tcp(tcp, timeout).await?;
            let master = AsyncMaster::tcp(stream, timeout);
            issue(master, config.unit_id, request, table).await
        },
        #[cfg(feature = "rtu")]
        TransportConfig::Rtu(serial) => {
            let port = modbus_engine::transport::open_serial(serial)?;
            let master = AsyncMaster::rtu(port, serial.timing()?, timeout);
            issue(master, config.unit_id, request, table).await
        },
        #[cfg(not(feature = "rtu"))]
        TransportConfig::Rtu(_) => anyhow::bail!("built without serial support"),
    }
}

async fn issue<L: AsyncLink>(
    mut master: AsyncMaster<L>,
    unit_id: u8,
    request: Request,
    table: Option<Table>,
) -> Result<()> {
    let start = request.address();
    let reply = master.execute(unit_id, request).await?;

    match table {
        Some(Table::Coils) | Some(Table::Discrete) => {
            for (offset, bit) in reply.into_bits()?.into_iter().enumerate() {
                let value = if bit { "ON".green() } else { "OFF".dimmed() };
                println!("{}  {}", address_label(start, offset), value);
            }
        },
        Some(Table::Holding) | Some(Table::Input) => {
            for (offset, word) in reply.into_registers()?.into_iter().enumerate() {
                println!(
                    "{}  {:>5}  {}",
                    address_label(start, offset),
                    word,
                    format!("(0x{word:04X})").as_str().dimmed()
                );
            }
        },
        None => {
            if unit_id == 0 && master.format() == WireFormat::Rtu {
                println!("{} broadcast sent", "✓".green());
            } else {
                println!("{} {:?}", "✓".green(), reply);
            }
        },
    }
    Ok(())
}

fn address_label(start: u16, offset: usize) -> ColoredString {
    let address = start as usize + offset;
    format!("0x{address:04X}").as_str().bright_cyan()
}
