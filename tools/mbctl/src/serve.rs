//! `serve` command: run a slave until Ctrl+C

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use modbus_engine::slave::{event_channel, spawn_dispatcher};
use modbus_engine::{
    load_config, CallbackRegistry, FunctionCode, Slave, SlaveConfig, SlaveEvent, TcpSlaveServer,
    TransportConfig,
};

use crate::ENV_PREFIX;

pub fn load(path: Option<&Path>, unit: Option<u8>, port: Option<u16>) -> Result<SlaveConfig> {
    let mut config: SlaveConfig = match path {
        Some(path) => load_config(path, ENV_PREFIX)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SlaveConfig::default(),
    };
    if let Some(unit) = unit {
        config.unit_id = unit;
    }
    if let (Some(port), TransportConfig::Tcp(tcp)) = (port, &mut config.transport) {
        tcp.port = port;
    }
    Ok(config)
}

fn print_event(event: &SlaveEvent) {
    println!(
        "{} unit {} {} @0x{:04X} x{}",
        "write".yellow(),
        event.unit_id,
        event.function,
        event.address,
        event.quantity
    );
}

/// Echo every applied write on stdout
fn write_echo() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    for function in FunctionCode::ALL.into_iter().filter(|f| !f.is_read()) {
        registry.on(function, print_event);
    }
    registry
}

pub async fn run(config: SlaveConfig) -> Result<()> {
    let store = config.build_store().context("Invalid register map")?;
    let (events, rx) = event_channel(config.event_queue);
    let dispatcher = spawn_dispatcher(write_echo(), rx);
    let slave = Slave::new(config.unit_id, store).with_events(events);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received, shutting down"),
            Err(e) => warn!("Signal handler failed: {}", e),
        }
        ctrl_c.cancel();
    });

    let slave = match &config.transport {
        TransportConfig::Tcp(tcp) => {
            let listener = TcpListener::bind(tcp.address())
                .await
                .with_context(|| format!("Failed to bind {}", tcp.address()))?;
            println!(
                "{} unit {} on tcp://{}",
                "Serving".bright_green().bold(),
                config.unit_id,
                tcp.address()
            );
            TcpSlaveServer::new(slave).run(listener, shutdown).await?
        },
        #[cfg(feature = "rtu")]
        TransportConfig::Rtu(serial) => {
            let timing = serial.timing()?;
            let port = modbus_engine::transport::open_serial(serial)?;
            println!(
                "{} unit {} on {} @{}baud",
                "Serving".bright_green().bold(),
                config.unit_id,
                serial.port,
                serial.baud_rate
            );
            modbus_engine::RtuSlaveServer::new(slave, timing)
                .run(port, shutdown)
                .await?
        },
        #[cfg(not(feature = "rtu"))]
        TransportConfig::Rtu(_) => anyhow::bail!("built without serial support"),
    };

    // the last event sender goes with the slave
    drop(slave);
    dispatcher.await.context("Callback dispatcher panicked")?;
    Ok(())
}
