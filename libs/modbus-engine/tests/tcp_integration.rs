//! TCP Master/Slave Integration Tests
//!
//! A `TcpSlaveServer` on a loopback socket, driven by:
//! - `AsyncMaster` over a tokio `TcpStream`
//! - `BlockingMaster` over a std `TcpStream` on a blocking thread
//! - Raw frames a master would refuse to build
//! - Callback dispatch for applied writes

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use modbus_engine::config::TcpConfig;
use modbus_engine::slave::{event_channel, spawn_dispatcher};
use modbus_engine::transport::{connect_tcp, connect_tcp_blocking};
use modbus_engine::{
    AsyncMaster, BlockingMaster, CallbackRegistry, ExceptionCode, FunctionCode, ModbusError,
    ModbusResult, RegisterStore, Slave, SlaveEvent, TcpSlaveServer,
};

const TIMEOUT: Duration = Duration::from_millis(500);

fn test_store() -> RegisterStore {
    let mut store = RegisterStore::new();
    store.holding_registers.add(0x0010, &[100, 200]).unwrap();
    store.holding_registers.add(0x1000, &[0; 123]).unwrap();
    store.coils.add(0, &[false; 16]).unwrap();
    store
}

async fn start_server(
    slave: Slave,
) -> (SocketAddr, CancellationToken, JoinHandle<ModbusResult<Slave>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(TcpSlaveServer::new(slave).run(listener, shutdown.clone()));
    (addr, shutdown, handle)
}

fn tcp_config(addr: SocketAddr) -> TcpConfig {
    TcpConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}

// ============================================================================
// Async master
// ============================================================================

#[tokio::test]
async fn test_async_master_scenarios() {
    let (addr, shutdown, handle) = start_server(Slave::new(1, test_store())).await;
    let stream = connect_tcp(&tcp_config(addr), TIMEOUT).await.unwrap();
    let mut master = AsyncMaster::tcp(stream, TIMEOUT);

    // defined registers read back in order
    assert_eq!(
        master.read_holding_registers(1, 0x0010, 2).await.unwrap(),
        vec![100, 200]
    );

    // partially defined range
    let err = master.read_holding_registers(1, 0x0011, 2).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));

    // no coil at 20
    let err = master.write_single_coil(1, 20, true).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception {
            function: FunctionCode::WriteSingleCoil,
            code: ExceptionCode::IllegalDataAddress,
        }
    ));

    // largest multi-register write
    let values: Vec<u16> = (0..123).map(|i| i * 3).collect();
    assert_eq!(
        master.write_multiple_registers(1, 0x1000, &values).await.unwrap(),
        123
    );
    assert_eq!(
        master.read_holding_registers(1, 0x1000, 123).await.unwrap(),
        values
    );

    // unit 0xFF addresses the server itself
    assert_eq!(
        master.read_holding_registers(0xFF, 0x0010, 1).await.unwrap(),
        vec![100]
    );

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_async_master_other_unit_times_out() {
    let (addr, shutdown, handle) = start_server(Slave::new(1, test_store())).await;
    let stream = connect_tcp(&tcp_config(addr), TIMEOUT).await.unwrap();
    let mut master = AsyncMaster::tcp(stream, Duration::from_millis(100));

    let err = master.read_coils(9, 0, 8).await.unwrap_err();
    assert!(matches!(err, ModbusError::Timeout(_)));

    // next request on the same connection still succeeds
    assert_eq!(master.read_coils(1, 0, 2).await.unwrap(), vec![false, false]);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = connect_tcp(&tcp_config(addr), TIMEOUT).await.unwrap_err();
    assert!(err.needs_reconnect());
}

// ============================================================================
// Raw frames
// ============================================================================

#[tokio::test]
async fn test_over_quantity_write_gets_exception_3() {
    let (addr, shutdown, handle) = start_server(Slave::new(1, test_store())).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // FC16 for 124 registers at 0x1000: MBAP length 0x00FF
    let mut request = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0xFF, 0x01];
    request.extend_from_slice(&[0x10, 0x10, 0x00, 0x00, 0x7C, 0xF8]);
    request.extend_from_slice(&[0u8; 248]);
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 9];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x90, 0x03]);

    // the connection survives and serves the next request
    let mut master = AsyncMaster::tcp(stream, TIMEOUT);
    assert_eq!(master.read_holding_registers(1, 0x1000, 1).await.unwrap(), vec![0]);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

// ============================================================================
// Blocking master
// ============================================================================

#[tokio::test]
async fn test_blocking_master() {
    let (addr, shutdown, handle) = start_server(Slave::new(3, test_store())).await;

    let results = tokio::task::spawn_blocking(move || {
        let stream = connect_tcp_blocking(&tcp_config(addr), TIMEOUT).unwrap();
        let mut master = BlockingMaster::tcp(stream, TIMEOUT);

        let written = master
            .write_multiple_coils(3, 0, &[true, false, true, true])
            .unwrap();
        let coils = master.read_coils(3, 0, 4).unwrap();
        let register = master.write_single_register(3, 0x0011, 7).unwrap();
        let err = master.write_single_register(3, 0x0012, 7).unwrap_err();
        (written, coils, register, err)
    })
    .await
    .unwrap();

    assert_eq!(results.0, 4);
    assert_eq!(results.1, vec![true, false, true, true]);
    assert_eq!(results.2, 7);
    assert_eq!(results.3.exception_code(), Some(ExceptionCode::IllegalDataAddress));

    shutdown.cancel();
    let slave = handle.await.unwrap().unwrap();
    assert_eq!(slave.store().holding_registers.get_one(0x0011), Some(7));
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn test_callbacks_run_after_apply() {
    let seen: Arc<Mutex<Vec<SlaveEvent>>> = Arc::default();
    let mut registry = CallbackRegistry::new();
    let sink = seen.clone();
    registry.on(FunctionCode::WriteSingleCoil, move |event| {
        sink.lock().unwrap().push(*event);
    });

    let (tx, rx) = event_channel(16);
    let dispatcher = spawn_dispatcher(registry, rx);
    let (addr, shutdown, handle) = start_server(Slave::new(1, test_store()).with_events(tx)).await;

    let stream = connect_tcp(&tcp_config(addr), TIMEOUT).await.unwrap();
    let mut master = AsyncMaster::tcp(stream, TIMEOUT);
    master.write_single_coil(1, 3, true).await.unwrap();
    // rejected writes produce no event
    master.write_single_coil(1, 99, true).await.unwrap_err();
    master.read_coils(1, 0, 4).await.unwrap();

    shutdown.cancel();
    // dropping the slave closes the event channel and stops the dispatcher
    drop(handle.await.unwrap().unwrap());
    dispatcher.await.unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(
        *events,
        vec![SlaveEvent {
            unit_id: 1,
            function: FunctionCode::WriteSingleCoil,
            address: 3,
            quantity: 1,
        }]
    );
}
