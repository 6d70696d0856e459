//! Modbus RTU/TCP Protocol Engine
//!
//! Binary frame codec for both wire variants, a master issuing the eight
//! standard operations (async or blocking), and a slave serving a sparse
//! register store over TCP or a serial line.
//!
//! # Key Components
//!
//! - **codec**: PDU, RTU (CRC16) and TCP (MBAP) framing
//! - **framing**: receive state machine, silence-delimited RTU assembly
//! - **master**: `AsyncMaster` / `BlockingMaster` over a shared `Session`
//! - **slave**: `Slave`, `TcpSlaveServer`, `RtuSlaveServer`, callbacks
//! - **store**: auto-merging register segments
//!
//! # Features
//!
//! - `rtu` (default) - serial port support via `tokio-serial`

pub mod bit_ops;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod framing;
pub mod master;
pub mod pdu;
pub mod slave;
pub mod store;
pub mod timing;
pub mod transport;

// Re-exports
pub use error::{FrameError, ModbusError, ModbusResult, StoreError};
pub use pdu::{ExceptionCode, FrameKind, FunctionCode, Pdu, Request, Response};

pub use codec::{MbapCodec, RtuFrame, TcpFrame};
pub use config::{load_config, MasterConfig, SlaveConfig, TransportConfig};
pub use master::{AsyncMaster, BlockingMaster, Reply};
pub use slave::{CallbackRegistry, RtuSlaveServer, Slave, SlaveEvent, TcpSlaveServer};
pub use store::{RegisterBank, RegisterStore};
pub use timing::RtuTiming;
pub use transport::{AsyncLink, BlockingLink};
