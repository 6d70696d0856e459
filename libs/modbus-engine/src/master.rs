//! Modbus master (client)
//!
//! Both flavours issue the eight standard operations over either wire
//! variant and differ only in how they wait:
//!
//! - [`AsyncMaster`] suspends at link reads/writes (tokio)
//! - [`BlockingMaster`] blocks the calling thread
//!
//! Failures come back as [`ModbusError`](crate::error::ModbusError):
//! `Timeout` and `FrameCorrupt` both mean the peer is taken not to have
//! replied, `Exception` carries the peer's exception code, and
//! `InvalidArgument` is raised before anything is sent. There is no retry.

pub mod async_master;
pub mod blocking;
pub mod session;

pub use async_master::AsyncMaster;
pub use blocking::BlockingMaster;
pub use session::{Outgoing, Reply, Session};
