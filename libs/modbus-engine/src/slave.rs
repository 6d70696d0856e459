//! Modbus slave (server)
//!
//! [`Slave`] answers requests from its [`RegisterStore`](crate::store::RegisterStore);
//! [`TcpSlaveServer`] and [`RtuSlaveServer`] drive it from a network or serial
//! link. Applied requests can be observed through [`CallbackRegistry`].

pub mod callbacks;
pub mod handler;
pub mod rtu_server;
pub mod tcp_server;

pub use callbacks::{event_channel, spawn_dispatcher, Callback, CallbackRegistry, SlaveEvent};
pub use handler::Slave;
pub use rtu_server::RtuSlaveServer;
pub use tcp_server::TcpSlaveServer;
