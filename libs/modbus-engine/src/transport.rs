//! Byte transports used by the masters and the RTU slave
//!
//! A link only moves bytes; framing lives in [`crate::framing`]. Receives are
//! deadline-based: a receive that hits the deadline returns `Ok(0)` rather
//! than an error, and the caller decides what a missing frame means.

use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::TcpConfig;
use crate::error::{ModbusError, ModbusResult};

#[cfg(feature = "rtu")]
use crate::config::{Parity, SerialConfig};
#[cfg(feature = "rtu")]
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Cooperative byte link; suspends only inside `send`/`receive`
#[async_trait]
pub trait AsyncLink: Send {
    async fn send(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Read whatever has arrived, waiting no later than `deadline`
    async fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> ModbusResult<usize>;

    /// Drop unread input, returning the number of bytes discarded
    async fn discard_input(&mut self) -> ModbusResult<usize>;
}

#[async_trait]
impl<T> AsyncLink for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.write_all(data).await.map_err(|e| {
            error!("TX: {}", e);
            ModbusError::from(e)
        })?;
        self.flush().await?;
        debug!("TX: {}B", data.len());
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> ModbusResult<usize> {
        match timeout_at(deadline.into(), self.read(buf)).await {
            Ok(Ok(0)) => Err(ModbusError::ConnectionClosed),
            Ok(Ok(n)) => {
                debug!("RX: {}B", n);
                Ok(n)
            },
            Ok(Err(e)) => {
                error!("RX: {}", e);
                Err(e.into())
            },
            Err(_) => Ok(0),
        }
    }

    async fn discard_input(&mut self) -> ModbusResult<usize> {
        let mut scratch = [0u8; 256];
        let mut total = 0;
        // timeout polls the read once before checking the zero deadline
        while let Ok(Ok(n)) = timeout(Duration::ZERO, self.read(&mut scratch)).await {
            if n == 0 {
                break;
            }
            total += n;
        }
        if total > 0 {
            debug!("Discarded {}B stale input", total);
        }
        Ok(total)
    }
}

/// Blocking byte link; the calling thread waits inside `send`/`receive`
pub trait BlockingLink {
    fn send(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Read whatever has arrived, blocking no later than `deadline`
    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> ModbusResult<usize>;

    /// Bytes that can be read without blocking
    fn bytes_available(&mut self) -> ModbusResult<usize>;

    /// Drop unread input, returning the number of bytes discarded
    fn discard_input(&mut self) -> ModbusResult<usize> {
        let mut scratch = [0u8; 256];
        let mut total = 0;
        while self.bytes_available()? > 0 {
            let n = self.receive(&mut scratch, Instant::now())?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    (!left.is_zero()).then_some(left)
}

impl BlockingLink for std::net::TcpStream {
    fn send(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.write_all(data)?;
        self.flush()?;
        debug!("TCP TX: {}B", data.len());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> ModbusResult<usize> {
        let Some(left) = remaining(deadline) else {
            return if self.bytes_available()? > 0 {
                Ok(self.read(buf)?)
            } else {
                Ok(0)
            };
        };
        self.set_read_timeout(Some(left))?;
        match self.read(buf) {
            Ok(0) => Err(ModbusError::ConnectionClosed),
            Ok(n) => {
                debug!("TCP RX: {}B", n);
                Ok(n)
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(0)
            },
            Err(e) => Err(e.into()),
        }
    }

    fn bytes_available(&mut self) -> ModbusResult<usize> {
        let mut peeked_bytes = [0u8; 270];
        self.set_nonblocking(true)?;
        let peeked = self.peek(&mut peeked_bytes);
        self.set_nonblocking(false)?;
        match peeked {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(feature = "rtu")]
impl BlockingLink for Box<dyn SerialPort> {
    fn send(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.write_all(data)?;
        self.flush()?;
        debug!("RTU TX: {}B", data.len());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> ModbusResult<usize> {
        let left = remaining(deadline).unwrap_or(Duration::from_millis(1));
        self.set_timeout(left)?;
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn bytes_available(&mut self) -> ModbusResult<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn discard_input(&mut self) -> ModbusResult<usize> {
        let pending = self.bytes_available()?;
        self.clear(tokio_serial::ClearBuffer::Input)?;
        Ok(pending)
    }
}

/// Open a TCP connection with `TCP_NODELAY` set
pub async fn connect_tcp(config: &TcpConfig, connect_timeout: Duration) -> ModbusResult<TcpStream> {
    let addr = config.address();
    debug!("TCP connecting: {}", addr);

    match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("TCP_NODELAY: {}", e);
            }
            info!("TCP connected: {}", addr);
            Ok(stream)
        },
        Ok(Err(e)) => {
            error!("TCP err: {} - {}", addr, e);
            Err(ModbusError::io(format!("Failed to connect to {addr}: {e}")))
        },
        Err(_) => {
            warn!("TCP timeout: {}", addr);
            Err(ModbusError::timeout(format!("Connection to {addr} timed out")))
        },
    }
}

/// Blocking counterpart of [`connect_tcp`]
pub fn connect_tcp_blocking(
    config: &TcpConfig,
    connect_timeout: Duration,
) -> ModbusResult<std::net::TcpStream> {
    let addr = config.address();
    let socket_addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ModbusError::config(format!("Cannot resolve {addr}")))?;

    let stream = std::net::TcpStream::connect_timeout(&socket_addr, connect_timeout)?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY: {}", e);
    }
    info!("TCP connected: {}", addr);
    Ok(stream)
}

#[cfg(feature = "rtu")]
fn serial_builder(config: &SerialConfig) -> ModbusResult<tokio_serial::SerialPortBuilder> {
    let data_bits = match config.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        other => {
            return Err(ModbusError::config(format!("Unsupported data bits: {other}")));
        },
    };
    let stop_bits = match config.stop_bits {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        other => {
            return Err(ModbusError::config(format!("Unsupported stop bits: {other}")));
        },
    };
    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    };

    Ok(tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity))
}

/// Open a serial port for use with the async master or the RTU slave server
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "rtu")]
pub fn open_serial(config: &SerialConfig) -> ModbusResult<SerialStream> {
    debug!("RTU: {} @{}baud", config.port, config.baud_rate);
    match serial_builder(config)?.open_native_async() {
        Ok(port) => {
            info!("RTU opened: {}", config.port);
            Ok(port)
        },
        Err(e) => {
            error!("RTU err: {} - {}", config.port, e);
            Err(ModbusError::io(format!(
                "Failed to open serial port {}: {e}",
                config.port
            )))
        },
    }
}

/// Open a serial port for use with the blocking master
#[cfg(feature = "rtu")]
pub fn open_serial_blocking(config: &SerialConfig) -> ModbusResult<Box<dyn SerialPort>> {
    debug!("RTU: {} @{}baud", config.port, config.baud_rate);
    serial_builder(config)?
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| {
            error!("RTU err: {} - {}", config.port, e);
            ModbusError::io(format!("Failed to open serial port {}: {e}", config.port))
        })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[tokio::test]
    async fn test_duplex_link_send_receive() {
        let (mut a, mut b) = tokio::io::duplex(64);
        AsyncLink::send(&mut a, &[1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(200);
        let n = AsyncLink::receive(&mut b, &mut buf, deadline).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplex_receive_deadline_returns_zero() {
        let (_a, mut b) = tokio::io::duplex(64);
        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(AsyncLink::receive(&mut b, &mut buf, deadline).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplex_closed_peer() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(200);
        assert!(matches!(
            AsyncLink::receive(&mut b, &mut buf, deadline).await,
            Err(ModbusError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_discard_input() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[9; 10]).await.unwrap();
        assert_eq!(AsyncLink::discard_input(&mut b).await.unwrap(), 10);

        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(AsyncLink::receive(&mut b, &mut buf, deadline).await.unwrap(), 0);
    }

    #[test]
    fn test_blocking_tcp_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = TcpConfig {
            host: "127.0.0.1".to_string(),
            port,
        };

        let mut client = connect_tcp_blocking(&config, Duration::from_secs(1)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(client.receive(&mut buf, deadline).unwrap(), 0);
        assert_eq!(client.bytes_available().unwrap(), 0);

        BlockingLink::send(&mut server, &[4, 5]).unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);
        let n = client.receive(&mut buf, deadline).unwrap();
        assert_eq!(&buf[..n], &[4, 5]);

        BlockingLink::send(&mut server, &[6, 7, 8]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(client.bytes_available().unwrap(), 3);
        assert_eq!(client.discard_input().unwrap(), 3);
    }
}
