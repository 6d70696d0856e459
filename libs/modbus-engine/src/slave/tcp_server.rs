//! Modbus TCP slave server
//!
//! One owner loop holds the [`Slave`] and is the only code that touches its
//! store. Each connection gets a task that splits its byte stream into MBAP
//! frames with its own buffer and hands complete frames to the owner loop
//! over a bounded channel, one outstanding frame per connection.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Slave;
use crate::codec::MbapCodec;
use crate::error::ModbusResult;

const REQUEST_QUEUE: usize = 32;

/// First pause after a failed accept; doubles per consecutive failure
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before the next accept after `consecutive_errors` failures in a row
///
/// Accept errors such as EMFILE persist until a descriptor is freed, so
/// retrying at once would spin the owner loop.
fn accept_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_INITIAL
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Accept once `resume_at` has passed
///
/// The deadline is absolute so a select loop can rebuild this future on
/// every pass without pushing the retry further out.
async fn accept_after(
    listener: &TcpListener,
    resume_at: Instant,
) -> std::io::Result<(TcpStream, SocketAddr)> {
    tokio::time::sleep_until(resume_at).await;
    listener.accept().await
}

/// A complete frame waiting for the owner loop, with the way back
struct Exchange {
    frame: BytesMut,
    reply: oneshot::Sender<Option<Vec<u8>>>,
}

#[derive(Debug)]
pub struct TcpSlaveServer {
    slave: Slave,
}

impl TcpSlaveServer {
    pub fn new(slave: Slave) -> Self {
        Self { slave }
    }

    /// Serve until `shutdown` is cancelled, then hand the slave back
    pub async fn run(
        mut self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> ModbusResult<Slave> {
        let (tx, mut rx) = mpsc::channel::<Exchange>(REQUEST_QUEUE);
        info!(
            "Modbus TCP slave (unit {}) listening on {}",
            self.slave.unit_id(),
            listener.local_addr()?
        );

        let mut accept_errors = 0u32;
        let mut resume_accept = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Modbus TCP slave shutting down");
                    break;
                },
                accepted = accept_after(&listener, resume_accept) => match accepted {
                    Ok((stream, peer)) => {
                        accept_errors = 0;
                        debug!("New connection from {}", peer);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("TCP_NODELAY: {}", e);
                        }
                        let connection =
                            serve_connection(stream, peer, tx.clone(), shutdown.child_token());
                        tokio::spawn(connection);
                    },
                    Err(e) => {
                        accept_errors = accept_errors.saturating_add(1);
                        let delay = accept_backoff(accept_errors);
                        error!("Accept error: {}, retrying in {:?}", e, delay);
                        resume_accept = Instant::now() + delay;
                    },
                },
                Some(exchange) = rx.recv() => {
                    let reply = self.slave.process_tcp(&exchange.frame);
                    // connection may have gone away meanwhile
                    let _ = exchange.reply.send(reply);
                },
            }
        }
        Ok(self.slave)
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    requests: mpsc::Sender<Exchange>,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, MbapCodec);

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = framed.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("Dropping connection {}: {}", peer, e);
                break;
            },
            None => {
                debug!("Connection {} closed", peer);
                break;
            },
        };
        debug!("TCP RX {}: {:02X?}", peer, &frame[..]);

        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = Exchange {
            frame,
            reply: reply_tx,
        };
        if requests.send(exchange).await.is_err() {
            break;
        }

        match reply_rx.await {
            Ok(Some(reply)) => {
                debug!("TCP TX {}: {:02X?}", peer, reply);
                if let Err(e) = framed.send(reply).await {
                    debug!("Write error: {}", e);
                    break;
                }
            },
            Ok(None) => {},
            Err(_) => break,
        }
    }
}
