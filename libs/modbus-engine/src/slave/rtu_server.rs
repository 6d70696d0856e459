//! Modbus RTU slave server
//!
//! A single loop owns the link, the frame assembler and the slave. Frames are
//! delimited by line silence, so the loop wakes up whenever the frame in
//! progress would close even if no more bytes arrive.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Slave;
use crate::constants::MAX_REQUEST_RTU_ADU;
use crate::error::{ModbusError, ModbusResult};
use crate::framing::RtuFrameAssembler;
use crate::timing::RtuTiming;
use crate::transport::AsyncLink;

/// Wake-up interval while the line is idle
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct RtuSlaveServer {
    slave: Slave,
    timing: RtuTiming,
}

impl RtuSlaveServer {
    pub fn new(slave: Slave, timing: RtuTiming) -> Self {
        Self { slave, timing }
    }

    /// Serve requests arriving on `link` until `shutdown` is cancelled or the
    /// link closes, then hand the slave back
    pub async fn run<L: AsyncLink>(
        mut self,
        mut link: L,
        shutdown: CancellationToken,
    ) -> ModbusResult<Slave> {
        info!(
            "Modbus RTU slave (unit {}) started, inter-frame delay {}us",
            self.slave.unit_id(),
            self.timing.inter_frame_delay().as_micros()
        );

        let mut assembler = RtuFrameAssembler::new(self.timing.inter_frame_delay(), Instant::now());
        let mut buf = [0u8; MAX_REQUEST_RTU_ADU];

        loop {
            let wake = assembler
                .deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_POLL);

            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Modbus RTU slave shutting down");
                    break;
                },
                received = link.receive(&mut buf, wake) => received,
            };

            let now = Instant::now();
            let closed = match received {
                Ok(0) => assembler.poll(now),
                Ok(n) => assembler.push(&buf[..n], now),
                Err(ModbusError::ConnectionClosed) => {
                    info!("RTU link closed");
                    break;
                },
                Err(e) => {
                    warn!("RTU receive failed: {}", e);
                    return Err(e);
                },
            };

            // CRC failures were already logged by the assembler
            let Some(Ok(frame)) = closed else {
                continue;
            };
            if let Some(reply) = self.slave.process_rtu(&frame) {
                debug!("RTU TX: {:02X?}", reply);
                link.send(&reply).await?;
            }
        }
        Ok(self.slave)
    }
}
