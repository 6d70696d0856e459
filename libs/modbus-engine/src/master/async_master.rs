use std::time::{Duration, Instant};

use tokio::time::sleep_until;
use tracing::{debug, warn};

use super::session::{Reply, Session};
use crate::constants::RESPONSE_BUFFER_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::framing::WireFormat;
use crate::pdu::{FunctionCode, Request};
use crate::timing::RtuTiming;
use crate::transport::AsyncLink;

/// Modbus master for async code
///
/// Suspends only inside link reads/writes and the RTU silence waits. One
/// request is in flight at a time; `&mut self` enforces it.
#[derive(Debug)]
pub struct AsyncMaster<L> {
    link: L,
    session: Session,
    timeout: Duration,
    /// RTU only: silence required around each transmission
    timing: Option<RtuTiming>,
    last_activity: Instant,
}

impl<L: AsyncLink> AsyncMaster<L> {
    /// Master speaking Modbus TCP over `link`
    pub fn tcp(link: L, timeout: Duration) -> Self {
        Self {
            link,
            session: Session::tcp(),
            timeout,
            timing: None,
            last_activity: Instant::now(),
        }
    }

    /// Master speaking Modbus RTU over `link`
    pub fn rtu(link: L, timing: RtuTiming, timeout: Duration) -> Self {
        Self {
            link,
            session: Session::rtu(),
            timeout,
            timing: Some(timing),
            last_activity: Instant::now(),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.session.format()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    /// Send one request and wait for its reply; no retry
    pub async fn execute(&mut self, unit_id: u8, request: Request) -> ModbusResult<Reply> {
        let outgoing = self.session.prepare(unit_id, request)?;

        if let Some(timing) = self.timing {
            sleep_until((self.last_activity + timing.inter_frame_delay()).into()).await;
        }
        self.link.discard_input().await?;
        self.link.send(&outgoing.bytes).await?;
        debug!("TX: {:02X?}", outgoing.bytes);

        if let Some(timing) = self.timing {
            // the write can return while the frame is still leaving the port
            let line_idle = Instant::now() + timing.transmit_time(outgoing.bytes.len());
            self.last_activity = line_idle;
            sleep_until((line_idle + timing.inter_frame_delay()).into()).await;
        }

        if !outgoing.expects_reply {
            self.last_activity = Instant::now();
            return self.session.local_reply(&outgoing);
        }

        let deadline = Instant::now() + self.timeout;
        let mut collector = self.session.collector();
        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        let result = loop {
            let n = self.link.receive(&mut buf, deadline).await?;
            if n == 0 {
                collector.expire();
                break Err(ModbusError::timeout(format!(
                    "no reply from unit {unit_id} within {}ms",
                    self.timeout.as_millis()
                )));
            }
            if let Err(e) = collector.push(&buf[..n]) {
                warn!("Discarding reply: {}", e);
                break Err(e.into());
            }
            if let Some(frame) = collector.frame() {
                debug!("RX: {:02X?}", frame);
                break self.session.complete(&outgoing, frame);
            }
        };
        self.last_activity = Instant::now();
        result
    }

    pub async fn read_coils(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read(unit_id, FunctionCode::ReadCoils, address, quantity)
            .await?
            .into_bits()
    }

    pub async fn read_discrete_inputs(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read(unit_id, FunctionCode::ReadDiscreteInputs, address, quantity)
            .await?
            .into_bits()
    }

    pub async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read(unit_id, FunctionCode::ReadHoldingRegisters, address, quantity)
            .await?
            .into_registers()
    }

    pub async fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read(unit_id, FunctionCode::ReadInputRegisters, address, quantity)
            .await?
            .into_registers()
    }

    /// Returns the coil state echoed by the slave
    pub async fn write_single_coil(
        &mut self,
        unit_id: u8,
        address: u16,
        value: bool,
    ) -> ModbusResult<bool> {
        self.execute(unit_id, Request::write_single_coil(address, value))
            .await?
            .into_coil()
    }

    /// Returns the register value echoed by the slave
    pub async fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> ModbusResult<u16> {
        self.execute(unit_id, Request::write_single_register(address, value))
            .await?
            .into_register()
    }

    /// Returns the quantity echoed by the slave
    pub async fn write_multiple_coils(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<u16> {
        self.execute(unit_id, Request::write_multiple_coils(address, values))
            .await?
            .into_quantity()
    }

    /// Returns the quantity echoed by the slave
    pub async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<u16> {
        self.execute(unit_id, Request::write_multiple_registers(address, values))
            .await?
            .into_quantity()
    }

    async fn read(
        &mut self,
        unit_id: u8,
        function: FunctionCode,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Reply> {
        let request = Request::read(function, address, quantity)
            .ok_or_else(|| ModbusError::invalid_argument(format!("{function} is not a read")))?;
        self.execute(unit_id, request).await
    }
}
