//! Request handling against the register store

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::callbacks::SlaveEvent;
use crate::bit_ops::pack_bits;
use crate::codec::{self, decode_request, encode_pdu, rtu, MbapHeader};
use crate::constants::{BROADCAST_UNIT_ID, MBAP_HEADER_LEN, TCP_UNIT_ID_UNUSED};
use crate::error::FrameError;
use crate::pdu::{ExceptionCode, FunctionCode, Request, Response};
use crate::store::RegisterStore;

/// A Modbus slave: one unit id and the data it serves
///
/// Owned by exactly one server loop; nothing else touches the store while
/// the loop runs.
#[derive(Debug)]
pub struct Slave {
    unit_id: u8,
    store: RegisterStore,
    events: Option<mpsc::Sender<SlaveEvent>>,
}

impl Slave {
    pub fn new(unit_id: u8, store: RegisterStore) -> Self {
        Self {
            unit_id,
            store,
            events: None,
        }
    }

    /// Publish a [`SlaveEvent`] for every successfully applied request
    pub fn with_events(mut self, events: mpsc::Sender<SlaveEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RegisterStore {
        &mut self.store
    }

    /// Answer a request addressed to this slave
    ///
    /// Checks run in order: request encoding and quantity (exception 3), then
    /// address coverage (exception 2). Only then is the store touched.
    pub fn handle(&mut self, request: &Request) -> Response {
        self.dispatch(self.unit_id, request)
    }

    fn dispatch(&mut self, unit_id: u8, request: &Request) -> Response {
        let function = request.function();
        if let Err(code) = request.validate() {
            debug!("{} rejected: {}", function, code);
            return Response::exception(function, code);
        }

        let address = request.address();
        let quantity = request.quantity();
        let outcome = match request {
            Request::ReadCoils { .. } | Request::ReadDiscreteInputs { .. } => self
                .store
                .bit_bank(function)
                .and_then(|bank| bank.get(address, usize::from(quantity)).ok())
                .map(|bits| read_response(function, pack_bits(&bits))),
            Request::ReadHoldingRegisters { .. } | Request::ReadInputRegisters { .. } => self
                .store
                .word_bank(function)
                .and_then(|bank| bank.get(address, usize::from(quantity)).ok())
                .map(|words| {
                    let data = words.iter().flat_map(|w| w.to_be_bytes()).collect();
                    read_response(function, data)
                }),
            Request::WriteSingleCoil { value, .. } => request
                .coil_values()
                .and_then(|bits| self.store.coils.set(address, &bits).ok())
                .map(|()| Response::WriteSingleCoil {
                    address,
                    value: *value,
                }),
            Request::WriteSingleRegister { value, .. } => self
                .store
                .holding_registers
                .set(address, &[*value])
                .ok()
                .map(|()| Response::WriteSingleRegister {
                    address,
                    value: *value,
                }),
            Request::WriteMultipleCoils { .. } => request
                .coil_values()
                .and_then(|bits| self.store.coils.set(address, &bits).ok())
                .map(|()| Response::WriteMultipleCoils { address, quantity }),
            Request::WriteMultipleRegisters { .. } => request
                .register_values()
                .and_then(|words| self.store.holding_registers.set(address, &words).ok())
                .map(|()| Response::WriteMultipleRegisters { address, quantity }),
        };

        match outcome {
            Some(response) => {
                self.notify(SlaveEvent {
                    unit_id,
                    function,
                    address,
                    quantity,
                });
                response
            },
            None => {
                debug!(
                    "{} range {}+{} not defined",
                    function, address, quantity
                );
                Response::exception(function, ExceptionCode::IllegalDataAddress)
            },
        }
    }

    fn notify(&self, event: SlaveEvent) {
        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event queue full, dropping {:?}", event);
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver gone");
            },
        }
    }

    /// Answer a raw request PDU; `None` means stay silent
    fn answer(&mut self, unit_id: u8, pdu: &[u8]) -> Option<Vec<u8>> {
        let response = match decode_request(pdu) {
            Ok(request) => self.dispatch(unit_id, &request),
            Err(FrameError::UnsupportedFunction(raw)) => {
                debug!("Unsupported function 0x{:02X}", raw);
                return Some(codec::illegal_function_pdu(raw).to_vec());
            },
            Err(e) => {
                // Known function, malformed payload
                let function = FunctionCode::from_code(*pdu.first()?)?;
                warn!("Malformed {} request: {}", function, e);
                Response::exception(function, ExceptionCode::IllegalDataValue)
            },
        };

        match encode_pdu(&response.into()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Response encode failed: {}", e);
                None
            },
        }
    }

    /// Process one silence-delimited RTU frame
    ///
    /// Frames failing the CRC or addressed to another unit are ignored.
    /// Broadcasts (unit 0) are applied but never answered.
    pub fn process_rtu(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if let Err(e) = rtu::verify_request(frame) {
            warn!("Ignoring RTU frame: {}", e);
            return None;
        }
        let unit_id = frame[0];
        if unit_id != self.unit_id && unit_id != BROADCAST_UNIT_ID {
            debug!("RTU frame for unit {} ignored", unit_id);
            return None;
        }

        let reply = self.answer(unit_id, &frame[1..frame.len() - 2])?;
        if unit_id == BROADCAST_UNIT_ID {
            return None;
        }
        Some(rtu::encode_adu(unit_id, &reply))
    }

    /// Process one complete MBAP frame
    ///
    /// Unit ids 0 and 0xFF address the TCP server itself and are answered
    /// like this slave's own id.
    pub fn process_tcp(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let header = match MbapHeader::parse_request(frame) {
            Ok(header) if header.frame_len() == frame.len() => header,
            Ok(header) => {
                warn!(
                    "Ignoring TCP frame: length {} != {}",
                    frame.len(),
                    header.frame_len()
                );
                return None;
            },
            Err(e) => {
                warn!("Ignoring TCP frame: {}", e);
                return None;
            },
        };

        let unit_id = header.unit_id;
        if unit_id != self.unit_id && unit_id != BROADCAST_UNIT_ID && unit_id != TCP_UNIT_ID_UNUSED
        {
            debug!("TCP frame for unit {} ignored", unit_id);
            return None;
        }

        let reply = self.answer(unit_id, &frame[MBAP_HEADER_LEN + 1..])?;
        Some(codec::tcp::encode_adu(header.transaction_id, unit_id, &reply))
    }
}

fn read_response(function: FunctionCode, data: Vec<u8>) -> Response {
    match function {
        FunctionCode::ReadCoils => Response::ReadCoils { data },
        FunctionCode::ReadDiscreteInputs => Response::ReadDiscreteInputs { data },
        FunctionCode::ReadHoldingRegisters => Response::ReadHoldingRegisters { data },
        _ => Response::ReadInputRegisters { data },
    }
}
