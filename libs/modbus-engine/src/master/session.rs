//! Request/response bookkeeping shared by both master flavours
//!
//! A [`Session`] never touches a link. It turns a request into wire bytes,
//! tells the caller how to collect the answer, and maps the answer to a
//! typed [`Reply`]. The async and blocking masters only add the I/O.

use tracing::debug;

use crate::bit_ops::{bytes_to_registers, unpack_bits};
use crate::codec::{RtuFrame, TcpFrame};
use crate::constants::{BROADCAST_UNIT_ID, COIL_ON, MAX_RTU_UNIT_ID};
use crate::error::{ModbusError, ModbusResult};
use crate::framing::{ResponseCollector, WireFormat};
use crate::pdu::{FrameKind, Pdu, Request, Response};

/// Typed result of one of the eight operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    /// Echoed single coil state
    Coil(bool),
    /// Echoed single register value
    Register(u16),
    /// Echoed write quantity
    Quantity(u16),
}

impl Reply {
    pub fn into_bits(self) -> ModbusResult<Vec<bool>> {
        match self {
            Reply::Bits(bits) => Ok(bits),
            other => Err(ModbusError::unexpected(format!("expected bits, got {other:?}"))),
        }
    }

    pub fn into_registers(self) -> ModbusResult<Vec<u16>> {
        match self {
            Reply::Registers(registers) => Ok(registers),
            other => Err(ModbusError::unexpected(format!(
                "expected registers, got {other:?}"
            ))),
        }
    }

    pub fn into_coil(self) -> ModbusResult<bool> {
        match self {
            Reply::Coil(on) => Ok(on),
            other => Err(ModbusError::unexpected(format!("expected coil, got {other:?}"))),
        }
    }

    pub fn into_register(self) -> ModbusResult<u16> {
        match self {
            Reply::Register(value) => Ok(value),
            other => Err(ModbusError::unexpected(format!(
                "expected register, got {other:?}"
            ))),
        }
    }

    pub fn into_quantity(self) -> ModbusResult<u16> {
        match self {
            Reply::Quantity(quantity) => Ok(quantity),
            other => Err(ModbusError::unexpected(format!(
                "expected quantity, got {other:?}"
            ))),
        }
    }
}

/// A request ready to go on the wire
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub bytes: Vec<u8>,
    /// False for RTU broadcasts, which no slave answers
    pub expects_reply: bool,
    unit_id: u8,
    transaction_id: u16,
    request: Request,
}

#[derive(Debug)]
pub struct Session {
    format: WireFormat,
    transaction_id: u16,
}

impl Session {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            transaction_id: 0,
        }
    }

    pub fn rtu() -> Self {
        Self::new(WireFormat::Rtu)
    }

    pub fn tcp() -> Self {
        Self::new(WireFormat::Tcp)
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Transaction id of the most recent TCP request
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Validate and encode `request`
    ///
    /// Quantity bounds and payload sizes are checked here, before anything is
    /// sent. RTU unit 0 is a broadcast: reads are refused and writes expect
    /// no reply. Over TCP unit 0 is an ordinary unit id.
    pub fn prepare(&mut self, unit_id: u8, request: Request) -> ModbusResult<Outgoing> {
        request.validate().map_err(|code| {
            ModbusError::invalid_argument(format!(
                "{} address {} quantity {}: {}",
                request.function(),
                request.address(),
                request.quantity(),
                code
            ))
        })?;

        let broadcast = self.format == WireFormat::Rtu && unit_id == BROADCAST_UNIT_ID;
        let bytes = match self.format {
            WireFormat::Rtu => {
                if unit_id > MAX_RTU_UNIT_ID {
                    return Err(ModbusError::invalid_argument(format!(
                        "RTU unit id {unit_id} out of range 0-{MAX_RTU_UNIT_ID}"
                    )));
                }
                if broadcast && request.function().is_read() {
                    return Err(ModbusError::invalid_argument(format!(
                        "{} cannot be broadcast",
                        request.function()
                    )));
                }
                RtuFrame::new(unit_id, request.clone()).encode()?
            },
            WireFormat::Tcp => {
                self.transaction_id = self.transaction_id.wrapping_add(1);
                TcpFrame::new(self.transaction_id, unit_id, request.clone()).encode()?
            },
        };

        Ok(Outgoing {
            bytes,
            expects_reply: !broadcast,
            unit_id,
            transaction_id: self.transaction_id,
            request,
        })
    }

    /// Receive state machine for the reply to `outgoing`
    pub fn collector(&self) -> ResponseCollector {
        ResponseCollector::new(self.format)
    }

    /// Reply reported for a request that gets no answer
    pub fn local_reply(&self, outgoing: &Outgoing) -> ModbusResult<Reply> {
        match &outgoing.request {
            Request::WriteSingleCoil { value, .. } => Ok(Reply::Coil(*value == COIL_ON)),
            Request::WriteSingleRegister { value, .. } => Ok(Reply::Register(*value)),
            Request::WriteMultipleCoils { quantity, .. }
            | Request::WriteMultipleRegisters { quantity, .. } => Ok(Reply::Quantity(*quantity)),
            other => Err(ModbusError::invalid_argument(format!(
                "{} needs a reply",
                other.function()
            ))),
        }
    }

    /// Parse a complete response frame and match it to `outgoing`
    pub fn complete(&self, outgoing: &Outgoing, frame: &[u8]) -> ModbusResult<Reply> {
        let pdu = match self.format {
            WireFormat::Rtu => {
                let frame = RtuFrame::decode(frame, Some(FrameKind::Response))?;
                if frame.unit_id != outgoing.unit_id {
                    return Err(ModbusError::unexpected(format!(
                        "reply from unit {}, expected {}",
                        frame.unit_id, outgoing.unit_id
                    )));
                }
                frame.pdu
            },
            WireFormat::Tcp => {
                let frame = TcpFrame::decode(frame, Some(FrameKind::Response))?;
                if frame.transaction_id != outgoing.transaction_id {
                    return Err(ModbusError::unexpected(format!(
                        "transaction id {:04X}, expected {:04X}",
                        frame.transaction_id, outgoing.transaction_id
                    )));
                }
                if frame.unit_id != outgoing.unit_id {
                    return Err(ModbusError::unexpected(format!(
                        "reply from unit {}, expected {}",
                        frame.unit_id, outgoing.unit_id
                    )));
                }
                frame.pdu
            },
        };

        let Pdu::Response(response) = pdu else {
            return Err(ModbusError::unexpected("request frame in reply position"));
        };
        let function = outgoing.request.function();
        if response.function() != function {
            return Err(ModbusError::unexpected(format!(
                "reply for {}, expected {}",
                response.function(),
                function
            )));
        }
        debug!("RX {}: {:?}", function, response);
        map_response(&outgoing.request, response)
    }
}

fn map_response(request: &Request, response: Response) -> ModbusResult<Reply> {
    let quantity = usize::from(request.quantity());
    match response {
        Response::Exception { function, code } => Err(ModbusError::Exception { function, code }),
        Response::ReadCoils { data } | Response::ReadDiscreteInputs { data } => {
            if data.len() != quantity.div_ceil(8) {
                return Err(ModbusError::unexpected(format!(
                    "{} data bytes for {} bits",
                    data.len(),
                    quantity
                )));
            }
            Ok(Reply::Bits(unpack_bits(&data, quantity)))
        },
        Response::ReadHoldingRegisters { data } | Response::ReadInputRegisters { data } => {
            if data.len() != quantity * 2 {
                return Err(ModbusError::unexpected(format!(
                    "{} data bytes for {} registers",
                    data.len(),
                    quantity
                )));
            }
            Ok(Reply::Registers(bytes_to_registers(&data)))
        },
        Response::WriteSingleCoil { address, value }
        | Response::WriteSingleRegister { address, value } => {
            let echoed = match request {
                Request::WriteSingleCoil {
                    address: a,
                    value: v,
                }
                | Request::WriteSingleRegister {
                    address: a,
                    value: v,
                } => *a == address && *v == value,
                _ => false,
            };
            if !echoed {
                return Err(ModbusError::unexpected(format!(
                    "echo {address}={value:04X} does not match request"
                )));
            }
            Ok(match request {
                Request::WriteSingleCoil { .. } => Reply::Coil(value == COIL_ON),
                _ => Reply::Register(value),
            })
        },
        Response::WriteMultipleCoils {
            address,
            quantity: echoed,
        }
        | Response::WriteMultipleRegisters {
            address,
            quantity: echoed,
        } => {
            if address != request.address() || echoed != request.quantity() {
                return Err(ModbusError::unexpected(format!(
                    "echo {address}+{echoed} does not match request"
                )));
            }
            Ok(Reply::Quantity(echoed))
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::pdu::{ExceptionCode, FunctionCode};

    fn rtu_reply(unit_id: u8, response: Response) -> Vec<u8> {
        RtuFrame::new(unit_id, response).encode().unwrap()
    }

    #[test]
    fn test_quantity_bounds_checked_before_send() {
        let mut session = Session::rtu();
        for request in [
            Request::ReadCoils {
                address: 0,
                quantity: 2001,
            },
            Request::ReadHoldingRegisters {
                address: 0,
                quantity: 0,
            },
            Request::write_multiple_coils(0, &[true; 1969]),
            Request::write_multiple_registers(0, &[0; 124]),
            Request::ReadInputRegisters {
                address: 0xFFFF,
                quantity: 2,
            },
        ] {
            assert!(matches!(
                session.prepare(1, request),
                Err(ModbusError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_rtu_broadcast_rules() {
        let mut session = Session::rtu();
        let read = Request::ReadCoils {
            address: 0,
            quantity: 1,
        };
        assert!(session.prepare(0, read).is_err());
        assert!(session.prepare(248, Request::write_single_coil(0, true)).is_err());

        let outgoing = session.prepare(0, Request::write_single_coil(3, true)).unwrap();
        assert!(!outgoing.expects_reply);
        assert_eq!(session.local_reply(&outgoing).unwrap(), Reply::Coil(true));
    }

    #[test]
    fn test_tcp_transaction_ids_increment_and_wrap() {
        let mut session = Session::tcp();
        let request = Request::write_single_register(0, 1);
        let first = session.prepare(0, request.clone()).unwrap();
        assert!(first.expects_reply);
        assert_eq!(&first.bytes[..2], &[0x00, 0x01]);
        let second = session.prepare(1, request.clone()).unwrap();
        assert_eq!(&second.bytes[..2], &[0x00, 0x02]);

        session.transaction_id = u16::MAX;
        let wrapped = session.prepare(1, request).unwrap();
        assert_eq!(&wrapped.bytes[..2], &[0x00, 0x00]);
    }

    #[test]
    fn test_complete_maps_registers() {
        let mut session = Session::rtu();
        let outgoing = session
            .prepare(
                1,
                Request::ReadHoldingRegisters {
                    address: 0x10,
                    quantity: 2,
                },
            )
            .unwrap();
        let reply = rtu_reply(
            1,
            Response::ReadHoldingRegisters {
                data: vec![0x00, 0x64, 0x00, 0xC8],
            },
        );
        assert_eq!(
            session.complete(&outgoing, &reply).unwrap(),
            Reply::Registers(vec![100, 200])
        );
    }

    #[test]
    fn test_complete_maps_bits() {
        let mut session = Session::rtu();
        let outgoing = session
            .prepare(
                1,
                Request::ReadCoils {
                    address: 0,
                    quantity: 10,
                },
            )
            .unwrap();
        let reply = rtu_reply(1, Response::ReadCoils { data: vec![0xCD, 0x01] });
        let bits = session.complete(&outgoing, &reply).unwrap().into_bits().unwrap();
        assert_eq!(
            bits,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
    }

    #[test]
    fn test_exception_surfaces_code() {
        let mut session = Session::rtu();
        let outgoing = session.prepare(1, Request::write_single_coil(5, true)).unwrap();
        let reply = rtu_reply(
            1,
            Response::exception(FunctionCode::WriteSingleCoil, ExceptionCode::IllegalDataAddress),
        );
        let err = session.complete(&outgoing, &reply).unwrap_err();
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));
        assert!(!err.is_timeout_like());
    }

    #[test]
    fn test_mismatched_replies_rejected() {
        let mut session = Session::rtu();
        let outgoing = session.prepare(1, Request::write_single_register(5, 9)).unwrap();

        let wrong_unit = rtu_reply(
            2,
            Response::WriteSingleRegister {
                address: 5,
                value: 9,
            },
        );
        assert!(matches!(
            session.complete(&outgoing, &wrong_unit),
            Err(ModbusError::UnexpectedResponse(_))
        ));

        let wrong_echo = rtu_reply(
            1,
            Response::WriteSingleRegister {
                address: 5,
                value: 8,
            },
        );
        assert!(matches!(
            session.complete(&outgoing, &wrong_echo),
            Err(ModbusError::UnexpectedResponse(_))
        ));

        let wrong_function = rtu_reply(
            1,
            Response::WriteSingleCoil {
                address: 5,
                value: 9,
            },
        );
        assert!(matches!(
            session.complete(&outgoing, &wrong_function),
            Err(ModbusError::UnexpectedResponse(_))
        ));

        let mut corrupt = rtu_reply(
            1,
            Response::WriteSingleRegister {
                address: 5,
                value: 9,
            },
        );
        corrupt[3] ^= 0x01;
        let err = session.complete(&outgoing, &corrupt).unwrap_err();
        assert!(err.is_timeout_like());
    }

    #[test]
    fn test_tcp_transaction_mismatch() {
        let mut session = Session::tcp();
        let outgoing = session.prepare(1, Request::write_single_register(1, 1)).unwrap();
        let stale = TcpFrame::new(
            outgoing.transaction_id.wrapping_sub(1),
            1,
            Response::WriteSingleRegister {
                address: 1,
                value: 1,
            },
        )
        .encode()
        .unwrap();
        assert!(matches!(
            session.complete(&outgoing, &stale),
            Err(ModbusError::UnexpectedResponse(_))
        ));
    }
}
