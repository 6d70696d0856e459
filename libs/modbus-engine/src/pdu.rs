//! Modbus PDU model
//!
//! A PDU is a tagged union: the variant fixes the function code and the
//! direction, and carries exactly the fields that `(function_code, kind)`
//! defines on the wire. Read responses carry no address; single writes carry
//! no quantity; only exception responses carry an exception code.
//!
//! Payloads are kept as wire bytes (`data`) so that a slave can still answer
//! a structurally valid but semantically wrong request (e.g. a byte count that
//! disagrees with the quantity) with the right exception code.
//! [`Request::validate`] is the pure semantic check applied by both sides.

use std::fmt;

use crate::bit_ops::{bytes_to_registers, pack_bits, registers_to_bytes, unpack_bits};
use crate::constants::*;

/// The eight supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 8] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
        FunctionCode::WriteSingleCoil,
        FunctionCode::WriteSingleRegister,
        FunctionCode::WriteMultipleCoils,
        FunctionCode::WriteMultipleRegisters,
    ];

    /// Wire value of the function code
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => FC_READ_COILS,
            FunctionCode::ReadDiscreteInputs => FC_READ_DISCRETE_INPUTS,
            FunctionCode::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            FunctionCode::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            FunctionCode::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            FunctionCode::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            FunctionCode::WriteMultipleCoils => FC_WRITE_MULTIPLE_COILS,
            FunctionCode::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    /// Look up a non-exception function code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            FC_READ_COILS => Some(FunctionCode::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Some(FunctionCode::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Exception form of the code (`code | 0x80`)
    pub fn exception_code(self) -> u8 {
        self.code() | EXCEPTION_FLAG
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    /// Whether the function addresses single-bit data
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteMultipleCoils
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02X} ({})", self.code(), self.name())
    }
}

/// Modbus exception codes
///
/// Unknown codes received from a peer are preserved in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Other(u8),
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            ExceptionCode::SlaveDeviceFailure => EXCEPTION_SLAVE_DEVICE_FAILURE,
            ExceptionCode::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            ExceptionCode::SlaveDeviceBusy => EXCEPTION_SLAVE_DEVICE_BUSY,
            ExceptionCode::NegativeAcknowledge => EXCEPTION_NEGATIVE_ACKNOWLEDGE,
            ExceptionCode::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            ExceptionCode::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            ExceptionCode::GatewayTargetFailedToRespond => EXCEPTION_GATEWAY_TARGET_FAILED,
            ExceptionCode::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => ExceptionCode::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => ExceptionCode::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => ExceptionCode::IllegalDataValue,
            EXCEPTION_SLAVE_DEVICE_FAILURE => ExceptionCode::SlaveDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => ExceptionCode::Acknowledge,
            EXCEPTION_SLAVE_DEVICE_BUSY => ExceptionCode::SlaveDeviceBusy,
            EXCEPTION_NEGATIVE_ACKNOWLEDGE => ExceptionCode::NegativeAcknowledge,
            EXCEPTION_MEMORY_PARITY_ERROR => ExceptionCode::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => ExceptionCode::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Other(other),
        }
    }

    fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
            ExceptionCode::NegativeAcknowledge => "Negative Acknowledge",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            },
            ExceptionCode::Other(_) => "Unknown Exception",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// Direction of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

/// Master-to-slave PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    /// `value` is the raw wire value; only `0xFF00`/`0x0000` are valid
    WriteSingleCoil { address: u16, value: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    /// `data` holds the packed coil bits; the byte count is `data.len()`
    WriteMultipleCoils {
        address: u16,
        quantity: u16,
        data: Vec<u8>,
    },
    /// `data` holds big-endian register values; the byte count is `data.len()`
    WriteMultipleRegisters {
        address: u16,
        quantity: u16,
        data: Vec<u8>,
    },
}

impl Request {
    /// Build a read request for one of FC01-FC04
    pub fn read(function: FunctionCode, address: u16, quantity: u16) -> Option<Self> {
        match function {
            FunctionCode::ReadCoils => Some(Request::ReadCoils { address, quantity }),
            FunctionCode::ReadDiscreteInputs => {
                Some(Request::ReadDiscreteInputs { address, quantity })
            },
            FunctionCode::ReadHoldingRegisters => {
                Some(Request::ReadHoldingRegisters { address, quantity })
            },
            FunctionCode::ReadInputRegisters => {
                Some(Request::ReadInputRegisters { address, quantity })
            },
            _ => None,
        }
    }

    pub fn write_single_coil(address: u16, on: bool) -> Self {
        Request::WriteSingleCoil {
            address,
            value: if on { COIL_ON } else { COIL_OFF },
        }
    }

    pub fn write_single_register(address: u16, value: u16) -> Self {
        Request::WriteSingleRegister { address, value }
    }

    /// Quantity saturates at `u16::MAX`; [`Request::validate`] rejects it
    pub fn write_multiple_coils(address: u16, values: &[bool]) -> Self {
        Request::WriteMultipleCoils {
            address,
            quantity: u16::try_from(values.len()).unwrap_or(u16::MAX),
            data: pack_bits(values),
        }
    }

    /// Quantity saturates at `u16::MAX`; [`Request::validate`] rejects it
    pub fn write_multiple_registers(address: u16, values: &[u16]) -> Self {
        Request::WriteMultipleRegisters {
            address,
            quantity: u16::try_from(values.len()).unwrap_or(u16::MAX),
            data: registers_to_bytes(values),
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils { .. } => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Starting address
    pub fn address(&self) -> u16 {
        match self {
            Request::ReadCoils { address, .. }
            | Request::ReadDiscreteInputs { address, .. }
            | Request::ReadHoldingRegisters { address, .. }
            | Request::ReadInputRegisters { address, .. }
            | Request::WriteSingleCoil { address, .. }
            | Request::WriteSingleRegister { address, .. }
            | Request::WriteMultipleCoils { address, .. }
            | Request::WriteMultipleRegisters { address, .. } => *address,
        }
    }

    /// Number of addressed items (1 for single writes)
    pub fn quantity(&self) -> u16 {
        match self {
            Request::ReadCoils { quantity, .. }
            | Request::ReadDiscreteInputs { quantity, .. }
            | Request::ReadHoldingRegisters { quantity, .. }
            | Request::ReadInputRegisters { quantity, .. }
            | Request::WriteMultipleCoils { quantity, .. }
            | Request::WriteMultipleRegisters { quantity, .. } => *quantity,
            Request::WriteSingleCoil { .. } | Request::WriteSingleRegister { .. } => 1,
        }
    }

    /// Decoded coil values of a write request
    pub fn coil_values(&self) -> Option<Vec<bool>> {
        match self {
            Request::WriteSingleCoil { value, .. } => match *value {
                COIL_ON => Some(vec![true]),
                COIL_OFF => Some(vec![false]),
                _ => None,
            },
            Request::WriteMultipleCoils { quantity, data, .. } => {
                Some(unpack_bits(data, *quantity as usize))
            },
            _ => None,
        }
    }

    /// Decoded register values of a write request
    pub fn register_values(&self) -> Option<Vec<u16>> {
        match self {
            Request::WriteSingleRegister { value, .. } => Some(vec![*value]),
            Request::WriteMultipleRegisters { data, .. } => Some(bytes_to_registers(data)),
            _ => None,
        }
    }

    /// Semantic validation shared by master (before sending) and slave (on receipt)
    ///
    /// Checks quantity bounds, byte-count consistency and coil encoding, then
    /// that the addressed range fits in the 16-bit address space.
    pub fn validate(&self) -> Result<(), ExceptionCode> {
        let (max, expected_bytes) = match self {
            Request::ReadCoils { .. } | Request::ReadDiscreteInputs { .. } => {
                (MAX_READ_BITS, None)
            },
            Request::ReadHoldingRegisters { .. } | Request::ReadInputRegisters { .. } => {
                (MAX_READ_REGISTERS, None)
            },
            Request::WriteSingleCoil { value, .. } => {
                if *value != COIL_ON && *value != COIL_OFF {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                (1, None)
            },
            Request::WriteSingleRegister { .. } => (1, None),
            Request::WriteMultipleCoils { quantity, data, .. } => (
                MAX_WRITE_BITS,
                Some((usize::from(*quantity).div_ceil(8), data.len())),
            ),
            Request::WriteMultipleRegisters { quantity, data, .. } => (
                MAX_WRITE_REGISTERS,
                Some((usize::from(*quantity) * 2, data.len())),
            ),
        };

        let quantity = self.quantity();
        if quantity == 0 || quantity > max {
            return Err(ExceptionCode::IllegalDataValue);
        }
        if let Some((expected, actual)) = expected_bytes {
            if expected != actual {
                return Err(ExceptionCode::IllegalDataValue);
            }
        }
        if u32::from(self.address()) + u32::from(quantity) > 0x1_0000 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(())
    }
}

/// Slave-to-master PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Packed coil bits, padded to whole bytes
    ReadCoils { data: Vec<u8> },
    /// Packed input bits, padded to whole bytes
    ReadDiscreteInputs { data: Vec<u8> },
    /// Big-endian register values
    ReadHoldingRegisters { data: Vec<u8> },
    /// Big-endian register values
    ReadInputRegisters { data: Vec<u8> },
    WriteSingleCoil { address: u16, value: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception {
        function: FunctionCode,
        code: ExceptionCode,
    },
}

impl Response {
    pub fn exception(function: FunctionCode, code: ExceptionCode) -> Self {
        Response::Exception { function, code }
    }

    /// Function the response answers (without the exception bit)
    pub fn function(&self) -> FunctionCode {
        match self {
            Response::ReadCoils { .. } => FunctionCode::ReadCoils,
            Response::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Response::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Response::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Response::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Response::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Response::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Response::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            Response::Exception { function, .. } => *function,
        }
    }

    /// Function code byte as it appears on the wire
    pub fn wire_function_code(&self) -> u8 {
        match self {
            Response::Exception { function, .. } => function.exception_code(),
            other => other.function().code(),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Response::Exception { .. })
    }

    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Response::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A request or a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Request(Request),
    Response(Response),
}

impl Pdu {
    pub fn kind(&self) -> FrameKind {
        match self {
            Pdu::Request(_) => FrameKind::Request,
            Pdu::Response(_) => FrameKind::Response,
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Pdu::Request(request) => request.function(),
            Pdu::Response(response) => response.function(),
        }
    }

    pub fn wire_function_code(&self) -> u8 {
        match self {
            Pdu::Request(request) => request.function().code(),
            Pdu::Response(response) => response.wire_function_code(),
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            Pdu::Request(request) => Some(request),
            Pdu::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Pdu::Response(response) => Some(response),
            Pdu::Request(_) => None,
        }
    }
}

impl From<Request> for Pdu {
    fn from(request: Request) -> Self {
        Pdu::Request(request)
    }
}

impl From<Response> for Pdu {
    fn from(response: Response) -> Self {
        Pdu::Response(response)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_function_code_lookup() {
        for fc in FunctionCode::ALL {
            assert_eq!(FunctionCode::from_code(fc.code()), Some(fc));
            assert_eq!(fc.exception_code() & 0x7F, fc.code());
        }
        assert_eq!(FunctionCode::from_code(0x07), None);
        assert_eq!(FunctionCode::from_code(0x83), None);
    }

    #[test]
    fn test_exception_code_roundtrip() {
        for code in [1u8, 2, 3, 4, 5, 6, 7, 8, 10, 11] {
            let exc = ExceptionCode::from_code(code);
            assert!(!matches!(exc, ExceptionCode::Other(_)));
            assert_eq!(exc.code(), code);
        }
        assert_eq!(ExceptionCode::from_code(9), ExceptionCode::Other(9));
    }

    #[test]
    fn test_validate_read_quantity_bounds() {
        assert!(Request::ReadCoils {
            address: 0,
            quantity: 2000
        }
        .validate()
        .is_ok());
        assert_eq!(
            Request::ReadCoils {
                address: 0,
                quantity: 2001
            }
            .validate(),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::ReadHoldingRegisters {
                address: 0,
                quantity: 0
            }
            .validate(),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::ReadInputRegisters {
                address: 0,
                quantity: 126
            }
            .validate(),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_validate_coil_encoding() {
        assert!(Request::write_single_coil(5, true).validate().is_ok());
        assert!(Request::write_single_coil(5, false).validate().is_ok());
        assert_eq!(
            Request::WriteSingleCoil {
                address: 5,
                value: 0x0001
            }
            .validate(),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_validate_multi_write_byte_count() {
        let good = Request::write_multiple_registers(0, &[1, 2, 3]);
        assert!(good.validate().is_ok());

        let bad = Request::WriteMultipleRegisters {
            address: 0,
            quantity: 3,
            data: vec![0; 4],
        };
        assert_eq!(bad.validate(), Err(ExceptionCode::IllegalDataValue));

        let too_many = Request::write_multiple_registers(0, &[0; 124]);
        assert_eq!(too_many.validate(), Err(ExceptionCode::IllegalDataValue));

        let coils = Request::write_multiple_coils(0, &[true; 1969]);
        assert_eq!(coils.validate(), Err(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_validate_address_overflow() {
        let req = Request::ReadHoldingRegisters {
            address: 0xFFFF,
            quantity: 2,
        };
        assert_eq!(req.validate(), Err(ExceptionCode::IllegalDataAddress));

        let req = Request::ReadHoldingRegisters {
            address: 0xFFFF,
            quantity: 1,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_value_accessors() {
        let req = Request::write_multiple_coils(10, &[true, false, true]);
        assert_eq!(req.quantity(), 3);
        assert_eq!(req.coil_values().unwrap(), vec![true, false, true]);

        let req = Request::write_multiple_registers(10, &[7, 8]);
        assert_eq!(req.register_values().unwrap(), vec![7, 8]);
        assert_eq!(req.address(), 10);
    }

    #[test]
    fn test_response_wire_function_code() {
        let resp = Response::exception(
            FunctionCode::ReadHoldingRegisters,
            ExceptionCode::IllegalDataAddress,
        );
        assert_eq!(resp.wire_function_code(), 0x83);
        assert!(resp.is_exception());
        assert_eq!(resp.function(), FunctionCode::ReadHoldingRegisters);
    }
}
