//! Modbus frame codec
//!
//! PDU serialization is shared by both wire variants; [`rtu`] and [`tcp`]
//! add the unit id and CRC16 or MBAP header around it.
//!
//! # Request/response ambiguity
//!
//! Several function codes use byte layouts that are valid as both a request
//! and a response. FC05/FC06 are byte-identical in both directions, and a
//! read response with a byte count of 3 has the same length as a read
//! request. The codec cannot tell these apart from the bytes alone. Callers
//! supply the direction they expect (a master parses responses, a slave
//! parses requests); decoding with `None` returns [`FrameError::Ambiguous`]
//! whenever both shapes fit.

pub mod rtu;
pub mod tcp;

use tracing::trace;

use crate::bit_ops::read_u16;
use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_FUNCTION, MAX_PDU_SIZE, MAX_REQUEST_PDU_SIZE,
};
use crate::error::FrameError;
use crate::pdu::{ExceptionCode, FrameKind, FunctionCode, Pdu, Request, Response};

pub use rtu::RtuFrame;
pub use tcp::{MbapCodec, MbapHeader, TcpFrame};

/// Serialize a PDU (function code + payload)
pub fn encode_pdu(pdu: &Pdu) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(8);
    match pdu {
        Pdu::Request(request) => encode_request_into(request, &mut buf)?,
        Pdu::Response(response) => encode_response_into(response, &mut buf)?,
    }

    if buf.len() > MAX_PDU_SIZE {
        return Err(FrameError::NotEncodable(format!(
            "PDU of {} bytes exceeds {} bytes",
            buf.len(),
            MAX_PDU_SIZE
        )));
    }
    trace!("PDU encoded: {:02X?}", buf);
    Ok(buf)
}

fn byte_count(data: &[u8]) -> Result<u8, FrameError> {
    u8::try_from(data.len())
        .map_err(|_| FrameError::NotEncodable(format!("byte count {} > 255", data.len())))
}

fn encode_request_into(request: &Request, buf: &mut Vec<u8>) -> Result<(), FrameError> {
    buf.push(request.function().code());
    match request {
        Request::ReadCoils { address, quantity }
        | Request::ReadDiscreteInputs { address, quantity }
        | Request::ReadHoldingRegisters { address, quantity }
        | Request::ReadInputRegisters { address, quantity } => {
            buf.extend_from_slice(&address.to_be_bytes());
            buf.extend_from_slice(&quantity.to_be_bytes());
        },
        Request::WriteSingleCoil { address, value }
        | Request::WriteSingleRegister { address, value } => {
            buf.extend_from_slice(&address.to_be_bytes());
            buf.extend_from_slice(&value.to_be_bytes());
        },
        Request::WriteMultipleCoils {
            address,
            quantity,
            data,
        }
        | Request::WriteMultipleRegisters {
            address,
            quantity,
            data,
        } => {
            buf.extend_from_slice(&address.to_be_bytes());
            buf.extend_from_slice(&quantity.to_be_bytes());
            buf.push(byte_count(data)?);
            buf.extend_from_slice(data);
        },
    }
    Ok(())
}

fn encode_response_into(response: &Response, buf: &mut Vec<u8>) -> Result<(), FrameError> {
    buf.push(response.wire_function_code());
    match response {
        Response::ReadCoils { data }
        | Response::ReadDiscreteInputs { data }
        | Response::ReadHoldingRegisters { data }
        | Response::ReadInputRegisters { data } => {
            buf.push(byte_count(data)?);
            buf.extend_from_slice(data);
        },
        Response::WriteSingleCoil { address, value }
        | Response::WriteSingleRegister { address, value } => {
            buf.extend_from_slice(&address.to_be_bytes());
            buf.extend_from_slice(&value.to_be_bytes());
        },
        Response::WriteMultipleCoils { address, quantity }
        | Response::WriteMultipleRegisters { address, quantity } => {
            buf.extend_from_slice(&address.to_be_bytes());
            buf.extend_from_slice(&quantity.to_be_bytes());
        },
        Response::Exception { code, .. } => buf.push(code.code()),
    }
    Ok(())
}

/// Exception PDU answering a function code that has no [`FunctionCode`]
///
/// [`Response::Exception`] can only name supported functions, so the reply
/// to an unknown one is built from the raw code.
pub fn illegal_function_pdu(raw_function: u8) -> [u8; 2] {
    [raw_function | EXCEPTION_FLAG, EXCEPTION_ILLEGAL_FUNCTION]
}

/// Parse a PDU, using `expected` to resolve request/response ambiguity
pub fn decode_pdu(bytes: &[u8], expected: Option<FrameKind>) -> Result<Pdu, FrameError> {
    match expected {
        Some(FrameKind::Request) => decode_request(bytes).map(Pdu::Request),
        Some(FrameKind::Response) => decode_response(bytes).map(Pdu::Response),
        None => {
            if bytes.first().is_some_and(|fc| fc & EXCEPTION_FLAG != 0) {
                return decode_response(bytes).map(Pdu::Response);
            }
            match (decode_request(bytes), decode_response(bytes)) {
                (Ok(_), Ok(_)) => Err(FrameError::Ambiguous(bytes[0])),
                (Ok(request), Err(_)) => Ok(Pdu::Request(request)),
                (Err(_), Ok(response)) => Ok(Pdu::Response(response)),
                (Err(err), Err(_)) => Err(err),
            }
        },
    }
}

fn check_pdu_bounds(bytes: &[u8], max_len: usize) -> Result<(), FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::TooShort(0));
    }
    if bytes.len() > max_len {
        return Err(FrameError::TooLong(bytes.len()));
    }
    Ok(())
}

fn expect_len(bytes: &[u8], expected: usize) -> Result<(), FrameError> {
    if bytes.len() != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Parse a request PDU
///
/// Requests up to `MAX_REQUEST_PDU_SIZE` parse, so that quantities beyond the
/// protocol limits surface through `Request::validate` as exception 3.
pub fn decode_request(bytes: &[u8]) -> Result<Request, FrameError> {
    check_pdu_bounds(bytes, MAX_REQUEST_PDU_SIZE)?;
    let function =
        FunctionCode::from_code(bytes[0]).ok_or(FrameError::UnsupportedFunction(bytes[0]))?;

    if matches!(
        function,
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters
    ) {
        if bytes.len() < 6 {
            return Err(FrameError::TooShort(bytes.len()));
        }
        let address = read_u16(bytes, 1);
        let quantity = read_u16(bytes, 3);
        let count = bytes[5] as usize;
        let data = &bytes[6..];
        if data.len() != count {
            return Err(FrameError::ByteCountMismatch {
                byte_count: count,
                actual: data.len(),
            });
        }
        let data = data.to_vec();
        return Ok(if function == FunctionCode::WriteMultipleCoils {
            Request::WriteMultipleCoils {
                address,
                quantity,
                data,
            }
        } else {
            Request::WriteMultipleRegisters {
                address,
                quantity,
                data,
            }
        });
    }

    expect_len(bytes, 5)?;
    let address = read_u16(bytes, 1);
    let word = read_u16(bytes, 3);
    Ok(match function {
        FunctionCode::WriteSingleCoil => Request::WriteSingleCoil {
            address,
            value: word,
        },
        FunctionCode::WriteSingleRegister => Request::WriteSingleRegister {
            address,
            value: word,
        },
        read => {
            Request::read(read, address, word).ok_or(FrameError::UnsupportedFunction(bytes[0]))?
        },
    })
}

/// Parse a response PDU (normal or exception)
pub fn decode_response(bytes: &[u8]) -> Result<Response, FrameError> {
    check_pdu_bounds(bytes, MAX_PDU_SIZE)?;
    let raw = bytes[0];

    if raw & EXCEPTION_FLAG != 0 {
        let function = FunctionCode::from_code(raw & !EXCEPTION_FLAG)
            .ok_or(FrameError::UnsupportedFunction(raw))?;
        expect_len(bytes, 2)?;
        return Ok(Response::Exception {
            function,
            code: ExceptionCode::from_code(bytes[1]),
        });
    }

    let function = FunctionCode::from_code(raw).ok_or(FrameError::UnsupportedFunction(raw))?;

    if function.is_read() {
        if bytes.len() < 2 {
            return Err(FrameError::TooShort(bytes.len()));
        }
        let count = bytes[1] as usize;
        let data = &bytes[2..];
        let registers = !function.is_bit_access();
        if data.len() != count || count == 0 || (registers && count % 2 != 0) {
            return Err(FrameError::ByteCountMismatch {
                byte_count: count,
                actual: data.len(),
            });
        }
        let data = data.to_vec();
        return Ok(match function {
            FunctionCode::ReadCoils => Response::ReadCoils { data },
            FunctionCode::ReadDiscreteInputs => Response::ReadDiscreteInputs { data },
            FunctionCode::ReadHoldingRegisters => Response::ReadHoldingRegisters { data },
            _ => Response::ReadInputRegisters { data },
        });
    }

    expect_len(bytes, 5)?;
    let address = read_u16(bytes, 1);
    let word = read_u16(bytes, 3);
    Ok(match function {
        FunctionCode::WriteSingleCoil => Response::WriteSingleCoil {
            address,
            value: word,
        },
        FunctionCode::WriteSingleRegister => Response::WriteSingleRegister {
            address,
            value: word,
        },
        FunctionCode::WriteMultipleCoils => Response::WriteMultipleCoils {
            address,
            quantity: word,
        },
        _ => Response::WriteMultipleRegisters {
            address,
            quantity: word,
        },
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let pdu = Pdu::Request(Request::ReadHoldingRegisters {
            address: 0x0100,
            quantity: 0x000A,
        });
        assert_eq!(encode_pdu(&pdu).unwrap(), vec![0x03, 0x01, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_single_coil_encoding() {
        let on = encode_pdu(&Request::write_single_coil(0x00AC, true).into()).unwrap();
        assert_eq!(on, vec![0x05, 0x00, 0xAC, 0xFF, 0x00]);
        let off = encode_pdu(&Request::write_single_coil(0x00AC, false).into()).unwrap();
        assert_eq!(off, vec![0x05, 0x00, 0xAC, 0x00, 0x00]);
    }

    #[test]
    fn test_multiple_coils_byte_count_prefix() {
        let bits = [
            true, false, true, true, false, false, true, true, true, false,
        ];
        let bytes = encode_pdu(&Request::write_multiple_coils(0x0013, &bits).into()).unwrap();
        assert_eq!(bytes, vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]);
    }

    #[test]
    fn test_multiple_registers_byte_count_prefix() {
        let bytes =
            encode_pdu(&Request::write_multiple_registers(0x0001, &[0x000A, 0x0102]).into())
                .unwrap();
        assert_eq!(
            bytes,
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_roundtrip_all_function_codes() {
        let requests = vec![
            Request::ReadCoils {
                address: 1,
                quantity: 2000,
            },
            Request::ReadDiscreteInputs {
                address: 2,
                quantity: 1,
            },
            Request::ReadHoldingRegisters {
                address: 3,
                quantity: 125,
            },
            Request::ReadInputRegisters {
                address: 4,
                quantity: 7,
            },
            Request::write_single_coil(5, true),
            Request::write_single_register(6, 0xBEEF),
            Request::write_multiple_coils(7, &[true; 1968]),
            Request::write_multiple_registers(8, &[0x1234; 123]),
        ];
        for request in requests {
            let pdu = Pdu::Request(request);
            let bytes = encode_pdu(&pdu).unwrap();
            assert_eq!(decode_pdu(&bytes, Some(FrameKind::Request)).unwrap(), pdu);
        }

        let responses = vec![
            Response::ReadCoils { data: vec![0xCD, 0x01] },
            Response::ReadDiscreteInputs { data: vec![0x00] },
            Response::ReadHoldingRegisters {
                data: vec![0x00, 0x64, 0x00, 0xC8],
            },
            Response::ReadInputRegisters { data: vec![0xFF, 0xFF] },
            Response::WriteSingleCoil {
                address: 5,
                value: 0xFF00,
            },
            Response::WriteSingleRegister {
                address: 6,
                value: 0xBEEF,
            },
            Response::WriteMultipleCoils {
                address: 7,
                quantity: 1968,
            },
            Response::WriteMultipleRegisters {
                address: 8,
                quantity: 123,
            },
            Response::exception(FunctionCode::WriteSingleCoil, ExceptionCode::IllegalDataAddress),
        ];
        for response in responses {
            let pdu = Pdu::Response(response);
            let bytes = encode_pdu(&pdu).unwrap();
            assert_eq!(decode_pdu(&bytes, Some(FrameKind::Response)).unwrap(), pdu);
        }
    }

    #[test]
    fn test_single_write_is_ambiguous_without_context() {
        let bytes = [0x06, 0x00, 0x01, 0x00, 0x03];
        assert_eq!(decode_pdu(&bytes, None), Err(FrameError::Ambiguous(0x06)));

        let as_request = decode_pdu(&bytes, Some(FrameKind::Request)).unwrap();
        assert_eq!(as_request.kind(), FrameKind::Request);
        let as_response = decode_pdu(&bytes, Some(FrameKind::Response)).unwrap();
        assert_eq!(as_response.kind(), FrameKind::Response);
    }

    #[test]
    fn test_unambiguous_shapes_without_context() {
        // FC16 request carries a byte count, the response does not
        let request = [0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0x00, 0x0A];
        assert_eq!(decode_pdu(&request, None).unwrap().kind(), FrameKind::Request);

        let response = [0x10, 0x00, 0x01, 0x00, 0x01];
        assert_eq!(decode_pdu(&response, None).unwrap().kind(), FrameKind::Response);

        let exception = [0x83, 0x02];
        assert_eq!(decode_pdu(&exception, None).unwrap().kind(), FrameKind::Response);
    }

    #[test]
    fn test_decode_rejects_unknown_function() {
        assert_eq!(
            decode_request(&[0x07, 0x00]),
            Err(FrameError::UnsupportedFunction(0x07))
        );
        assert_eq!(
            decode_response(&[0x87, 0x01]),
            Err(FrameError::UnsupportedFunction(0x87))
        );
    }

    #[test]
    fn test_illegal_function_pdu() {
        assert_eq!(illegal_function_pdu(0x2B), [0xAB, 0x01]);
        let response = decode_response(&illegal_function_pdu(0x03)).unwrap();
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalFunction));
    }

    #[test]
    fn test_decode_rejects_byte_count_mismatch() {
        assert!(matches!(
            decode_response(&[0x03, 0x04, 0x00, 0x64]),
            Err(FrameError::ByteCountMismatch { .. })
        ));
        // Odd register byte count
        assert!(matches!(
            decode_response(&[0x03, 0x01, 0x00]),
            Err(FrameError::ByteCountMismatch { .. })
        ));
        assert!(matches!(
            decode_request(&[0x10, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00]),
            Err(FrameError::ByteCountMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_keeps_inconsistent_quantity_for_slave_validation() {
        // byte count agrees with data but not with quantity
        let bytes = [0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01];
        let request = decode_request(&bytes).unwrap();
        assert_eq!(request.validate(), Err(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_over_quantity_write_parses_then_fails_validation() {
        // 124 registers: a 254-byte PDU, one past what a master may send
        let mut bytes = vec![0x10, 0x00, 0x00, 0x00, 0x7C, 0xF8];
        bytes.extend_from_slice(&[0u8; 248]);
        let request = decode_request(&bytes).unwrap();
        assert_eq!(request.quantity(), 124);
        assert_eq!(request.validate(), Err(ExceptionCode::IllegalDataValue));

        // responses keep the protocol limit
        assert!(matches!(decode_response(&bytes), Err(FrameError::TooLong(254))));
        assert!(matches!(
            decode_request(&[0u8; MAX_REQUEST_PDU_SIZE + 1]),
            Err(FrameError::TooLong(_))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_pdu() {
        let request = Request::write_multiple_registers(0, &[0; 124]);
        assert!(matches!(
            encode_pdu(&request.into()),
            Err(FrameError::NotEncodable(_))
        ));
    }
}
