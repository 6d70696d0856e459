//! Modbus RTU framing: `unit_id ‖ PDU ‖ CRC16 (little-endian)`

use tracing::debug;

use super::{decode_pdu, encode_pdu};
use crate::constants::{
    EXCEPTION_FLAG, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, MAX_REQUEST_RTU_ADU,
    MAX_RTU_ADU, MIN_RTU_ADU,
};
use crate::error::FrameError;
use crate::pdu::{FrameKind, FunctionCode, Pdu};

/// RTU frame: addressed PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    /// 0 = broadcast, 1-247 = device
    pub unit_id: u8,
    pub pdu: Pdu,
}

impl RtuFrame {
    pub fn new(unit_id: u8, pdu: impl Into<Pdu>) -> Self {
        Self {
            unit_id,
            pdu: pdu.into(),
        }
    }

    /// Serialize with trailing CRC
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let pdu = encode_pdu(&self.pdu)?;
        Ok(encode_adu(self.unit_id, &pdu))
    }

    /// Validate CRC and length, then parse the PDU
    pub fn decode(data: &[u8], expected: Option<FrameKind>) -> Result<Self, FrameError> {
        verify(data)?;
        let pdu = decode_pdu(&data[1..data.len() - 2], expected)?;
        Ok(Self {
            unit_id: data[0],
            pdu,
        })
    }
}

/// Wrap raw PDU bytes with unit id and CRC
pub(crate) fn encode_adu(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    debug!(
        "Building RTU frame: unit_id={}, FC={:02X}, PDU_len={}, CRC={:04X}",
        unit_id,
        pdu.first().copied().unwrap_or(0),
        pdu.len(),
        crc
    );
    frame
}

/// Check length bounds and the trailing CRC of a raw RTU frame
pub fn verify(data: &[u8]) -> Result<(), FrameError> {
    verify_bounded(data, MAX_RTU_ADU)
}

/// Like [`verify`], but admits frames up to the request limit so that an
/// over-quantity write is answered rather than ignored
pub fn verify_request(data: &[u8]) -> Result<(), FrameError> {
    verify_bounded(data, MAX_REQUEST_RTU_ADU)
}

fn verify_bounded(data: &[u8], max_len: usize) -> Result<(), FrameError> {
    if data.len() < MIN_RTU_ADU - 1 {
        return Err(FrameError::TooShort(data.len()));
    }
    if data.len() > max_len {
        return Err(FrameError::TooLong(data.len()));
    }

    let frame_len = data.len();
    let received = u16::from_le_bytes([data[frame_len - 2], data[frame_len - 1]]);
    let calculated = crc16(&data[..frame_len - 2]);
    if received != calculated {
        return Err(FrameError::CrcMismatch {
            expected: calculated,
            actual: received,
        });
    }
    Ok(())
}

/// CRC16/MODBUS: polynomial 0xA001 (reflected 0x8005), init 0xFFFF, no final XOR
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Outcome of inspecting a partially received RTU frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Not enough header bytes yet to know the total length
    Unknown,
    /// Total frame length in bytes
    Known(usize),
}

/// Total length of the RTU frame starting at `buf[0]`, once enough of its
/// header has arrived
///
/// Lengths are function-code specific:
/// - exception response: 5
/// - FC01-04 response: 5 + byte count (at offset 2)
/// - FC05/06 both directions, FC15/16 response, FC01-04 request: 8
/// - FC15/16 request: 9 + byte count (at offset 6)
pub fn expected_len(buf: &[u8], kind: FrameKind) -> Result<FrameLength, FrameError> {
    let Some(&raw) = buf.get(1) else {
        return Ok(FrameLength::Unknown);
    };

    if raw & EXCEPTION_FLAG != 0 {
        if kind == FrameKind::Request || FunctionCode::from_code(raw & !EXCEPTION_FLAG).is_none()
        {
            return Err(FrameError::UnsupportedFunction(raw));
        }
        return Ok(FrameLength::Known(MIN_RTU_ADU));
    }

    let function = FunctionCode::from_code(raw).ok_or(FrameError::UnsupportedFunction(raw))?;
    let len = match (kind, function.is_read()) {
        (FrameKind::Response, true) => match buf.get(2) {
            Some(&count) => 5 + count as usize,
            None => return Ok(FrameLength::Unknown),
        },
        (FrameKind::Request, false)
            if raw == FC_WRITE_MULTIPLE_COILS || raw == FC_WRITE_MULTIPLE_REGISTERS =>
        {
            match buf.get(6) {
                Some(&count) => 9 + count as usize,
                None => return Ok(FrameLength::Unknown),
            }
        },
        _ => 8,
    };
    Ok(FrameLength::Known(len))
}
