//! Modbus TCP framing: `MBAP header ‖ unit_id ‖ PDU`
//!
//! MBAP: transaction id (2, BE) ‖ protocol id 0x0000 (2, BE) ‖ length (2, BE),
//! where length counts unit id + PDU.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::{decode_pdu, encode_pdu};
use crate::bit_ops::read_u16;
use crate::constants::{MAX_MBAP_LENGTH, MAX_REQUEST_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{FrameError, ModbusError};
use crate::pdu::{FrameKind, Pdu};

/// Modbus TCP MBAP header (with the unit id that follows it)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (fixed to 0)
    pub protocol_id: u16,
    /// Length field: unit id + PDU
    pub length: u16,
    /// Unit identifier
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse and validate the first seven bytes of a TCP frame
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        Self::parse_bounded(data, MAX_MBAP_LENGTH)
    }

    /// Like [`parse`](Self::parse), but admits the longer length fields a
    /// malformed request can carry so the slave can still answer it
    pub fn parse_request(data: &[u8]) -> Result<Self, FrameError> {
        Self::parse_bounded(data, MAX_REQUEST_MBAP_LENGTH)
    }

    fn parse_bounded(data: &[u8], max_length: usize) -> Result<Self, FrameError> {
        if data.len() < MBAP_HEADER_LEN + 1 {
            return Err(FrameError::TooShort(data.len()));
        }
        let header = Self {
            transaction_id: read_u16(data, 0),
            protocol_id: read_u16(data, 2),
            length: read_u16(data, 4),
            unit_id: data[6],
        };

        if header.protocol_id != 0 {
            return Err(FrameError::InvalidProtocolId(header.protocol_id));
        }
        // unit id + at least a function code
        let length = header.length as usize;
        if length < 2 {
            return Err(FrameError::TooShort(MBAP_HEADER_LEN + length));
        }
        if length > max_length {
            return Err(FrameError::TooLong(MBAP_HEADER_LEN + length));
        }
        Ok(header)
    }

    /// Total frame size announced by the header
    pub fn frame_len(&self) -> usize {
        MBAP_HEADER_LEN + self.length as usize
    }
}

/// TCP frame: addressed PDU tagged with a transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    /// Master-assigned, echoed by the slave
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Pdu,
}

impl TcpFrame {
    pub fn new(transaction_id: u16, unit_id: u8, pdu: impl Into<Pdu>) -> Self {
        Self {
            transaction_id,
            unit_id,
            pdu: pdu.into(),
        }
    }

    /// Serialize with MBAP header
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let pdu = encode_pdu(&self.pdu)?;
        Ok(encode_adu(self.transaction_id, self.unit_id, &pdu))
    }

    /// Validate the MBAP header against the byte count, then parse the PDU
    pub fn decode(data: &[u8], expected: Option<FrameKind>) -> Result<Self, FrameError> {
        let header = MbapHeader::parse(data)?;
        if data.len() != header.frame_len() {
            return Err(FrameError::LengthMismatch {
                expected: header.frame_len(),
                actual: data.len(),
            });
        }

        debug!(
            "MBAP header: trans_id={:04X}, length={}, unit_id={}",
            header.transaction_id, header.length, header.unit_id
        );

        let pdu = decode_pdu(&data[MBAP_HEADER_LEN + 1..], expected)?;
        Ok(Self {
            transaction_id: header.transaction_id,
            unit_id: header.unit_id,
            pdu,
        })
    }
}

/// Wrap raw PDU bytes in an MBAP header
pub(crate) fn encode_adu(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);

    debug!(
        "Building TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, PDU_len={}",
        transaction_id,
        unit_id,
        pdu.first().copied().unwrap_or(0),
        pdu.len()
    );
    frame
}

/// Stream codec that splits a TCP byte stream into whole MBAP frames
///
/// Each connection owns its own buffer; a partial frame waits in the buffer
/// until the bytes announced by its length field have arrived. Length fields
/// are bounded by the request limit, so an oversized write reaches the slave
/// and gets an exception reply. A header that
/// fails validation makes the stream unrecoverable, so it is reported as an
/// error and the connection is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = BytesMut;
    type Error = ModbusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MBAP_HEADER_LEN + 1 {
            return Ok(None);
        }

        let header = match MbapHeader::parse_request(&src[..]) {
            Ok(header) => header,
            Err(e) => {
                warn!("Dropping TCP stream with invalid MBAP header: {}", e);
                src.advance(src.len());
                return Err(ModbusError::FrameCorrupt(e));
            },
        };

        let total = header.frame_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(total)))
    }
}

impl Encoder<Vec<u8>> for MbapCodec {
    type Error = ModbusError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::pdu::{Request, Response};

    #[test]
    fn test_encode_mbap_layout() {
        let frame = TcpFrame::new(
            0x0001,
            0x11,
            Request::ReadHoldingRegisters {
                address: 0x006B,
                quantity: 0x0003,
            },
        );
        assert_eq!(
            frame.encode().unwrap(),
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );
    }

    #[test]
    fn test_decode_roundtrip_preserves_transaction_id() {
        let frame = TcpFrame::new(
            0xBEEF,
            1,
            Response::WriteMultipleRegisters {
                address: 1,
                quantity: 2,
            },
        );
        let bytes = frame.encode().unwrap();
        let decoded = TcpFrame::decode(&bytes, Some(FrameKind::Response)).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.transaction_id, 0xBEEF);
    }

    #[test]
    fn test_decode_rejects_bad_protocol_id() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(
            TcpFrame::decode(&bytes, Some(FrameKind::Request)),
            Err(FrameError::InvalidProtocolId(1))
        );
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert!(matches!(
            TcpFrame::decode(&bytes, Some(FrameKind::Request)),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_stream_codec_splits_frames() {
        let first = TcpFrame::new(1, 1, Request::write_single_register(1, 2))
            .encode()
            .unwrap();
        let second = TcpFrame::new(2, 1, Request::write_single_register(3, 4))
            .encode()
            .unwrap();

        let mut codec = MbapCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second[..4]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), &first[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&second[4..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), &second[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_codec_rejects_garbage_header() {
        let mut codec = MbapCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0xAB, 0xCD, 0x00, 0x06, 0x01][..]);
        assert!(codec.decode(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_request_length_limit_is_wider_than_response_limit() {
        // FC16 with 124 registers: length 0x00FF = unit id + 254-byte PDU
        let header = [0x00, 0x01, 0x00, 0x00, 0x00, 0xFF, 0x01];
        assert_eq!(MbapHeader::parse(&header), Err(FrameError::TooLong(6 + 255)));
        assert_eq!(MbapHeader::parse_request(&header).unwrap().length, 0xFF);

        let mut too_long = header;
        too_long[4..6].copy_from_slice(&(MAX_REQUEST_MBAP_LENGTH as u16 + 1).to_be_bytes());
        assert!(MbapHeader::parse_request(&too_long).is_err());
    }

    #[test]
    fn test_stream_codec_passes_oversized_write_through() {
        let mut frame = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0xFF, 0x01];
        frame.extend_from_slice(&[0x10, 0x00, 0x00, 0x00, 0x7C, 0xF8]);
        frame.extend_from_slice(&[0u8; 248]);

        let mut codec = MbapCodec;
        let mut buf = BytesMut::from(&frame[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), &frame[..]);
        assert!(buf.is_empty());
    }
}
