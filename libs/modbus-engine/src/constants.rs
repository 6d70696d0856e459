//! Modbus protocol constants
//!
//! Frame size limits are inherited from the RS485 ADU limit of 256 bytes:
//! ADU (256) - unit id (1) - CRC (2) = 253 bytes of PDU.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length in front of the unit id:
/// transaction id (2) + protocol id (2) + length (2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size (function code + payload)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum value of the MBAP length field (unit id + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Maximum RTU frame: unit id + PDU + CRC
pub const MAX_RTU_ADU: usize = 1 + MAX_PDU_SIZE + 2;

/// Largest request PDU a slave accepts off the wire: the FC15/FC16 header
/// (function + address + quantity + byte count) plus a full one-byte count.
/// Anything between `MAX_PDU_SIZE` and this is syntactically well formed and
/// is answered with an exception instead of being dropped as noise.
pub const MAX_REQUEST_PDU_SIZE: usize = 6 + 255;

/// Request-side bound on the MBAP length field
pub const MAX_REQUEST_MBAP_LENGTH: usize = 1 + MAX_REQUEST_PDU_SIZE;

/// Request-side bound on an RTU frame
pub const MAX_REQUEST_RTU_ADU: usize = 1 + MAX_REQUEST_PDU_SIZE + 2;

/// Smallest valid RTU frame: unit id + function code + exception code + CRC
pub const MIN_RTU_ADU: usize = 5;

/// Receive buffer large enough for any TCP or RTU frame, requests included
pub const RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Quantity Limits
// ============================================================================

/// FC01/FC02: `1 + 1 + ceil(N / 8) <= 253`, rounded down to 2000
pub const MAX_READ_BITS: u16 = 2000;

/// FC03/FC04: `1 + 1 + 2N <= 253`
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC15: `1 + 2 + 2 + 1 + ceil(N / 8) <= 253`, rounded down to 0x7B0
pub const MAX_WRITE_BITS: u16 = 1968;

/// FC16: `1 + 2 + 2 + 1 + 2N <= 253`
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Exception Codes
// ============================================================================

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;
pub const EXCEPTION_SLAVE_DEVICE_BUSY: u8 = 0x06;
pub const EXCEPTION_NEGATIVE_ACKNOWLEDGE: u8 = 0x07;
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Coil Encoding
// ============================================================================

/// Single coil ON value (FC05)
pub const COIL_ON: u16 = 0xFF00;

/// Single coil OFF value (FC05)
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Addressing
// ============================================================================

/// RTU broadcast address
pub const BROADCAST_UNIT_ID: u8 = 0;

/// Highest addressable RTU device
pub const MAX_RTU_UNIT_ID: u8 = 247;

/// Unit id used by TCP masters that do not route to a serial device
pub const TCP_UNIT_ID_UNUSED: u8 = 0xFF;

// ============================================================================
// RTU Timing
// ============================================================================

/// At or above this baud rate the inter-frame delay is fixed
pub const FIXED_DELAY_BAUD_THRESHOLD: u32 = 19_200;

/// Fixed inter-frame delay for fast links, in microseconds
pub const FIXED_INTER_FRAME_DELAY_US: u64 = 1_750;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 6);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
        assert_eq!(MAX_RTU_ADU, 256);
        assert_eq!(MAX_REQUEST_PDU_SIZE, 261);
        assert_eq!(MAX_REQUEST_MBAP_LENGTH, 262);
        assert_eq!(MAX_REQUEST_RTU_ADU, 264);
    }

    #[test]
    fn test_quantity_limits_fit_in_pdu() {
        let read_regs = 1 + 1 + (MAX_READ_REGISTERS as usize * 2);
        assert!(read_regs <= MAX_PDU_SIZE);

        let write_regs = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS as usize * 2);
        assert!(write_regs <= MAX_PDU_SIZE);

        let read_bits = 1 + 1 + (MAX_READ_BITS as usize).div_ceil(8);
        assert!(read_bits <= MAX_PDU_SIZE);

        let write_bits = 1 + 2 + 2 + 1 + (MAX_WRITE_BITS as usize).div_ceil(8);
        assert!(write_bits <= MAX_PDU_SIZE);
    }
}
