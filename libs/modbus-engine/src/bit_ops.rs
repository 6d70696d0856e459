//! Bit and register packing for Modbus payloads
//!
//! Coils and discrete inputs travel LSB-first: bit 0 of byte 0 is the first
//! addressed coil. Registers travel big-endian, two bytes each.

/// Pack booleans into bytes, LSB-first, zero-padding the last byte
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` booleans from LSB-first bytes
///
/// Bits past the end of `bytes` read as `false`.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            bytes
                .get(i / 8)
                .map(|byte| (byte >> (i % 8)) & 0x01 != 0)
                .unwrap_or(false)
        })
        .collect()
}

/// Serialize registers as big-endian byte pairs
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Deserialize big-endian byte pairs; a trailing odd byte is ignored
pub fn bytes_to_registers(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Read a big-endian u16 at `offset`
#[inline]
pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}
