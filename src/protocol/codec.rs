//! Register codec for the flow-counter wire format
//!
//! The devices transmit 32-bit values in CDAB word order: the low 16-bit
//! word arrives in the first register, the high word in the second, each
//! register itself big-endian on the wire. This is neither plain big-endian
//! nor little-endian 32-bit packing and must be preserved exactly.
//!
//! The unit identifier is the one asymmetric field: on RTU decode each
//! register's low byte is the first character and the high byte the second,
//! while the TCP encoding transmits the high byte first per register. Both
//! directions are deliberate and reproduced here.

use super::constants::UNIT_ID_LEN;

/// Decode a 32-bit float from a CDAB register pair (low word first).
#[inline]
pub fn decode_f32(lo: u16, hi: u16) -> f32 {
    f32::from_bits(((hi as u32) << 16) | lo as u32)
}

/// Decode a 32-bit unsigned integer from a CDAB register pair.
#[inline]
pub fn decode_u32(lo: u16, hi: u16) -> u32 {
    ((hi as u32) << 16) | lo as u32
}

/// Encode a 32-bit float as four wire bytes in CDAB order:
/// low word big-endian first, then high word big-endian.
#[inline]
pub fn encode_f32(value: f32) -> [u8; 4] {
    encode_u32(value.to_bits())
}

/// Encode a 32-bit unsigned integer as four wire bytes in CDAB order.
#[inline]
pub fn encode_u32(value: u32) -> [u8; 4] {
    [
        (value >> 8) as u8,  // low word high byte
        value as u8,         // low word low byte
        (value >> 24) as u8, // high word high byte
        (value >> 16) as u8, // high word low byte
    ]
}

/// Decode the 10-character unit identifier from its five registers.
///
/// Each register carries two characters: the low byte first, the high byte
/// second.
pub fn decode_unit_id(registers: &[u16; 5]) -> [u8; UNIT_ID_LEN] {
    let mut id = [0u8; UNIT_ID_LEN];
    for (i, reg) in registers.iter().enumerate() {
        id[i * 2] = (reg & 0xFF) as u8;
        id[i * 2 + 1] = (reg >> 8) as u8;
    }
    id
}

/// Encode one unit-id register for the TCP response.
///
/// `index` selects the register within 0..5. The TCP side transmits the
/// high byte (second stored character) first, swapping each register's
/// bytes relative to the RTU layout.
#[inline]
pub fn encode_unit_id_register(unit_id: &[u8; UNIT_ID_LEN], index: usize) -> [u8; 2] {
    [unit_id[index * 2 + 1], unit_id[index * 2]]
}

/// Render the unit identifier as text, stopping at the first NUL.
pub fn unit_id_str(unit_id: &[u8; UNIT_ID_LEN]) -> &str {
    let end = unit_id.iter().position(|&b| b == 0).unwrap_or(UNIT_ID_LEN);
    std::str::from_utf8(&unit_id[..end]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_f32_word_order() {
        // 12.5f32 = 0x41480000: high word 0x4148, low word 0x0000.
        assert_eq!(decode_f32(0x0000, 0x4148), 12.5);
        // Flipping the registers must not give the same value.
        assert_ne!(decode_f32(0x4148, 0x0000), 12.5);
    }

    #[test]
    fn decode_u32_word_order() {
        assert_eq!(decode_u32(0x5678, 0x1234), 0x1234_5678);
    }

    #[test]
    fn encode_f32_byte_layout() {
        // 12.5f32 = 0x41480000 -> low word 0x0000 first, high word 0x4148.
        assert_eq!(encode_f32(12.5), [0x00, 0x00, 0x41, 0x48]);
    }

    #[test]
    fn encode_u32_byte_layout() {
        assert_eq!(encode_u32(0x1234_5678), [0x56, 0x78, 0x12, 0x34]);
    }

    #[test]
    fn float_round_trip() {
        for &x in &[
            0.0f32,
            -0.0,
            1.0,
            -1.0,
            12.5,
            1e-38,
            3.4e38,
            f32::MIN_POSITIVE,
            f32::MAX,
            std::f32::consts::PI,
        ] {
            let bytes = encode_f32(x);
            let lo = u16::from_be_bytes([bytes[0], bytes[1]]);
            let hi = u16::from_be_bytes([bytes[2], bytes[3]]);
            assert_eq!(decode_f32(lo, hi).to_bits(), x.to_bits(), "value {x}");
        }
    }

    #[test]
    fn u32_round_trip() {
        for &x in &[0u32, 1, 0xFFFF, 0x1_0000, 0xDEAD_BEEF, u32::MAX] {
            let bytes = encode_u32(x);
            let lo = u16::from_be_bytes([bytes[0], bytes[1]]);
            let hi = u16::from_be_bytes([bytes[2], bytes[3]]);
            assert_eq!(decode_u32(lo, hi), x);
        }
    }

    #[test]
    fn unit_id_decode_low_byte_first() {
        // "AB" in one register: low byte 'A', high byte 'B'.
        let regs = [0x4241u16, 0x4443, 0x4645, 0x4847, 0x4A49];
        let id = decode_unit_id(&regs);
        assert_eq!(unit_id_str(&id), "ABCDEFGHIJ");
    }

    #[test]
    fn unit_id_tcp_encode_swaps_bytes() {
        let regs = [0x4241u16, 0x4443, 0x4645, 0x4847, 0x4A49];
        let id = decode_unit_id(&regs);
        // TCP transmits the high (second stored) byte first.
        assert_eq!(encode_unit_id_register(&id, 0), [b'B', b'A']);
        assert_eq!(encode_unit_id_register(&id, 4), [b'J', b'I']);
    }

    #[test]
    fn unit_id_str_stops_at_nul() {
        let mut id = [0u8; UNIT_ID_LEN];
        id[..4].copy_from_slice(b"FC01");
        assert_eq!(unit_id_str(&id), "FC01");
    }
}
