//! Holding-register map served by the gateway
//!
//! Addresses 0..=33 per port. 32-bit values span two registers in CDAB
//! word order: the low word sits at the even base address and travels
//! first, each word big-endian on the wire. Reads aligned to a field's
//! base address return the value; a read landing mid-pair returns zeros
//! for that register and realigns at the next field base.

use crate::cache::CounterData;
use crate::protocol::codec;
use crate::protocol::constants::{regs, EXTENDED_MAP_SIZE};

/// Why a read request cannot be served from the map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Quantity of zero
    BadQuantity,
    /// Requested range runs past the end of the map
    OutOfRange,
}

/// Serve a register read from a cache entry.
///
/// Returns the data field of the response PDU (without function code or
/// byte count), always `quantity * 2` bytes long.
pub fn read_registers(
    entry: &CounterData,
    start_address: u16,
    quantity: u16,
) -> Result<Vec<u8>, MapError> {
    if quantity == 0 {
        return Err(MapError::BadQuantity);
    }
    if u32::from(start_address) + u32::from(quantity) > u32::from(EXTENDED_MAP_SIZE) {
        return Err(MapError::OutOfRange);
    }

    let mut out = Vec::with_capacity(quantity as usize * 2);
    let mut i = 0;
    while i < quantity {
        let address = start_address + i;
        let consumed = match address {
            regs::VOLUME => push_pair(&mut out, entry.volume.to_bits(), quantity - i),
            regs::VOLUME_NORMALISED => {
                push_pair(&mut out, entry.volume_normalised.to_bits(), quantity - i)
            }
            regs::FLOW => push_pair(&mut out, entry.flow.to_bits(), quantity - i),
            regs::FLOW_NORMALISED => {
                push_pair(&mut out, entry.flow_normalised.to_bits(), quantity - i)
            }
            regs::TEMPERATURE => push_pair(&mut out, entry.temperature.to_bits(), quantity - i),
            regs::PRESSURE => push_pair(&mut out, entry.pressure.to_bits(), quantity - i),
            regs::TIMESTAMP => push_pair(&mut out, entry.timestamp, quantity - i),
            regs::PSU_VOLTS => push_pair(&mut out, entry.psu_volts.to_bits(), quantity - i),
            regs::BATT_VOLTS => push_pair(&mut out, entry.batt_volts.to_bits(), quantity - i),
            regs::UNIT_ID_START..=regs::UNIT_ID_END => {
                let index = (address - regs::UNIT_ID_START) as usize;
                out.extend(codec::encode_unit_id_register(&entry.unit_id, index));
                1
            }
            regs::CURRENT_TEMPERATURE => {
                push_pair(&mut out, entry.current_temperature.to_bits(), quantity - i)
            }
            regs::CURRENT_PRESSURE => {
                push_pair(&mut out, entry.current_pressure.to_bits(), quantity - i)
            }
            // Reserved registers and mid-pair addresses
            _ => {
                out.extend([0, 0]);
                1
            }
        };
        i += consumed;
    }
    Ok(out)
}

/// Emit a CDAB pair, or only its low word when the request ends on the
/// pair's base register.
fn push_pair(out: &mut Vec<u8>, value: u32, remaining: u16) -> u16 {
    let bytes = codec::encode_u32(value);
    if remaining >= 2 {
        out.extend(bytes);
        2
    } else {
        out.extend(&bytes[..2]);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CounterData {
        CounterData {
            volume: 123.25,
            volume_normalised: 120.0,
            flow: 4.5,
            flow_normalised: 4.25,
            temperature: 21.5,
            pressure: 101.3,
            timestamp: 0x1234_5678,
            psu_volts: 24.0,
            batt_volts: 3.6,
            unit_id: *b"FC-01\0\0\0\0\0",
            current_temperature: 22.0,
            current_pressure: 100.0,
            data_valid: true,
            ..CounterData::default()
        }
    }

    fn reg(data: &[u8], i: usize) -> u16 {
        u16::from_be_bytes([data[i * 2], data[i * 2 + 1]])
    }

    #[test]
    fn full_map_read() {
        let data = read_registers(&entry(), 0, EXTENDED_MAP_SIZE).unwrap();
        assert_eq!(data.len(), EXTENDED_MAP_SIZE as usize * 2);

        let bits = 123.25f32.to_bits();
        assert_eq!(reg(&data, 0), bits as u16);
        assert_eq!(reg(&data, 1), (bits >> 16) as u16);
        assert_eq!(reg(&data, 12), 0x5678);
        assert_eq!(reg(&data, 13), 0x1234);

        // Unit id registers carry the high byte first on the wire
        assert_eq!(data[18 * 2], b'C');
        assert_eq!(data[18 * 2 + 1], b'F');
        assert_eq!(data[19 * 2], b'0');
        assert_eq!(data[19 * 2 + 1], b'-');

        // Reserved block is zero
        for address in 23..=29 {
            assert_eq!(reg(&data, address), 0, "reserved register {address}");
        }

        let live = 22.0f32.to_bits();
        assert_eq!(reg(&data, 30), live as u16);
        assert_eq!(reg(&data, 31), (live >> 16) as u16);
    }

    #[test]
    fn aligned_pair_read() {
        let data = read_registers(&entry(), 10, 2).unwrap();
        let bits = 101.3f32.to_bits();
        assert_eq!(reg(&data, 0), bits as u16);
        assert_eq!(reg(&data, 1), (bits >> 16) as u16);
    }

    #[test]
    fn mid_pair_read_returns_zeros_then_realigns() {
        // Start at register 1, the high half of volume: that register reads
        // zero and register 2 picks up volume_normalised normally.
        let data = read_registers(&entry(), 1, 3).unwrap();
        assert_eq!(reg(&data, 0), 0);
        let bits = 120.0f32.to_bits();
        assert_eq!(reg(&data, 1), bits as u16);
        assert_eq!(reg(&data, 2), (bits >> 16) as u16);
    }

    #[test]
    fn pair_at_end_of_request_emits_low_word_only() {
        let data = read_registers(&entry(), 0, 1).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(reg(&data, 0), 123.25f32.to_bits() as u16);
    }

    #[test]
    fn zero_quantity_rejected() {
        assert_eq!(read_registers(&entry(), 0, 0), Err(MapError::BadQuantity));
    }

    #[test]
    fn out_of_range_rejected() {
        assert_eq!(read_registers(&entry(), 0, 35), Err(MapError::OutOfRange));
        assert_eq!(read_registers(&entry(), 34, 1), Err(MapError::OutOfRange));
        assert_eq!(
            read_registers(&entry(), u16::MAX, 1),
            Err(MapError::OutOfRange)
        );
        assert!(read_registers(&entry(), 33, 1).is_ok());
    }

    #[test]
    fn response_length_always_matches_quantity() {
        let e = entry();
        for start in 0..EXTENDED_MAP_SIZE {
            for quantity in 1..=(EXTENDED_MAP_SIZE - start) {
                let data = read_registers(&e, start, quantity).unwrap();
                assert_eq!(
                    data.len(),
                    quantity as usize * 2,
                    "start {start} quantity {quantity}"
                );
            }
        }
    }
}
