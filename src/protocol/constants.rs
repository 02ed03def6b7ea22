//! Modbus frame limits and the flow-counter register layout
//!
//! Frame size constants follow the official specification: the 253-byte PDU
//! limit is inherited from the RS485 ADU limit of 256 bytes. The register
//! layout constants describe the flow-counter device map and the extended
//! map the TCP gateway serves.

// ============================================================================
// Frame size constants
// ============================================================================

/// MBAP header length on the wire
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Protocol identifier for Modbus TCP
pub const PROTOCOL_ID_TCP: u16 = 0;

// ============================================================================
// Function and exception codes
// ============================================================================

/// Read Holding Registers
pub const FC_READ_HOLDING: u8 = 0x03;
/// Read Input Registers (served identically to holding registers)
pub const FC_READ_INPUT: u8 = 0x04;

/// Modbus exception codes used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    DeviceFailure = 0x04,
}

impl ExceptionCode {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Flow-counter register layout
// ============================================================================

/// Start address of the device register block
pub const FC_START_ADDRESS: u16 = 0;
/// Registers covered by a full read (snapshot block + unit id)
pub const FC_FULL_READ_COUNT: u16 = 23;
/// Start address of the temperature/pressure pair
pub const FC_TEMP_PRESSURE_ADDRESS: u16 = 8;
/// Registers covered by a periodic temp/pressure read
pub const FC_TEMP_PRESSURE_COUNT: u16 = 4;

/// Size of the extended register map served over TCP (addresses 0..34)
pub const EXTENDED_MAP_SIZE: u16 = 34;

/// Snapshot field base addresses within the extended map
pub mod regs {
    pub const VOLUME: u16 = 0;
    pub const VOLUME_NORMALISED: u16 = 2;
    pub const FLOW: u16 = 4;
    pub const FLOW_NORMALISED: u16 = 6;
    pub const TEMPERATURE: u16 = 8;
    pub const PRESSURE: u16 = 10;
    pub const TIMESTAMP: u16 = 12;
    pub const PSU_VOLTS: u16 = 14;
    pub const BATT_VOLTS: u16 = 16;
    /// Unit id occupies registers 18..=22 (one register per character pair)
    pub const UNIT_ID_START: u16 = 18;
    pub const UNIT_ID_END: u16 = 22;
    /// Registers 23..=29 are reserved and always read as zero
    pub const RESERVED_START: u16 = 23;
    pub const RESERVED_END: u16 = 29;
    /// Live values refreshed by periodic polling
    pub const CURRENT_TEMPERATURE: u16 = 30;
    pub const CURRENT_PRESSURE: u16 = 32;
}

/// Number of characters in the device unit identifier
pub const UNIT_ID_LEN: usize = 10;
