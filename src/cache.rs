//! Device data cache
//!
//! One entry per physical port holds the latest snapshot from a full read,
//! the live values refreshed by periodic polling, and the request/error
//! metadata. The cache is the single source of truth: the poll engine
//! mutates it from completions and the TCP gateway answers from it without
//! ever issuing a live RTU round-trip.
//!
//! All entries sit behind one `tokio::sync::RwLock`; the original firmware's
//! advisory `flowCounterDataLocked` boolean is replaced by real mutual
//! exclusion between the polling and serving tasks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::PortConfig;
use crate::error::{FlowSrvError, Result};
use crate::protocol::codec;
use crate::protocol::constants::{
    FC_FULL_READ_COUNT, FC_TEMP_PRESSURE_COUNT, UNIT_ID_LEN,
};

/// Number of physical flow-counter ports
pub const MAX_PORTS: usize = 12;

/// Validated port index in `0..MAX_PORTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortIndex(usize);

impl PortIndex {
    /// Create a port index, rejecting out-of-range values
    #[inline]
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_PORTS).then_some(Self(index))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }

    /// One-based port number as shown to users
    #[inline]
    pub fn number(self) -> usize {
        self.0 + 1
    }

    /// Iterate over all port indices
    pub fn all() -> impl Iterator<Item = PortIndex> {
        (0..MAX_PORTS).map(PortIndex)
    }
}

impl std::fmt::Display for PortIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Per-port connectivity state derived from the cache flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disabled,
    NeverConnected,
    Connected,
    ConnectedWithError,
}

/// One cache entry, mirroring the device's register block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterData {
    // Snapshot fields, updated only by full reads
    pub volume: f32,
    pub volume_normalised: f32,
    pub flow: f32,
    pub flow_normalised: f32,
    pub temperature: f32,
    pub pressure: f32,
    pub timestamp: u32,
    pub psu_volts: f32,
    pub batt_volts: f32,
    pub unit_id: [u8; UNIT_ID_LEN],

    // Live fields, refreshed by periodic temp/pressure reads as well
    pub current_temperature: f32,
    pub current_pressure: f32,

    // Metadata
    pub last_update: Option<DateTime<Utc>>,
    pub data_valid: bool,
    pub comm_error: bool,
    pub trigger_count: u32,
    pub pending_initial_read: bool,
    pub request_pending: bool,
}

impl Default for CounterData {
    fn default() -> Self {
        Self {
            volume: 0.0,
            volume_normalised: 0.0,
            flow: 0.0,
            flow_normalised: 0.0,
            temperature: 0.0,
            pressure: 0.0,
            timestamp: 0,
            psu_volts: 0.0,
            batt_volts: 0.0,
            unit_id: [0; UNIT_ID_LEN],
            current_temperature: 0.0,
            current_pressure: 0.0,
            last_update: None,
            data_valid: false,
            comm_error: false,
            trigger_count: 0,
            pending_initial_read: false,
            request_pending: false,
        }
    }
}

impl CounterData {
    /// Connectivity state for this entry given the port's enabled flag
    pub fn link_state(&self, enabled: bool) -> LinkState {
        if !enabled {
            LinkState::Disabled
        } else if !self.data_valid {
            LinkState::NeverConnected
        } else if self.comm_error {
            LinkState::ConnectedWithError
        } else {
            LinkState::Connected
        }
    }

    /// Unit identifier as text
    pub fn unit_id_str(&self) -> &str {
        codec::unit_id_str(&self.unit_id)
    }
}

/// Read-only export of one port for the reporting/logging layer
#[derive(Debug, Clone, Serialize)]
pub struct PortExport {
    pub port: usize,
    pub name: String,
    pub slave_id: u8,
    pub enabled: bool,
    pub link_state: LinkState,
    #[serde(skip)]
    pub data: CounterData,
}

/// Shared device data cache for all ports
#[derive(Debug, Default)]
pub struct FlowCache {
    entries: RwLock<[CounterData; MAX_PORTS]>,
}

impl FlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out one entry
    pub async fn read(&self, port: PortIndex) -> CounterData {
        self.entries.read().await[port.get()]
    }

    /// Copy out all entries
    pub async fn read_all(&self) -> [CounterData; MAX_PORTS] {
        *self.entries.read().await
    }

    /// Apply a completed full read (23 registers).
    ///
    /// Updates the whole snapshot, mirrors temperature/pressure into the
    /// live fields, marks the data valid and clears any error. Returns
    /// `true` when this was the port's first successful read ever.
    pub async fn apply_full_read(&self, port: PortIndex, registers: &[u16]) -> Result<bool> {
        if registers.len() != FC_FULL_READ_COUNT as usize {
            return Err(FlowSrvError::DataError(format!(
                "full read for port {} returned {} registers, expected {}",
                port,
                registers.len(),
                FC_FULL_READ_COUNT
            )));
        }

        let mut entries = self.entries.write().await;
        let entry = &mut entries[port.get()];
        let first_connection = !entry.data_valid;

        entry.volume = codec::decode_f32(registers[0], registers[1]);
        entry.volume_normalised = codec::decode_f32(registers[2], registers[3]);
        entry.flow = codec::decode_f32(registers[4], registers[5]);
        entry.flow_normalised = codec::decode_f32(registers[6], registers[7]);
        entry.temperature = codec::decode_f32(registers[8], registers[9]);
        entry.pressure = codec::decode_f32(registers[10], registers[11]);
        entry.timestamp = codec::decode_u32(registers[12], registers[13]);
        entry.psu_volts = codec::decode_f32(registers[14], registers[15]);
        entry.batt_volts = codec::decode_f32(registers[16], registers[17]);

        let id_regs: [u16; 5] = registers[18..23]
            .try_into()
            .map_err(|_| FlowSrvError::data("unit id register slice"))?;
        entry.unit_id = codec::decode_unit_id(&id_regs);

        // A full read also refreshes the live pair
        entry.current_temperature = entry.temperature;
        entry.current_pressure = entry.pressure;

        entry.data_valid = true;
        entry.comm_error = false;
        entry.trigger_count += 1;
        entry.last_update = Some(Utc::now());
        entry.request_pending = false;

        Ok(first_connection)
    }

    /// Apply a completed periodic temp/pressure read (4 registers).
    ///
    /// Only the live fields move; every snapshot field and the trigger
    /// counter stay bit-identical. Returns `true` when the port recovered
    /// from a communication error.
    pub async fn apply_periodic_read(&self, port: PortIndex, registers: &[u16]) -> Result<bool> {
        if registers.len() != FC_TEMP_PRESSURE_COUNT as usize {
            return Err(FlowSrvError::DataError(format!(
                "periodic read for port {} returned {} registers, expected {}",
                port,
                registers.len(),
                FC_TEMP_PRESSURE_COUNT
            )));
        }

        let mut entries = self.entries.write().await;
        let entry = &mut entries[port.get()];
        let recovered = entry.comm_error;

        entry.current_temperature = codec::decode_f32(registers[0], registers[1]);
        entry.current_pressure = codec::decode_f32(registers[2], registers[3]);
        entry.comm_error = false;
        entry.last_update = Some(Utc::now());
        entry.request_pending = false;

        Ok(recovered && entry.data_valid)
    }

    /// Mark a request in flight for the port
    pub async fn mark_pending(&self, port: PortIndex) {
        self.entries.write().await[port.get()].request_pending = true;
    }

    /// Record a failed or rejected request.
    ///
    /// A device that has never completed a full read stays "not yet seen":
    /// `comm_error` is only raised once `data_valid` is set.
    pub async fn mark_failed(&self, port: PortIndex) {
        let mut entries = self.entries.write().await;
        let entry = &mut entries[port.get()];
        if entry.data_valid {
            entry.comm_error = true;
        }
        entry.request_pending = false;
    }

    /// Clear a port back to its power-on state (used when it is disabled)
    pub async fn reset_port(&self, port: PortIndex) {
        self.entries.write().await[port.get()] = CounterData::default();
    }

    /// Flag a port as needing its post-configuration bootstrap read
    pub async fn set_pending_initial(&self, port: PortIndex, pending: bool) {
        self.entries.write().await[port.get()].pending_initial_read = pending;
    }

    /// Read-only snapshot of every port joined with its configuration,
    /// for the reporting layer.
    pub async fn export(&self, ports: &[PortConfig]) -> Vec<PortExport> {
        let entries = self.entries.read().await;
        ports
            .iter()
            .enumerate()
            .take(MAX_PORTS)
            .map(|(i, cfg)| PortExport {
                port: i + 1,
                name: cfg.name.clone(),
                slave_id: cfg.slave_id,
                enabled: cfg.enabled,
                link_state: entries[i].link_state(cfg.enabled),
                data: entries[i],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::FC_FULL_READ_COUNT;

    fn full_registers(volume: f32, volume_normalised: f32) -> Vec<u16> {
        let mut regs = vec![0u16; FC_FULL_READ_COUNT as usize];
        let v = volume.to_bits();
        regs[0] = v as u16;
        regs[1] = (v >> 16) as u16;
        let vn = volume_normalised.to_bits();
        regs[2] = vn as u16;
        regs[3] = (vn >> 16) as u16;
        // temperature 21.5, pressure 101.3
        let t = 21.5f32.to_bits();
        regs[8] = t as u16;
        regs[9] = (t >> 16) as u16;
        let p = 101.3f32.to_bits();
        regs[10] = p as u16;
        regs[11] = (p >> 16) as u16;
        // timestamp
        regs[12] = 0x5678;
        regs[13] = 0x1234;
        // unit id "FC-01"
        regs[18] = u16::from(b'C') << 8 | u16::from(b'F');
        regs[19] = u16::from(b'0') << 8 | u16::from(b'-');
        regs[20] = u16::from(b'1');
        regs
    }

    fn port(i: usize) -> PortIndex {
        PortIndex::new(i).unwrap()
    }

    #[test]
    fn port_index_bounds() {
        assert!(PortIndex::new(0).is_some());
        assert!(PortIndex::new(MAX_PORTS - 1).is_some());
        assert!(PortIndex::new(MAX_PORTS).is_none());
    }

    #[tokio::test]
    async fn full_read_populates_snapshot_and_live() {
        let cache = FlowCache::new();
        let first = cache
            .apply_full_read(port(3), &full_registers(12.5, 10.0))
            .await
            .unwrap();
        assert!(first);

        let entry = cache.read(port(3)).await;
        assert_eq!(entry.volume, 12.5);
        assert_eq!(entry.volume_normalised, 10.0);
        assert_eq!(entry.temperature, 21.5);
        assert_eq!(entry.current_temperature, 21.5);
        assert_eq!(entry.current_pressure, 101.3);
        assert_eq!(entry.timestamp, 0x1234_5678);
        assert_eq!(entry.unit_id_str(), "FC-01");
        assert!(entry.data_valid);
        assert!(!entry.comm_error);
        assert_eq!(entry.trigger_count, 1);
        assert!(!entry.request_pending);

        let second = cache
            .apply_full_read(port(3), &full_registers(13.0, 10.5))
            .await
            .unwrap();
        assert!(!second);
        assert_eq!(cache.read(port(3)).await.trigger_count, 2);
    }

    #[tokio::test]
    async fn periodic_read_preserves_snapshot_bits() {
        let cache = FlowCache::new();
        cache
            .apply_full_read(port(0), &full_registers(12.5, 10.0))
            .await
            .unwrap();
        let before = cache.read(port(0)).await;

        let t = 25.0f32.to_bits();
        let p = 99.9f32.to_bits();
        let regs = [t as u16, (t >> 16) as u16, p as u16, (p >> 16) as u16];
        cache.apply_periodic_read(port(0), &regs).await.unwrap();

        let after = cache.read(port(0)).await;
        assert_eq!(after.current_temperature, 25.0);
        assert_eq!(after.current_pressure, 99.9);
        // Snapshot fields must be bit-identical
        assert_eq!(after.volume.to_bits(), before.volume.to_bits());
        assert_eq!(
            after.volume_normalised.to_bits(),
            before.volume_normalised.to_bits()
        );
        assert_eq!(after.flow.to_bits(), before.flow.to_bits());
        assert_eq!(after.temperature.to_bits(), before.temperature.to_bits());
        assert_eq!(after.pressure.to_bits(), before.pressure.to_bits());
        assert_eq!(after.timestamp, before.timestamp);
        assert_eq!(after.unit_id, before.unit_id);
        assert_eq!(after.trigger_count, before.trigger_count);
    }

    #[tokio::test]
    async fn comm_error_requires_data_valid() {
        let cache = FlowCache::new();

        // Failure before any successful read: still "not yet seen"
        cache.mark_failed(port(5)).await;
        let entry = cache.read(port(5)).await;
        assert!(!entry.comm_error);
        assert!(!entry.data_valid);

        // After a full read, a failure becomes a real error
        cache
            .apply_full_read(port(5), &full_registers(1.0, 1.0))
            .await
            .unwrap();
        cache.mark_failed(port(5)).await;
        let entry = cache.read(port(5)).await;
        assert!(entry.comm_error);
        assert!(entry.data_valid);

        // A later periodic success clears the error
        let regs = [0u16, 0, 0, 0];
        let recovered = cache.apply_periodic_read(port(5), &regs).await.unwrap();
        assert!(recovered);
        assert!(!cache.read(port(5)).await.comm_error);
    }

    #[tokio::test]
    async fn invariant_holds_for_any_result_sequence() {
        let cache = FlowCache::new();
        let p = port(7);
        // Interleave failures and successes; comm_error must never be set
        // while data_valid is false.
        for step in 0..20 {
            match step % 4 {
                0 | 1 => cache.mark_failed(p).await,
                2 => {
                    if step > 8 {
                        cache.apply_full_read(p, &full_registers(1.0, 1.0)).await.unwrap();
                    }
                }
                _ => {
                    let _ = cache.apply_periodic_read(p, &[0, 0, 0, 0]).await;
                }
            }
            let entry = cache.read(p).await;
            assert!(
                entry.data_valid || !entry.comm_error,
                "comm_error set while data_valid false at step {step}"
            );
        }
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let cache = FlowCache::new();
        cache
            .apply_full_read(port(2), &full_registers(5.0, 4.0))
            .await
            .unwrap();
        cache.set_pending_initial(port(2), true).await;
        cache.reset_port(port(2)).await;
        assert_eq!(cache.read(port(2)).await, CounterData::default());
    }

    #[tokio::test]
    async fn link_state_transitions() {
        let cache = FlowCache::new();
        let p = port(0);

        assert_eq!(cache.read(p).await.link_state(false), LinkState::Disabled);
        assert_eq!(cache.read(p).await.link_state(true), LinkState::NeverConnected);

        // Failure while never connected stays NeverConnected
        cache.mark_failed(p).await;
        assert_eq!(cache.read(p).await.link_state(true), LinkState::NeverConnected);

        cache.apply_full_read(p, &full_registers(1.0, 1.0)).await.unwrap();
        assert_eq!(cache.read(p).await.link_state(true), LinkState::Connected);

        cache.mark_failed(p).await;
        assert_eq!(
            cache.read(p).await.link_state(true),
            LinkState::ConnectedWithError
        );

        cache.apply_full_read(p, &full_registers(2.0, 1.0)).await.unwrap();
        assert_eq!(cache.read(p).await.link_state(true), LinkState::Connected);
    }
}
