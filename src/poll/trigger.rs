//! Trigger inputs
//!
//! Each port has an active-low trigger line sampled on a fast tick.
//! A falling edge requests a full read of that port's counter.

use crate::cache::{PortIndex, MAX_PORTS};

/// Source of trigger line levels, addressed by the hardware line
/// identifier from the port configuration. `true` is the idle (high)
/// level, `false` means the line is asserted.
pub trait TriggerInput: Send + Sync {
    fn level(&self, line: u16) -> bool;
}

/// Trigger source for hosts without trigger wiring; every line idles high
#[derive(Debug, Default)]
pub struct NullTriggerInput;

impl TriggerInput for NullTriggerInput {
    fn level(&self, _line: u16) -> bool {
        true
    }
}

/// Level transition on a trigger line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// High to low; the active transition
    Falling,
    Rising,
}

/// Per-port edge detector.
///
/// Lines are assumed idle at start, so a port already asserted at
/// power-up fires once on the first sample.
#[derive(Debug)]
pub struct EdgeDetector {
    previous: [bool; MAX_PORTS],
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self {
            previous: [true; MAX_PORTS],
        }
    }

    /// Feed one sample and report any transition
    pub fn update(&mut self, port: PortIndex, level: bool) -> Option<Edge> {
        let previous = self.previous[port.get()];
        self.previous[port.get()] = level;
        match (previous, level) {
            (true, false) => Some(Edge::Falling),
            (false, true) => Some(Edge::Rising),
            _ => None,
        }
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(i: usize) -> PortIndex {
        PortIndex::new(i).unwrap()
    }

    #[test]
    fn detects_both_edges() {
        let mut edges = EdgeDetector::new();
        assert_eq!(edges.update(port(0), true), None);
        assert_eq!(edges.update(port(0), false), Some(Edge::Falling));
        // Held low: no retrigger
        assert_eq!(edges.update(port(0), false), None);
        assert_eq!(edges.update(port(0), true), Some(Edge::Rising));
        assert_eq!(edges.update(port(0), false), Some(Edge::Falling));
    }

    #[test]
    fn asserted_at_power_up_fires_once() {
        let mut edges = EdgeDetector::new();
        assert_eq!(edges.update(port(1), false), Some(Edge::Falling));
        assert_eq!(edges.update(port(1), false), None);
    }

    #[test]
    fn ports_are_independent() {
        let mut edges = EdgeDetector::new();
        assert_eq!(edges.update(port(2), false), Some(Edge::Falling));
        assert_eq!(edges.update(port(3), true), None);
        assert_eq!(edges.update(port(3), false), Some(Edge::Falling));
    }
}
