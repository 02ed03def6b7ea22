//! Poll scheduling
//!
//! The engine owns all read scheduling for the RS-485 bus: hardware
//! trigger edges, the periodic refresh, post-configuration bootstrap
//! reads and operator-requested manual reads.

pub mod engine;
pub mod trigger;

pub use engine::{EngineCommand, PollEngine};
pub use trigger::{Edge, EdgeDetector, NullTriggerInput, TriggerInput};
