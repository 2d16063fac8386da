//! Synchronisation primitives shared by the buffer and vault layers.

pub mod gate;

pub use gate::{ConcurrencyGate, ExclusiveToken, GateMode, GateToken};
