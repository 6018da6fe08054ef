//! Register access backends.
//!
//! - [`MmioWindow`]: memory-mapped register window of a real module
//! - [`SimulatedModule`]: in-process model for tests and demos

pub mod mmio;
pub mod simulated;

pub use mmio::MmioWindow;
pub use simulated::SimulatedModule;
