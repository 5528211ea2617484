//! Hardware implementations for the fly tracking rig.
//!
//! The wire codec and simulated stage/vision are always available; the
//! real serial driver is behind the `hardware` feature so the rest of the
//! workspace builds on machines without the gantry attached.

pub mod error;
pub mod protocol;
pub mod sim;

#[cfg(feature = "hardware")]
pub mod serial;

pub use error::HwError;
pub use sim::{ScriptedVision, SimulatedStage, WanderingVision};

#[cfg(feature = "hardware")]
pub use serial::SerialStage;
