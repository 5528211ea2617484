#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core control logic for the fly tracking rig (hardware-agnostic).
//!
//! All hardware interactions go through the `flyrig_traits::StageDriver` and
//! `flyrig_traits::VisionSource` traits.
//!
//! ## Architecture
//!
//! - **Scheduling**: one cooperative periodic worker per subsystem
//!   (`service` module)
//! - **Sharing**: per-field mutex cells with copy-out reads (`cell`)
//! - **Control**: deadzone + linear gain law under velocity and acceleration
//!   limits, with manual overrides (`tracker`)
//! - **Sequencing**: fly detection, trial start/stop and fly-lost recovery
//!   (`trial`)
//! - **Telemetry**: per-trial CSV streams opened and closed at phase
//!   boundaries (`telemetry`)

pub mod cell;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod service;
pub mod telemetry;
pub mod tracker;
pub mod trial;
pub mod util;
pub mod vision;

pub use cell::Guarded;
pub use config::{TrackingCfg, TrialCfg, VisionCfg};
pub use error::{BuildError, Result, RigError};
pub use service::{LoopBody, LoopTiming, Service};
pub use tracker::{ControlLaw, ManualOverride, Tracker, TrackerHandle, TrackerLoop};
pub use trial::{ManualCommand, Trial, TrialHandle, TrialLoop, TrialPhase};
pub use vision::{VisionHandle, VisionLoop, VisionService};
