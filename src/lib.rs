//! VISA instrument sessions and a BK Precision 9130B adapter.
//!
//! The [`visa`] module owns the resource-manager session and at most one
//! open instrument, frames SCPI commands with the device's termination
//! character and turns driver statuses into text diagnostics. [`psu`] builds
//! the power-supply adapter on top of it, and [`console`] is the interactive
//! harness behind the `visa_console` binary.
//!
//! Everything talks to the driver through [`visa::VisaDriver`]. The system
//! VISA library is available with the `instrument_visa` feature;
//! [`visa::MockVisa`] is always available.

pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod psu;
pub mod visa;
