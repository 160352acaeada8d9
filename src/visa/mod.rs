//! VISA instrument session core.
//!
//! - [`VisaDevice`]: session/device lifecycle, framing, queries, attributes
//! - [`VisaDriver`]: the raw driver calls the core is built on
//! - [`MockVisa`]: in-memory driver for tests and dry runs
//! - `NiVisa`: the system VISA library (feature `instrument_visa`)

pub mod device;
pub mod driver;
pub mod error;
pub mod mock;
pub mod status;

#[cfg(feature = "instrument_visa")]
pub mod ffi;

pub use device::{command_separator, join_commands, VisaDevice, CLOSE_COMMAND_WARNING};
pub use driver::VisaDriver;
pub use error::{VisaError, VisaResult};
#[cfg(feature = "instrument_visa")]
pub use ffi::NiVisa;
pub use mock::{MockCall, MockOp, MockVisa};
pub use status::{AccessMode, AttrState, Attribute, DriverResult, Handle, Status};
