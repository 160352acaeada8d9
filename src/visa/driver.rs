//! The raw driver surface consumed by [`VisaDevice`](super::VisaDevice).
//!
//! One method per VISA library call. Implementations do no bookkeeping of
//! their own beyond what the underlying library does: they pass arguments
//! through, fill caller-provided buffers and report the raw [`Status`] via
//! [`Status::check`] so that warnings stay on the success side.

use super::status::{AccessMode, AttrState, Attribute, DriverResult, Handle, Status};

/// Blocking VISA driver calls.
///
/// All calls are synchronous and may block for up to the native timeout.
pub trait VisaDriver {
    /// `viOpenDefaultRM`: acquire the resource-manager session.
    fn open_default_rm(&mut self) -> DriverResult<Handle>;

    /// `viOpen`: open a device handle on `resource` through `session`.
    fn open(
        &mut self,
        session: Handle,
        resource: &str,
        access: AccessMode,
        timeout_ms: u32,
    ) -> DriverResult<Handle>;

    /// `viClose`: release a session, device or find-list handle.
    fn close(&mut self, handle: Handle) -> DriverResult<()>;

    /// `viGetAttribute` for integer-valued attributes.
    fn get_attribute(&mut self, handle: Handle, attribute: Attribute) -> DriverResult<AttrState>;

    /// `viGetAttribute` for string attributes.
    ///
    /// Writes a NUL-terminated string into `buf`. The buffer may be left
    /// unterminated if the value does not fit.
    fn get_attribute_string(
        &mut self,
        handle: Handle,
        attribute: Attribute,
        buf: &mut [u8],
    ) -> DriverResult<()>;

    /// `viSetAttribute`.
    fn set_attribute(
        &mut self,
        handle: Handle,
        attribute: Attribute,
        value: AttrState,
    ) -> DriverResult<()>;

    /// `viWrite`: returns the number of bytes the driver accepted.
    fn write(&mut self, handle: Handle, bytes: &[u8]) -> DriverResult<usize>;

    /// `viRead`: returns the number of bytes placed in `buf`.
    fn read(&mut self, handle: Handle, buf: &mut [u8]) -> DriverResult<usize>;

    /// `viFindRsrc`: start a discovery.
    ///
    /// Returns the find-list handle and the total match count; the first
    /// match is written into `first` as a NUL-terminated string.
    fn find_resources(
        &mut self,
        session: Handle,
        expression: &str,
        first: &mut [u8],
    ) -> DriverResult<(Handle, u32)>;

    /// `viFindNext`: write the next match into `buf`.
    fn find_next(&mut self, find_list: Handle, buf: &mut [u8]) -> DriverResult<()>;

    /// `viStatusDesc`: describe `status` into `buf` (at least 256 bytes).
    fn status_desc(&mut self, handle: Handle, status: Status, buf: &mut [u8]) -> DriverResult<()>;
}
