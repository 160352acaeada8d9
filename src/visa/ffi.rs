//! Driver backed by the system VISA library.
//!
//! Thin pass-through to the C API via `visa-sys`. Requires an installed
//! VISA runtime (NI-VISA, Keysight IO Libraries, R&S VISA, ...) at link time.
#![allow(unsafe_code)]

use super::driver::VisaDriver;
use super::status::{
    AccessMode, AttrState, Attribute, DriverResult, Handle, Status, ERROR_MSG_MAX, FIND_BUFLEN,
};
use std::ffi::{c_void, CString};
use visa_sys as vs;

/// [`VisaDriver`] calling straight into the installed VISA library.
#[derive(Debug, Default)]
pub struct NiVisa;

impl NiVisa {
    /// Create the driver; no library call happens until the first method.
    pub fn new() -> Self {
        Self
    }
}

fn check(status: vs::ViStatus) -> DriverResult<Status> {
    Status(status as i32).check()
}

fn c_string(text: &str) -> DriverResult<CString> {
    CString::new(text).map_err(|_| Status::ERROR_INV_RSRC_NAME)
}

/// Length handed to the driver, capped at what `ViUInt32` can express.
fn c_len(len: usize) -> vs::ViUInt32 {
    vs::ViUInt32::try_from(len).unwrap_or(vs::ViUInt32::MAX)
}

impl VisaDriver for NiVisa {
    fn open_default_rm(&mut self) -> DriverResult<Handle> {
        let mut session: vs::ViSession = 0;
        // SAFETY: `session` is a valid out-pointer for the duration of the call.
        check(unsafe { vs::viOpenDefaultRM(&mut session) })?;
        Ok(Handle(session as u32))
    }

    fn open(
        &mut self,
        session: Handle,
        resource: &str,
        access: AccessMode,
        timeout_ms: u32,
    ) -> DriverResult<Handle> {
        let name = c_string(resource)?;
        let mut device: vs::ViSession = 0;
        // SAFETY: `name` outlives the call and `device` is a valid out-pointer.
        check(unsafe {
            vs::viOpen(
                session.0 as _,
                name.as_ptr() as _,
                access.raw() as _,
                timeout_ms as _,
                &mut device,
            )
        })?;
        Ok(Handle(device as u32))
    }

    fn close(&mut self, handle: Handle) -> DriverResult<()> {
        // SAFETY: closing an invalid handle is reported through the status.
        check(unsafe { vs::viClose(handle.0 as _) })?;
        Ok(())
    }

    fn get_attribute(&mut self, handle: Handle, attribute: Attribute) -> DriverResult<AttrState> {
        // Attributes are at most 64 bits wide; narrower ones fill the low bytes.
        let mut value: u64 = 0;
        // SAFETY: `value` is 8 bytes, enough for any integer attribute.
        check(unsafe {
            vs::viGetAttribute(
                handle.0 as _,
                attribute.0 as _,
                &mut value as *mut u64 as *mut c_void,
            )
        })?;
        Ok(value)
    }

    fn get_attribute_string(
        &mut self,
        handle: Handle,
        attribute: Attribute,
        buf: &mut [u8],
    ) -> DriverResult<()> {
        if buf.len() < FIND_BUFLEN {
            // the library writes up to 256 bytes without a length argument
            let mut scratch = vec![0u8; FIND_BUFLEN];
            self.get_attribute_string(handle, attribute, &mut scratch)?;
            let count = buf.len();
            buf.copy_from_slice(&scratch[..count]);
            return Ok(());
        }
        // SAFETY: `buf` holds at least VI_FIND_BUFLEN bytes.
        check(unsafe {
            vs::viGetAttribute(handle.0 as _, attribute.0 as _, buf.as_mut_ptr() as *mut c_void)
        })?;
        Ok(())
    }

    fn set_attribute(
        &mut self,
        handle: Handle,
        attribute: Attribute,
        value: AttrState,
    ) -> DriverResult<()> {
        // SAFETY: plain value call.
        check(unsafe { vs::viSetAttribute(handle.0 as _, attribute.0 as _, value as _) })?;
        Ok(())
    }

    fn write(&mut self, handle: Handle, bytes: &[u8]) -> DriverResult<usize> {
        let mut written: vs::ViUInt32 = 0;
        // SAFETY: `bytes` is valid for `bytes.len()` reads.
        check(unsafe {
            vs::viWrite(
                handle.0 as _,
                bytes.as_ptr() as _,
                c_len(bytes.len()),
                &mut written,
            )
        })?;
        Ok(written as usize)
    }

    fn read(&mut self, handle: Handle, buf: &mut [u8]) -> DriverResult<usize> {
        let mut received: vs::ViUInt32 = 0;
        // SAFETY: `buf` is valid for `buf.len()` writes.
        check(unsafe {
            vs::viRead(
                handle.0 as _,
                buf.as_mut_ptr() as _,
                c_len(buf.len()),
                &mut received,
            )
        })?;
        Ok(received as usize)
    }

    fn find_resources(
        &mut self,
        session: Handle,
        expression: &str,
        first: &mut [u8],
    ) -> DriverResult<(Handle, u32)> {
        if first.len() < FIND_BUFLEN {
            return Err(Status::ERROR_SYSTEM_ERROR);
        }
        let expr = c_string(expression)?;
        let mut find_list: vs::ViFindList = 0;
        let mut count: vs::ViUInt32 = 0;
        // SAFETY: `first` holds VI_FIND_BUFLEN bytes, the out-pointers are valid.
        check(unsafe {
            vs::viFindRsrc(
                session.0 as _,
                expr.as_ptr() as _,
                &mut find_list,
                &mut count,
                first.as_mut_ptr() as _,
            )
        })?;
        Ok((Handle(find_list as u32), count as u32))
    }

    fn find_next(&mut self, find_list: Handle, buf: &mut [u8]) -> DriverResult<()> {
        if buf.len() < FIND_BUFLEN {
            return Err(Status::ERROR_SYSTEM_ERROR);
        }
        // SAFETY: `buf` holds VI_FIND_BUFLEN bytes.
        check(unsafe { vs::viFindNext(find_list.0 as _, buf.as_mut_ptr() as _) })?;
        Ok(())
    }

    fn status_desc(&mut self, handle: Handle, status: Status, buf: &mut [u8]) -> DriverResult<()> {
        if buf.len() < ERROR_MSG_MAX.min(FIND_BUFLEN) {
            return Err(Status::ERROR_SYSTEM_ERROR);
        }
        // SAFETY: `buf` holds at least the 256 bytes the library requires.
        check(unsafe { vs::viStatusDesc(handle.0 as _, status.0 as _, buf.as_mut_ptr() as _) })?;
        Ok(())
    }
}
