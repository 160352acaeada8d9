//! VISA status codes, handles and attribute identifiers.
//!
//! The VISA model reports every call outcome as a signed 32-bit status:
//!
//! - `0` is plain success
//! - small positive values are *completion codes or warnings* (e.g. the
//!   read stopped on the termination character) and still count as success
//! - negative values are errors
//!
//! [`Status::check`] is the single place where that threshold is applied.

use std::fmt;

/// Maximum length of a resource string returned by discovery (`VI_FIND_BUFLEN`).
pub const FIND_BUFLEN: usize = 256;

/// Size of the buffer handed to the status-description call.
///
/// The driver requires at least 256 bytes here.
pub const ERROR_MSG_MAX: usize = 512;

/// Default bound for string attributes.
///
/// No authoritative size is documented for string attributes, so this is
/// only a default; see [`VisaDevice::with_attr_max_length`](super::VisaDevice::with_attr_max_length).
pub const ATTR_MAX_LENGTH: usize = 1024;

/// Default receive buffer for [`VisaDevice::read`](super::VisaDevice::read).
pub const DEFAULT_READ_BUFFER: usize = 0x400;

/// Diagnostic produced when a failure happens without any handle to describe it.
pub const NO_HANDLE_MESSAGE: &str = "Neither session nor device is initialized";

/// Signed VISA completion/error code (`ViStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// `VI_SUCCESS`: the success threshold.
    pub const SUCCESS: Status = Status(0);
    /// `VI_SUCCESS_TERM_CHAR`: read ended on the termination character.
    pub const SUCCESS_TERM_CHAR: Status = Status(0x3FFF_0005);
    /// `VI_SUCCESS_MAX_CNT`: read filled the caller's buffer.
    pub const SUCCESS_MAX_CNT: Status = Status(0x3FFF_0006);
    /// `VI_WARN_UNKNOWN_STATUS`.
    pub const WARN_UNKNOWN_STATUS: Status = Status(0x3FFF_0085);

    /// `VI_ERROR_SYSTEM_ERROR`.
    pub const ERROR_SYSTEM_ERROR: Status = Status(0xBFFF_0000_u32 as i32);
    /// `VI_ERROR_INV_OBJECT`.
    pub const ERROR_INV_OBJECT: Status = Status(0xBFFF_000E_u32 as i32);
    /// `VI_ERROR_RSRC_LOCKED`.
    pub const ERROR_RSRC_LOCKED: Status = Status(0xBFFF_000F_u32 as i32);
    /// `VI_ERROR_RSRC_NFOUND`.
    pub const ERROR_RSRC_NFOUND: Status = Status(0xBFFF_0011_u32 as i32);
    /// `VI_ERROR_INV_RSRC_NAME`.
    pub const ERROR_INV_RSRC_NAME: Status = Status(0xBFFF_0012_u32 as i32);
    /// `VI_ERROR_TMO`.
    pub const ERROR_TMO: Status = Status(0xBFFF_0015_u32 as i32);
    /// `VI_ERROR_NSUP_ATTR`.
    pub const ERROR_NSUP_ATTR: Status = Status(0xBFFF_001D_u32 as i32);
    /// `VI_ERROR_IO`.
    pub const ERROR_IO: Status = Status(0xBFFF_003E_u32 as i32);
    /// `VI_ERROR_CONN_LOST`.
    pub const ERROR_CONN_LOST: Status = Status(0xBFFF_00A6_u32 as i32);

    /// True for success and for every warning/completion code.
    pub fn is_success(self) -> bool {
        self.0 >= Self::SUCCESS.0
    }

    /// True for positive completion codes.
    pub fn is_warning(self) -> bool {
        self.0 > Self::SUCCESS.0
    }

    /// Turn a raw status into a `Result`, keeping warnings on the `Ok` side.
    pub fn check(self) -> Result<Status, Status> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self)
        }
    }

    /// Symbolic name for the codes this crate knows about.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "VI_SUCCESS",
            Self::SUCCESS_TERM_CHAR => "VI_SUCCESS_TERM_CHAR",
            Self::SUCCESS_MAX_CNT => "VI_SUCCESS_MAX_CNT",
            Self::WARN_UNKNOWN_STATUS => "VI_WARN_UNKNOWN_STATUS",
            Self::ERROR_SYSTEM_ERROR => "VI_ERROR_SYSTEM_ERROR",
            Self::ERROR_INV_OBJECT => "VI_ERROR_INV_OBJECT",
            Self::ERROR_RSRC_LOCKED => "VI_ERROR_RSRC_LOCKED",
            Self::ERROR_RSRC_NFOUND => "VI_ERROR_RSRC_NFOUND",
            Self::ERROR_INV_RSRC_NAME => "VI_ERROR_INV_RSRC_NAME",
            Self::ERROR_TMO => "VI_ERROR_TMO",
            Self::ERROR_NSUP_ATTR => "VI_ERROR_NSUP_ATTR",
            Self::ERROR_IO => "VI_ERROR_IO",
            Self::ERROR_CONN_LOST => "VI_ERROR_CONN_LOST",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0 as u32),
            None => write!(f, "0x{:08X}", self.0 as u32),
        }
    }
}

/// Result of a raw driver call: the value on success, the failing status otherwise.
pub type DriverResult<T> = Result<T, Status>;

/// Opaque VISA object handle (`ViObject`): sessions, devices and find lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// VISA attribute identifier (`ViAttr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attribute(pub u32);

impl Attribute {
    /// `VI_ATTR_TERMCHAR`: the device's termination character (u8).
    pub const TERMCHAR: Attribute = Attribute(0x3FFF_0018);
    /// `VI_ATTR_TMO_VALUE`: native I/O timeout in milliseconds (u32).
    pub const TMO_VALUE: Attribute = Attribute(0x3FFF_001A);
    /// `VI_ATTR_TERMCHAR_EN`: whether reads stop on the termination character.
    pub const TERMCHAR_EN: Attribute = Attribute(0x3FFF_0038);
    /// `VI_ATTR_MANF_NAME`: manufacturer name (string).
    pub const MANF_NAME: Attribute = Attribute(0xBFFF_0072);
    /// `VI_ATTR_MODEL_NAME`: model name (string).
    pub const MODEL_NAME: Attribute = Attribute(0xBFFF_0077);
    /// `VI_ATTR_INTF_INST_NAME`: interface instance name (string).
    pub const INTF_INST_NAME: Attribute = Attribute(0xBFFF_00E9);
}

/// Raw integer attribute value (`ViAttrState`).
pub type AttrState = u64;

/// Locking discipline requested when opening a device (`ViAccessMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// `VI_NO_LOCK`
    #[default]
    NoLock,
    /// `VI_EXCLUSIVE_LOCK`
    Exclusive,
    /// `VI_SHARED_LOCK`
    Shared,
}

impl AccessMode {
    /// Value passed verbatim to the open call.
    pub fn raw(self) -> u32 {
        match self {
            AccessMode::NoLock => 0,
            AccessMode::Exclusive => 1,
            AccessMode::Shared => 2,
        }
    }
}

/// Copy a NUL-terminated driver buffer into a `String`.
///
/// The last byte is forced to NUL first, so an unterminated buffer is
/// truncated rather than overrun. Invalid UTF-8 is replaced.
pub(crate) fn string_from_buf(buf: &mut [u8]) -> String {
    let Some(last) = buf.last_mut() else {
        return String::new();
    };
    *last = 0;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
