//! Instrument session core.
//!
//! [`VisaDevice`] owns one resource-manager session and at most one open
//! device handle. Every driver status is translated here: failures become
//! a [`VisaError`] and overwrite the single last-error string, successes
//! (including warnings) leave it alone.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized            (session could not be acquired; every call is a no-op)
//! Initialized  --open-->   Open   (device handle + termination character known)
//! Open         --close-->  Initialized
//! ```
//!
//! # Framing
//!
//! Every outbound message gets exactly one termination byte appended, the
//! one the device reported when it was opened. A sequence of commands is
//! flattened into one transaction joined by `";" + terminator`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use visa_psu::visa::{AccessMode, MockVisa, VisaDevice};
//!
//! let mock = MockVisa::new().with_resources(["USB0::0xFFFF::0x9130::MOCK::INSTR"]);
//! mock.push_reply("CH1\n");
//!
//! let mut dev = VisaDevice::new(mock.clone());
//! let found = dev.find_instruments("USB?*");
//! dev.open(&found[0], AccessMode::NoLock, Duration::from_millis(1)).unwrap();
//! assert_eq!(dev.query("INST:SEL?").unwrap(), "CH1\n");
//! dev.close().unwrap();
//! ```

use super::driver::VisaDriver;
use super::error::{VisaError, VisaResult};
use super::status::{
    string_from_buf, AccessMode, AttrState, Attribute, Handle, Status, ATTR_MAX_LENGTH,
    DEFAULT_READ_BUFFER, ERROR_MSG_MAX, FIND_BUFLEN, NO_HANDLE_MESSAGE,
};
use num_traits::NumCast;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Stored as the last error when the registered close command cannot be sent.
pub const CLOSE_COMMAND_WARNING: &str = "[WARN]: failed to send onClose command!\n";

/// Timeout used until the first `open`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// State that exists only while a device handle is live.
#[derive(Debug)]
struct OpenDevice {
    handle: Handle,
    resource: String,
    term_char: u8,
}

/// Command registered with [`VisaDevice::on_close`] / [`VisaDevice::on_close_sequence`].
///
/// Sequences are joined when the device closes, with the terminator of the
/// device that is actually being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CloseCommand {
    Single(String),
    Sequence(Vec<String>),
}

/// Generic VISA/SCPI instrument session.
///
/// Single-threaded by contract: there is no internal locking, callers that
/// share a device across threads must serialize access themselves.
pub struct VisaDevice<D: VisaDriver> {
    driver: D,
    session: Option<Handle>,
    device: Option<OpenDevice>,
    close_command: Option<CloseCommand>,
    last_error: String,
    timeout: Duration,
    attr_max_length: usize,
}

impl<D: VisaDriver> VisaDevice<D> {
    /// Acquire a resource-manager session on `driver`.
    ///
    /// Failure is not an error here: the device is left uninitialized, every
    /// later call returns [`VisaError::NotInitialized`] without touching the
    /// driver, and the reason is available from [`take_last_error`](Self::take_last_error).
    pub fn new(mut driver: D) -> Self {
        let opened = driver.open_default_rm();

        let mut dev = Self {
            driver,
            session: None,
            device: None,
            close_command: None,
            last_error: String::new(),
            timeout: DEFAULT_TIMEOUT,
            attr_max_length: ATTR_MAX_LENGTH,
        };

        match opened {
            Ok(session) => {
                debug!(session = session.0, "VISA resource manager session opened");
                dev.session = Some(session);
            }
            Err(status) => {
                let err = dev.fail(status);
                warn!(%status, error = %err, "Failed to open VISA resource manager");
            }
        }

        dev
    }

    /// Set the buffer bound used for string attributes (at least 1 byte).
    pub fn with_attr_max_length(mut self, len: usize) -> Self {
        self.attr_max_length = len.max(1);
        self
    }

    /// True when the resource-manager session was acquired.
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// True while a device handle with a known terminator is live.
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Resource string of the open device.
    pub fn resource(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.resource.as_str())
    }

    /// Termination character fetched when the device was opened.
    pub fn term_char(&self) -> Option<u8> {
        self.device.as_ref().map(|d| d.term_char)
    }

    /// Timeout given to the last `open` (also the query settle time).
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the most recent failure description and clear it.
    ///
    /// A second call returns an empty string unless another failure happened
    /// in between.
    pub fn take_last_error(&mut self) -> String {
        std::mem::take(&mut self.last_error)
    }

    /// Open `resource` and fetch its termination character.
    ///
    /// Succeeds only if both steps succeed. When the terminator cannot be
    /// read the fresh handle is released again before returning.
    pub fn open(&mut self, resource: &str, access: AccessMode, timeout: Duration) -> VisaResult<()> {
        self.timeout = timeout;
        let session = self.session.ok_or(VisaError::NotInitialized)?;
        if let Some(device) = &self.device {
            return Err(VisaError::AlreadyOpen(device.resource.clone()));
        }

        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        let handle = self
            .driver
            .open(session, resource, access, timeout_ms)
            .map_err(|status| self.fail(status))?;

        let term_char = match self.driver.get_attribute(handle, Attribute::TERMCHAR) {
            // the terminator lives in the low byte of the attribute
            Ok(raw) => (raw & 0xFF) as u8,
            Err(status) => {
                let description = self.describe(Some(handle), status);
                self.last_error = description.clone();
                if let Err(close_status) = self.driver.close(handle) {
                    warn!(%close_status, resource, "Failed to release device after terminator read failed");
                }
                warn!(%status, resource, "Termination character unavailable, device closed");
                return Err(VisaError::TerminatorUnavailable {
                    status,
                    description,
                });
            }
        };

        info!(
            resource,
            access = ?access,
            timeout_ms,
            term_char,
            "VISA device opened"
        );

        self.device = Some(OpenDevice {
            handle,
            resource: resource.to_string(),
            term_char,
        });
        Ok(())
    }

    /// Send the registered close command (best effort) and release the device.
    ///
    /// Closing an already closed device succeeds. A failed close command is
    /// recorded as [`CLOSE_COMMAND_WARNING`] but does not stop the release.
    pub fn close(&mut self) -> VisaResult<()> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        let handle = device.handle;
        let term_char = device.term_char;

        if let Some(command) = self.close_command_bytes(term_char) {
            if let Err(err) = self.write_framed(command) {
                warn!(error = %err, "Failed to send on-close command");
                self.last_error = CLOSE_COMMAND_WARNING.to_string();
            }
        }

        self.driver.close(handle).map_err(|status| self.fail(status))?;

        if let Some(device) = self.device.take() {
            info!(resource = %device.resource, "VISA device closed");
        }
        Ok(())
    }

    /// Register a command written once right before the device is released.
    ///
    /// Persists across open/close cycles until replaced.
    pub fn on_close(&mut self, command: impl Into<String>) {
        self.close_command = Some(CloseCommand::Single(command.into()));
    }

    /// Register a command sequence sent as one transaction on close.
    pub fn on_close_sequence<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.close_command = Some(CloseCommand::Sequence(
            commands.into_iter().map(Into::into).collect(),
        ));
    }

    /// Forget any registered close command.
    pub fn clear_on_close(&mut self) {
        self.close_command = None;
    }

    /// List resources matching `expression` (e.g. `"USB?*"`).
    ///
    /// Only needs the session. Returns an empty list when discovery fails and
    /// whatever was collected so far when iterating the matches fails.
    pub fn find_instruments(&mut self, expression: &str) -> Vec<String> {
        let Some(session) = self.session else {
            return Vec::new();
        };

        let mut buf = vec![0u8; FIND_BUFLEN];
        let (find_list, count) = match self.driver.find_resources(session, expression, &mut buf) {
            Ok(found) => found,
            Err(status) => {
                let err = self.fail(status);
                debug!(expression, error = %err, "Resource discovery found nothing");
                return Vec::new();
            }
        };

        let mut found = Vec::with_capacity(count as usize);
        if count > 0 {
            found.push(string_from_buf(&mut buf));
        }
        for _ in 1..count {
            buf.fill(0);
            match self.driver.find_next(find_list, &mut buf) {
                Ok(()) => found.push(string_from_buf(&mut buf)),
                Err(status) => {
                    let err = self.fail(status);
                    debug!(expression, error = %err, "Resource iteration stopped early");
                    break;
                }
            }
        }

        if let Err(status) = self.driver.close(find_list) {
            debug!(%status, "Failed to release find list");
        }

        info!(expression, count = found.len(), "Resource discovery finished");
        found
    }

    /// Set an integer attribute on the open device.
    pub fn set_attribute(&mut self, attribute: Attribute, value: AttrState) -> VisaResult<()> {
        let handle = self.device_handle()?;
        self.driver
            .set_attribute(handle, attribute, value)
            .map_err(|status| self.fail(status))
    }

    /// Read a numeric attribute from the open device.
    ///
    /// Only numeric types can be requested; a value that does not fit `T`
    /// yields [`VisaError::AttributeOutOfRange`].
    pub fn get_scalar_attribute<T: NumCast>(&mut self, attribute: Attribute) -> VisaResult<T> {
        let handle = self.device_handle()?;
        let value = self
            .driver
            .get_attribute(handle, attribute)
            .map_err(|status| self.fail(status))?;
        <T as NumCast>::from(value).ok_or(VisaError::AttributeOutOfRange { attribute, value })
    }

    /// Read a string attribute from the open device.
    ///
    /// Values longer than the configured bound are truncated.
    pub fn get_string_attribute(&mut self, attribute: Attribute) -> VisaResult<String> {
        let handle = self.device_handle()?;
        let mut buf = vec![0u8; self.attr_max_length];
        self.driver
            .get_attribute_string(handle, attribute, &mut buf)
            .map_err(|status| self.fail(status))?;
        Ok(string_from_buf(&mut buf))
    }

    /// Write `message` followed by the device terminator.
    pub fn write(&mut self, message: &str) -> VisaResult<()> {
        self.write_framed(message.as_bytes().to_vec())
    }

    /// Write several commands as one transaction with one terminator.
    ///
    /// `["A", "B"]` with terminator `\n` is sent as `A;\nB\n`.
    pub fn write_sequence<I, S>(&mut self, commands: I) -> VisaResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let term_char = self.ready_term_char()?;
        self.write_framed(join_commands(commands, term_char))
    }

    /// Write `message`, wait the full timeout, then read one reply.
    ///
    /// The wait is a plain blocking sleep: the instrument has no ready
    /// signal. Nothing is slept or read if the write fails. Only single
    /// queries are supported since the device answers just the last query
    /// of a batch.
    pub fn query(&mut self, message: &str) -> VisaResult<String> {
        self.query_with_capacity(message, DEFAULT_READ_BUFFER)
    }

    /// [`query`](Self::query) reading the reply into a `capacity` byte buffer.
    pub fn query_with_capacity(&mut self, message: &str, capacity: usize) -> VisaResult<String> {
        self.write(message)?;
        trace!(settle_ms = self.timeout.as_millis() as u64, "Waiting for query reply");
        std::thread::sleep(self.timeout);
        let reply = self.read_with_capacity(capacity)?;
        debug!(query = message, reply = reply.trim_end(), "VISA query");
        Ok(reply)
    }

    /// Read one reply chunk using the default 1024 byte buffer.
    pub fn read(&mut self) -> VisaResult<String> {
        self.read_with_capacity(DEFAULT_READ_BUFFER)
    }

    /// Read one reply chunk of at most `capacity` bytes.
    ///
    /// Exactly the received bytes are returned; anything the instrument sent
    /// beyond `capacity` stays with the driver.
    pub fn read_with_capacity(&mut self, capacity: usize) -> VisaResult<String> {
        let handle = self.ready_handle()?;
        let mut buf = vec![0u8; capacity];
        let received = self
            .driver
            .read(handle, &mut buf)
            .map_err(|status| self.fail(status))?
            .min(capacity);
        trace!(bytes = received, capacity, "VISA read");
        Ok(String::from_utf8_lossy(&buf[..received]).into_owned())
    }

    /// `"<manufacturer> : <model> : <interface instance>"` of the open device.
    pub fn device_description(&mut self) -> VisaResult<String> {
        let manufacturer = self.get_string_attribute(Attribute::MANF_NAME)?;
        let model = self.get_string_attribute(Attribute::MODEL_NAME)?;
        let interface = self.get_string_attribute(Attribute::INTF_INST_NAME)?;
        Ok(format!("{} : {} : {}", manufacturer, model, interface))
    }

    fn device_handle(&self) -> VisaResult<Handle> {
        self.device
            .as_ref()
            .map(|d| d.handle)
            .ok_or(VisaError::NotOpen)
    }

    /// Handle for I/O, which needs both the session and the device.
    fn ready_handle(&self) -> VisaResult<Handle> {
        if self.session.is_none() {
            return Err(VisaError::NotInitialized);
        }
        self.device_handle()
    }

    fn ready_term_char(&self) -> VisaResult<u8> {
        self.ready_handle()?;
        self.term_char().ok_or(VisaError::NotOpen)
    }

    /// Append the raw terminator byte to `payload` and send it.
    fn write_framed(&mut self, mut payload: Vec<u8>) -> VisaResult<()> {
        let term_char = self.ready_term_char()?;
        payload.push(term_char);
        self.write_raw(&payload)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> VisaResult<()> {
        let handle = self.ready_handle()?;
        let written = self
            .driver
            .write(handle, bytes)
            .map_err(|status| self.fail(status))?;
        if written != bytes.len() {
            warn!(written, expected = bytes.len(), "Short VISA write");
        }
        let text = String::from_utf8_lossy(bytes);
        debug!(bytes = bytes.len(), message = text.trim_end(), "VISA write");
        Ok(())
    }

    fn close_command_bytes(&self, term_char: u8) -> Option<Vec<u8>> {
        match self.close_command.as_ref()? {
            CloseCommand::Single(command) if command.is_empty() => None,
            CloseCommand::Single(command) => Some(command.as_bytes().to_vec()),
            CloseCommand::Sequence(commands) if commands.is_empty() => None,
            CloseCommand::Sequence(commands) => Some(join_commands(commands, term_char)),
        }
    }

    /// Record a failing status against the current state and build the error.
    fn fail(&mut self, status: Status) -> VisaError {
        let handle = self.device.as_ref().map(|d| d.handle).or(self.session);
        let description = self.describe(handle, status);
        self.last_error = description.clone();
        VisaError::Driver {
            status,
            description,
        }
    }

    /// Ask the driver to describe `status`; without a handle no call is made.
    fn describe(&mut self, handle: Option<Handle>, status: Status) -> String {
        let Some(handle) = handle else {
            return NO_HANDLE_MESSAGE.to_string();
        };

        let mut buf = vec![0u8; ERROR_MSG_MAX];
        match self.driver.status_desc(handle, status, &mut buf) {
            Ok(()) => {
                let description = string_from_buf(&mut buf);
                if description.is_empty() {
                    format!("Unknown VISA status {}", status)
                } else {
                    description
                }
            }
            Err(desc_status) => {
                trace!(%desc_status, "Status description unavailable");
                format!("Unknown VISA status {}", status)
            }
        }
    }
}

impl<D: VisaDriver> Drop for VisaDevice<D> {
    fn drop(&mut self) {
        if self.device.is_some() {
            if let Err(err) = self.close() {
                warn!(error = %err, "Failed to close VISA device on drop");
                return;
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(status) = self.driver.close(session) {
                warn!(%status, "Failed to release VISA resource manager session");
            }
        }
    }
}

/// Separator placed between flattened commands: `;` plus the raw terminator byte.
pub fn command_separator(term_char: u8) -> [u8; 2] {
    [b';', term_char]
}

/// Join commands with [`command_separator`]; no separator after the last one.
///
/// Works on bytes so that terminators above 0x7F are sent as one byte.
pub fn join_commands<I, S>(commands: I, term_char: u8) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sep = command_separator(term_char);
    let mut joined = Vec::new();
    for (i, command) in commands.into_iter().enumerate() {
        if i > 0 {
            joined.extend_from_slice(&sep);
        }
        joined.extend_from_slice(command.as_ref().as_bytes());
    }
    joined
}
