//! Mock VISA driver for testing
//!
//! [`MockVisa`] implements [`VisaDriver`] entirely in memory. It provides:
//! - A resource list with VISA-style `?`/`*` discovery expressions
//! - Integer and string attribute stores (terminator defaults to `\n`)
//! - A reply queue consumed by reads, optionally fed by a responder
//! - One-shot status injection per operation (errors and warnings)
//! - A call log for test verification
//!
//! Clones share state, so a test can keep one clone and hand the other to
//! a [`VisaDevice`](super::VisaDevice).

use super::driver::VisaDriver;
use super::status::{AccessMode, AttrState, Attribute, DriverResult, Handle, Status};
use regex::RegexBuilder;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Driver operation, used to target status injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `open_default_rm`
    OpenDefaultRm,
    /// `open`
    Open,
    /// `close`
    Close,
    /// `get_attribute`
    GetAttribute,
    /// `get_attribute_string`
    GetAttributeString,
    /// `set_attribute`
    SetAttribute,
    /// `write`
    Write,
    /// `read`
    Read,
    /// `find_resources`
    FindResources,
    /// `find_next`
    FindNext,
    /// `status_desc`
    StatusDesc,
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// Session requested.
    OpenDefaultRm,
    /// Device open requested.
    Open {
        /// Resource string passed through.
        resource: String,
        /// Requested locking.
        access: AccessMode,
        /// Native timeout.
        timeout_ms: u32,
    },
    /// Handle released.
    Close(Handle),
    /// Integer attribute read.
    GetAttribute(Attribute),
    /// String attribute read.
    GetAttributeString(Attribute),
    /// Attribute written.
    SetAttribute(Attribute, AttrState),
    /// Bytes written, exactly as framed by the caller.
    Write(Vec<u8>),
    /// Read with the given buffer size.
    Read(usize),
    /// Discovery started.
    FindResources(String),
    /// Next discovery match requested.
    FindNext(Handle),
    /// Status described through a handle.
    StatusDesc(Handle, Status),
}

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

struct MockState {
    calls: Vec<MockCall>,
    resources: Vec<String>,
    attributes: HashMap<Attribute, AttrState>,
    string_attributes: HashMap<Attribute, String>,
    replies: VecDeque<Vec<u8>>,
    injected: HashMap<MockOp, VecDeque<Status>>,
    responder: Option<Responder>,
    next_handle: u32,
    session: Option<Handle>,
    devices: HashSet<Handle>,
    last_opened: Option<Handle>,
    find_lists: HashMap<Handle, VecDeque<String>>,
}

impl MockState {
    fn new() -> Self {
        let attributes = HashMap::from([(Attribute::TERMCHAR, AttrState::from(b'\n'))]);
        let string_attributes = HashMap::from([
            (Attribute::MANF_NAME, "B&K Precision".to_string()),
            (Attribute::MODEL_NAME, "9130B".to_string()),
            (Attribute::INTF_INST_NAME, "USB0".to_string()),
        ]);

        Self {
            calls: Vec::new(),
            resources: Vec::new(),
            attributes,
            string_attributes,
            replies: VecDeque::new(),
            injected: HashMap::new(),
            responder: None,
            next_handle: 1,
            session: None,
            devices: HashSet::new(),
            last_opened: None,
            find_lists: HashMap::new(),
        }
    }

    fn record(&mut self, op: MockOp, call: MockCall) -> DriverResult<Status> {
        self.calls.push(call);
        match self.injected.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(status) => status.check(),
            None => Ok(Status::SUCCESS),
        }
    }

    fn allocate(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn is_live(&self, handle: Handle) -> bool {
        self.session == Some(handle)
            || self.devices.contains(&handle)
            || self.find_lists.contains_key(&handle)
    }
}

/// In-memory [`VisaDriver`].
///
/// # Example
///
/// ```
/// use visa_psu::visa::{MockOp, MockVisa, Status, VisaDevice};
///
/// let mock = MockVisa::new();
/// mock.fail_next(MockOp::OpenDefaultRm, Status::ERROR_SYSTEM_ERROR);
///
/// let dev = VisaDevice::new(mock.clone());
/// assert!(!dev.is_initialized());
/// ```
#[derive(Clone)]
pub struct MockVisa {
    state: Arc<Mutex<MockState>>,
}

impl MockVisa {
    /// Create a mock with no resources and a `\n` terminator.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
        }
    }

    /// Resources reported by discovery and accepted by `open`.
    pub fn with_resources<I, S>(self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Termination character reported after open.
    pub fn with_term_char(self, term_char: u8) -> Self {
        self.set_attribute_value(Attribute::TERMCHAR, AttrState::from(term_char));
        self
    }

    /// Preset an integer attribute.
    pub fn with_attribute(self, attribute: Attribute, value: AttrState) -> Self {
        self.set_attribute_value(attribute, value);
        self
    }

    /// Preset a string attribute.
    pub fn with_string_attribute(self, attribute: Attribute, value: &str) -> Self {
        self.state()
            .string_attributes
            .insert(attribute, value.to_string());
        self
    }

    /// Answer writes: the returned bytes, if any, are queued as the next reply.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
        self
    }

    /// Overwrite an integer attribute.
    pub fn set_attribute_value(&self, attribute: Attribute, value: AttrState) {
        self.state().attributes.insert(attribute, value);
    }

    /// Remove an attribute so reads of it fail with `VI_ERROR_NSUP_ATTR`.
    pub fn remove_attribute(&self, attribute: Attribute) {
        let mut state = self.state();
        state.attributes.remove(&attribute);
        state.string_attributes.remove(&attribute);
    }

    /// Queue bytes for the next read.
    pub fn push_reply(&self, reply: impl AsRef<[u8]>) {
        self.state().replies.push_back(reply.as_ref().to_vec());
    }

    /// Make the next call of `op` fail with `status`.
    ///
    /// Panics if `status` is not an error code.
    pub fn fail_next(&self, op: MockOp, status: Status) {
        assert!(status.check().is_err(), "{} is not an error status", status);
        self.inject(op, status);
    }

    /// Make the next call of `op` complete with a warning `status`.
    ///
    /// Panics if `status` is not a warning code.
    pub fn warn_next(&self, op: MockOp, status: Status) {
        assert!(status.is_warning(), "{} is not a warning status", status);
        self.inject(op, status);
    }

    fn inject(&self, op: MockOp, status: Status) {
        self.state()
            .injected
            .entry(op)
            .or_default()
            .push_back(status);
    }

    /// All calls recorded since creation or the last [`clear_calls`](Self::clear_calls).
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Payloads of every recorded write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of device handles currently open.
    pub fn open_devices(&self) -> usize {
        self.state().devices.len()
    }

    /// Handle returned by the most recent successful `open`.
    pub fn last_opened(&self) -> Option<Handle> {
        self.state().last_opened
    }

    /// Number of discovery lists not yet closed.
    pub fn open_find_lists(&self) -> usize {
        self.state().find_lists.len()
    }

    /// True while the resource-manager session is held.
    pub fn session_open(&self) -> bool {
        self.state().session.is_some()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockVisa {
    fn default() -> Self {
        Self::new()
    }
}

impl VisaDriver for MockVisa {
    fn open_default_rm(&mut self) -> DriverResult<Handle> {
        let mut state = self.state();
        state.record(MockOp::OpenDefaultRm, MockCall::OpenDefaultRm)?;
        let session = state.allocate();
        state.session = Some(session);
        Ok(session)
    }

    fn open(
        &mut self,
        session: Handle,
        resource: &str,
        access: AccessMode,
        timeout_ms: u32,
    ) -> DriverResult<Handle> {
        let mut state = self.state();
        state.record(
            MockOp::Open,
            MockCall::Open {
                resource: resource.to_string(),
                access,
                timeout_ms,
            },
        )?;
        if state.session != Some(session) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        if resource.is_empty() {
            return Err(Status::ERROR_INV_RSRC_NAME);
        }
        if !state
            .resources
            .iter()
            .any(|r| r.eq_ignore_ascii_case(resource))
        {
            return Err(Status::ERROR_RSRC_NFOUND);
        }
        let device = state.allocate();
        state.devices.insert(device);
        state.last_opened = Some(device);
        Ok(device)
    }

    fn close(&mut self, handle: Handle) -> DriverResult<()> {
        let mut state = self.state();
        state.record(MockOp::Close, MockCall::Close(handle))?;
        if state.session == Some(handle) {
            state.session = None;
        } else if !state.devices.remove(&handle) && state.find_lists.remove(&handle).is_none() {
            return Err(Status::ERROR_INV_OBJECT);
        }
        Ok(())
    }

    fn get_attribute(&mut self, handle: Handle, attribute: Attribute) -> DriverResult<AttrState> {
        let mut state = self.state();
        state.record(MockOp::GetAttribute, MockCall::GetAttribute(attribute))?;
        if !state.is_live(handle) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        state
            .attributes
            .get(&attribute)
            .copied()
            .ok_or(Status::ERROR_NSUP_ATTR)
    }

    fn get_attribute_string(
        &mut self,
        handle: Handle,
        attribute: Attribute,
        buf: &mut [u8],
    ) -> DriverResult<()> {
        let mut state = self.state();
        state.record(
            MockOp::GetAttributeString,
            MockCall::GetAttributeString(attribute),
        )?;
        if !state.is_live(handle) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        let value = state
            .string_attributes
            .get(&attribute)
            .ok_or(Status::ERROR_NSUP_ATTR)?;
        fill_c_string(buf, value);
        Ok(())
    }

    fn set_attribute(
        &mut self,
        handle: Handle,
        attribute: Attribute,
        value: AttrState,
    ) -> DriverResult<()> {
        let mut state = self.state();
        state.record(MockOp::SetAttribute, MockCall::SetAttribute(attribute, value))?;
        if !state.is_live(handle) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        state.attributes.insert(attribute, value);
        Ok(())
    }

    fn write(&mut self, handle: Handle, bytes: &[u8]) -> DriverResult<usize> {
        let mut state = self.state();
        state.record(MockOp::Write, MockCall::Write(bytes.to_vec()))?;
        if !state.devices.contains(&handle) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        let reply = state.responder.as_mut().and_then(|respond| respond(bytes));
        if let Some(reply) = reply {
            state.replies.push_back(reply);
        }
        Ok(bytes.len())
    }

    fn read(&mut self, handle: Handle, buf: &mut [u8]) -> DriverResult<usize> {
        let mut state = self.state();
        state.record(MockOp::Read, MockCall::Read(buf.len()))?;
        if !state.devices.contains(&handle) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        let mut reply = state.replies.pop_front().ok_or(Status::ERROR_TMO)?;
        let count = reply.len().min(buf.len());
        buf[..count].copy_from_slice(&reply[..count]);
        if count < reply.len() {
            // unread bytes stay queued like a device output buffer
            state.replies.push_front(reply.split_off(count));
        }
        Ok(count)
    }

    fn find_resources(
        &mut self,
        session: Handle,
        expression: &str,
        first: &mut [u8],
    ) -> DriverResult<(Handle, u32)> {
        let mut state = self.state();
        state.record(
            MockOp::FindResources,
            MockCall::FindResources(expression.to_string()),
        )?;
        if state.session != Some(session) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        let mut matches: VecDeque<String> = state
            .resources
            .iter()
            .filter(|r| matches_expression(expression, r))
            .cloned()
            .collect();
        let Some(head) = matches.pop_front() else {
            return Err(Status::ERROR_RSRC_NFOUND);
        };
        fill_c_string(first, &head);
        let count = u32::try_from(matches.len() + 1).unwrap_or(u32::MAX);
        let list = state.allocate();
        state.find_lists.insert(list, matches);
        Ok((list, count))
    }

    fn find_next(&mut self, find_list: Handle, buf: &mut [u8]) -> DriverResult<()> {
        let mut state = self.state();
        state.record(MockOp::FindNext, MockCall::FindNext(find_list))?;
        let next = state
            .find_lists
            .get_mut(&find_list)
            .ok_or(Status::ERROR_INV_OBJECT)?
            .pop_front()
            .ok_or(Status::ERROR_RSRC_NFOUND)?;
        fill_c_string(buf, &next);
        Ok(())
    }

    fn status_desc(&mut self, handle: Handle, status: Status, buf: &mut [u8]) -> DriverResult<()> {
        let mut state = self.state();
        state.record(MockOp::StatusDesc, MockCall::StatusDesc(handle, status))?;
        if !state.is_live(handle) {
            return Err(Status::ERROR_INV_OBJECT);
        }
        let text = match status.name() {
            Some(name) => format!("{}: {}", name, status_text(status)),
            None => format!("0x{:08X}: {}", status.0 as u32, status_text(status)),
        };
        fill_c_string(buf, &text);
        Ok(())
    }
}

fn status_text(status: Status) -> &'static str {
    match status {
        Status::ERROR_SYSTEM_ERROR => "Unknown system error (miscellaneous error).",
        Status::ERROR_INV_OBJECT => "The given session or object reference is invalid.",
        Status::ERROR_RSRC_LOCKED => {
            "Specified type of lock cannot be obtained, or specified operation cannot be performed, because the resource is locked."
        }
        Status::ERROR_RSRC_NFOUND => {
            "Insufficient location information or the requested device or resource is not present in the system."
        }
        Status::ERROR_INV_RSRC_NAME => "Invalid resource reference specified. Parsing error.",
        Status::ERROR_TMO => "Timeout expired before operation completed.",
        Status::ERROR_NSUP_ATTR => {
            "The specified attribute is not defined or supported by the referenced session, event, or find list."
        }
        Status::ERROR_IO => "Could not perform operation because of I/O error.",
        Status::ERROR_CONN_LOST => "The connection for the given session has been lost.",
        _ => "Unknown status code.",
    }
}

/// Copy `value` into `buf`, NUL-terminating when there is room.
fn fill_c_string(buf: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let count = bytes.len().min(buf.len());
    buf[..count].copy_from_slice(&bytes[..count]);
    if count < buf.len() {
        buf[count] = 0;
    }
}

/// Match a VISA discovery expression: `?` is one character, `*` any run.
fn matches_expression(expression: &str, resource: &str) -> bool {
    let mut pattern = String::from("^");
    for c in expression.chars() {
        match c {
            '?' => pattern.push('.'),
            '*' => pattern.push_str(".*"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');

    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(resource))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_matching() {
        assert!(matches_expression("?*", "ASRL1::INSTR"));
        assert!(matches_expression("USB?*", "usb0::0x1::0x2::SN::INSTR"));
        assert!(!matches_expression("USB?*", "GPIB0::5::INSTR"));
        assert!(matches_expression("GPIB?*INSTR", "GPIB0::5::INSTR"));
        assert!(!matches_expression("USB?*", "USB"));
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let mut mock = MockVisa::new();
        mock.fail_next(MockOp::OpenDefaultRm, Status::ERROR_SYSTEM_ERROR);

        assert_eq!(mock.open_default_rm(), Err(Status::ERROR_SYSTEM_ERROR));
        assert!(mock.open_default_rm().is_ok());
        assert_eq!(
            mock.calls(),
            vec![MockCall::OpenDefaultRm, MockCall::OpenDefaultRm]
        );
    }

    #[test]
    fn responder_feeds_reads() {
        let mut mock = MockVisa::new()
            .with_resources(["ASRL1::INSTR"])
            .with_responder(|bytes| bytes.starts_with(b"*IDN?").then(|| b"MOCK,1\n".to_vec()));
        let session = mock.open_default_rm().unwrap();
        let device = mock
            .open(session, "ASRL1::INSTR", AccessMode::NoLock, 0)
            .unwrap();

        mock.write(device, b"*IDN?\n").unwrap();
        let mut buf = [0u8; 32];
        let n = mock.read(device, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"MOCK,1\n");

        mock.write(device, b"*RST\n").unwrap();
        assert_eq!(mock.read(device, &mut buf), Err(Status::ERROR_TMO));
    }

    #[test]
    fn c_string_fill_leaves_oversized_values_unterminated() {
        let mut buf = [0xAAu8; 4];
        fill_c_string(&mut buf, "ABCDEF");
        assert_eq!(&buf, b"ABCD");

        let mut buf = [0xAAu8; 4];
        fill_c_string(&mut buf, "AB");
        assert_eq!(&buf[..3], b"AB\0");
    }

    #[test]
    fn closing_unknown_handle_fails() {
        let mut mock = MockVisa::new();
        assert_eq!(mock.close(Handle(42)), Err(Status::ERROR_INV_OBJECT));
    }

    #[test]
    #[should_panic(expected = "is not a warning status")]
    fn warn_next_rejects_error_codes() {
        MockVisa::new().warn_next(MockOp::Write, Status::ERROR_IO);
    }

    #[test]
    #[should_panic(expected = "is not an error status")]
    fn fail_next_rejects_warning_codes() {
        MockVisa::new().fail_next(MockOp::Read, Status::SUCCESS_TERM_CHAR);
    }
}
