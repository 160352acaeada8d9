//! VISA session core integration tests
//!
//! Drives [`VisaDevice`] through its public API against [`MockVisa`]:
//! lifecycle, framing, timed queries, diagnostics and discovery.
//!
//! Run with:
//!   cargo test --test visa_device_integration

use std::time::{Duration, Instant};
use visa_psu::visa::{
    AccessMode, Attribute, MockCall, MockOp, MockVisa, Status, VisaDevice, VisaError,
    CLOSE_COMMAND_WARNING,
};

const RESOURCE: &str = "USB0::0xFFFF::0x9130::802200000000000000::INSTR";

fn opened(mock: &MockVisa) -> VisaDevice<MockVisa> {
    let mut dev = VisaDevice::new(mock.clone());
    dev.open(RESOURCE, AccessMode::NoLock, Duration::from_millis(20))
        .unwrap();
    dev
}

/// Full session: discover, open, exchange, close with a shutdown sequence
#[test]
fn test_full_session_lifecycle() {
    let mock = MockVisa::new()
        .with_resources([RESOURCE, "ASRL1::INSTR"])
        .with_responder(|bytes| (bytes == b"*IDN?\n").then(|| b"B&K,9130B,0,1.0\n".to_vec()));

    let mut dev = VisaDevice::new(mock.clone());
    assert!(dev.is_initialized());

    let found = dev.find_instruments("USB?*");
    assert_eq!(found, vec![RESOURCE.to_string()]);
    assert_eq!(mock.open_find_lists(), 0);

    dev.open(&found[0], AccessMode::Shared, Duration::from_millis(5))
        .unwrap();
    assert_eq!(dev.resource(), Some(RESOURCE));
    assert_eq!(dev.term_char(), Some(b'\n'));

    dev.on_close_sequence(["INST:SEL CH1", "SOUR:CHAN:OUTP:STAT OFF"]);
    assert_eq!(dev.query("*IDN?").unwrap(), "B&K,9130B,0,1.0\n");

    dev.close().unwrap();
    assert!(!dev.is_open());
    assert_eq!(mock.open_devices(), 0);
    assert_eq!(
        mock.writes().last().unwrap(),
        b"INST:SEL CH1;\nSOUR:CHAN:OUTP:STAT OFF\n"
    );

    drop(dev);
    assert!(!mock.session_open());
}

/// Writes carry exactly one terminator, taken from the device
#[test]
fn test_framing_uses_device_terminator() {
    let mock = MockVisa::new()
        .with_resources([RESOURCE])
        .with_term_char(b'\r');
    let mut dev = opened(&mock);

    dev.write("OUTP ON").unwrap();
    dev.write_sequence(["A", "B", "C"]).unwrap();
    assert_eq!(
        mock.writes(),
        vec![b"OUTP ON\r".to_vec(), b"A;\rB;\rC\r".to_vec()]
    );
}

/// Query blocks for the configured timeout before reading
#[test]
fn test_query_waits_for_timeout() {
    let mock = MockVisa::new().with_resources([RESOURCE]);
    let mut dev = opened(&mock);
    mock.push_reply("1\n");

    let start = Instant::now();
    assert_eq!(dev.query("SOUR:CHAN:OUTP:STAT?").unwrap(), "1\n");
    assert!(start.elapsed() >= Duration::from_millis(20));
}

/// A failed write skips the wait and the read entirely
#[test]
fn test_query_write_failure_skips_read() {
    let mock = MockVisa::new().with_resources([RESOURCE]);
    let mut dev = opened(&mock);
    mock.clear_calls();
    mock.fail_next(MockOp::Write, Status::ERROR_CONN_LOST);

    let err = dev.query("INST:SEL?").unwrap_err();
    assert_eq!(err.status(), Some(Status::ERROR_CONN_LOST));
    assert!(!mock.calls().iter().any(|c| matches!(c, MockCall::Read(_))));
    assert!(dev.take_last_error().starts_with("VI_ERROR_CONN_LOST"));
    assert!(dev.take_last_error().is_empty());
}

/// Operations without an open device fail before reaching the driver
#[test]
fn test_preconditions() {
    let mock = MockVisa::new().with_resources([RESOURCE]);
    let mut dev = VisaDevice::new(mock.clone());
    mock.clear_calls();

    assert_eq!(dev.write("X"), Err(VisaError::NotOpen));
    assert_eq!(dev.read(), Err(VisaError::NotOpen));
    assert!(mock.calls().is_empty());

    dev.open(RESOURCE, AccessMode::NoLock, Duration::ZERO).unwrap();
    assert!(matches!(
        dev.open(RESOURCE, AccessMode::NoLock, Duration::ZERO),
        Err(VisaError::AlreadyOpen(_))
    ));
}

/// No session: every operation fails and discovery is empty
#[test]
fn test_session_unavailable() {
    let mock = MockVisa::new().with_resources([RESOURCE]);
    mock.fail_next(MockOp::OpenDefaultRm, Status::ERROR_SYSTEM_ERROR);
    let mut dev = VisaDevice::new(mock);

    assert!(!dev.is_initialized());
    assert!(!dev.take_last_error().is_empty());
    assert!(dev.find_instruments("?*").is_empty());
    assert_eq!(
        dev.open(RESOURCE, AccessMode::NoLock, Duration::ZERO),
        Err(VisaError::NotInitialized)
    );
}

/// A failing close command is reported but the device is still released
#[test]
fn test_close_command_failure_is_warning() {
    let mock = MockVisa::new().with_resources([RESOURCE]);
    let mut dev = opened(&mock);
    dev.on_close("SOUR:CHAN:OUTP:STAT OFF");
    mock.fail_next(MockOp::Write, Status::ERROR_IO);

    dev.close().unwrap();
    assert!(!dev.is_open());
    assert_eq!(dev.take_last_error(), CLOSE_COMMAND_WARNING);
}

/// Attributes: scalar, string and description
#[test]
fn test_attributes() {
    let mock = MockVisa::new()
        .with_resources([RESOURCE])
        .with_attribute(Attribute::TMO_VALUE, 2000);
    let mut dev = opened(&mock);

    assert_eq!(dev.get_scalar_attribute::<u32>(Attribute::TMO_VALUE), Ok(2000));
    dev.set_attribute(Attribute::TMO_VALUE, 500).unwrap();
    assert_eq!(dev.get_scalar_attribute::<u64>(Attribute::TMO_VALUE), Ok(500));
    assert_eq!(
        dev.get_string_attribute(Attribute::MODEL_NAME).unwrap(),
        "9130B"
    );
    assert_eq!(
        dev.device_description().unwrap(),
        "B&K Precision : 9130B : USB0"
    );
}
