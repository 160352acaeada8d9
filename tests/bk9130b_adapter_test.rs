//! BK Precision 9130B adapter integration tests
//!
//! Exercise the adapter end to end against the simulated supply, plus one
//! hardware test that needs a real 9130B and the system VISA library.
//!
//! Run with:
//!   cargo test --test bk9130b_adapter_test
//!
//! Hardware (ignored by default):
//!   cargo test --features instrument_visa --test bk9130b_adapter_test -- --ignored

use std::time::Duration;
use visa_psu::config::InstrumentConfig;
use visa_psu::error::{AppResult, DaqError};
use visa_psu::psu::{simulated_bk9130b, Bk9130b, Channel, LockMode, PsuError};
use visa_psu::visa::{MockVisa, VisaDevice};

const RESOURCE: &str = "USB0::0xFFFF::0x9130::802200000000000000::INSTR";

fn simulated() -> (MockVisa, Bk9130b<MockVisa>) {
    let mock = simulated_bk9130b(RESOURCE);
    let config = InstrumentConfig {
        timeout_ms: 0,
        ..Default::default()
    };
    let psu = Bk9130b::from_config(VisaDevice::new(mock.clone()), &config).unwrap();
    (mock, psu)
}

/// Typical bench session: pick a channel, program it, enable it, shut down
#[test]
fn test_program_and_enable_channel() -> AppResult<()> {
    let (mock, mut psu) = simulated();
    assert_eq!(psu.settings().device_id, RESOURCE);
    psu.initialize()?;

    psu.set_active_channel(Channel::Ch2)?;
    psu.set_output_voltage(12.0)?;
    psu.set_output_current(0.5)?;
    psu.set_open(true)?;

    assert_eq!(psu.active_channel()?, Channel::Ch2);
    assert!((psu.output_voltage()? - 12.0).abs() < 1e-9);
    assert!((psu.output_current()? - 0.5).abs() < 1e-9);
    assert!(psu.is_open());

    psu.shutdown()?;
    assert_eq!(mock.open_devices(), 0);
    Ok(())
}

/// Every channel is left off after shutdown, whatever was enabled before
#[test]
fn test_shutdown_leaves_outputs_off() -> AppResult<()> {
    let (_mock, mut psu) = simulated();
    psu.initialize()?;
    for channel in Channel::ALL {
        psu.set_active_channel(channel)?;
        psu.set_open(true)?;
    }
    psu.shutdown()?;

    psu.initialize()?;
    for channel in Channel::ALL {
        psu.set_active_channel(channel)?;
        assert!(!psu.is_open(), "{} still on", channel);
    }
    Ok(())
}

/// CH3 clamps to 5 V but still programs the clamped value
#[test]
fn test_ch3_voltage_clamp() {
    let (_mock, mut psu) = simulated();
    psu.initialize().unwrap();
    psu.set_active_channel(Channel::Ch3).unwrap();

    let err = psu.set_output_voltage(9.0).unwrap_err();
    assert_eq!(err.code(), 103);
    assert!(matches!(err, PsuError::InvalidVoltage { applied: Some(v), .. } if v == 5.0));
    assert!((psu.output_voltage().unwrap() - 5.0).abs() < 1e-9);
}

/// Adapter errors convert into the crate error with their host code
#[test]
fn test_errors_convert_to_daq_error() {
    let (_mock, mut psu) = simulated();
    let err: DaqError = psu.set_open(true).unwrap_err().into();
    assert!(matches!(err, DaqError::Psu(PsuError::NotInitialized)));

    psu.initialize().unwrap();
    let err: DaqError = psu.set_output_current(-0.1).unwrap_err().into();
    assert_eq!(err.device_code(), Some(104));
}

/// Settings are frozen once initialized
#[test]
fn test_pre_init_settings() {
    let (_mock, mut psu) = simulated();
    psu.set_lock_mode(LockMode::Exclusive).unwrap();
    psu.initialize().unwrap();
    assert_eq!(
        psu.set_timeout(Duration::from_millis(10)),
        Err(PsuError::PreInitOnly("Timeout"))
    );
    assert_eq!(
        psu.set_device_id(RESOURCE),
        Err(PsuError::PreInitOnly("Device ID"))
    );
}

/// Real supply: round-trip a voltage and switch everything off
#[test]
#[ignore]
#[cfg(feature = "instrument_visa")]
fn test_hardware_voltage_round_trip() -> AppResult<()> {
    use visa_psu::visa::NiVisa;

    let mut psu = Bk9130b::discover(VisaDevice::new(NiVisa::new()), "USB?*");
    psu.set_timeout(Duration::from_millis(200))?;
    psu.initialize()?;
    println!("Connected: {}", psu.description()?);

    psu.set_active_channel(Channel::Ch1)?;
    psu.set_output_voltage(2.5)?;
    let volts = psu.output_voltage()?;
    assert!((volts - 2.5).abs() < 0.01, "read back {} V", volts);

    psu.shutdown()?;
    Ok(())
}
