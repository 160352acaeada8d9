//! Adapter for the BK Precision 9130B.
//!
//! The host framework sees the supply as a shutter: opening the shutter
//! switches the active channel's output on. Voltage, current and the
//! active channel are exposed as settable properties.

use super::command::{all_outputs_off, Channel, PsuCommand};
use super::{LockMode, PsuError};
use crate::config::InstrumentConfig;
use crate::visa::{VisaDevice, VisaDriver, VisaError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Name the adapter registers under.
pub const DEVICE_NAME: &str = "BK9130B";

/// Human-readable description.
pub const DEVICE_DESCRIPTION: &str = "BK Precision 9130B triple-output power supply";

/// Placeholder device id when discovery comes back empty.
pub const NO_DEVICES_FOUND: &str = "<no devices found>";

/// Discovery expression used at construction.
pub const DISCOVERY_EXPRESSION: &str = "?*";

/// Longest timeout accepted for the instrument.
pub const MAX_TIMEOUT_MS: u64 = 1_000_000;

const MAX_CURRENT: f64 = 3.0;

/// Options fixed before [`Bk9130b::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bk9130bSettings {
    /// VISA resource to open.
    pub device_id: String,
    /// I/O timeout, also the settle delay of every query.
    pub timeout: Duration,
    /// Lock taken on open.
    pub lock_mode: LockMode,
}

/// BK Precision 9130B driven over a [`VisaDevice`].
pub struct Bk9130b<D: VisaDriver> {
    device: VisaDevice<D>,
    settings: Bk9130bSettings,
    available: Vec<String>,
    initialized: bool,
    active_channel: Channel,
    output_enabled: bool,
    voltage: f64,
    current: f64,
}

impl<D: VisaDriver> Bk9130b<D> {
    /// Wrap `device` and discover every resource (`"?*"`).
    ///
    /// The first discovered resource becomes the default device id.
    pub fn new(device: VisaDevice<D>) -> Self {
        Self::discover(device, DISCOVERY_EXPRESSION)
    }

    /// Like [`new`](Self::new) with a narrower discovery expression.
    pub fn discover(mut device: VisaDevice<D>, expression: &str) -> Self {
        let available = device.find_instruments(expression);
        let device_id = match available.first() {
            Some(first) => first.clone(),
            None => {
                warn!("Failed to locate {}", DEVICE_NAME);
                NO_DEVICES_FOUND.to_string()
            }
        };
        debug!(count = available.len(), device_id = %device_id, "{} discovery finished", DEVICE_NAME);

        Self {
            device,
            settings: Bk9130bSettings {
                device_id,
                timeout: crate::visa::device::DEFAULT_TIMEOUT,
                lock_mode: LockMode::None,
            },
            available,
            initialized: false,
            active_channel: Channel::Ch1,
            output_enabled: false,
            voltage: 1.0,
            current: 0.0,
        }
    }

    /// Build from configuration: discovery, then the configured settings.
    pub fn from_config(device: VisaDevice<D>, config: &InstrumentConfig) -> Result<Self, PsuError> {
        let mut psu = Self::discover(device, &config.search_expression);
        if let Some(resource) = &config.resource {
            psu.set_device_id(resource)?;
        }
        psu.set_timeout(Duration::from_millis(config.timeout_ms))?;
        psu.set_lock_mode(config.lock_mode)?;
        Ok(psu)
    }

    /// Resources found at construction.
    pub fn available_devices(&self) -> &[String] {
        &self.available
    }

    /// Current pre-initialization settings.
    pub fn settings(&self) -> &Bk9130bSettings {
        &self.settings
    }

    /// True between a successful [`initialize`](Self::initialize) and
    /// [`shutdown`](Self::shutdown).
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Choose the resource to open.
    ///
    /// When discovery found instruments the id must be one of them.
    pub fn set_device_id(&mut self, id: &str) -> Result<(), PsuError> {
        self.require_uninitialized("Device ID")?;
        if !self.available.is_empty() && !self.available.iter().any(|r| r == id) {
            return Err(PsuError::InvalidDeviceId(id.to_string()));
        }
        self.settings.device_id = id.to_string();
        Ok(())
    }

    /// Set the instrument timeout, at most [`MAX_TIMEOUT_MS`].
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), PsuError> {
        self.require_uninitialized("Timeout")?;
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if ms > MAX_TIMEOUT_MS {
            return Err(PsuError::InvalidTimeout(ms));
        }
        self.settings.timeout = timeout;
        Ok(())
    }

    /// Set the lock taken on open.
    pub fn set_lock_mode(&mut self, mode: LockMode) -> Result<(), PsuError> {
        self.require_uninitialized("Lock Mode")?;
        self.settings.lock_mode = mode;
        Ok(())
    }

    /// Open the supply and put it into a known state.
    ///
    /// Registers the all-outputs-off sequence to run on close, then selects
    /// CH1 with output off, 1 V and 0 A. Calling it twice is a no-op.
    #[instrument(skip(self), fields(device_id = %self.settings.device_id))]
    pub fn initialize(&mut self) -> Result<(), PsuError> {
        if self.initialized {
            return Ok(());
        }

        if self.device.is_open() {
            // a previous shutdown failed to release the handle
            if let Err(err) = self.device.close() {
                let reason = self.diagnostic(&err);
                warn!(reason = %reason, "Failed to release stale {} handle", DEVICE_NAME);
                return Err(PsuError::OpenFailed {
                    device: self.settings.device_id.clone(),
                    reason,
                });
            }
        }

        let access = self.settings.lock_mode.into();
        if let Err(err) = self
            .device
            .open(&self.settings.device_id, access, self.settings.timeout)
        {
            let reason = self.diagnostic(&err);
            warn!(reason = %reason, "Failed to open {}", DEVICE_NAME);
            return Err(PsuError::OpenFailed {
                device: self.settings.device_id.clone(),
                reason,
            });
        }
        self.initialized = true;
        self.device.on_close_sequence(all_outputs_off());

        let defaults = [
            PsuCommand::SelectChannel(Channel::Ch1),
            PsuCommand::SetOutput(false),
            PsuCommand::SetVoltage(1.0),
            PsuCommand::SetCurrent(0.0),
        ];
        if let Err(err) = self
            .device
            .write_sequence(defaults.iter().map(PsuCommand::to_scpi))
        {
            // the device is usable even if the defaults did not land
            let reason = self.diagnostic(&err);
            warn!(reason = %reason, "Failed to write power-on defaults");
        }
        self.active_channel = Channel::Ch1;
        self.output_enabled = false;
        self.voltage = 1.0;
        self.current = 0.0;

        match self.device.device_description() {
            Ok(description) => info!(description = %description, "{} initialized", DEVICE_NAME),
            Err(_) => {
                self.device.take_last_error();
                info!("{} initialized", DEVICE_NAME);
            }
        }
        Ok(())
    }

    /// Switch every output off and close the device.
    ///
    /// The adapter counts as uninitialized afterwards even if closing failed.
    pub fn shutdown(&mut self) -> Result<(), PsuError> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        if let Err(err) = self.device.close() {
            let reason = self.diagnostic(&err);
            warn!(reason = %reason, "Failed to close {}", DEVICE_NAME);
            return Err(PsuError::CloseFailed(reason));
        }
        info!("{} shut down", DEVICE_NAME);
        Ok(())
    }

    /// Switch the active channel's output. Nothing is sent when the
    /// output is already in the requested state.
    pub fn set_open(&mut self, open: bool) -> Result<(), PsuError> {
        self.require_initialized()?;
        if open == self.output_enabled {
            return Ok(());
        }
        self.write_all(&[
            PsuCommand::SelectChannel(self.active_channel),
            PsuCommand::SetOutput(open),
        ])?;
        self.output_enabled = open;
        Ok(())
    }

    /// Cached output state of the active channel.
    pub fn is_open(&self) -> bool {
        self.output_enabled
    }

    /// Timed exposure is not available on a power supply.
    pub fn fire(&mut self, _delta_ms: f64) -> Result<(), PsuError> {
        Err(PsuError::Unsupported("fire"))
    }

    /// The supply never reports busy.
    pub fn busy(&self) -> bool {
        false
    }

    /// Ask the supply which channel is selected.
    pub fn active_channel(&mut self) -> Result<Channel, PsuError> {
        self.require_initialized()?;
        let reply = self.query(PsuCommand::QueryChannel)?;
        let channel = reply.parse::<Channel>()?;
        self.active_channel = channel;
        Ok(channel)
    }

    /// Select `channel` and refresh the cached output state from it.
    pub fn set_active_channel(&mut self, channel: Channel) -> Result<(), PsuError> {
        self.require_initialized()?;
        self.write_all(&[PsuCommand::SelectChannel(channel)])?;
        self.active_channel = channel;
        self.output_enabled = match self.query(PsuCommand::QueryOutput) {
            Ok(state) => state == "1",
            Err(err) => {
                warn!(%err, channel = %channel, "Output state unknown, assuming off");
                false
            }
        };
        Ok(())
    }

    /// Programmed voltage of the active channel.
    pub fn output_voltage(&mut self) -> Result<f64, PsuError> {
        self.require_initialized()?;
        self.voltage = self.query_number(PsuCommand::QueryVoltage)?;
        Ok(self.voltage)
    }

    /// Program the active channel's voltage.
    ///
    /// Requests above 5 V on CH3 are clamped: 5 V is written and
    /// [`PsuError::InvalidVoltage`] reports the applied value.
    pub fn set_output_voltage(&mut self, volts: f64) -> Result<(), PsuError> {
        self.require_initialized()?;
        if !(0.0..=Channel::Ch1.max_voltage()).contains(&volts) {
            return Err(PsuError::InvalidVoltage {
                requested: volts,
                applied: None,
            });
        }
        let applied = volts.min(self.active_channel.max_voltage());
        self.write_all(&[PsuCommand::SetVoltage(applied)])?;
        self.voltage = applied;
        if applied < volts {
            warn!(requested = volts, applied, channel = %self.active_channel, "Voltage clamped");
            return Err(PsuError::InvalidVoltage {
                requested: volts,
                applied: Some(applied),
            });
        }
        Ok(())
    }

    /// Programmed current limit of the active channel.
    pub fn output_current(&mut self) -> Result<f64, PsuError> {
        self.require_initialized()?;
        self.current = self.query_number(PsuCommand::QueryCurrent)?;
        Ok(self.current)
    }

    /// Program the active channel's current limit, 0-3 A.
    pub fn set_output_current(&mut self, amps: f64) -> Result<(), PsuError> {
        self.require_initialized()?;
        if !(0.0..=MAX_CURRENT).contains(&amps) {
            return Err(PsuError::InvalidCurrent(amps));
        }
        self.write_all(&[PsuCommand::SetCurrent(amps)])?;
        self.current = amps;
        Ok(())
    }

    /// `"<manufacturer> : <model> : <interface>"` of the open supply.
    pub fn description(&mut self) -> Result<String, PsuError> {
        self.require_initialized()?;
        self.device
            .device_description()
            .map_err(|err| PsuError::ReadFailed(self.diagnostic(&err)))
    }

    /// Underlying instrument session.
    pub fn device_mut(&mut self) -> &mut VisaDevice<D> {
        &mut self.device
    }

    fn write_all(&mut self, commands: &[PsuCommand]) -> Result<(), PsuError> {
        let result = match commands {
            [single] => self.device.write(&single.to_scpi()),
            many => self.device.write_sequence(many.iter().map(PsuCommand::to_scpi)),
        };
        result.map_err(|err| PsuError::WriteFailed(self.diagnostic(&err)))
    }

    fn query(&mut self, command: PsuCommand) -> Result<String, PsuError> {
        let reply = self
            .device
            .query(&command.to_scpi())
            .map_err(|err| PsuError::QueryFailed(self.diagnostic(&err)))?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(PsuError::QueryFailed(format!(
                "empty reply to '{}'",
                command.to_scpi()
            )));
        }
        Ok(reply.to_string())
    }

    fn query_number(&mut self, command: PsuCommand) -> Result<f64, PsuError> {
        let reply = self.query(command)?;
        reply
            .parse::<f64>()
            .map_err(|_| PsuError::ReadFailed(format!("unexpected reply '{}'", reply)))
    }

    /// Prefer the session's recorded diagnostic over the bare error.
    fn diagnostic(&mut self, err: &VisaError) -> String {
        let recorded = self.device.take_last_error();
        if recorded.is_empty() {
            err.to_string()
        } else {
            recorded
        }
    }

    fn require_initialized(&self) -> Result<(), PsuError> {
        if self.initialized {
            Ok(())
        } else {
            Err(PsuError::NotInitialized)
        }
    }

    fn require_uninitialized(&self, property: &'static str) -> Result<(), PsuError> {
        if self.initialized {
            Err(PsuError::PreInitOnly(property))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psu::sim::simulated_bk9130b;
    use crate::visa::{AccessMode, MockCall, MockOp, MockVisa, Status};
    use tracing_test::traced_test;

    const RESOURCE: &str = "USB0::0xFFFF::0x9130::802200000000000000::INSTR";

    fn ready() -> (MockVisa, Bk9130b<MockVisa>) {
        let mock = simulated_bk9130b(RESOURCE);
        let mut psu = Bk9130b::new(VisaDevice::new(mock.clone()));
        psu.set_timeout(Duration::ZERO).unwrap();
        psu.initialize().unwrap();
        mock.clear_calls();
        (mock, psu)
    }

    fn written(mock: &MockVisa) -> Vec<String> {
        mock.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    #[test]
    fn discovery_picks_first_resource() {
        let mock = MockVisa::new().with_resources(["USB0::A::INSTR", "USB0::B::INSTR"]);
        let psu = Bk9130b::new(VisaDevice::new(mock));
        assert_eq!(psu.settings().device_id, "USB0::A::INSTR");
        assert_eq!(psu.available_devices().len(), 2);
    }

    #[test]
    #[traced_test]
    fn no_devices_found_placeholder() {
        let psu = Bk9130b::new(VisaDevice::new(MockVisa::new()));
        assert_eq!(psu.settings().device_id, NO_DEVICES_FOUND);
        assert!(logs_contain("Failed to locate BK9130B"));
    }

    #[test]
    fn device_id_must_be_discovered() {
        let mock = MockVisa::new().with_resources([RESOURCE]);
        let mut psu = Bk9130b::new(VisaDevice::new(mock));
        assert!(matches!(
            psu.set_device_id("TCPIP::10.0.0.1::INSTR"),
            Err(PsuError::InvalidDeviceId(_))
        ));
        psu.set_device_id(RESOURCE).unwrap();
    }

    #[test]
    fn timeout_range_checked() {
        let mut psu = Bk9130b::new(VisaDevice::new(MockVisa::new()));
        assert_eq!(
            psu.set_timeout(Duration::from_millis(1_000_001)),
            Err(PsuError::InvalidTimeout(1_000_001))
        );
        psu.set_timeout(Duration::from_millis(1_000_000)).unwrap();
    }

    #[test]
    fn initialize_writes_defaults_and_locks() {
        let mock = simulated_bk9130b(RESOURCE);
        let mut psu = Bk9130b::new(VisaDevice::new(mock.clone()));
        psu.set_lock_mode(LockMode::Exclusive).unwrap();
        psu.set_timeout(Duration::ZERO).unwrap();
        psu.initialize().unwrap();

        assert!(mock.calls().iter().any(|call| matches!(
            call,
            MockCall::Open { access: AccessMode::Exclusive, timeout_ms: 0, .. }
        )));
        assert_eq!(
            written(&mock),
            vec!["INST:SEL CH1;\nSOUR:CHAN:OUTP:STAT OFF;\nSOUR:VOLT 1.000000 V;\nSOUR:CURR 0.000000 A\n"]
        );
        assert!(!psu.is_open());
        assert_eq!(psu.set_lock_mode(LockMode::None), Err(PsuError::PreInitOnly("Lock Mode")));
    }

    #[test]
    fn initialize_reports_open_failure() {
        let mock = MockVisa::new().with_resources([RESOURCE]);
        mock.fail_next(MockOp::Open, Status::ERROR_RSRC_LOCKED);
        let mut psu = Bk9130b::new(VisaDevice::new(mock));
        match psu.initialize() {
            Err(PsuError::OpenFailed { device, reason }) => {
                assert_eq!(device, RESOURCE);
                assert!(reason.contains("VI_ERROR_RSRC_LOCKED"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!psu.is_initialized());
    }

    #[test]
    fn operations_need_initialize() {
        let mut psu = Bk9130b::new(VisaDevice::new(simulated_bk9130b(RESOURCE)));
        assert_eq!(psu.set_open(true), Err(PsuError::NotInitialized));
        assert_eq!(psu.output_voltage(), Err(PsuError::NotInitialized));
    }

    #[test]
    fn shutter_switches_active_output_once() {
        let (mock, mut psu) = ready();
        psu.set_open(true).unwrap();
        psu.set_open(true).unwrap();
        assert!(psu.is_open());
        assert_eq!(written(&mock), vec!["INST:SEL CH1;\nSOUR:CHAN:OUTP:STAT ON\n"]);

        psu.set_open(false).unwrap();
        assert!(!psu.is_open());
        assert_eq!(written(&mock).len(), 2);
        assert!(!psu.busy());
        assert_eq!(psu.fire(10.0), Err(PsuError::Unsupported("fire")));
    }

    #[test]
    fn channel_switch_refreshes_output_state() {
        let (_mock, mut psu) = ready();
        psu.set_active_channel(Channel::Ch2).unwrap();
        psu.set_open(true).unwrap();
        psu.set_active_channel(Channel::Ch1).unwrap();
        assert!(!psu.is_open());
        psu.set_active_channel(Channel::Ch2).unwrap();
        assert!(psu.is_open());
        assert_eq!(psu.active_channel().unwrap(), Channel::Ch2);
    }

    #[test]
    fn voltage_limits() {
        let (mock, mut psu) = ready();
        psu.set_output_voltage(12.5).unwrap();
        assert!((psu.output_voltage().unwrap() - 12.5).abs() < 1e-9);

        assert!(matches!(
            psu.set_output_voltage(30.5),
            Err(PsuError::InvalidVoltage { applied: None, .. })
        ));
        assert!(matches!(
            psu.set_output_voltage(-1.0),
            Err(PsuError::InvalidVoltage { applied: None, .. })
        ));

        psu.set_active_channel(Channel::Ch3).unwrap();
        mock.clear_calls();
        assert_eq!(
            psu.set_output_voltage(12.0),
            Err(PsuError::InvalidVoltage {
                requested: 12.0,
                applied: Some(5.0)
            })
        );
        assert_eq!(written(&mock), vec!["SOUR:VOLT 5.000000 V\n"]);
        assert!((psu.output_voltage().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn current_limits() {
        let (mock, mut psu) = ready();
        psu.set_output_current(1.5).unwrap();
        assert!((psu.output_current().unwrap() - 1.5).abs() < 1e-9);
        mock.clear_calls();
        assert_eq!(psu.set_output_current(3.5), Err(PsuError::InvalidCurrent(3.5)));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn write_failure_carries_diagnostic() {
        let (mock, mut psu) = ready();
        mock.fail_next(MockOp::Write, Status::ERROR_IO);
        match psu.set_output_current(1.0) {
            Err(PsuError::WriteFailed(reason)) => assert!(reason.contains("VI_ERROR_IO"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn query_timeout_is_query_failure() {
        let (mock, mut psu) = ready();
        mock.fail_next(MockOp::Read, Status::ERROR_TMO);
        let err = psu.output_voltage().unwrap_err();
        assert_eq!(err.code(), 107);
    }

    #[test]
    fn shutdown_turns_everything_off() {
        let (mock, mut psu) = ready();
        psu.set_open(true).unwrap();
        mock.clear_calls();
        psu.shutdown().unwrap();
        assert!(!psu.is_initialized());
        assert_eq!(
            written(&mock),
            vec!["INST:SEL CH1;\nSOUR:CHAN:OUTP:STAT OFF;\nINST:SEL CH2;\nSOUR:CHAN:OUTP:STAT OFF;\nINST:SEL CH3;\nSOUR:CHAN:OUTP:STAT OFF\n"]
        );
        assert_eq!(mock.open_devices(), 0);
        psu.shutdown().unwrap();
    }

    #[test]
    fn from_config_applies_settings() {
        let mock = simulated_bk9130b(RESOURCE);
        let config = InstrumentConfig {
            resource: Some(RESOURCE.to_string()),
            search_expression: "USB?*".to_string(),
            timeout_ms: 0,
            lock_mode: LockMode::Shared,
            ..Default::default()
        };
        let mut psu = Bk9130b::from_config(VisaDevice::new(mock.clone()), &config).unwrap();
        assert!(mock
            .calls()
            .contains(&MockCall::FindResources("USB?*".to_string())));
        assert_eq!(psu.settings().lock_mode, LockMode::Shared);
        assert_eq!(psu.settings().timeout, Duration::ZERO);
        psu.initialize().unwrap();
        assert!(psu.description().unwrap().starts_with("B&K Precision : 9130B"));
    }

    #[test]
    fn failed_shutdown_still_uninitializes() {
        let (mock, mut psu) = ready();
        mock.fail_next(MockOp::Close, Status::ERROR_INV_OBJECT);
        assert!(matches!(psu.shutdown(), Err(PsuError::CloseFailed(_))));
        assert!(!psu.is_initialized());
        assert_eq!(psu.set_open(true), Err(PsuError::NotInitialized));
    }

    #[test]
    fn initialize_recovers_after_failed_shutdown() {
        let (mock, mut psu) = ready();
        mock.fail_next(MockOp::Close, Status::ERROR_INV_OBJECT);
        assert!(matches!(psu.shutdown(), Err(PsuError::CloseFailed(_))));
        assert!(psu.device_mut().is_open());

        psu.initialize().unwrap();
        assert!(psu.is_initialized());
        assert_eq!(mock.open_devices(), 1);
        psu.set_output_current(1.0).unwrap();
    }
}
