//! Simulated 9130B for dry runs and tests.
//!
//! Wires a [`MockVisa`] responder that tracks channel selection, output
//! state and set points the way the real supply does, and answers only the
//! last query of a batch.

use super::command::Channel;
use crate::visa::{Attribute, MockVisa};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    output: bool,
    volts: f64,
    amps: f64,
}

#[derive(Debug, Default)]
struct SupplyState {
    selected: Channel,
    channels: HashMap<Channel, ChannelState>,
}

impl SupplyState {
    fn selected(&mut self) -> &mut ChannelState {
        self.channels.entry(self.selected).or_default()
    }

    /// Apply one command; queries return their reply.
    fn execute(&mut self, command: &str) -> Option<String> {
        let (header, argument) = match command.split_once(' ') {
            Some((header, argument)) => (header, argument.trim()),
            None => (command, ""),
        };
        match header.to_ascii_uppercase().as_str() {
            "*IDN?" => Some("B&K Precision, 9130B, 802200000000000000, 1.05-1.04".to_string()),
            "INST:SEL" => {
                if let Ok(channel) = argument.parse::<Channel>() {
                    self.selected = channel;
                }
                None
            }
            "INST:SEL?" => Some(self.selected.to_string()),
            "SOUR:CHAN:OUTP:STAT" => {
                self.selected().output = argument.eq_ignore_ascii_case("ON") || argument == "1";
                None
            }
            "SOUR:CHAN:OUTP:STAT?" => Some(if self.selected().output { "1" } else { "0" }.to_string()),
            "SOUR:VOLT" => {
                if let Some(volts) = leading_number(argument) {
                    let limit = self.selected.max_voltage();
                    self.selected().volts = volts.clamp(0.0, limit);
                }
                None
            }
            "SOUR:CURR" => {
                if let Some(amps) = leading_number(argument) {
                    self.selected().amps = amps.clamp(0.0, 3.0);
                }
                None
            }
            "SOUR:VOLT:LEV?" => Some(format!("{:.3}", self.selected().volts)),
            "SOUR:CURR:LEV?" => Some(format!("{:.3}", self.selected().amps)),
            _ => None,
        }
    }
}

fn leading_number(argument: &str) -> Option<f64> {
    argument.split_whitespace().next()?.parse().ok()
}

/// A [`MockVisa`] exposing `resource` that behaves like a 9130B.
pub fn simulated_bk9130b(resource: &str) -> MockVisa {
    let mut state = SupplyState::default();
    MockVisa::new()
        .with_resources([resource])
        .with_string_attribute(Attribute::MANF_NAME, "B&K Precision")
        .with_string_attribute(Attribute::MODEL_NAME, "9130B")
        .with_responder(move |bytes| {
            let text = String::from_utf8_lossy(bytes);
            let mut reply = None;
            for command in text.split(['\n', ';']).map(str::trim).filter(|c| !c.is_empty()) {
                if let Some(answer) = state.execute(command) {
                    reply = Some(answer);
                }
            }
            reply.map(|mut answer| {
                answer.push('\n');
                answer.into_bytes()
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visa::{AccessMode, VisaDevice};
    use std::time::Duration;

    #[test]
    fn answers_last_query_of_batch() {
        let mut dev = VisaDevice::new(simulated_bk9130b("USB0::SIM::INSTR"));
        dev.open("USB0::SIM::INSTR", AccessMode::NoLock, Duration::ZERO)
            .unwrap();
        dev.write_sequence(["INST:SEL CH3", "SOUR:VOLT 9.0 V"]).unwrap();
        assert_eq!(dev.query("SOUR:VOLT:LEV?").unwrap(), "5.000\n");
        assert_eq!(dev.query("INST:SEL?").unwrap(), "CH3\n");
    }
}
