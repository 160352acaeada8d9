//! SCPI command set of the BK Precision 9130B.

use super::PsuError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output channel of the triple-output supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// `CH1` (0-30 V)
    #[default]
    Ch1,
    /// `CH2` (0-30 V)
    Ch2,
    /// `CH3` (0-5 V)
    Ch3,
}

impl Channel {
    /// All channels in front-panel order.
    pub const ALL: [Channel; 3] = [Channel::Ch1, Channel::Ch2, Channel::Ch3];

    /// Instrument name of the channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Ch1 => "CH1",
            Channel::Ch2 => "CH2",
            Channel::Ch3 => "CH3",
        }
    }

    /// Highest voltage the channel can source.
    pub fn max_voltage(self) -> f64 {
        match self {
            Channel::Ch1 | Channel::Ch2 => 30.0,
            Channel::Ch3 => 5.0,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PsuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Channel::ALL
            .into_iter()
            .find(|ch| ch.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| PsuError::InvalidChannel(name.to_string()))
    }
}

/// Everything the adapter ever sends to the supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PsuCommand {
    /// Make `channel` the target of subsequent commands.
    SelectChannel(Channel),
    /// Ask which channel is selected.
    QueryChannel,
    /// Switch the selected channel's output.
    SetOutput(bool),
    /// Ask whether the selected channel's output is on (`1`/`0`).
    QueryOutput,
    /// Set the selected channel's voltage in volts.
    SetVoltage(f64),
    /// Set the selected channel's current limit in amps.
    SetCurrent(f64),
    /// Ask for the programmed voltage.
    QueryVoltage,
    /// Ask for the programmed current.
    QueryCurrent,
}

impl PsuCommand {
    /// Render as SCPI text, without terminator.
    pub fn to_scpi(&self) -> String {
        match self {
            PsuCommand::SelectChannel(ch) => format!("INST:SEL {}", ch),
            PsuCommand::QueryChannel => "INST:SEL?".to_string(),
            PsuCommand::SetOutput(on) => {
                format!("SOUR:CHAN:OUTP:STAT {}", if *on { "ON" } else { "OFF" })
            }
            PsuCommand::QueryOutput => "SOUR:CHAN:OUTP:STAT?".to_string(),
            PsuCommand::SetVoltage(volts) => format!("SOUR:VOLT {:.6} V", volts),
            PsuCommand::SetCurrent(amps) => format!("SOUR:CURR {:.6} A", amps),
            PsuCommand::QueryVoltage => "SOUR:VOLT:LEV?".to_string(),
            PsuCommand::QueryCurrent => "SOUR:CURR:LEV?".to_string(),
        }
    }

    /// True for commands that produce a reply.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            PsuCommand::QueryChannel
                | PsuCommand::QueryOutput
                | PsuCommand::QueryVoltage
                | PsuCommand::QueryCurrent
        )
    }
}

/// Sequence that switches every output off; sent when the device closes.
pub fn all_outputs_off() -> Vec<String> {
    Channel::ALL
        .into_iter()
        .flat_map(|ch| [PsuCommand::SelectChannel(ch), PsuCommand::SetOutput(false)])
        .map(|cmd| cmd.to_scpi())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_text() {
        assert_eq!(PsuCommand::SelectChannel(Channel::Ch2).to_scpi(), "INST:SEL CH2");
        assert_eq!(PsuCommand::SetOutput(true).to_scpi(), "SOUR:CHAN:OUTP:STAT ON");
        assert_eq!(PsuCommand::SetOutput(false).to_scpi(), "SOUR:CHAN:OUTP:STAT OFF");
        assert_eq!(PsuCommand::SetVoltage(1.0).to_scpi(), "SOUR:VOLT 1.000000 V");
        assert_eq!(PsuCommand::SetCurrent(0.25).to_scpi(), "SOUR:CURR 0.250000 A");
        assert_eq!(PsuCommand::QueryVoltage.to_scpi(), "SOUR:VOLT:LEV?");
        assert_eq!(PsuCommand::QueryCurrent.to_scpi(), "SOUR:CURR:LEV?");
    }

    #[test]
    fn queries_end_with_question_mark() {
        let all = [
            PsuCommand::SelectChannel(Channel::Ch1),
            PsuCommand::QueryChannel,
            PsuCommand::SetOutput(true),
            PsuCommand::QueryOutput,
            PsuCommand::SetVoltage(2.0),
            PsuCommand::SetCurrent(1.0),
            PsuCommand::QueryVoltage,
            PsuCommand::QueryCurrent,
        ];
        for cmd in all {
            assert_eq!(cmd.is_query(), cmd.to_scpi().ends_with('?'), "{:?}", cmd);
        }
    }

    #[test]
    fn channel_parsing() {
        assert_eq!("CH3".parse::<Channel>().unwrap(), Channel::Ch3);
        assert_eq!(" ch1\n".parse::<Channel>().unwrap(), Channel::Ch1);
        assert!(matches!(
            "CH4".parse::<Channel>(),
            Err(PsuError::InvalidChannel(name)) if name == "CH4"
        ));
    }

    #[test]
    fn shutdown_sequence_covers_every_channel() {
        assert_eq!(
            all_outputs_off(),
            vec![
                "INST:SEL CH1",
                "SOUR:CHAN:OUTP:STAT OFF",
                "INST:SEL CH2",
                "SOUR:CHAN:OUTP:STAT OFF",
                "INST:SEL CH3",
                "SOUR:CHAN:OUTP:STAT OFF",
            ]
        );
    }
}
