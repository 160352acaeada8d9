//! Line-oriented console for poking at an open instrument.
//!
//! ```text
//! >>> q *IDN?
//! [QUERY]: *IDN?
//! [REC]: B&K Precision, 9130B, 802200000000000000, 1.05-1.04
//! ```

use crate::visa::{VisaDevice, VisaDriver};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// Prompt printed before each line is read.
pub const PROMPT: &str = ">>> ";

/// Command summary printed by `h`.
pub const USAGE: &str = "\n------------------------------------------------------\n\
Command set:\n\
\tr - read from device\n\
\tw <msg> - write <msg> to device\n\
\tq <msg> - write <msg> to device and read reply\n\
\th - print this help message\n\
\texit - exit console\n\
------------------------------------------------------\n";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `r`: read one reply
    Read,
    /// `w <msg>`: write a message
    Write(String),
    /// `q <msg>`: write and read the reply
    Query(String),
    /// `h`: show usage
    Help,
    /// `exit`
    Exit,
    /// A word that is not a command.
    Unknown(String),
    /// A line without any word.
    Invalid(String),
}

/// Command word, then any separators, then the message.
#[allow(clippy::expect_used)]
static COMMAND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(\w+)[^\w\*]*(.*)").expect("console pattern is valid"));

impl ConsoleCommand {
    /// Parse a line. Only the first letter of the command word matters, so
    /// `write *RST` and `w *RST` are the same.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "exit" {
            return ConsoleCommand::Exit;
        }
        let Some(captures) = COMMAND_PATTERN.captures(line) else {
            return ConsoleCommand::Invalid(line.to_string());
        };
        let word = &captures[1];
        let message = captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        match word.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('r') => ConsoleCommand::Read,
            Some('w') => ConsoleCommand::Write(message),
            Some('q') => ConsoleCommand::Query(message),
            Some('h') => ConsoleCommand::Help,
            _ => ConsoleCommand::Unknown(word.to_string()),
        }
    }
}

fn record<W: Write>(output: &mut W, prefix: &str, message: &str) -> io::Result<()> {
    writeln!(output, "{}{}", prefix, message)
}

/// Run the console until `exit` or end of input.
///
/// Device failures are printed with the session's diagnostic and the loop
/// carries on. Only I/O errors on `input`/`output` end it early.
pub fn run<D, R, W>(
    device: &mut VisaDevice<D>,
    input: R,
    mut output: W,
    read_buffer: usize,
) -> io::Result<()>
where
    D: VisaDriver,
    R: BufRead,
    W: Write,
{
    output.write_all(USAGE.as_bytes())?;
    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes())?;
        output.flush()?;
        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            return Ok(());
        };
        let command = ConsoleCommand::parse(&line);
        debug!(?command, "Console command");

        match command {
            ConsoleCommand::Exit => return Ok(()),
            ConsoleCommand::Read => {
                record(&mut output, "[READ]", "...")?;
                match device.read_with_capacity(read_buffer) {
                    Ok(reply) => record(&mut output, "[REC]: ", reply.trim_end())?,
                    Err(_) => record(&mut output, "[ERROR]: ", &device.take_last_error())?,
                }
            }
            ConsoleCommand::Write(message) => {
                record(&mut output, "[WRITE]: ", &message)?;
                if device.write(&message).is_err() {
                    record(&mut output, "[ERROR]: ", &device.take_last_error())?;
                }
            }
            ConsoleCommand::Query(message) => {
                record(&mut output, "[QUERY]: ", &message)?;
                match device.query_with_capacity(&message, read_buffer) {
                    Ok(reply) => record(&mut output, "[REC]: ", reply.trim_end())?,
                    Err(_) => record(&mut output, "[ERROR]: ", &device.take_last_error())?,
                }
            }
            ConsoleCommand::Help => output.write_all(USAGE.as_bytes())?,
            ConsoleCommand::Invalid(line) => {
                record(&mut output, "[WARN]: ", &format!("regex match fail - {}", line))?;
                record(&mut output, "[ERROR]: ", "Invalid command!")?;
                output.write_all(USAGE.as_bytes())?;
            }
            ConsoleCommand::Unknown(word) => {
                record(&mut output, "[ERROR]: ", &format!("Command does not match: {}", word))?;
                output.write_all(USAGE.as_bytes())?;
            }
        }
    }
}
