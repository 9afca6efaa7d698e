//! Keithley 2000 command vocabulary on top of a [`Transport`].

use std::fmt::{self, Display};

use log::{debug, info};

use crate::transport::{self, Transport};

/// Literal the meter sends when the input is out of range.
pub const OVERFLOW_SENTINEL: &str = "+9.9E37";

pub mod cmds {
    pub const INIT: &str = "*rst;*cls;:form:elem read,unit;*opc";
    pub const IDN: &str = "*idn?";
    pub const READ: &str = ":read?";
    pub const DISPLAY_MESSAGE: &str = ":disp:text:data '-ACQUIRING- ';:disp:text:stat 1";
    pub const DISPLAY_RESTORE: &str = ":disp:text:stat 0";
    pub const PRESET: &str = "syst:pres";
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error sending '{command}': {source}")]
    Write {
        command: String,
        source: transport::Error,
    },

    #[error("error reading response to '{command}': {source}")]
    Read {
        command: String,
        source: transport::Error,
    },
}

/// Measurement function of the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    DcVoltage,
    DcCurrent,
    Resistance,
    Temperature,
    Continuity,
    Diode,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::DcVoltage,
        Mode::DcCurrent,
        Mode::Resistance,
        Mode::Temperature,
        Mode::Continuity,
        Mode::Diode,
    ];

    /// Mode for the numeric index used on the command line.
    pub fn from_index(index: u8) -> Option<Mode> {
        Self::ALL.get(index as usize).copied()
    }

    /// Argument of `:func`.
    pub fn function(self) -> &'static str {
        match self {
            Mode::DcVoltage => "volt:dc",
            Mode::DcCurrent => "curr:dc",
            Mode::Resistance => "res",
            Mode::Temperature => "temp",
            Mode::Continuity => "cont",
            Mode::Diode => "diod",
        }
    }

    /// Y axis label for the live plot.
    pub fn unit_label(self) -> &'static str {
        match self {
            Mode::DcVoltage => "V",
            Mode::DcCurrent => "mA",
            Mode::Resistance => "Ohm",
            Mode::Temperature => "degrees C",
            Mode::Continuity => "Ohm",
            Mode::Diode => "mV",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Mode::DcVoltage => "DCV",
            Mode::DcCurrent => "DCA",
            Mode::Resistance => "Ohm",
            Mode::Temperature => "Temperature",
            Mode::Continuity => "Continuity",
            Mode::Diode => "Diode",
        }
    }
}

/// One reading as the meter reported it. Numeric text is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    Numeric(String),
    Overflow,
}

impl Reading {
    pub fn from_response(text: &str) -> Reading {
        if text == OVERFLOW_SENTINEL {
            Reading::Overflow
        } else {
            Reading::Numeric(text.to_string())
        }
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Numeric(text) => f.write_str(text),
            Reading::Overflow => f.write_str("OVERFLOW"),
        }
    }
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// A connected meter.
pub struct Instrument<T> {
    transport: T,
}

impl<T: Transport> Instrument<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn send(&mut self, command: &str) -> Result<(), Error> {
        debug!("-> {}", command);
        self.transport
            .write_line(command)
            .map_err(|source| Error::Write {
                command: command.to_string(),
                source,
            })
    }

    fn query(&mut self, command: &str) -> Result<String, Error> {
        self.send(command)?;
        let line = self.transport.read_line().map_err(|source| Error::Read {
            command: command.to_string(),
            source,
        })?;
        let text = strip_terminator(&line).to_string();
        debug!("<- {}", text);
        Ok(text)
    }

    /// Reset, clear status and select the `read,unit` response format.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.send(cmds::INIT)
    }

    pub fn query_identity(&mut self) -> Result<String, Error> {
        let identity = self.query(cmds::IDN)?;
        info!("instrument: {}", identity);
        Ok(identity)
    }

    /// Select the measurement function and start continuous acquisition.
    pub fn configure_mode(&mut self, mode: Mode) -> Result<(), Error> {
        self.send(&format!(":func '{}';:init;*opc", mode.function()))
    }

    pub fn set_display(&mut self, blank: bool) -> Result<(), Error> {
        if blank {
            self.send(cmds::DISPLAY_MESSAGE)
        } else {
            self.send(cmds::DISPLAY_RESTORE)
        }
    }

    pub fn read_once(&mut self) -> Result<Reading, Error> {
        let text = self.query(cmds::READ)?;
        Ok(Reading::from_response(&text))
    }

    /// Return the meter to its power-on defaults.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.send(cmds::PRESET)
    }
}
