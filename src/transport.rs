//! Line-oriented links to the instrument.
//!
//! The acquisition core only needs to send a command and read back one
//! response line. [`LineTransport`] does that over any byte stream (normally a
//! serial port talking RS-232 to the meter), and [`PrologixTransport`] puts a
//! Prologix GPIB-USB controller in between so the meter can stay on its GPIB
//! address.

use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use log::debug;
use serialport::SerialPort;

/// How long a single response may take before the exchange is abandoned.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

const ESC: u8 = 0x1b;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(io::Error),

    #[error("serial port error: {0}")]
    SerialError(serialport::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("link closed by peer")]
    Closed,
}

/// Capability to exchange text commands with the instrument.
pub trait Transport {
    /// Send one command; the transport appends its own terminator.
    fn write_line(&mut self, command: &str) -> Result<(), Error>;

    /// Read one response line, terminator included.
    fn read_line(&mut self) -> Result<String, Error>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, command: &str) -> Result<(), Error> {
        (**self).write_line(command)
    }

    fn read_line(&mut self) -> Result<String, Error> {
        (**self).read_line()
    }
}

/// LF-terminated commands and responses over a byte stream.
pub struct LineTransport<P> {
    port: P,
    timeout: Duration,
}

pub type SerialTransport = LineTransport<Box<dyn SerialPort>>;

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, Error> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(Error::SerialError)?;
        debug!("opened {} at {} baud", path, baud_rate);
        Ok(LineTransport::new(port, timeout))
    }
}

impl<P: Read + Write> LineTransport<P> {
    pub fn new(port: P, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.port.write_all(bytes).map_err(Error::IoError)?;
        self.port.flush().map_err(Error::IoError)
    }
}

impl<P: Read + Write> Transport for LineTransport<P> {
    fn write_line(&mut self, command: &str) -> Result<(), Error> {
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(b'\n');
        self.write_raw(&bytes)
    }

    fn read_line(&mut self) -> Result<String, Error> {
        let mut received = Vec::new();
        let mut byte = [0u8; 1];
        let start = Instant::now();

        loop {
            if start.elapsed() > self.timeout {
                return Err(Error::Timeout(self.timeout));
            }

            match self.port.read(&mut byte) {
                Ok(1) => {
                    received.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Ok(_) => return Err(Error::Closed),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::IoError(e)),
            }
        }

        Ok(String::from_utf8_lossy(&received).into_owned())
    }
}

/// GPIB access through a Prologix GPIB-USB controller in controller mode.
pub struct PrologixTransport<P> {
    link: LineTransport<P>,
}

impl<P: Read + Write> PrologixTransport<P> {
    /// Put the controller into controller mode and address the instrument.
    pub fn new(link: LineTransport<P>, address: u8) -> Result<Self, Error> {
        let mut transport = Self { link };
        for setup in [
            "++mode 1".to_string(),
            format!("++addr {}", address),
            "++auto 0".to_string(),
            "++eoi 1".to_string(),
            "++eos 2".to_string(),
        ] {
            transport.link.write_line(&setup)?;
        }
        debug!("prologix controller addressing GPIB device {}", address);
        Ok(transport)
    }
}

/// Escape bytes the controller would otherwise interpret itself.
fn escape(command: &str) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(command.len() + 1);
    for &b in command.as_bytes() {
        if matches!(b, b'\r' | b'\n' | ESC | b'+') {
            escaped.push(ESC);
        }
        escaped.push(b);
    }
    escaped
}

impl<P: Read + Write> Transport for PrologixTransport<P> {
    fn write_line(&mut self, command: &str) -> Result<(), Error> {
        let mut bytes = escape(command);
        bytes.push(b'\n');
        self.link.write_raw(&bytes)
    }

    fn read_line(&mut self) -> Result<String, Error> {
        self.link.write_line("++read eoi")?;
        self.link.read_line()
    }
}
