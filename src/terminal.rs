//! Single-key cancellation from the controlling terminal.
//!
//! [`RawTerminal`] switches the terminal to non-canonical, no-echo input for
//! as long as it lives, so a bare `q` or ESC stops the acquisition without
//! Enter. The saved attributes are put back by [`KeySource::release`] or, on
//! any other exit path, by `Drop`.

use std::{
    io::{self, Read},
    os::fd::AsFd,
};

use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios},
};

pub const QUIT_KEY: u8 = b'q';
pub const ESC: u8 = 0x1b;
/// Ctrl-C arrives as a plain byte while signal generation is off.
pub const ETX: u8 = 0x03;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input is not a terminal")]
    NotATerminal,

    #[error("terminal attribute error: {0}")]
    Termios(Errno),

    #[error("io error: {0}")]
    IoError(io::Error),
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::ENOTTY => Error::NotATerminal,
            other => Error::Termios(other),
        }
    }
}

/// Keys that end an acquisition.
pub fn is_cancel_key(key: u8) -> bool {
    matches!(key, QUIT_KEY | ESC | ETX)
}

/// Something the session can ask for a pending key without blocking.
pub trait KeySource {
    fn poll_key(&mut self) -> Option<u8>;

    /// Hand the input back. Sources with nothing to restore are just dropped.
    fn release(self) -> Result<(), Error>
    where
        Self: Sized,
    {
        Ok(())
    }
}

pub struct RawTerminal<F: AsFd + Read> {
    input: F,
    saved: Termios,
    polling: Termios,
    peeked: Option<u8>,
    released: bool,
}

impl<F: AsFd + Read> RawTerminal<F> {
    pub fn acquire(input: F) -> Result<Self, Error> {
        let saved = termios::tcgetattr(input.as_fd())?;

        let mut polling = saved.clone();
        polling
            .local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        polling.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        polling.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(input.as_fd(), SetArg::TCSANOW, &polling)?;
        debug!("terminal switched to polling input");

        Ok(Self {
            input,
            saved,
            polling,
            peeked: None,
            released: false,
        })
    }

    fn set_min_read(&mut self, count: u8) -> Result<(), Error> {
        self.polling.control_chars[SpecialCharacterIndices::VMIN as usize] = count as _;
        termios::tcsetattr(self.input.as_fd(), SetArg::TCSANOW, &self.polling)?;
        Ok(())
    }

    /// True if a key is waiting. At most one key is held back for the next
    /// [`RawTerminal::read_key`].
    pub fn key_pending(&mut self) -> Result<bool, Error> {
        if self.peeked.is_some() {
            return Ok(true);
        }

        self.set_min_read(0)?;
        let mut byte = [0u8; 1];
        let read = self.input.read(&mut byte);
        self.set_min_read(1)?;

        match read {
            Ok(1) => {
                self.peeked = Some(byte[0]);
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(false)
            }
            Err(e) => Err(Error::IoError(e)),
        }
    }

    /// Take the held-back key, or block for the next one.
    pub fn read_key(&mut self) -> Result<u8, Error> {
        if let Some(key) = self.peeked.take() {
            return Ok(key);
        }
        let mut byte = [0u8; 1];
        self.input.read_exact(&mut byte).map_err(Error::IoError)?;
        Ok(byte[0])
    }

    fn restore(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        termios::tcsetattr(self.input.as_fd(), SetArg::TCSANOW, &self.saved)?;
        debug!("terminal restored");
        Ok(())
    }
}

impl<F: AsFd + Read> KeySource for RawTerminal<F> {
    fn poll_key(&mut self) -> Option<u8> {
        match self.key_pending() {
            Ok(true) => self.read_key().ok(),
            Ok(false) => None,
            Err(e) => {
                warn!("keyboard poll failed: {}", e);
                None
            }
        }
    }

    /// Put the terminal back the way [`RawTerminal::acquire`] found it.
    fn release(mut self) -> Result<(), Error> {
        self.restore()
    }
}

impl<F: AsFd + Read> Drop for RawTerminal<F> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("could not restore terminal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::openpty;
    use std::{
        fs::File,
        io::Write,
        os::fd::OwnedFd,
        time::{Duration, Instant},
    };

    fn pty() -> (File, File, OwnedFd) {
        let pty = openpty(None, None).expect("failed to create pty");
        let observer = pty.slave.try_clone().unwrap();
        (File::from(pty.master), File::from(pty.slave), observer)
    }

    fn poll_for(terminal: &mut RawTerminal<File>, timeout: Duration) -> Option<u8> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(key) = terminal.poll_key() {
                return Some(key);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_cancel_keys() {
        assert!(is_cancel_key(b'q'));
        assert!(is_cancel_key(27));
        assert!(is_cancel_key(3));
        assert!(!is_cancel_key(b'Q'));
        assert!(!is_cancel_key(b' '));
        assert!(!is_cancel_key(b'\n'));
    }

    #[test]
    fn test_acquire_and_release_restore_attributes() {
        let (_master, slave, observer) = pty();
        let before = termios::tcgetattr(&observer).unwrap();
        assert!(before.local_flags.contains(LocalFlags::ICANON));

        let terminal = RawTerminal::acquire(slave).unwrap();
        let during = termios::tcgetattr(&observer).unwrap();
        assert!(!during.local_flags.contains(LocalFlags::ICANON));
        assert!(!during.local_flags.contains(LocalFlags::ECHO));
        assert!(!during.local_flags.contains(LocalFlags::ISIG));

        terminal.release().unwrap();
        let after = termios::tcgetattr(&observer).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.control_chars, before.control_chars);
    }

    #[test]
    fn test_drop_restores_attributes() {
        let (_master, slave, observer) = pty();
        let before = termios::tcgetattr(&observer).unwrap();
        {
            let _terminal = RawTerminal::acquire(slave).unwrap();
        }
        let after = termios::tcgetattr(&observer).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
    }

    #[test]
    fn test_poll_without_key_returns_immediately() {
        let (_master, slave, _observer) = pty();
        let mut terminal = RawTerminal::acquire(slave).unwrap();
        let start = Instant::now();
        assert_eq!(terminal.poll_key(), None);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_poll_returns_pressed_keys_in_order() {
        let (mut master, slave, _observer) = pty();
        let mut terminal = RawTerminal::acquire(slave).unwrap();

        master.write_all(b"xq").unwrap();
        assert_eq!(poll_for(&mut terminal, Duration::from_secs(2)), Some(b'x'));
        assert_eq!(poll_for(&mut terminal, Duration::from_secs(2)), Some(b'q'));
        assert_eq!(terminal.poll_key(), None);
    }

    #[test]
    fn test_pending_key_is_held_back() {
        let (mut master, slave, _observer) = pty();
        let mut terminal = RawTerminal::acquire(slave).unwrap();

        master.write_all(&[ESC]).unwrap();
        let start = Instant::now();
        while !terminal.key_pending().unwrap() {
            assert!(start.elapsed() < Duration::from_secs(2), "key never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(terminal.key_pending().unwrap());
        assert_eq!(terminal.read_key().unwrap(), ESC);
    }

    #[test]
    fn test_regular_file_is_not_a_terminal() {
        let file = tempfile::tempfile().unwrap();
        assert!(matches!(
            RawTerminal::acquire(file),
            Err(Error::NotATerminal)
        ));
    }
}
