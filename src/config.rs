use std::{
    num::NonZeroU64,
    path::PathBuf,
    time::Duration,
};

use crate::{instrument::Mode, plot::DEFAULT_RENDERER};

pub const DEFAULT_ADDRESS: u8 = 16;
pub const MAX_ADDRESS: u8 = 30;
/// Pacing is configured in steps of 0.1 s, up to one minute.
pub const MAX_INTERVAL_TENTHS: u32 = 600;
pub const DEFAULT_INTERVAL_TENTHS: u32 = 10;
pub const DEFAULT_FLUSH_EVERY: u64 = 100;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("primary address must be 0...30, got {0}")]
    InvalidAddress(u8),

    #[error("mode must be 0...5 (0 = DCV, 1 = DCA, 2 = Ohm, 3 = Temperature, 4 = Continuity, 5 = Diode), got {0}")]
    InvalidMode(u8),

    #[error("delay must be 0...600 (0.1...60 s), got {0}")]
    InvalidInterval(u32),

    #[error("timeout must be positive, got {0}")]
    InvalidStopAfter(f64),

    #[error("flush interval must be at least one sample")]
    InvalidFlushEvery,
}

/// Everything a session needs, fixed before it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// GPIB primary address of the meter.
    pub address: u8,
    pub mode: Mode,
    /// Pause before each reading; zero means free-running.
    pub interval: Duration,
    pub blank_display: bool,
    /// Flush the log and refresh the plot every this many samples.
    pub flush_every: NonZeroU64,
    /// `None` acquires until cancelled.
    pub stop_after: Option<Duration>,
    pub comment: String,
    pub output: PathBuf,
    pub graphics: bool,
    pub renderer: PathBuf,
}

impl SessionConfig {
    pub fn new<P: Into<PathBuf>>(output: P) -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            mode: Mode::DcVoltage,
            interval: interval_from_tenths(DEFAULT_INTERVAL_TENTHS)
                .unwrap_or(Duration::from_secs(1)),
            blank_display: false,
            flush_every: NonZeroU64::new(DEFAULT_FLUSH_EVERY).unwrap_or(NonZeroU64::MIN),
            stop_after: None,
            comment: String::new(),
            output: output.into(),
            graphics: true,
            renderer: PathBuf::from(DEFAULT_RENDERER),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.address > MAX_ADDRESS {
            return Err(Error::InvalidAddress(self.address));
        }
        if self.interval > Duration::from_secs(60) {
            let tenths = (self.interval.as_millis() / 100).min(u32::MAX as u128) as u32;
            return Err(Error::InvalidInterval(tenths));
        }
        Ok(())
    }
}

pub fn mode_from_index(index: u8) -> Result<Mode, Error> {
    Mode::from_index(index).ok_or(Error::InvalidMode(index))
}

pub fn interval_from_tenths(tenths: u32) -> Result<Duration, Error> {
    if tenths > MAX_INTERVAL_TENTHS {
        return Err(Error::InvalidInterval(tenths));
    }
    Ok(Duration::from_millis(tenths as u64 * 100))
}

/// Zero minutes means no timeout.
pub fn stop_after_from_minutes(minutes: f64) -> Result<Option<Duration>, Error> {
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(Error::InvalidStopAfter(minutes));
    }
    if minutes == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(minutes * 60.0)
        .map(Some)
        .map_err(|_| Error::InvalidStopAfter(minutes))
}

pub fn flush_every(samples: u64) -> Result<NonZeroU64, Error> {
    NonZeroU64::new(samples).ok_or(Error::InvalidFlushEvery)
}

/// Keep only the first line of a comment.
pub fn first_line(text: &str) -> &str {
    text.split(['\r', '\n']).next().unwrap_or("")
}
