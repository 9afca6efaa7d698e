//! The acquisition loop.
//!
//! A session prepares the meter, then reads, logs and plots one sample per
//! iteration until the timeout passes, the operator presses `q`/ESC, the
//! interrupt flag is raised or an I/O error occurs. Whatever ends it, cleanup
//! runs in the same order: log footer, meter display and presets, renderer,
//! terminal.

use std::{
    fmt::{self, Display},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Local;
use log::{debug, error, info, warn};

use crate::{
    config::SessionConfig,
    datalog::{self, DataLog, Sample},
    instrument::{self, Instrument},
    plot::Plot,
    terminal::{self, KeySource, RawTerminal, is_cancel_key},
    transport::Transport,
};

pub const EXIT_FILE: u8 = 4;
pub const EXIT_INSTRUMENT: u8 = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    DataLog(#[from] datalog::Error),

    #[error("{0}")]
    Instrument(#[from] instrument::Error),
}

impl Error {
    /// Process exit status, so file problems and meter problems can be told
    /// apart.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::DataLog(_) => EXIT_FILE,
            Error::Instrument(_) => EXIT_INSTRUMENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured acquisition time has passed.
    Timeout,
    /// A cancel key was pressed.
    User,
    /// The interrupt flag was raised, e.g. by a signal handler.
    Interrupted,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Timeout => f.write_str("timeout"),
            StopReason::User => f.write_str("stopped by user"),
            StopReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub samples: u64,
    pub reason: StopReason,
}

/// Raise a session's stop flag. Returns `true` if it was already raised,
/// i.e. this is a repeated request.
pub fn request_stop(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::Relaxed)
}

/// Counters of a running session, readable from another thread.
#[derive(Clone, Default)]
pub struct Progress {
    samples: Arc<AtomicU64>,
    elapsed_ms: Arc<AtomicU64>,
    reading: Arc<Mutex<String>>,
}

impl Progress {
    fn record(&self, samples: u64, elapsed: Duration, sample: &Sample) {
        self.samples.store(samples, Ordering::Relaxed);
        self.elapsed_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        if let Ok(mut reading) = self.reading.lock() {
            *reading = sample.reading.to_string();
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.elapsed_ms.load(Ordering::Relaxed) as f64 / 60_000.0;
        let reading = self
            .reading
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();
        write!(
            f,
            "{:10} {:10.2} min    {}",
            self.samples(),
            minutes,
            reading
        )
    }
}

/// Resources released after the log is closed, in field order.
struct Held<K> {
    display_blanked: bool,
    instrument_ready: bool,
    plot: Option<Plot>,
    keys: Option<K>,
}

pub struct Session<T> {
    config: SessionConfig,
    instrument: Instrument<T>,
    stop: Arc<AtomicBool>,
    progress: Progress,
}

impl<T: Transport> Session<T> {
    pub fn new(config: SessionConfig, transport: T) -> Self {
        Self {
            config,
            instrument: Instrument::new(transport),
            stop: Arc::new(AtomicBool::new(false)),
            progress: Progress::default(),
        }
    }

    /// Raising this flag ends the session after the current sample.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Run with cancellation keys read from standard input.
    pub fn run(self) -> Result<Summary, Error> {
        self.run_with(|| RawTerminal::acquire(io::stdin()))
    }

    pub fn run_with<K, F>(mut self, acquire_keys: F) -> Result<Summary, Error>
    where
        K: KeySource,
        F: FnOnce() -> Result<K, terminal::Error>,
    {
        let keys = match acquire_keys() {
            Ok(keys) => Some(keys),
            Err(e) => {
                warn!("no keyboard cancellation ({}), use Ctrl-C to stop", e);
                None
            }
        };
        let mut held = Held {
            display_blanked: false,
            instrument_ready: false,
            plot: None,
            keys,
        };

        let outcome = match DataLog::create(&self.config.output) {
            Ok(mut log) => {
                let outcome = self
                    .prepare(&mut held, &mut log)
                    .and_then(|started| self.sample(&mut held, &mut log, started));
                close_log(log, outcome)
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &outcome {
            error!("{}", e);
        }
        self.release(held);
        outcome
    }

    fn start_plot(&self) -> Option<Plot> {
        let mut plot = match Plot::start(&self.config.renderer) {
            Ok(plot) => plot,
            Err(e) => {
                warn!("{}, will continue without graphics", e);
                return None;
            }
        };
        let title = self.config.output.to_string_lossy();
        if let Err(e) = plot.setup(&title, self.config.mode.unit_label()) {
            warn!("{}, will continue without graphics", e);
            return None;
        }
        Some(plot)
    }

    /// Everything up to the first reading. Returns the time origin.
    fn prepare<K>(&mut self, held: &mut Held<K>, log: &mut DataLog) -> Result<Instant, Error> {
        if self.config.graphics {
            held.plot = self.start_plot();
        }

        self.instrument.initialize()?;
        held.instrument_ready = true;
        let identity = self.instrument.query_identity()?;

        if self.config.blank_display {
            self.instrument.set_display(true)?;
            held.display_blanked = true;
        }
        self.instrument.configure_mode(self.config.mode)?;

        log.write_header(&identity, &self.config.comment, &Local::now())?;
        info!(
            "acquiring {} into {}",
            self.config.mode.description(),
            log.path().display()
        );
        Ok(Instant::now())
    }

    fn sample<K: KeySource>(
        &mut self,
        held: &mut Held<K>,
        log: &mut DataLog,
        started: Instant,
    ) -> Result<Summary, Error> {
        let flush_every = self.config.flush_every.get();
        let mut samples: u64 = 0;

        loop {
            if !self.config.interval.is_zero() {
                thread::sleep(self.config.interval);
            }

            let reading = self.instrument.read_once()?;
            let elapsed = started.elapsed();
            let sample = Sample::new(elapsed, reading);
            log.append(&sample)?;
            samples += 1;
            self.progress.record(samples, elapsed, &sample);
            debug!("{:10} {:10.2} min    {}", samples, sample.minutes, sample.reading);

            if samples % flush_every == 0 {
                log.flush()?;
                refresh_plot(&mut held.plot, log);
            }

            if let Some(reason) = self.stop_reason(elapsed, &mut held.keys) {
                info!("acquisition ended after {} samples: {}", samples, reason);
                return Ok(Summary { samples, reason });
            }
        }
    }

    fn stop_reason<K: KeySource>(
        &self,
        elapsed: Duration,
        keys: &mut Option<K>,
    ) -> Option<StopReason> {
        if let Some(limit) = self.config.stop_after {
            if elapsed > limit {
                return Some(StopReason::Timeout);
            }
        }
        if let Some(key) = keys.as_mut().and_then(|k| k.poll_key()) {
            if is_cancel_key(key) {
                return Some(StopReason::User);
            }
            debug!("ignoring key {:#04x}", key);
        }
        if self.stop.load(Ordering::Relaxed) {
            return Some(StopReason::Interrupted);
        }
        None
    }

    fn release<K: KeySource>(&mut self, held: Held<K>) {
        let Held {
            display_blanked,
            instrument_ready,
            plot,
            keys,
        } = held;

        if display_blanked {
            if let Err(e) = self.instrument.set_display(false) {
                warn!("could not restore the instrument display: {}", e);
            }
        }
        if instrument_ready {
            if let Err(e) = self.instrument.shutdown() {
                warn!("could not preset the instrument: {}", e);
            }
        }
        if let Some(plot) = plot {
            if let Err(e) = plot.stop() {
                warn!("{}", e);
            }
        }
        if let Some(keys) = keys {
            if let Err(e) = keys.release() {
                warn!("could not restore terminal: {}", e);
            }
        }
    }
}

fn refresh_plot(plot: &mut Option<Plot>, log: &DataLog) {
    let Some(renderer) = plot.as_mut() else {
        return;
    };
    if let Err(e) = renderer.refresh(log.path()) {
        warn!("{}, graphics disabled", e);
        if let Some(renderer) = plot.take() {
            if let Err(e) = renderer.stop() {
                warn!("{}", e);
            }
        }
    }
}

/// Footer and close. A failure here only matters if the loop itself ended
/// cleanly.
fn close_log(log: DataLog, outcome: Result<Summary, Error>) -> Result<Summary, Error> {
    match (log.finish(&Local::now()), outcome) {
        (Err(e), Ok(_)) => Err(e.into()),
        (Err(e), Err(first)) => {
            warn!("{}", e);
            Err(first)
        }
        (Ok(()), outcome) => outcome,
    }
}
