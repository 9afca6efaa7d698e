//! The session's text log: a commented header, one tab separated row per
//! sample and a commented stop line.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Local};
use log::debug;

use crate::instrument::Reading;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open '{}' for writing: {source}", .path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("error writing '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// One acquired value, stamped with minutes since the session started.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub minutes: f64,
    pub reading: Reading,
}

impl Sample {
    pub fn new(elapsed: Duration, reading: Reading) -> Self {
        Self {
            minutes: elapsed.as_secs_f64() / 60.0,
            reading,
        }
    }

    /// The log file row, without line terminator.
    pub fn row(&self) -> String {
        format!("{:.4}\t{}", self.minutes, self.reading)
    }
}

/// `ctime(3)` layout, which is what the header and footer lines carry.
pub fn timestamp(time: &DateTime<Local>) -> String {
    time.format("%a %b %e %H:%M:%S %Y").to_string()
}

pub struct DataLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl DataLog {
    /// Create (or truncate) the log file.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|source| Error::Create {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("opened log file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io<T>(&self, result: io::Result<T>) -> Result<T, Error> {
        result.map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn write_header(
        &mut self,
        identity: &str,
        comment: &str,
        start: &DateTime<Local>,
    ) -> Result<(), Error> {
        let header = format!(
            "# {} {}\n# Instrument: {}\n# {}\n# Acquisition start: {}\n# min\treadout\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            identity,
            comment,
            timestamp(start),
        );
        let result = self.writer.write_all(header.as_bytes());
        self.io(result)
    }

    pub fn append(&mut self, sample: &Sample) -> Result<(), Error> {
        let result = writeln!(self.writer, "{}", sample.row());
        self.io(result)?;
        self.rows += 1;
        Ok(())
    }

    /// Push buffered rows through to the disk.
    pub fn flush(&mut self) -> Result<(), Error> {
        let result = self.writer.flush();
        self.io(result)?;
        let result = self.writer.get_ref().sync_data();
        self.io(result)
    }

    /// Write the stop line and close the file.
    pub fn finish(mut self, stop: &DateTime<Local>) -> Result<(), Error> {
        let result = writeln!(self.writer, "# Acquisition stop: {}", timestamp(stop));
        self.io(result)?;
        self.flush()?;
        debug!("closed log file {} after {} rows", self.path.display(), self.rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn data_rows(content: &str) -> Vec<&str> {
        content.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn test_row_format() {
        let sample = Sample::new(Duration::from_secs(90), Reading::Numeric("+1.0E-03".into()));
        assert_eq!(sample.row(), "1.5000\t+1.0E-03");

        let sample = Sample::new(Duration::from_millis(1234), Reading::Overflow);
        assert_eq!(sample.row(), "0.0206\tOVERFLOW");
    }

    #[test]
    fn test_timestamp_layout() {
        let t = Local.with_ymd_and_hms(2017, 7, 5, 9, 3, 7).unwrap();
        assert_eq!(timestamp(&t), "Wed Jul  5 09:03:07 2017");
    }

    #[test]
    fn test_full_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.dat");
        let start = Local.with_ymd_and_hms(2025, 8, 11, 14, 0, 0).unwrap();
        let stop = Local.with_ymd_and_hms(2025, 8, 11, 14, 5, 0).unwrap();

        let mut log = DataLog::create(&path).unwrap();
        log.write_header("KEITHLEY INSTRUMENTS INC.,MODEL 2000", "bath sensor", &start)
            .unwrap();
        log.append(&Sample::new(Duration::ZERO, Reading::Numeric("+2.5E+01".into())))
            .unwrap();
        log.append(&Sample::new(Duration::from_secs(6), Reading::Overflow))
            .unwrap();
        log.finish(&stop).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let expected = format!(
            "# k2000 {}\n\
             # Instrument: KEITHLEY INSTRUMENTS INC.,MODEL 2000\n\
             # bath sensor\n\
             # Acquisition start: Mon Aug 11 14:00:00 2025\n\
             # min\treadout\n\
             0.0000\t+2.5E+01\n\
             0.1000\tOVERFLOW\n\
             # Acquisition stop: Mon Aug 11 14:05:00 2025\n",
            env!("CARGO_PKG_VERSION")
        );
        assert_eq!(content, expected);
    }

    #[test]
    fn test_flush_makes_rows_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flush.dat");
        let mut log = DataLog::create(&path).unwrap();

        for i in 0..3 {
            log.append(&Sample::new(
                Duration::from_secs(i),
                Reading::Numeric(format!("{}", i)),
            ))
            .unwrap();
        }
        log.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(data_rows(&content).len(), 3);
    }

    #[test]
    fn test_create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.dat");
        let err = DataLog::create(&path).err().unwrap();
        assert!(matches!(err, Error::Create { .. }));
        assert!(err.to_string().contains("run.dat"));
    }
}
