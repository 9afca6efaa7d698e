//! Live chart through a gnuplot process fed on its standard input.
//!
//! The renderer re-reads the log file on every refresh, so the chart trails
//! the file by at most one flush interval.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
};

use log::{debug, warn};

pub const DEFAULT_RENDERER: &str = "gnuplot";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot launch '{}': {source}", .program.display())]
    Launch { program: PathBuf, source: io::Error },

    #[error("renderer has no command stream")]
    NoStdin,

    #[error("error sending plot command: {0}")]
    IoError(io::Error),
}

/// Single-quoted gnuplot string literal.
fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub fn write_setup<W: Write>(w: &mut W, title: &str, y_label: &str) -> io::Result<()> {
    writeln!(
        w,
        "set mouse;set mouse labels; set style data lines; set title {}",
        quote(title)
    )?;
    writeln!(
        w,
        "set grid xt; set grid yt; set xlabel 'min'; set ylabel {}",
        quote(y_label)
    )?;
    w.flush()
}

pub fn write_refresh<W: Write>(w: &mut W, data: &Path) -> io::Result<()> {
    writeln!(
        w,
        "plot {} with lines title ''",
        quote(&data.to_string_lossy())
    )?;
    w.flush()
}

pub struct Plot {
    child: Child,
    stream: Option<ChildStdin>,
}

impl Plot {
    pub fn start(program: &Path) -> Result<Plot, Error> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| Error::Launch {
                program: program.to_path_buf(),
                source,
            })?;
        let stream = match child.stdin.take() {
            Some(stream) => stream,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::NoStdin);
            }
        };
        debug!("started renderer {} (pid {})", program.display(), child.id());
        Ok(Plot {
            child,
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> Result<&mut ChildStdin, Error> {
        self.stream.as_mut().ok_or(Error::NoStdin)
    }

    pub fn setup(&mut self, title: &str, y_label: &str) -> Result<(), Error> {
        write_setup(self.stream()?, title, y_label).map_err(Error::IoError)
    }

    pub fn refresh(&mut self, data: &Path) -> Result<(), Error> {
        write_refresh(self.stream()?, data).map_err(Error::IoError)
    }

    /// Close the command stream and wait for the renderer to exit.
    pub fn stop(mut self) -> Result<ExitStatus, Error> {
        self.close()
    }

    fn close(&mut self) -> Result<ExitStatus, Error> {
        drop(self.stream.take());
        let status = self.child.wait().map_err(Error::IoError)?;
        debug!("renderer exited with {}", status);
        Ok(status)
    }
}

impl Drop for Plot {
    fn drop(&mut self) {
        if self.stream.is_some() {
            if let Err(e) = self.close() {
                warn!("renderer did not shut down cleanly: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_commands() {
        let mut out = Vec::new();
        write_setup(&mut out, "run.dat", "degrees C").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "set mouse;set mouse labels; set style data lines; set title 'run.dat'\n\
             set grid xt; set grid yt; set xlabel 'min'; set ylabel 'degrees C'\n"
        );
    }

    #[test]
    fn test_refresh_command() {
        let mut out = Vec::new();
        write_refresh(&mut out, Path::new("/tmp/run.dat")).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "plot '/tmp/run.dat' with lines title ''\n"
        );
    }

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(quote("it's"), "'it''s'");
        let mut out = Vec::new();
        write_refresh(&mut out, Path::new("bob's run.dat")).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "plot 'bob''s run.dat' with lines title ''\n"
        );
    }

    #[test]
    fn test_missing_renderer_fails_to_start() {
        let err = Plot::start(Path::new("/nonexistent/gnuplot")).err().unwrap();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[test]
    fn test_renderer_lifecycle() {
        let mut plot = Plot::start(Path::new("cat")).unwrap();
        plot.setup("run.dat", "V").unwrap();
        plot.refresh(Path::new("run.dat")).unwrap();
        let status = plot.stop().unwrap();
        assert!(status.success());
    }
}
