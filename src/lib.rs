//! Unattended data acquisition from a Keithley 2000 multimeter.
//!
//! A [`session::Session`] configures the meter over a [`transport::Transport`],
//! samples it at a fixed pace into a text log and optionally keeps a gnuplot
//! window in sync with the file.

pub mod config;
pub mod datalog;
pub mod instrument;
pub mod plot;
pub mod session;
pub mod terminal;
pub mod transport;
