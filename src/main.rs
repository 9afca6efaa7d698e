use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use k2000::{
    config::{self, SessionConfig},
    plot::DEFAULT_RENDERER,
    session::{EXIT_INSTRUMENT, Session, request_stop},
    transport::{self, DEFAULT_TIMEOUT, PrologixTransport, SerialTransport, Transport},
};
use status_line::StatusLine;
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::{ExitCode, exit},
};

const EXIT_USAGE: u8 = 1;

fn cli() -> Command {
    Command::new("k2000")
        .about("Data acquisition using the Keithley 2000 over GPIB")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("datafile")
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .help("Output file"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_parser(value_parser!(u8))
                .default_value("16")
                .help("Use instrument at this GPIB primary address (0...30)"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_parser(value_parser!(u8))
                .default_value("0")
                .help("Measurement mode: 0 = DCV, 1 = DCA, 2 = Ohm, 3 = Temperature, 4 = Continuity, 5 = Diode"),
        )
        .arg(
            Arg::new("interval")
                .short('t')
                .long("interval")
                .value_parser(value_parser!(u32))
                .default_value("10")
                .help("Delay between measurements in 0.1 s (0...600, 0 = free-running)"),
        )
        .arg(
            Arg::new("blank-display")
                .short('d')
                .long("blank-display")
                .action(ArgAction::SetTrue)
                .help("Disable the instrument display while acquiring"),
        )
        .arg(
            Arg::new("flush-every")
                .short('w')
                .long("flush-every")
                .value_parser(value_parser!(u64))
                .default_value("100")
                .help("Force write to disk (and refresh the plot) every this many samples"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Overwrite an existing file without asking"),
        )
        .arg(
            Arg::new("stop-after")
                .short('T')
                .long("stop-after")
                .value_parser(value_parser!(f64))
                .default_value("0")
                .allow_negative_numbers(true)
                .help("Stop acquisition after this many minutes (0 = endless)"),
        )
        .arg(
            Arg::new("comment")
                .short('c')
                .long("comment")
                .value_parser(value_parser!(String))
                .help("Comment text for the file header"),
        )
        .arg(
            Arg::new("gnuplot")
                .short('g')
                .long("gnuplot")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_RENDERER)
                .help("Path to gnuplot, if it is not in PATH"),
        )
        .arg(
            Arg::new("no-graphics")
                .short('n')
                .long("no-graphics")
                .action(ArgAction::SetTrue)
                .help("Do not show a live plot"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_parser(value_parser!(String))
                .default_value("/dev/ttyUSB0")
                .help("Serial device of the GPIB controller or the instrument"),
        )
        .arg(
            Arg::new("baud")
                .long("baud")
                .value_parser(value_parser!(u32))
                .default_value("9600")
                .help("Serial baud rate"),
        )
        .arg(
            Arg::new("direct")
                .long("direct")
                .action(ArgAction::SetTrue)
                .help("Talk RS-232 to the instrument instead of through a Prologix GPIB-USB controller"),
        )
}

fn session_config(matches: &ArgMatches) -> Result<SessionConfig, config::Error> {
    let output = matches
        .get_one::<PathBuf>("datafile")
        .cloned()
        .unwrap_or_default();
    let mut config = SessionConfig::new(output);

    if let Some(&address) = matches.get_one::<u8>("address") {
        config.address = address;
    }
    if let Some(&mode) = matches.get_one::<u8>("mode") {
        config.mode = config::mode_from_index(mode)?;
    }
    if let Some(&tenths) = matches.get_one::<u32>("interval") {
        config.interval = config::interval_from_tenths(tenths)?;
    }
    if let Some(&samples) = matches.get_one::<u64>("flush-every") {
        config.flush_every = config::flush_every(samples)?;
    }
    if let Some(&minutes) = matches.get_one::<f64>("stop-after") {
        config.stop_after = config::stop_after_from_minutes(minutes)?;
    }
    if let Some(comment) = matches.get_one::<String>("comment") {
        config.comment = config::first_line(comment).to_string();
    }
    if let Some(renderer) = matches.get_one::<PathBuf>("gnuplot") {
        config.renderer = renderer.clone();
    }
    config.blank_display = matches.get_flag("blank-display");
    config.graphics = !matches.get_flag("no-graphics");

    config.validate()?;
    Ok(config)
}

fn confirm_overwrite(path: &Path) -> bool {
    eprint!("\x07\nFile '{}' exists - Overwrite? [Y/*] ", path.display());
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.chars().next(), Some('Y' | 'y'))
}

fn open_transport(matches: &ArgMatches, address: u8) -> Result<Box<dyn Transport>, transport::Error> {
    let port = matches
        .get_one::<String>("port")
        .map(String::as_str)
        .unwrap_or("/dev/ttyUSB0");
    let baud = matches.get_one::<u32>("baud").copied().unwrap_or(9600);
    let link = SerialTransport::open(port, baud, DEFAULT_TIMEOUT)?;

    if matches.get_flag("direct") {
        Ok(Box::new(link))
    } else {
        Ok(Box::new(PrologixTransport::new(link, address)?))
    }
}

fn print_settings(config: &SessionConfig) {
    println!("\n GPIB address :  {}", config.address);
    println!("  Output file :  {}", config.output.display());
    if !config.comment.is_empty() {
        println!("      Comment :  {}", config.comment);
    }
    println!("      Refresh :  {}", config.flush_every);
    if let Some(limit) = config.stop_after {
        println!("   Halt after :  {} min", limit.as_secs_f64() / 60.0);
    }
    println!("         Stop :  Press 'q' or ESC.");
    println!("\n     Count           Time      Reading");
}

fn main() -> ExitCode {
    env_logger::init();

    eprintln!(
        "\nk2000 - Data acquisition using the Keithley 2000 over GPIB. {}.",
        env!("CARGO_PKG_VERSION")
    );

    let matches = cli().get_matches();
    let config = match session_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if config.output.exists() && !matches.get_flag("force") && !confirm_overwrite(&config.output) {
        return ExitCode::from(EXIT_USAGE);
    }

    let transport = match open_transport(&matches, config.address) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: cannot open instrument link: {}", e);
            return ExitCode::from(EXIT_INSTRUMENT);
        }
    };

    print_settings(&config);

    let session = Session::new(config, transport);
    let stop = session.stop_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        if request_stop(&stop) {
            eprintln!("Killing...");
            exit(EXIT_INSTRUMENT.into());
        }
    }) {
        log::warn!("cannot install interrupt handler: {}", e);
    }

    let progress = session.progress();
    let status = StatusLine::new(progress.clone());
    let result = session.run();
    drop(status);
    eprintln!("{}", progress);

    match result {
        Ok(summary) => {
            eprintln!("\n{} samples, {}.", summary.samples, summary.reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\nError: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
