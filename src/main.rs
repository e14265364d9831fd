use std::io::{self, BufReader};
use std::path::Path;
use std::process::ExitCode;

use chrono::Local;
use log::{error, info};

use smarter_meter::config::{load_config, Config};
use smarter_meter::local::record::{run_sampling_loop, BackgroundSource, ShutdownToken};
use smarter_meter::local::report::{
    daily_report, export_daily_csv, print_daily_report, print_window, window_report,
};
use smarter_meter::processing::pulse_processor::PulseProcessor;
use smarter_meter::processing::sample_source::{LineSampleSource, SimulatedWheel};
use smarter_meter::sinks::log_file::PulseLogFile;
use smarter_meter::sinks::publisher::{BackgroundPublisher, ConsolePublisher, LinePublisher};
use smarter_meter::{MeterError, Result};

const USAGE: &str = "usage:
  smarter-meter record [config.yaml]
  smarter-meter simulate [config.yaml] [revolutions]
  smarter-meter report <log> [config.yaml] [out.csv]
  smarter-meter window <log> <day-offset> [config.yaml]";

fn config_from(path: Option<&String>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}

/// Samples from stdin, readings to stdout as `topic watts` lines.
///
/// Both ends run on helper threads: a stalled stdout drops readings instead
/// of stalling sampling, and Ctrl-C is honoured while stdin is idle.
fn record(args: &[String]) -> Result<()> {
    let config = config_from(args.first())?;
    let log = PulseLogFile::open(&config.sink.log_path)?;
    let publisher =
        BackgroundPublisher::spawn(LinePublisher::new(io::stdout()), config.sink.publish_queue)?;
    let mut processor = PulseProcessor::new(&config, Box::new(log), Box::new(publisher));

    let token = ShutdownToken::new();
    token.install_signal_handler()?;

    let stdin = LineSampleSource::new(BufReader::new(io::stdin()));
    let mut source = BackgroundSource::spawn(stdin, token.clone())?;
    run_sampling_loop(&mut source, &mut processor, &token);
    Ok(())
}

fn simulate(args: &[String]) -> Result<()> {
    let config = config_from(args.first())?;
    let revolutions = match args.get(1) {
        Some(n) => n
            .parse()
            .map_err(|_| MeterError::InvalidConfig(format!("invalid revolution count {:?}", n)))?,
        None => 20,
    };

    let log = PulseLogFile::open(&config.sink.log_path)?;
    let mut processor =
        PulseProcessor::new(&config, Box::new(log), Box::new(ConsolePublisher::default()));

    let start = Local::now().naive_local();
    let mut wheel = SimulatedWheel::for_power(start, 1500.0, config.tariff.turn_increment_kwh)
        .with_flicker(0.01)
        .with_revolutions(revolutions);
    info!(
        "Simulating {} revolutions at {:?} per turn",
        revolutions,
        wheel.revolution_period()
    );

    let token = ShutdownToken::new();
    token.install_signal_handler()?;
    run_sampling_loop(&mut wheel, &mut processor, &token);
    Ok(())
}

fn report(args: &[String]) -> Result<()> {
    let log_path = args
        .first()
        .ok_or_else(|| MeterError::InvalidConfig(USAGE.to_string()))?;
    let config = config_from(args.get(1))?;
    let (buckets, summary) = daily_report(log_path, &config)?;
    print_daily_report(&buckets, &summary);

    if let Some(out) = args.get(2) {
        export_daily_csv(&buckets, Path::new(out))?;
        info!("Wrote {} daily buckets to {}", buckets.len(), out);
    }
    Ok(())
}

fn window(args: &[String]) -> Result<()> {
    let (log_path, offset) = match (args.first(), args.get(1)) {
        (Some(log_path), Some(offset)) => (log_path, offset),
        _ => return Err(MeterError::InvalidConfig(USAGE.to_string())),
    };
    let day_offset: f64 = offset
        .parse()
        .map_err(|_| MeterError::InvalidConfig(format!("invalid day offset {:?}", offset)))?;
    let config = config_from(args.get(2))?;

    let stats = window_report(log_path, day_offset, &config)?;
    print_window(&stats);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        println!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    let rest = &args[2..];
    let result = match command.as_str() {
        "record" => record(rest),
        "simulate" => simulate(rest),
        "report" => report(rest),
        "window" => window(rest),
        _ => {
            println!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
