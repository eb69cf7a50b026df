//! Edgeflow CLI - Command-line interface for Edgeflow
//!
//! Commands:
//! - replay: Run a recorded NDJSON sample stream through a session and emit
//!   the run export
//! - calibrate: Compute a boot calibration from recorded capture batches
//! - validate: Validate an NDJSON sample stream without processing it

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use edgeflow::calibration::{CalibrationEngine, MemoryCalibrationStore};
use edgeflow::encoder::RunExporter;
use edgeflow::session::{IngestRecord, SessionAggregator, SessionConfig};
use edgeflow::types::{CalibrationState, SensorSample, SensorSide};
use edgeflow::ENGINE_VERSION;

/// Edgeflow - carving analytics engine for boot-mounted inertial sensors
#[derive(Parser)]
#[command(name = "edgeflow")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Turn boot-sensor recordings into carving telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded sample stream and emit the run export
    Replay {
        /// Input NDJSON file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Sensor mode
        #[arg(long, default_value = "single")]
        mode: Mode,

        /// Keep the full raw-sample log in the run record
        #[arg(long)]
        record_raw: bool,

        /// Calibration state JSON for the left sensor
        #[arg(long)]
        calibration_left: Option<PathBuf>,

        /// Calibration state JSON for the right sensor
        #[arg(long)]
        calibration_right: Option<PathBuf>,
    },

    /// Compute a boot calibration from recorded capture batches
    Calibrate {
        /// Stationary-hold batch (JSON array of samples)
        #[arg(long)]
        stationary: PathBuf,

        /// First forward edge-hold batch (JSON array of samples)
        #[arg(long)]
        edge_one: PathBuf,

        /// Second forward edge-hold batch (JSON array of samples)
        #[arg(long)]
        edge_two: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Validate an NDJSON sample stream
    Validate {
        /// Input NDJSON file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output the validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Single,
    Dual,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            input,
            output,
            mode,
            record_raw,
            calibration_left,
            calibration_right,
        } => run_replay(
            &input,
            &output,
            mode,
            record_raw,
            calibration_left.as_deref(),
            calibration_right.as_deref(),
        ),
        Commands::Calibrate {
            stationary,
            edge_one,
            edge_two,
            output,
        } => run_calibrate(&stationary, &edge_one, &edge_two, &output),
        Commands::Validate { input, json } => run_validate(&input, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::FAILURE
        }
    }
}

fn read_input(path: &Path) -> Result<String, String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("reading stdin: {e}"))?;
        Ok(buf)
    } else {
        fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))
    }
}

fn write_output(path: &Path, content: &str) -> Result<(), String> {
    if path.as_os_str() == "-" {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(content.as_bytes())
            .and_then(|_| stdout.write_all(b"\n"))
            .map_err(|e| format!("writing stdout: {e}"))
    } else {
        fs::write(path, content).map_err(|e| format!("writing {}: {e}", path.display()))
    }
}

/// Pretty-print when writing to an interactive terminal, compact otherwise.
fn to_terminal(path: &Path) -> bool {
    path.as_os_str() == "-" && atty::is(atty::Stream::Stdout)
}

fn load_calibration(path: Option<&Path>) -> Result<CalibrationState, String> {
    match path {
        None => Ok(CalibrationState::default()),
        Some(p) => {
            let json = fs::read_to_string(p).map_err(|e| format!("reading {}: {e}", p.display()))?;
            CalibrationState::from_json(&json).map_err(|e| format!("parsing {}: {e}", p.display()))
        }
    }
}

fn run_replay(
    input: &Path,
    output: &Path,
    mode: Mode,
    record_raw: bool,
    calibration_left: Option<&Path>,
    calibration_right: Option<&Path>,
) -> Result<(), String> {
    let mut config = match mode {
        Mode::Single => SessionConfig::single(),
        Mode::Dual => SessionConfig::dual(),
    };
    config.record_raw_samples = record_raw;

    let left = load_calibration(calibration_left)?;
    let right = load_calibration(calibration_right)?;
    let mut session = SessionAggregator::with_calibrations(config, left, right);

    let content = read_input(input)?;
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: IngestRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {}: {e}", number + 1))?;
        session.ingest_record(&record);
    }

    let windows = session.windows().len();
    let record = session.finish();
    let exporter = RunExporter::new();
    let json = if to_terminal(output) {
        exporter
            .encode_to_json(record)
            .map_err(|e| format!("encoding export: {e}"))?
    } else {
        serde_json::to_string(&exporter.encode(record))
            .map_err(|e| format!("encoding export: {e}"))?
    };
    write_output(output, &json)?;
    eprintln!("replayed session: {windows} turn window(s)");
    Ok(())
}

fn run_calibrate(
    stationary: &Path,
    edge_one: &Path,
    edge_two: &Path,
    output: &Path,
) -> Result<(), String> {
    let load_batch = |path: &Path| -> Result<Vec<SensorSample>, String> {
        let json = read_input(path)?;
        serde_json::from_str(&json).map_err(|e| format!("parsing {}: {e}", path.display()))
    };

    let stationary_batch = load_batch(stationary)?;
    let edge_one_batch = load_batch(edge_one)?;
    let edge_two_batch = load_batch(edge_two)?;

    let mut engine = CalibrationEngine::new(MemoryCalibrationStore::default());
    let side = SensorSide::Left;
    engine
        .capture_stationary(side, &stationary_batch)
        .map_err(|e| e.to_string())?;
    engine
        .capture_forward_edges(side, &edge_one_batch, &edge_two_batch)
        .map_err(|e| e.to_string())?;

    let state = engine.calibration(side);
    let json = if to_terminal(output) {
        serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?
    } else {
        state.to_json().map_err(|e| e.to_string())?
    };
    write_output(output, &json)?;
    eprintln!("calibration committed");
    Ok(())
}

fn run_validate(input: &Path, as_json: bool) -> Result<(), String> {
    let content = read_input(input)?;
    let mut valid = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<IngestRecord>(line) {
            Ok(_) => valid += 1,
            Err(e) => errors.push(format!("line {}: {e}", number + 1)),
        }
    }

    if as_json {
        let report = serde_json::json!({
            "valid_records": valid,
            "errors": errors,
        });
        println!("{report}");
    } else {
        println!("{valid} valid record(s), {} error(s)", errors.len());
        for e in &errors {
            println!("  {e}");
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} invalid record(s)", errors.len()))
    }
}
