//! SleepSense CLI - Command-line interface for SleepSense
//!
//! Commands:
//! - replay: Run recorded samples through a session (streaming NDJSON)
//! - calibrate: Compute a baseline from recorded sessions and samples
//! - score: Score a completed session
//! - doctor: Diagnose configuration and environment

use chrono::FixedOffset;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use sleepsense::types::{BaselineMetrics, SensorSample, Session, SleepState};
use sleepsense::{
    BaselineCalibrator, SleepEngine, SleepError, SleepScorer, SleepSenseConfig, PRODUCER_NAME,
    SLEEPSENSE_VERSION,
};

/// SleepSense - On-device sleep detection and scoring
#[derive(Parser)]
#[command(name = "sleepsense")]
#[command(version = SLEEPSENSE_VERSION)]
#[command(about = "Detect, calibrate and score sleep from sensor samples", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay NDJSON samples through a session and emit sleep states
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Samples per batch
        #[arg(long, default_value = "30")]
        batch_size: usize,

        /// User the session belongs to
        #[arg(long, default_value = "local")]
        user_id: String,

        /// User's UTC offset in minutes, used for the session's local times
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        utc_offset_minutes: i32,

        /// Write the completed session and score to this file
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Compute a baseline from a JSON array of sessions and of samples
    Calibrate {
        #[arg(long)]
        user_id: String,

        /// Sessions file (JSON array)
        #[arg(long)]
        sessions: PathBuf,

        /// Samples file (JSON array); omit to use default thresholds
        #[arg(long)]
        samples: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Score a completed session
    Score {
        /// Session file (JSON)
        #[arg(short, long)]
        session: PathBuf,

        /// Baseline file (JSON)
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), SleepCliError> {
    let config_path = cli.config;

    match cli.command {
        Commands::Replay {
            input,
            batch_size,
            user_id,
            utc_offset_minutes,
            summary,
            flush,
        } => cmd_replay(
            load_config(config_path.as_deref())?,
            &input,
            batch_size,
            &user_id,
            utc_offset_minutes,
            summary.as_deref(),
            flush,
        ),

        Commands::Calibrate {
            user_id,
            sessions,
            samples,
            output_format,
        } => cmd_calibrate(
            &load_config(config_path.as_deref())?,
            &user_id,
            &sessions,
            samples.as_deref(),
            output_format,
        ),

        Commands::Score {
            session,
            baseline,
            output_format,
        } => cmd_score(
            &load_config(config_path.as_deref())?,
            &session,
            baseline.as_deref(),
            output_format,
        ),

        // doctor reports a broken config instead of failing on it
        Commands::Doctor { json } => cmd_doctor(config_path.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<SleepSenseConfig, SleepCliError> {
    match path {
        Some(path) => Ok(SleepSenseConfig::from_path(path)?),
        None => Ok(SleepSenseConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<Box<dyn BufRead>, SleepCliError> {
    if input.to_string_lossy() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(input)?)))
    }
}

fn cmd_replay(
    config: SleepSenseConfig,
    input: &Path,
    batch_size: usize,
    user_id: &str,
    utc_offset_minutes: i32,
    summary: Option<&Path>,
    flush: bool,
) -> Result<(), SleepCliError> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .ok_or_else(|| SleepCliError::ParseError(format!("Invalid UTC offset: {utc_offset_minutes}")))?;
    let batch_size = batch_size.max(1);

    let mut engine = SleepEngine::new(config)?;
    let mut stdout = io::stdout();
    let mut batch: Vec<SensorSample> = Vec::with_capacity(batch_size);
    let mut last_sample: Option<SensorSample> = None;

    for line in read_input(input)?.lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let sample: SensorSample = serde_json::from_str(trimmed).map_err(|e| {
            SleepCliError::ParseError(format!("Failed to parse sample: {}", e))
        })?;

        if engine.active_session().is_none() {
            engine.start_session(user_id, sample.timestamp.with_timezone(&offset))?;
        }

        last_sample = Some(sample.clone());
        batch.push(sample);

        if batch.len() >= batch_size {
            emit_state(&mut engine, &batch, &mut stdout, flush)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        emit_state(&mut engine, &batch, &mut stdout, true)?;
    }

    let last_sample = last_sample.ok_or(SleepCliError::NoSamples)?;
    let completed = engine.finish_session(last_sample.timestamp.with_timezone(&offset))?;

    if let Some(path) = summary {
        fs::write(path, serde_json::to_string_pretty(&completed)?)?;
    }

    Ok(())
}

fn emit_state(
    engine: &mut SleepEngine,
    batch: &[SensorSample],
    out: &mut impl Write,
    flush: bool,
) -> Result<(), SleepCliError> {
    if let Some(outcome) = engine.ingest(batch)? {
        let state: &SleepState = &outcome.state;
        writeln!(out, "{}", serde_json::to_string(state)?)?;
        if flush {
            out.flush()?;
        }
    }
    Ok(())
}

fn cmd_calibrate(
    config: &SleepSenseConfig,
    user_id: &str,
    sessions: &Path,
    samples: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), SleepCliError> {
    let sessions: Vec<Session> = serde_json::from_str(&fs::read_to_string(sessions)?)?;
    let samples: Vec<SensorSample> = match samples {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let calibrator = BaselineCalibrator::new(config.calibration.clone());
    let baseline = calibrator.calibrate(user_id, &sessions, &samples, chrono::Utc::now())?;

    println!("{}", format_output(&baseline, &output_format)?);
    Ok(())
}

fn cmd_score(
    config: &SleepSenseConfig,
    session: &Path,
    baseline: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), SleepCliError> {
    let session: Session = serde_json::from_str(&read_file_or_stdin(session)?)?;
    let baseline: Option<BaselineMetrics> = match baseline {
        Some(path) => Some(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => None,
    };

    let scorer = SleepScorer::new(config.scoring.clone());
    let breakdown = scorer.score(&session, baseline.as_ref())?;

    println!("{}", format_output(&breakdown, &output_format)?);
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), SleepCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "sleepsense_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("SleepSense version {}", SLEEPSENSE_VERSION),
    });

    // Check configuration file if provided
    match config_path {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Configuration file does not exist".to_string(),
        }),
        Some(path) => match SleepSenseConfig::from_path(path) {
            Ok(config) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Configuration valid (window {} samples, {} nights to calibrate)",
                    config.detector.window_size, config.calibration.required_sessions
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    // Check stdin is available (for replay)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SLEEPSENSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("SleepSense Doctor Report");
        println!("========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SleepCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_file_or_stdin(path: &Path) -> Result<String, SleepCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn format_output<T: serde::Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<String, SleepCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(value)?),
    }
}

// Error types

#[derive(Debug)]
enum SleepCliError {
    Io(io::Error),
    Sleep(SleepError),
    Json(serde_json::Error),
    NoSamples,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for SleepCliError {
    fn from(e: io::Error) -> Self {
        SleepCliError::Io(e)
    }
}

impl From<SleepError> for SleepCliError {
    fn from(e: SleepError) -> Self {
        SleepCliError::Sleep(e)
    }
}

impl From<serde_json::Error> for SleepCliError {
    fn from(e: serde_json::Error) -> Self {
        SleepCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SleepCliError> for CliError {
    fn from(e: SleepCliError) -> Self {
        match e {
            SleepCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SleepCliError::Sleep(e) => {
                let (code, hint) = match &e {
                    SleepError::InvalidInput(_) => (
                        "INVALID_INPUT",
                        Some("Completed sessions need end_at and duration_min"),
                    ),
                    SleepError::InvalidState(_) => ("INVALID_STATE", None),
                    SleepError::InsufficientData(_) => ("INSUFFICIENT_DATA", None),
                    SleepError::OutOfOrderSample { .. } => (
                        "OUT_OF_ORDER",
                        Some("Samples must be sorted by timestamp"),
                    ),
                    SleepError::Storage(_) => ("STORAGE_ERROR", None),
                    SleepError::Config(_) => (
                        "CONFIG_ERROR",
                        Some("Run `sleepsense doctor --config <file>` to check the configuration"),
                    ),
                    SleepError::JsonError(_) => ("JSON_ERROR", Some("Check JSON syntax")),
                    SleepError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            SleepCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SleepCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Provide one JSON sensor sample per line".to_string()),
            },
            SleepCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: None,
            },
            SleepCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: None,
            },
        }
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
