//! Hemasense: CBC anemia inference
//!
//! Command-line driver. Analyzes a CSV file of CBC results (or one record
//! given as JSON) and prints the labelled outcome as JSON on stdout.
//!
//! ```bash
//! hemasense results.csv --patient P-17 --uploaded-by dr-lee --notes "fasting"
//! hemasense --record '{"RBC":4.0,"HGB":9.5,"PCV":30,"MCV":72,"MCH":24,"MCHC":29,"TLC":6.5,"PLT":250}'
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hemasense::adapters::sanitize::SanitizingMakeWriter;
use hemasense::application::{CsvUpload, ManualEntry, UploadContext};
use hemasense::config::Settings;
use hemasense::{CbcInferenceService, CbcRecord};

const LOG_MODE_ENV: &str = "HEMASENSE_LOG_MODE";
const LOG_FILE_ENV: &str = "HEMASENSE_LOG_FILE";
const DEFAULT_LOG_FILE: &str = "hemasense.log";

enum Input {
    Csv(PathBuf),
    Record(String),
}

struct Args {
    input: Input,
    context: UploadContext,
}

fn usage() -> String {
    "Usage: hemasense (<file.csv> | --record <json>) [--patient <id>] [--uploaded-by <name>] [--notes <text>] [--no-report]"
        .to_string()
}

fn parse_args(include_reports: bool) -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut input: Option<Input> = None;
    let mut context = UploadContext {
        include_reports,
        ..UploadContext::default()
    };

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} needs a value\n{}", usage()))
        };
        match arg.as_str() {
            "--record" => input = Some(Input::Record(value("--record")?)),
            "--patient" => context.patient_id = Some(value("--patient")?),
            "--uploaded-by" => context.uploaded_by = Some(value("--uploaded-by")?),
            "--notes" => context.notes = value("--notes")?,
            "--no-report" => context.include_reports = false,
            "-h" | "--help" => bail!(usage()),
            _ if input.is_none() && !arg.starts_with("--") => {
                input = Some(Input::Csv(PathBuf::from(arg)));
            }
            _ => bail!("Unexpected argument {arg:?}\n{}", usage()),
        }
    }

    let input = input.with_context(usage)?;
    Ok(Args { input, context })
}

fn main() -> Result<ExitCode> {
    // Results go to stdout, so logs default to stderr (or a file when one is
    // configured) to keep the JSON clean.
    let log_mode = std::env::var(LOG_MODE_ENV).unwrap_or_else(|_| "auto".to_string());
    let log_file = std::env::var(LOG_FILE_ENV).ok();
    let use_file = match log_mode.as_str() {
        "file" => true,
        "stdout" | "stderr" => false,
        // auto
        _ => log_file.is_some(),
    };

    let (writer, _guard) = if use_file {
        let log_file = log_file.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        if let Some(parent) = std::path::Path::new(&log_file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("Failed to open log file {log_file:?}"))?;
        tracing_appender::non_blocking(file)
    } else if log_mode == "stdout" {
        tracing_appender::non_blocking(std::io::stdout())
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!use_file && std::io::stderr().is_terminal())
                .with_writer(SanitizingMakeWriter::new(writer)),
        )
        .init();

    let settings = Settings::from_env()?;
    let args = parse_args(settings.include_reports)?;

    tracing::info!("Starting Hemasense...");
    let service = CbcInferenceService::from_settings(&settings)?;
    service
        .initialize()
        .with_context(|| format!("Failed to load model bundle from {:?}", settings.model_dir))?;

    let outcome = match args.input {
        Input::Csv(path) => {
            let contents =
                std::fs::read(&path).with_context(|| format!("Failed to read {path:?}"))?;
            service.process_csv_upload(CsvUpload {
                filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                contents,
                context: args.context,
            })
        }
        Input::Record(json) => {
            let record: CbcRecord =
                serde_json::from_str(&json).context("--record must be a JSON object of CBC values")?;
            service.process_manual_input(ManualEntry {
                record,
                context: args.context,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if let Some(e) = &outcome.persistence_error {
        tracing::warn!("{}", e);
    }

    tracing::info!("Hemasense finished.");
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
