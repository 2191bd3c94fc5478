// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Docflow — document conversion with OCR preprocessing and language-aware
// correction.
//
// Entry point. Initialises logging, loads configuration, wires the services
// and runs one command.

mod services;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use docflow_core::error::{DocflowError, Result};
use docflow_core::human_errors::humanize_error;
use docflow_core::language::{format_for_ocrmypdf, to_tesseract_codes};
use docflow_core::{JobId, JobOptions, JobRequest, JobStatus, OcrMode, ResponseMode};
use docflow_pipeline::Submission;
use serde::Serialize;
use tracing::{error, info};

use services::app_services::AppServices;
use services::settings;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "docflow", version, about = "Convert documents with OCR preprocessing and correction")]
struct Cli {
    /// Configuration file (JSON or TOML).
    #[arg(long, global = true, env = "DOCFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert one document and print the finished job as JSON.
    Convert {
        file: PathBuf,
        /// Print the job handle first, then poll until the job finishes.
        #[arg(long = "async")]
        detach: bool,
        /// Language hints (`en`, `ara`, `arabic`, ...).
        #[arg(long = "lang", value_delimiter = ',')]
        languages: Vec<String>,
        /// Run OCR preprocessing (PDF input only).
        #[arg(long)]
        ocr: bool,
        /// Run language-aware correction of the extracted text.
        #[arg(long)]
        correct: bool,
        #[arg(long, value_enum)]
        ocr_mode: Option<ModeArg>,
        /// Also write the Markdown output to this file.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print an archived job.
    Status { id: String },
    /// Print the effective configuration.
    Config,
    /// Print the OCR language codes for the given hints.
    Languages { codes: Vec<String> },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    Force,
    Skip,
    Redo,
}

impl From<ModeArg> for OcrMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => OcrMode::Auto,
            ModeArg::Force => OcrMode::Force,
            ModeArg::Skip => OcrMode::Skip,
            ModeArg::Redo => OcrMode::Redo,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "docflow failed");
            eprintln!("{}", humanize_error(&e).reason());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Languages { codes } => {
            let mapped = to_tesseract_codes(&codes);
            println!("{}", format_for_ocrmypdf(&mapped));
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            let config = settings::load(cli.config.as_deref())?;
            print_json(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { id } => {
            let id = JobId::parse(&id)
                .ok_or_else(|| DocflowError::Config(format!("`{id}` is not a job id")))?;
            let services = AppServices::init(settings::load(cli.config.as_deref())?)?;
            let job = services.job(&id)?;
            print_json(&job)?;
            services.shutdown();
            Ok(ExitCode::SUCCESS)
        }
        Command::Convert {
            file,
            detach,
            languages,
            ocr,
            correct,
            ocr_mode,
            output,
        } => {
            let services = AppServices::init(settings::load(cli.config.as_deref())?)?;
            let options = JobOptions {
                languages,
                ocr,
                ocr_mode: ocr_mode.map(OcrMode::from),
                correction: correct,
                ..Default::default()
            };
            let mode = if detach {
                ResponseMode::Async
            } else {
                ResponseMode::Sync
            };
            let code = convert(&services, &file, options, mode, output.as_deref()).await;
            services.shutdown();
            code
        }
    }
}

async fn convert(
    services: &AppServices,
    file: &Path,
    options: JobOptions,
    mode: ResponseMode,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let document = tokio::fs::read(file).await?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    info!(document = %name, bytes = document.len(), "submitting");

    let request = JobRequest::new(name, document)
        .with_options(options)
        .with_mode(mode);
    let job = match services.submit(request).await? {
        Submission::Completed(job) => job,
        Submission::Accepted(handle) => {
            print_json(&handle)?;
            services.wait_until_finished(&handle.id, POLL_INTERVAL).await?
        }
    };
    print_json(&job)?;

    if let (Some(path), Some(result)) = (output, &job.output) {
        tokio::fs::write(path, &result.converted.markdown).await?;
        info!(path = %path.display(), "markdown written");
    }

    Ok(match job.status {
        JobStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
