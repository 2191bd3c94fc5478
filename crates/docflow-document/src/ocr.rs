// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR preprocessing through the OCRmyPDF command-line tool.
//
// The document is written to a private temporary directory, OCRmyPDF rewrites
// it with a text layer, and the recognised text comes back through
// `--sidecar`. The child process is killed if the future is dropped, so a
// stage timeout never leaves an orphaned OCR run behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use docflow_core::capability::{OcrEngine, OcrFlags, OcrOutput, OcrRequest};
use docflow_core::error::CapabilityError;
use docflow_core::language::format_for_ocrmypdf;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Bytes of stderr kept in a failure message.
const STDERR_TAIL: usize = 512;

/// Runs `ocrmypdf` as a subprocess.
#[derive(Debug, Clone)]
pub struct OcrMyPdf {
    program: PathBuf,
}

impl OcrMyPdf {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments for one run, excluding input and output paths.
    pub fn arguments(flags: &OcrFlags, languages: &[String], sidecar: &Path) -> Vec<String> {
        let mut args = vec!["--quiet".to_string()];
        if flags.deskew {
            args.push("--deskew".into());
        }
        if flags.clean {
            args.push("--clean".into());
        }
        if flags.clean_final {
            args.push("--clean-final".into());
        }
        args.push("--optimize".into());
        args.push(flags.optimize.to_string());
        args.push("--oversample".into());
        args.push(flags.oversample.to_string());
        if let Some(mode) = flags.mode.flag() {
            args.push(mode.into());
        }
        if let Some(seconds) = flags.tesseract_timeout {
            args.push("--tesseract-timeout".into());
            args.push(seconds.to_string());
        }
        if let Some(renderer) = &flags.pdf_renderer {
            args.push("--pdf-renderer".into());
            args.push(renderer.clone());
        }
        if !languages.is_empty() {
            args.push("-l".into());
            args.push(format_for_ocrmypdf(languages));
        }
        args.push("--sidecar".into());
        args.push(sidecar.display().to_string());
        args
    }
}

impl Default for OcrMyPdf {
    fn default() -> Self {
        Self::new("ocrmypdf")
    }
}

#[async_trait]
impl OcrEngine for OcrMyPdf {
    #[instrument(skip_all, fields(name = %request.name, bytes_len = request.document.len()))]
    async fn preprocess(&self, request: OcrRequest) -> Result<OcrOutput, CapabilityError> {
        let workdir = tempfile::tempdir()
            .map_err(|err| CapabilityError::Failed(format!("cannot create work dir: {err}")))?;
        let input = workdir.path().join("input.pdf");
        let output = workdir.path().join("output.pdf");
        let sidecar = workdir.path().join("sidecar.txt");

        tokio::fs::write(&input, &request.document)
            .await
            .map_err(|err| CapabilityError::Failed(format!("cannot stage input: {err}")))?;

        let mut args = Self::arguments(&request.flags, &request.languages, &sidecar);
        args.push(input.display().to_string());
        args.push(output.display().to_string());
        debug!(program = %self.program.display(), ?args, "running OCR");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                CapabilityError::Failed(format!(
                    "cannot start {}: {err}",
                    self.program.display()
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = tail_of(&stderr, STDERR_TAIL);
            warn!(status = ?result.status.code(), "OCR exited with failure");
            return Err(CapabilityError::Failed(format!(
                "ocrmypdf exited with {}: {tail}",
                result.status
            )));
        }

        let document = tokio::fs::read(&output)
            .await
            .map_err(|err| CapabilityError::Malformed(format!("no OCR output produced: {err}")))?;
        if !document.starts_with(b"%PDF") {
            return Err(CapabilityError::Malformed("OCR output is not a PDF".into()));
        }

        let sidecar_text = match tokio::fs::read_to_string(&sidecar).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                debug!(%err, "no sidecar text");
                None
            }
        };

        info!(
            output_bytes = document.len(),
            has_text = sidecar_text.is_some(),
            "OCR preprocessing complete"
        );
        Ok(OcrOutput {
            document,
            sidecar_text,
        })
    }
}

/// Last `max` bytes of `text`, on a char boundary.
fn tail_of(text: &str, max: usize) -> &str {
    let text = text.trim();
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
