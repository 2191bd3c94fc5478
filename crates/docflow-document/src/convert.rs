// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion through an external command-line engine.
//
// The engine is any program that reads one input file and writes a Markdown
// file into an output directory. Arguments are templated: `{input}`,
// `{output_dir}` and `{text}` (path of a file holding text recovered by
// earlier stages, empty when there is none).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use docflow_core::capability::{ConversionInput, DocumentConverter};
use docflow_core::error::CapabilityError;
use docflow_core::ConvertedDocument;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Runs a conversion command in a private working directory.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Substitute placeholders in the argument template.
    fn render_args(&self, input: &Path, output_dir: &Path, text: Option<&Path>) -> Vec<String> {
        let input = input.display().to_string();
        let output_dir = output_dir.display().to_string();
        let text = text.map(|p| p.display().to_string()).unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
                    .replace("{text}", &text)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    #[instrument(skip_all, fields(name = %input.name, bytes_len = input.document.len()))]
    async fn convert(&self, input: ConversionInput) -> Result<ConvertedDocument, CapabilityError> {
        let workdir = tempfile::tempdir()
            .map_err(|err| CapabilityError::Failed(format!("cannot create work dir: {err}")))?;
        let output_dir = workdir.path().join("out");
        tokio::fs::create_dir(&output_dir)
            .await
            .map_err(|err| CapabilityError::Failed(format!("cannot create output dir: {err}")))?;

        let input_path = workdir.path().join(safe_file_name(&input.name));
        tokio::fs::write(&input_path, &input.document)
            .await
            .map_err(|err| CapabilityError::Failed(format!("cannot stage input: {err}")))?;

        let text_path = match &input.text {
            Some(text) => {
                let path = workdir.path().join("recovered.txt");
                tokio::fs::write(&path, text)
                    .await
                    .map_err(|err| CapabilityError::Failed(format!("cannot stage text: {err}")))?;
                Some(path)
            }
            None => None,
        };

        let args = self.render_args(&input_path, &output_dir, text_path.as_deref());
        debug!(program = %self.program.display(), ?args, "running converter");

        let result = Command::new(&self.program)
            .args(&args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                CapabilityError::Failed(format!("cannot start {}: {err}", self.program.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = ?result.status.code(), "converter exited with failure");
            return Err(CapabilityError::Failed(format!(
                "converter exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        let markdown = read_markdown(&output_dir).await?;
        let text = input.text.unwrap_or_else(|| markdown.clone());
        info!(markdown_len = markdown.len(), "conversion complete");
        Ok(ConvertedDocument { markdown, text })
    }
}

/// Read the first `.md` file the engine wrote.
async fn read_markdown(output_dir: &Path) -> Result<String, CapabilityError> {
    let mut entries = tokio::fs::read_dir(output_dir)
        .await
        .map_err(|err| CapabilityError::Malformed(format!("cannot list output: {err}")))?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| CapabilityError::Malformed(format!("cannot list output: {err}")))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "md") {
            candidates.push(path);
        }
    }
    candidates.sort();
    let Some(path) = candidates.first() else {
        return Err(CapabilityError::Malformed(
            "converter produced no markdown".into(),
        ));
    };
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| CapabilityError::Malformed(format!("unreadable markdown: {err}")))
}

/// File name component of a client-supplied name.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or("document")
        .to_string()
}
