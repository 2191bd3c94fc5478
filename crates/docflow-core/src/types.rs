// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Docflow job orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job identifier from its textual form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a job.
///
/// `queued → running → {completed, failed, deadline-exceeded, cancelled}`.
/// The four terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Admitted, waiting for a worker slot.
    Queued,
    /// A worker is driving the pipeline.
    Running,
    /// All stages finished (possibly degraded).
    Completed,
    /// A fatal stage failed.
    Failed,
    /// The job-level budget ran out.
    DeadlineExceeded,
    /// Cancellation was observed at a stage boundary.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::DeadlineExceeded | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported input document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Pdf,
    Jpeg,
    Png,
    Tiff,
    PlainText,
    /// Office formats handed straight to the conversion engine.
    Office,
    Other,
}

impl DocumentType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
            Self::PlainText => "text/plain",
            Self::Office => "application/vnd.openxmlformats-officedocument",
            Self::Other => "application/octet-stream",
        }
    }

    /// Infer document type from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tif" | "tiff" => Some(Self::Tiff),
            "txt" | "md" => Some(Self::PlainText),
            "docx" | "doc" | "xlsx" | "xls" | "pptx" | "ppt" | "odt" | "ods" => {
                Some(Self::Office)
            }
            _ => None,
        }
    }

    /// Infer the type from a file name, falling back to content sniffing.
    pub fn detect(name: &str, bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            return Self::Pdf;
        }
        name.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
            .unwrap_or(Self::Other)
    }
}

/// How OCRmyPDF should treat pages that already carry text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// Use the mode recommended by PDF inspection.
    Auto,
    /// Rasterise and OCR every page.
    Force,
    /// Leave pages with text alone.
    Skip,
    /// Replace an existing OCR text layer.
    Redo,
}

impl OcrMode {
    /// Command-line switch for this mode, if any.
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Force => Some("--force-ocr"),
            Self::Skip => Some("--skip-text"),
            Self::Redo => Some("--redo-ocr"),
        }
    }
}

/// Options the client attaches to a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Language hints, in any common notation (`en`, `ara`, `arabic`).
    pub languages: Vec<String>,
    /// Run OCR preprocessing on this document.
    pub ocr: bool,
    /// Override the configured OCR mode.
    pub ocr_mode: Option<OcrMode>,
    /// Override the configured deskew flag.
    pub deskew: Option<bool>,
    /// Override the configured clean flag.
    pub clean: Option<bool>,
    /// Run language-aware correction on extracted text.
    pub correction: bool,
}

/// Response semantics requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Block for the result, up to the configured maximum synchronous wait.
    #[default]
    Sync,
    /// Return a handle immediately.
    Async,
}

/// A document submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub document: Vec<u8>,
    pub options: JobOptions,
    pub mode: ResponseMode,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, document: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            document,
            options: JobOptions::default(),
            mode: ResponseMode::Sync,
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Reference to the input document held by the job record.
///
/// The bytes themselves travel with the running pipeline, never with the
/// job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub document_type: DocumentType,
    /// SHA-256 of the submitted bytes.
    pub hash: String,
    pub size_bytes: u64,
}

/// The kinds of stage the planner knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    LanguageDetection,
    Inspection,
    Ocr,
    Correction,
    Conversion,
}

impl StageKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::LanguageDetection => "language-detection",
            Self::Inspection => "inspection",
            Self::Ocr => "ocr",
            Self::Correction => "correction",
            Self::Conversion => "conversion",
        }
    }
}

/// Outcome of a single stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageOutcome {
    Succeeded,
    /// Finished, but with a lower-fidelity result (including fallback pass-through).
    Degraded,
    Failed,
    TimedOut,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Degraded)
    }
}

/// Why a stage did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Capability returned an error.
    Capability,
    /// Capability output could not be parsed.
    Malformed,
    /// Remote service unreachable.
    Unavailable,
    /// Wall-clock timeout.
    Timeout,
}

/// Quality assessment of an existing PDF text layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextQuality {
    Good,
    Poor,
    Unknown,
}

/// Result of inspecting a PDF before OCR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfInspection {
    pub page_count: usize,
    pub pages_with_text: usize,
    pub has_text: bool,
    /// The catalog declares `/MarkInfo /Marked true`.
    pub is_tagged: bool,
    pub needs_ocr: bool,
    pub text_quality: TextQuality,
    pub recommended_mode: OcrMode,
}

/// Structured output of the conversion engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedDocument {
    pub markdown: String,
    pub text: String,
}

/// Data a stage hands back to the sequencer.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Languages(Vec<String>),
    Inspection(PdfInspection),
    /// A rewritten document, optionally with extracted text.
    Document {
        bytes: Arc<[u8]>,
        text: Option<String>,
    },
    Text(String),
    Converted(ConvertedDocument),
}

impl StageOutput {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Languages(_) => ArtifactKind::Languages,
            Self::Inspection(_) => ArtifactKind::Inspection,
            Self::Document { .. } => ArtifactKind::Document,
            Self::Text(_) => ArtifactKind::Text,
            Self::Converted(_) => ArtifactKind::Structured,
        }
    }
}

/// Label for the output a stage produced, kept in the job log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Languages,
    Inspection,
    Document,
    Text,
    Structured,
}

/// The working state that flows from stage to stage.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub document_type: DocumentType,
    pub document: Arc<[u8]>,
    pub text: Option<String>,
    pub languages: Vec<String>,
    pub inspection: Option<PdfInspection>,
    pub converted: Option<ConvertedDocument>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, document_type: DocumentType, document: Vec<u8>) -> Self {
        let text = match document_type {
            DocumentType::PlainText => Some(String::from_utf8_lossy(&document).into_owned()),
            _ => None,
        };
        Self {
            name: name.into(),
            document_type,
            document: Arc::from(document),
            text,
            languages: Vec::new(),
            inspection: None,
            converted: None,
        }
    }

    /// Fold a stage output into the working state.
    pub fn apply(&mut self, output: StageOutput) {
        match output {
            StageOutput::Languages(languages) => self.languages = languages,
            StageOutput::Inspection(inspection) => self.inspection = Some(inspection),
            StageOutput::Document { bytes, text } => {
                self.document = bytes;
                if text.is_some() {
                    self.text = text;
                }
            }
            StageOutput::Text(text) => self.text = Some(text),
            StageOutput::Converted(converted) => self.converted = Some(converted),
        }
    }
}

/// One entry of a job's stage log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub kind: StageKind,
    pub outcome: StageOutcome,
    pub started_at: DateTime<Utc>,
    /// Monotonic offset from job creation; the log is ordered by this value.
    pub start_offset: Duration,
    pub duration: Duration,
    pub message: Option<String>,
    pub failure: Option<FailureKind>,
    /// Original outcome when the entry was degraded by fallback.
    pub fallback_from: Option<StageOutcome>,
    pub produced: Option<ArtifactKind>,
    #[serde(skip)]
    pub output: Option<StageOutput>,
}

/// Terminal payload of a job that reached `completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub converted: ConvertedDocument,
    /// OCR text after optional correction.
    pub text: Option<String>,
    pub languages: Vec<String>,
    /// SHA-256 of the document the converter received.
    pub document_hash: String,
    pub degraded: bool,
    pub degraded_stages: Vec<String>,
}

/// A complete job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub document: DocumentRef,
    pub options: JobOptions,
    pub status: JobStatus,
    pub stages: Vec<StageResult>,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Human-readable reason for any terminal state other than `completed`.
    pub reason: Option<String>,
    pub output: Option<JobOutput>,
    pub cancel_requested: bool,
}

impl Job {
    pub fn is_degraded(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.degraded)
    }
}

/// Handle returned for asynchronous submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub status: JobStatus,
    pub queue_position: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::DeadlineExceeded.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&JobStatus::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"deadline-exceeded\"");
    }

    #[test]
    fn pdf_magic_wins_over_extension() {
        assert_eq!(DocumentType::detect("scan.bin", b"%PDF-1.7"), DocumentType::Pdf);
        assert_eq!(DocumentType::detect("notes.TXT", b"hello"), DocumentType::PlainText);
        assert_eq!(DocumentType::detect("blob", b"\x00\x01"), DocumentType::Other);
    }

    #[test]
    fn plain_text_artifact_starts_with_text() {
        let artifact = Artifact::new("a.txt", DocumentType::PlainText, b"hello".to_vec());
        assert_eq!(artifact.text.as_deref(), Some("hello"));

        let pdf = Artifact::new("a.pdf", DocumentType::Pdf, b"%PDF".to_vec());
        assert!(pdf.text.is_none());
    }

    #[test]
    fn document_output_keeps_text_when_none_given() {
        let mut artifact = Artifact::new("a.txt", DocumentType::PlainText, b"old".to_vec());
        artifact.apply(StageOutput::Document {
            bytes: Arc::from(b"new".to_vec()),
            text: None,
        });
        assert_eq!(&*artifact.document, b"new");
        assert_eq!(artifact.text.as_deref(), Some("old"));
    }
}
