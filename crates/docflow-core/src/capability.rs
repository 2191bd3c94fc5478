// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External capabilities the pipeline drives.
//
// Concrete engines live in `docflow-document`; the pipeline only sees these
// traits so tests can substitute fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::types::{ConvertedDocument, OcrMode, PdfInspection};

/// Resolved OCRmyPDF switches for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrFlags {
    pub deskew: bool,
    pub clean: bool,
    pub clean_final: bool,
    pub optimize: u8,
    pub oversample: u32,
    pub mode: OcrMode,
    pub tesseract_timeout: Option<u64>,
    pub pdf_renderer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub name: String,
    pub document: Arc<[u8]>,
    pub flags: OcrFlags,
    /// Tesseract codes; empty lets the engine use its own default.
    pub languages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub document: Vec<u8>,
    /// Recognised text, when the engine emits a sidecar.
    pub sidecar_text: Option<String>,
}

/// OCR preprocessing of a PDF.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn preprocess(&self, request: OcrRequest) -> Result<OcrOutput, CapabilityError>;
}

/// Language identification of extracted text.
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code of the dominant language, if one can be identified.
    async fn detect(&self, text: &str) -> Result<Option<String>, CapabilityError>;
}

#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub text: String,
    /// Tesseract code of the language being corrected.
    pub language: String,
    pub model: String,
    pub timeout: Duration,
}

/// Language-aware text correction, usually backed by a remote model.
#[async_trait]
pub trait TextCorrector: Send + Sync {
    /// Base address of the service, used as the health-tracking key.
    fn host(&self) -> &str;

    async fn correct(&self, request: CorrectionRequest) -> Result<String, CapabilityError>;
}

#[derive(Debug, Clone)]
pub struct ConversionInput {
    pub name: String,
    pub document: Arc<[u8]>,
    /// Text already recovered by earlier stages.
    pub text: Option<String>,
}

/// Conversion of a document into structured output.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, input: ConversionInput) -> Result<ConvertedDocument, CapabilityError>;
}

/// Pre-OCR analysis of a PDF's text layer.
#[async_trait]
pub trait DocumentInspector: Send + Sync {
    async fn inspect(&self, document: Arc<[u8]>) -> Result<PdfInspection, CapabilityError>;

    /// Text already embedded in the document, if any.
    async fn text_layer(&self, document: Arc<[u8]>) -> Result<Option<String>, CapabilityError>;
}
