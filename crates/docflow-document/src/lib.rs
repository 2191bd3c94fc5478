// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// docflow-document — Concrete capabilities for the Docflow pipeline.
//
// Provides PDF text-layer inspection (lopdf), OCRmyPDF preprocessing and
// command-line conversion (tokio subprocesses), and correction through an
// Ollama-compatible chat endpoint (reqwest).

pub mod convert;
pub mod correction;
pub mod ocr;
pub mod pdf;

// Re-export the primary structs so callers can use `docflow_document::PdfInspector` etc.
pub use convert::CommandConverter;
pub use correction::OllamaCorrector;
pub use ocr::OcrMyPdf;
pub use pdf::inspect::PdfInspector;
