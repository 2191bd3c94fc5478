// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Deterministic fake capabilities.
//
// Each fake can succeed, fail, report the service unavailable, or sleep
// before answering. Sleeps use tokio time, so tests running on a paused
// clock cover multi-minute timeouts instantly.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docflow_core::capability::{
    ConversionInput, CorrectionRequest, DocumentConverter, DocumentInspector, LanguageDetector,
    OcrEngine, OcrOutput, OcrRequest, TextCorrector,
};
use docflow_core::error::CapabilityError;
use docflow_core::{Artifact, ConvertedDocument, OcrMode, PdfInspection, StageOutput, TextQuality};

use crate::plan::Capabilities;
use crate::stage::{Completion, StageRunner};

/// How a fake answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    Malformed(String),
    Unavailable(String),
}

impl Behavior {
    fn result<T>(&self, ok: T) -> Result<T, CapabilityError> {
        match self {
            Self::Succeed => Ok(ok),
            Self::Fail(msg) => Err(CapabilityError::Failed(msg.clone())),
            Self::Malformed(msg) => Err(CapabilityError::Malformed(msg.clone())),
            Self::Unavailable(msg) => Err(CapabilityError::Unavailable(msg.clone())),
        }
    }
}

/// Shared call counter.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A stage runner with scripted behaviour.
#[derive(Debug, Clone)]
pub struct FakeRunner {
    pub behavior: Behavior,
    pub delay: Duration,
    pub output: Option<StageOutput>,
    pub calls: Calls,
}

impl FakeRunner {
    pub fn succeeding(output: StageOutput) -> Self {
        Self {
            behavior: Behavior::Succeed,
            delay: Duration::ZERO,
            output: Some(output),
            calls: Calls::default(),
        }
    }

    pub fn skipping() -> Self {
        Self {
            behavior: Behavior::Succeed,
            delay: Duration::ZERO,
            output: None,
            calls: Calls::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            behavior: Behavior::Fail(message.into()),
            delay: Duration::ZERO,
            output: None,
            calls: Calls::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            behavior: Behavior::Unavailable("connection refused".into()),
            delay: Duration::ZERO,
            output: None,
            calls: Calls::default(),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl StageRunner for FakeRunner {
    async fn run(&self, _input: &Artifact) -> Result<Completion, CapabilityError> {
        self.calls.hit();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let completion = match &self.output {
            Some(output) => Completion::Done(output.clone()),
            None => Completion::Skipped("nothing to do".into()),
        };
        self.behavior.result(completion)
    }
}

/// OCR engine returning a fixed document and sidecar text.
#[derive(Debug, Clone)]
pub struct FakeOcr {
    pub behavior: Behavior,
    pub delay: Duration,
    pub document: Vec<u8>,
    pub text: Option<String>,
    pub calls: Calls,
    pub last_mode: Arc<std::sync::Mutex<Option<OcrMode>>>,
}

impl FakeOcr {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            document: b"%PDF-1.7 ocr".to_vec(),
            text: Some("recognised text".into()),
            calls: Calls::default(),
            last_mode: Arc::default(),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn last_mode(&self) -> Option<OcrMode> {
        *self
            .last_mode
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn preprocess(&self, request: OcrRequest) -> Result<OcrOutput, CapabilityError> {
        self.calls.hit();
        *self
            .last_mode
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(request.flags.mode);
        tokio::time::sleep(self.delay).await;
        self.behavior.result(OcrOutput {
            document: self.document.clone(),
            sidecar_text: self.text.clone(),
        })
    }
}

/// Detector answering a fixed ISO code.
#[derive(Debug, Clone)]
pub struct FakeDetector {
    pub behavior: Behavior,
    pub language: Option<String>,
    pub calls: Calls,
}

impl FakeDetector {
    pub fn answering(language: Option<&str>) -> Self {
        Self {
            behavior: Behavior::Succeed,
            language: language.map(str::to_string),
            calls: Calls::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail("detector crashed".into()),
            language: None,
            calls: Calls::default(),
        }
    }
}

#[async_trait]
impl LanguageDetector for FakeDetector {
    async fn detect(&self, _text: &str) -> Result<Option<String>, CapabilityError> {
        self.calls.hit();
        self.behavior.result(self.language.clone())
    }
}

/// Inspector returning a fixed analysis and text layer.
#[derive(Debug, Clone)]
pub struct FakeInspector {
    pub behavior: Behavior,
    pub inspection: PdfInspection,
    pub text: Option<String>,
    pub calls: Calls,
}

impl FakeInspector {
    pub fn recommending(mode: OcrMode) -> Self {
        Self {
            behavior: Behavior::Succeed,
            inspection: PdfInspection {
                page_count: 1,
                pages_with_text: 0,
                has_text: false,
                is_tagged: false,
                needs_ocr: mode != OcrMode::Skip,
                text_quality: TextQuality::Unknown,
                recommended_mode: mode,
            },
            text: None,
            calls: Calls::default(),
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.into());
        self
    }
}

#[async_trait]
impl DocumentInspector for FakeInspector {
    async fn inspect(&self, _document: Arc<[u8]>) -> Result<PdfInspection, CapabilityError> {
        self.calls.hit();
        self.behavior.result(self.inspection.clone())
    }

    async fn text_layer(&self, _document: Arc<[u8]>) -> Result<Option<String>, CapabilityError> {
        self.behavior.result(self.text.clone())
    }
}

/// Converter echoing its input text as Markdown.
#[derive(Debug, Clone)]
pub struct FakeConverter {
    pub behavior: Behavior,
    pub delay: Duration,
    pub calls: Calls,
    pub last_document: Arc<std::sync::Mutex<Option<Vec<u8>>>>,
}

impl FakeConverter {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            calls: Calls::default(),
            last_document: Arc::default(),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Bytes of the last document the converter received.
    pub fn last_document(&self) -> Option<Vec<u8>> {
        self.last_document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn convert(&self, input: ConversionInput) -> Result<ConvertedDocument, CapabilityError> {
        self.calls.hit();
        *self
            .last_document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(input.document.to_vec());
        tokio::time::sleep(self.delay).await;
        let text = input.text.unwrap_or_default();
        self.behavior.result(ConvertedDocument {
            markdown: format!("# {}\n\n{text}", input.name),
            text,
        })
    }
}

/// Corrector upper-casing its input.
#[derive(Debug, Clone)]
pub struct FakeCorrector {
    pub behavior: Behavior,
    pub host: String,
    pub delay: Duration,
    pub calls: Calls,
}

impl FakeCorrector {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            host: "http://corrector.test".into(),
            delay: Duration::ZERO,
            calls: Calls::default(),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TextCorrector for FakeCorrector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn correct(&self, request: CorrectionRequest) -> Result<String, CapabilityError> {
        self.calls.hit();
        tokio::time::sleep(self.delay).await;
        self.behavior.result(request.text.to_uppercase())
    }
}

/// Handles onto every fake wired into a [`Capabilities`] set.
#[derive(Debug, Clone)]
pub struct Fakes {
    pub ocr: FakeOcr,
    pub detector: FakeDetector,
    pub inspector: FakeInspector,
    pub converter: FakeConverter,
    pub corrector: FakeCorrector,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            ocr: FakeOcr::new(Behavior::Succeed),
            detector: FakeDetector::answering(Some("en")),
            inspector: FakeInspector::recommending(OcrMode::Force),
            converter: FakeConverter::new(Behavior::Succeed),
            corrector: FakeCorrector::new(Behavior::Succeed),
        }
    }
}

impl Fakes {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            ocr: Arc::new(self.ocr.clone()),
            detector: Arc::new(self.detector.clone()),
            inspector: Arc::new(self.inspector.clone()),
            converter: Arc::new(self.converter.clone()),
            corrector: Some(Arc::new(self.corrector.clone())),
        }
    }
}

/// Minimal bytes recognised as a PDF.
pub const PDF_BYTES: &[u8] = b"%PDF-1.4 scanned";
