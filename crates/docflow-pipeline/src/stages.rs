// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage runners binding capabilities to the artifact flowing through a job.

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::capability::{
    ConversionInput, CorrectionRequest, DocumentConverter, DocumentInspector, LanguageDetector,
    OcrEngine, OcrFlags, OcrRequest, TextCorrector,
};
use docflow_core::config::CorrectionSettings;
use docflow_core::error::CapabilityError;
use docflow_core::language::to_tesseract_codes;
use docflow_core::{Artifact, DocumentType, OcrMode, StageOutput};
use tracing::{debug, info};

use crate::health::CorrectionHealth;
use crate::stage::{Completion, StageRunner};

/// Identify the document language from whatever text is already available.
pub struct DetectionStage {
    pub detector: Arc<dyn LanguageDetector>,
    pub inspector: Arc<dyn DocumentInspector>,
}

#[async_trait]
impl StageRunner for DetectionStage {
    async fn run(&self, input: &Artifact) -> Result<Completion, CapabilityError> {
        let text = match (&input.text, input.document_type) {
            (Some(text), _) => Some(text.clone()),
            (None, DocumentType::Pdf) => self.inspector.text_layer(input.document.clone()).await?,
            (None, _) => None,
        };
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(Completion::Skipped(
                "no text available for detection; keeping job languages".into(),
            ));
        };

        let Some(iso) = self.detector.detect(&text).await? else {
            return Ok(Completion::Degraded {
                output: StageOutput::Languages(input.languages.clone()),
                reason: "language not identified; using default languages".into(),
            });
        };
        let codes = to_tesseract_codes(&[iso.as_str()]);
        if codes.is_empty() {
            return Ok(Completion::Degraded {
                output: StageOutput::Languages(input.languages.clone()),
                reason: format!("detected language `{iso}` has no OCR model; using default languages"),
            });
        }
        info!(language = %iso, "language detected");
        Ok(Completion::Done(StageOutput::Languages(codes)))
    }
}

/// Analyse the PDF text layer to pick an OCR mode.
pub struct InspectionStage {
    pub inspector: Arc<dyn DocumentInspector>,
}

#[async_trait]
impl StageRunner for InspectionStage {
    async fn run(&self, input: &Artifact) -> Result<Completion, CapabilityError> {
        let inspection = self.inspector.inspect(input.document.clone()).await?;
        Ok(Completion::Done(StageOutput::Inspection(inspection)))
    }
}

/// OCR preprocessing of a PDF.
pub struct OcrStage {
    pub engine: Arc<dyn OcrEngine>,
    /// Flags resolved at planning time; `Auto` is settled from inspection.
    pub flags: OcrFlags,
}

impl OcrStage {
    fn flags_for(&self, input: &Artifact) -> OcrFlags {
        let mut flags = self.flags.clone();
        if flags.mode == OcrMode::Auto {
            flags.mode = input
                .inspection
                .as_ref()
                .map(|i| i.recommended_mode)
                .unwrap_or(OcrMode::Force);
        }
        if flags.mode == OcrMode::Redo {
            flags.clean_final = false;
        }
        flags
    }
}

#[async_trait]
impl StageRunner for OcrStage {
    async fn run(&self, input: &Artifact) -> Result<Completion, CapabilityError> {
        let flags = self.flags_for(input);
        debug!(mode = ?flags.mode, languages = ?input.languages, "OCR flags resolved");
        let output = self
            .engine
            .preprocess(OcrRequest {
                name: input.name.clone(),
                document: input.document.clone(),
                flags,
                languages: input.languages.clone(),
            })
            .await?;
        Ok(Completion::Done(StageOutput::Document {
            bytes: Arc::from(output.document),
            text: output.sidecar_text,
        }))
    }
}

/// Language-aware correction of extracted text.
pub struct CorrectionStage {
    pub corrector: Arc<dyn TextCorrector>,
    pub detector: Arc<dyn LanguageDetector>,
    pub health: Arc<CorrectionHealth>,
    pub settings: CorrectionSettings,
}

impl CorrectionStage {
    /// Tesseract code of the text's language if it is one worth correcting.
    async fn eligible_language(&self, text: &str, fallback: &[String]) -> Option<String> {
        let detected = match self.detector.detect(text).await {
            Ok(Some(iso)) => to_tesseract_codes(&[iso.as_str()]).into_iter().next(),
            Ok(None) => None,
            Err(err) => {
                debug!(%err, "detection for correction failed, using job languages");
                None
            }
        };
        match detected {
            Some(code) => self.settings.languages.contains(&code).then_some(code),
            None => fallback
                .iter()
                .find(|code| self.settings.languages.contains(code))
                .cloned(),
        }
    }
}

#[async_trait]
impl StageRunner for CorrectionStage {
    async fn run(&self, input: &Artifact) -> Result<Completion, CapabilityError> {
        let Some(text) = input.text.as_deref() else {
            return Ok(Completion::Skipped("no text to correct".into()));
        };
        let significant = text.chars().filter(|c| !c.is_whitespace()).count();
        if significant < self.settings.min_chars {
            return Ok(Completion::Skipped(format!(
                "text too short to correct ({significant} characters)"
            )));
        }
        let Some(language) = self.eligible_language(text, &input.languages).await else {
            return Ok(Completion::Skipped(
                "text is not in a language configured for correction".into(),
            ));
        };

        let host = self.corrector.host().to_string();
        let Some(attempt) = self.health.begin(&host) else {
            let detail = self
                .health
                .status_message(&host)
                .unwrap_or_else(|| format!("correction service at {host} is unavailable"));
            return Err(CapabilityError::Unavailable(detail));
        };

        let request = CorrectionRequest {
            text: text.to_string(),
            language,
            model: self.settings.model.clone(),
            timeout: self.settings.timeout(),
        };
        match self.corrector.correct(request).await {
            Ok(corrected) => {
                attempt.succeeded();
                Ok(Completion::Done(StageOutput::Text(corrected)))
            }
            Err(err) => {
                attempt.failed(&err.to_string());
                Err(err)
            }
        }
    }
}

/// Conversion into structured output.
pub struct ConversionStage {
    pub converter: Arc<dyn DocumentConverter>,
}

#[async_trait]
impl StageRunner for ConversionStage {
    async fn run(&self, input: &Artifact) -> Result<Completion, CapabilityError> {
        let converted = self
            .converter
            .convert(ConversionInput {
                name: input.name.clone(),
                document: input.document.clone(),
                text: input.text.clone(),
            })
            .await?;
        Ok(Completion::Done(StageOutput::Converted(converted)))
    }
}
