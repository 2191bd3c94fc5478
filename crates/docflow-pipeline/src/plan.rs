// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline plans and the builder that resolves them from configuration and
// request options.
//
// Stage order: [language detection ∥ inspection] → OCR → correction →
// conversion. Stages whose preconditions do not hold are left out of the
// plan rather than run as no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use docflow_core::capability::{
    DocumentConverter, DocumentInspector, LanguageDetector, OcrEngine, OcrFlags, TextCorrector,
};
use docflow_core::config::OcrSettings;
use docflow_core::error::{DocflowError, Result};
use docflow_core::language::to_tesseract_codes;
use docflow_core::{DocumentType, JobOptions, OcrMode, ServiceConfig, StageKind};
use tracing::{debug, info};

use crate::health::CorrectionHealth;
use crate::stage::{Fatality, StageSpec};
use crate::stages::{ConversionStage, CorrectionStage, DetectionStage, InspectionStage, OcrStage};

/// Stages that run together. A group of one runs alone.
#[derive(Debug, Clone)]
pub struct StageGroup {
    pub stages: Vec<StageSpec>,
}

impl StageGroup {
    pub fn single(stage: StageSpec) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    pub fn parallel(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    pub fn is_parallel(&self) -> bool {
        self.stages.len() > 1
    }
}

/// Ordered stage groups for one job. Immutable once built.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    groups: Vec<StageGroup>,
}

impl PipelinePlan {
    /// Validate and freeze a plan.
    ///
    /// Rejects empty groups, non-parallel stages in a parallel group, the same
    /// stage name with conflicting fatality, and fatal detection or
    /// correction stages.
    pub fn new(groups: Vec<StageGroup>) -> Result<Self> {
        let mut fatality: HashMap<&str, Fatality> = HashMap::new();
        for group in &groups {
            if group.stages.is_empty() {
                return Err(DocflowError::InvalidPlan("empty stage group".into()));
            }
            for stage in &group.stages {
                if group.is_parallel() && !stage.parallel {
                    return Err(DocflowError::InvalidPlan(format!(
                        "stage `{}` cannot run in a parallel group",
                        stage.name
                    )));
                }
                if matches!(stage.kind, StageKind::LanguageDetection | StageKind::Correction)
                    && stage.fatality == Fatality::Fatal
                {
                    return Err(DocflowError::InvalidPlan(format!(
                        "stage `{}` must be fallback-eligible",
                        stage.name
                    )));
                }
                if let Some(previous) = fatality.insert(stage.name.as_str(), stage.fatality) {
                    if previous != stage.fatality {
                        return Err(DocflowError::InvalidPlan(format!(
                            "stage `{}` appears with conflicting fatality",
                            stage.name
                        )));
                    }
                }
            }
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[StageGroup] {
        &self.groups
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.stages.iter().map(|s| s.name.as_str()))
            .collect()
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.groups
            .iter()
            .any(|g| g.stages.iter().any(|s| s.kind == kind))
    }
}

/// The capabilities a plan can bind stages to.
#[derive(Clone)]
pub struct Capabilities {
    pub ocr: Arc<dyn OcrEngine>,
    pub detector: Arc<dyn LanguageDetector>,
    pub inspector: Arc<dyn DocumentInspector>,
    pub converter: Arc<dyn DocumentConverter>,
    /// Absent when no correction service is configured.
    pub corrector: Option<Arc<dyn TextCorrector>>,
}

/// Resolves a [`PipelinePlan`] per job from the configuration snapshot.
#[derive(Clone)]
pub struct PlanBuilder {
    config: Arc<ServiceConfig>,
    capabilities: Capabilities,
    health: Arc<CorrectionHealth>,
}

impl PlanBuilder {
    pub fn new(
        config: Arc<ServiceConfig>,
        capabilities: Capabilities,
        health: Arc<CorrectionHealth>,
    ) -> Self {
        Self {
            config,
            capabilities,
            health,
        }
    }

    /// Languages a job starts with: the request hints, else the defaults.
    pub fn initial_languages(&self, options: &JobOptions) -> Vec<String> {
        let hints = to_tesseract_codes(&options.languages);
        if hints.is_empty() {
            self.default_languages()
        } else {
            hints
        }
    }

    fn default_languages(&self) -> Vec<String> {
        let defaults = to_tesseract_codes(&self.config.ocr.default_languages);
        if defaults.is_empty() {
            vec!["eng".to_string()]
        } else {
            defaults
        }
    }

    /// OCR mode before inspection: request override, then configuration.
    pub fn planned_mode(&self, options: &JobOptions) -> OcrMode {
        options
            .ocr_mode
            .unwrap_or_else(|| configured_mode(&self.config.ocr))
    }

    /// Whether OCR applies to this document, with the reason when it does not.
    fn ocr_gate(&self, document_type: DocumentType, size_bytes: u64, options: &JobOptions) -> std::result::Result<(), &'static str> {
        let ocr = &self.config.ocr;
        if !ocr.enabled {
            return Err("OCR preprocessing disabled in configuration");
        }
        if !options.ocr {
            return Err("OCR not requested");
        }
        if document_type != DocumentType::Pdf {
            return Err("OCR preprocessing only applies to PDFs");
        }
        if size_bytes > ocr.max_file_size_bytes() {
            return Err("document exceeds OCR size limit");
        }
        Ok(())
    }

    fn correction_planned(&self, options: &JobOptions) -> bool {
        options.correction
            && self.config.correction.is_available()
            && self.capabilities.corrector.is_some()
    }

    pub fn build(
        &self,
        document_type: DocumentType,
        size_bytes: u64,
        options: &JobOptions,
    ) -> Result<PipelinePlan> {
        let config = &self.config;
        let min_timeout = config.min_stage_budget();

        let ocr_planned = match self.ocr_gate(document_type, size_bytes, options) {
            Ok(()) => true,
            Err(reason) => {
                debug!(reason, "OCR left out of plan");
                false
            }
        };
        let correction_planned = self.correction_planned(options);
        if options.correction && !correction_planned {
            info!("correction requested but remote correction is not enabled, skipping");
        }
        let mode = self.planned_mode(options);

        let mut analysis = Vec::new();
        let hints_given = !to_tesseract_codes(&options.languages).is_empty();
        if (ocr_planned || correction_planned) && !hints_given && config.ocr.language_detection {
            analysis.push(
                StageSpec::new(
                    StageKind::LanguageDetection,
                    Arc::new(DetectionStage {
                        detector: self.capabilities.detector.clone(),
                        inspector: self.capabilities.inspector.clone(),
                    }),
                    config.detection.timeout(),
                )
                .with_min_timeout(min_timeout)
                .fallback(true)
                .parallel(),
            );
        }
        if ocr_planned && mode == OcrMode::Auto {
            analysis.push(
                StageSpec::new(
                    StageKind::Inspection,
                    Arc::new(InspectionStage {
                        inspector: self.capabilities.inspector.clone(),
                    }),
                    config.detection.timeout(),
                )
                .with_min_timeout(min_timeout)
                .fallback(true)
                .parallel(),
            );
        }

        let mut groups = Vec::new();
        if config.ocr.parallel_processing && analysis.len() > 1 {
            groups.push(StageGroup::parallel(analysis));
        } else {
            groups.extend(analysis.into_iter().map(StageGroup::single));
        }

        if ocr_planned {
            let ocr = &config.ocr;
            let flags = OcrFlags {
                deskew: options.deskew.unwrap_or(ocr.deskew),
                clean: options.clean.unwrap_or(ocr.clean),
                clean_final: ocr.clean_final && mode != OcrMode::Redo,
                optimize: ocr.optimize,
                oversample: ocr.oversample,
                mode,
                tesseract_timeout: ocr.tesseract_timeout_secs,
                pdf_renderer: ocr.pdf_renderer.clone(),
            };
            let stage = StageSpec::new(
                StageKind::Ocr,
                Arc::new(OcrStage {
                    engine: self.capabilities.ocr.clone(),
                    flags,
                }),
                ocr.timeout(),
            )
            .with_min_timeout(min_timeout);
            let stage = if ocr.fail_on_error {
                stage.fatal()
            } else {
                stage.fallback(ocr.fallback_on_failure)
            };
            groups.push(StageGroup::single(stage));
        }

        if correction_planned {
            if let Some(corrector) = &self.capabilities.corrector {
                groups.push(StageGroup::single(
                    StageSpec::new(
                        StageKind::Correction,
                        Arc::new(CorrectionStage {
                            corrector: corrector.clone(),
                            detector: self.capabilities.detector.clone(),
                            health: self.health.clone(),
                            settings: config.correction.clone(),
                        }),
                        config.correction.timeout(),
                    )
                    .with_min_timeout(min_timeout)
                    .fallback(true),
                ));
            }
        }

        groups.push(StageGroup::single(
            StageSpec::new(
                StageKind::Conversion,
                Arc::new(ConversionStage {
                    converter: self.capabilities.converter.clone(),
                }),
                config.conversion.timeout(),
            )
            .with_min_timeout(min_timeout)
            .fatal(),
        ));

        let plan = PipelinePlan::new(groups)?;
        debug!(stages = ?plan.stage_names(), "pipeline planned");
        Ok(plan)
    }
}

/// `force_ocr` wins over `redo_ocr`, which wins over `skip_text`; with none
/// set the mode comes from inspection.
fn configured_mode(ocr: &OcrSettings) -> OcrMode {
    if ocr.force_ocr {
        OcrMode::Force
    } else if ocr.redo_ocr {
        OcrMode::Redo
    } else if ocr.skip_text {
        OcrMode::Skip
    } else {
        OcrMode::Auto
    }
}
