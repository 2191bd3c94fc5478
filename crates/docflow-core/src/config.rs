// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.
//
// Read once at process start and shared as an immutable snapshot; nothing in
// the orchestrator mutates it afterwards.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocflowError, Result};

/// Longest job budget accepted, one week.
pub const MAX_DOCUMENT_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Number of jobs that may run concurrently.
    pub workers: usize,
    /// Job-level budget, measured from admission.
    pub max_document_timeout_secs: u64,
    /// How long a synchronous caller blocks before receiving a handle instead.
    pub max_sync_wait_secs: u64,
    /// A stage is not started when less than this much job budget remains.
    pub min_stage_budget_secs: u64,
    /// How long terminal jobs stay queryable.
    pub result_retention_secs: u64,
    /// Optional SQLite file that keeps terminal job snapshots.
    pub archive_path: Option<PathBuf>,
    pub ocr: OcrSettings,
    pub detection: DetectionSettings,
    pub correction: CorrectionSettings,
    pub conversion: ConversionSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_document_timeout_secs: 3600,
            max_sync_wait_secs: 120,
            min_stage_budget_secs: 1,
            result_retention_secs: 3600,
            archive_path: None,
            ocr: OcrSettings::default(),
            detection: DetectionSettings::default(),
            correction: CorrectionSettings::default(),
            conversion: ConversionSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Job budget, capped at [`MAX_DOCUMENT_TIMEOUT_SECS`].
    pub fn max_document_timeout(&self) -> Duration {
        Duration::from_secs(self.max_document_timeout_secs.min(MAX_DOCUMENT_TIMEOUT_SECS))
    }

    pub fn max_sync_wait(&self) -> Duration {
        Duration::from_secs(self.max_sync_wait_secs)
    }

    pub fn min_stage_budget(&self) -> Duration {
        Duration::from_secs(self.min_stage_budget_secs)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    /// Reject settings the orchestrator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DocflowError::Config("workers must be at least 1".into()));
        }
        if self.max_document_timeout_secs == 0 {
            return Err(DocflowError::Config(
                "max_document_timeout_secs must be positive".into(),
            ));
        }
        if self.max_document_timeout_secs > MAX_DOCUMENT_TIMEOUT_SECS {
            return Err(DocflowError::Config(format!(
                "max_document_timeout_secs must be at most {MAX_DOCUMENT_TIMEOUT_SECS} (got {})",
                self.max_document_timeout_secs
            )));
        }
        if self.ocr.optimize > 3 {
            return Err(DocflowError::Config(format!(
                "ocr.optimize must be between 0 and 3 (got {})",
                self.ocr.optimize
            )));
        }
        if self.ocr.timeout_secs == 0
            || self.detection.timeout_secs == 0
            || self.correction.timeout_secs == 0
            || self.conversion.timeout_secs == 0
        {
            return Err(DocflowError::Config("stage timeouts must be positive".into()));
        }
        if self.ocr.default_languages.is_empty() {
            return Err(DocflowError::Config(
                "ocr.default_languages must name at least one language".into(),
            ));
        }
        if self.conversion.program.trim().is_empty() {
            return Err(DocflowError::Config("conversion.program is empty".into()));
        }
        Ok(())
    }
}

/// OCRmyPDF preprocessing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub enabled: bool,
    pub program: String,
    pub deskew: bool,
    pub clean: bool,
    /// Output optimisation level, 0..=3.
    pub optimize: u8,
    /// Oversampling DPI.
    pub oversample: u32,
    pub force_ocr: bool,
    pub skip_text: bool,
    pub redo_ocr: bool,
    pub clean_final: bool,
    pub max_file_size_mb: u64,
    pub timeout_secs: u64,
    pub tesseract_timeout_secs: Option<u64>,
    pub pdf_renderer: Option<String>,
    /// Substitute the unmodified document when OCR fails.
    pub fallback_on_failure: bool,
    /// Treat OCR failure as fatal to the job.
    pub fail_on_error: bool,
    /// Run detection and inspection concurrently.
    pub parallel_processing: bool,
    pub language_detection: bool,
    /// Languages used when detection finds nothing.
    pub default_languages: Vec<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "ocrmypdf".into(),
            deskew: true,
            clean: true,
            optimize: 1,
            oversample: 300,
            force_ocr: true,
            skip_text: false,
            redo_ocr: false,
            clean_final: false,
            max_file_size_mb: 200,
            timeout_secs: 600,
            tesseract_timeout_secs: None,
            pdf_renderer: None,
            fallback_on_failure: true,
            fail_on_error: false,
            parallel_processing: true,
            language_detection: true,
            default_languages: vec!["eng".into()],
        }
    }
}

impl OcrSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Language detection stage options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub timeout_secs: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl DetectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Language-aware correction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    pub enabled: bool,
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Correction talks to a remote model; without this it is never planned.
    pub enable_remote_services: bool,
    /// Tesseract codes of languages worth correcting.
    pub languages: Vec<String>,
    /// Minimum non-whitespace characters before correction is attempted.
    pub min_chars: usize,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "http://localhost:11434".into(),
            model: "command-r7b-arabic".into(),
            timeout_secs: 30,
            enable_remote_services: false,
            languages: vec!["ara".into()],
            min_chars: 10,
        }
    }
}

impl CorrectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether the correction stage may appear in a plan at all.
    pub fn is_available(&self) -> bool {
        self.enabled && self.enable_remote_services
    }
}

/// Conversion engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    /// Converter executable.
    pub program: String,
    /// Arguments; `{input}` and `{output_dir}` are substituted.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            program: "docling".into(),
            args: vec![
                "--to".into(),
                "md".into(),
                "--output".into(),
                "{output_dir}".into(),
                "{input}".into(),
            ],
            timeout_secs: 600,
        }
    }
}

impl ConversionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = ServiceConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DocflowError::Config(_))));
    }

    #[test]
    fn job_budget_bounded() {
        let config = ServiceConfig {
            max_document_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DocflowError::Config(_))));
        assert_eq!(
            config.max_document_timeout(),
            Duration::from_secs(MAX_DOCUMENT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn optimize_level_bounded() {
        let mut config = ServiceConfig::default();
        config.ocr.optimize = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn correction_needs_remote_services() {
        let mut settings = CorrectionSettings::default();
        assert!(!settings.is_available());
        settings.enable_remote_services = true;
        assert!(settings.is_available());
        settings.enabled = false;
        assert!(!settings.is_available());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"workers": 4, "ocr": {"enabled": true}}"#).unwrap();
        assert_eq!(config.workers, 4);
        assert!(config.ocr.enabled);
        assert_eq!(config.ocr.oversample, 300);
        assert_eq!(config.max_sync_wait_secs, 120);
    }
}
