// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable reasons for jobs that did not complete.
//
// Every technical error is mapped to a plain message with a suggestion the
// submitting client can act on. The severity drives whether a client should
// resubmit.

use crate::error::DocflowError;

/// Severity of an error from the client's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Overload, timeout or unreachable service; resubmitting may work.
    Transient,
    /// The client must change the request or configuration.
    ActionRequired,
    /// Resubmitting the same document will fail the same way.
    Permanent,
}

/// A human-readable error with a plain message and an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    /// Whether resubmitting the job could succeed.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    /// `message suggestion`, the form stored as a job's terminal reason.
    pub fn reason(&self) -> String {
        format!("{} {}", self.message, self.suggestion)
    }
}

/// Convert a `DocflowError` into a `HumanError`.
pub fn humanize_error(err: &DocflowError) -> HumanError {
    match err {
        // -- Stage errors --
        DocflowError::StageFailure { stage, detail } => humanize_stage_failure(stage, detail),

        DocflowError::StageTimeout { stage, timeout } => HumanError {
            message: format!("The {stage} step took too long."),
            suggestion: format!(
                "It was stopped after {}s. Try a smaller document or raise the {stage} timeout.",
                timeout.as_secs()
            ),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- Job errors --
        DocflowError::DeadlineExceeded { stage } => HumanError {
            message: "The document ran out of processing time.".into(),
            suggestion: format!(
                "Processing stopped before the {stage} step. Split the document or raise max_document_timeout_secs."
            ),
            retriable: true,
            severity: Severity::Transient,
        },

        DocflowError::Cancelled => HumanError {
            message: "The job was cancelled.".into(),
            suggestion: "Submit the document again if you still need it.".into(),
            retriable: true,
            severity: Severity::ActionRequired,
        },

        DocflowError::NotFound(id) => HumanError {
            message: "That job doesn't exist.".into(),
            suggestion: format!(
                "Job {id} is unknown or its result has expired. Submit the document again."
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        DocflowError::Unavailable(detail) => HumanError {
            message: "A remote service couldn't be reached.".into(),
            suggestion: format!("Check that the service is running, then try again. ({detail})"),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- Planning / configuration --
        DocflowError::InvalidPlan(detail) => HumanError {
            message: "The processing steps for this document don't fit together.".into(),
            suggestion: format!("Check the stage configuration. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        DocflowError::Config(detail) => HumanError {
            message: "The service configuration is invalid.".into(),
            suggestion: format!("Fix the setting and restart. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        // -- Storage --
        DocflowError::Database(_) => HumanError {
            message: "The job archive had a problem.".into(),
            suggestion: "Live jobs are unaffected. Check the archive file is writable.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        DocflowError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "A required file or program couldn't be found.".into(),
                    suggestion: "Check that the OCR and conversion tools are installed and on PATH."
                        .into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "The service doesn't have permission to use that file.".into(),
                    suggestion: "Check the permissions of the data and temporary directories.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        DocflowError::Serialization(_) => HumanError {
            message: "The service had an internal data problem.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

/// Parse capability failure details into human-readable messages.
fn humanize_stage_failure(stage: &str, detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("encrypted") || lower.contains("password") {
        HumanError {
            message: "This document is password protected.".into(),
            suggestion: "Remove the password and submit the document again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("malformed") || lower.contains("invalid pdf") || lower.contains("damaged") {
        HumanError {
            message: "This document appears to be damaged.".into(),
            suggestion: "Open it locally to check it works, or export it again from the source."
                .into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else if lower.contains("unsupported") {
        HumanError {
            message: "This type of document isn't supported.".into(),
            suggestion: "Try converting the file to PDF first.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else if lower.contains("not found") || lower.contains("no such file") {
        HumanError {
            message: format!("The {stage} tool couldn't be started."),
            suggestion: "Check that it is installed and on PATH.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else {
        HumanError {
            message: format!("The {stage} step failed."),
            suggestion: format!("Try again. If this keeps happening, please report it. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}
