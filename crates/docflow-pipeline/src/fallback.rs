// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fallback policy.
//
// Decides what a stage result means for the rest of the job. A pure function
// of the stage configuration and the result; it holds no state.

use docflow_core::{FailureKind, StageKind, StageOutcome, StageResult};

use crate::stage::{Fatality, StageSpec};

/// What the sequencer does after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Use the stage's output.
    Continue,
    /// Pass the stage's input through and record a degraded result.
    Fallback,
    /// Fail the job.
    Abort,
}

/// Decide how to proceed after `result` from `stage`.
///
/// Rules, in order:
/// 1. succeeded or degraded continues;
/// 2. a fatal stage aborts on any failure;
/// 3. language detection always falls back to the default languages;
/// 4. an unreachable remote service always falls back;
/// 5. otherwise fall back only if fallback-on-failure is enabled.
pub fn decide(stage: &StageSpec, result: &StageResult) -> Decision {
    match result.outcome {
        StageOutcome::Succeeded | StageOutcome::Degraded => Decision::Continue,
        StageOutcome::Failed | StageOutcome::TimedOut => match stage.fatality {
            Fatality::Fatal => Decision::Abort,
            Fatality::FallbackEligible => {
                if stage.kind == StageKind::LanguageDetection
                    || result.failure == Some(FailureKind::Unavailable)
                    || stage.fallback_on_failure
                {
                    Decision::Fallback
                } else {
                    Decision::Abort
                }
            }
        },
    }
}
