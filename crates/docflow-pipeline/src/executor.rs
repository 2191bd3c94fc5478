// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage executor.
//
// Runs one stage under a hard wall-clock timeout and turns every way the call
// can end into a typed `StageResult`. Nothing is retried here; retry and
// fallback belong to the caller.

use std::time::Duration;

use chrono::Utc;
use docflow_core::error::CapabilityError;
use docflow_core::{Artifact, FailureKind, StageOutcome, StageResult};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::pool::WorkerSlot;
use crate::stage::{Completion, StageSpec};

/// Executes stages for one job. Offsets in results are measured from `origin`.
#[derive(Debug, Clone, Copy)]
pub struct StageExecutor {
    origin: Instant,
}

impl StageExecutor {
    pub fn new(origin: Instant) -> Self {
        Self { origin }
    }

    /// Run `stage` against `input` with its own timeout.
    pub async fn run(&self, stage: &StageSpec, input: &Artifact) -> StageResult {
        self.run_within(stage, input, stage.timeout, None).await
    }

    /// Run `stage` with an explicit limit, holding `slot` for the duration of
    /// the call. The slot is released when this returns, timeout included.
    #[instrument(skip_all, fields(stage = %stage.name, timeout_ms = limit.as_millis() as u64))]
    pub async fn run_within(
        &self,
        stage: &StageSpec,
        input: &Artifact,
        limit: Duration,
        slot: Option<WorkerSlot>,
    ) -> StageResult {
        let _slot = slot;
        let started_at = Utc::now();
        let start = Instant::now();
        let start_offset = start.saturating_duration_since(self.origin);

        let mut result = StageResult {
            stage: stage.name.clone(),
            kind: stage.kind,
            outcome: StageOutcome::Succeeded,
            started_at,
            start_offset,
            duration: Duration::ZERO,
            message: None,
            failure: None,
            fallback_from: None,
            produced: None,
            output: None,
        };

        match tokio::time::timeout(limit, stage.runner.run(input)).await {
            Ok(Ok(Completion::Done(output))) => {
                result.produced = Some(output.kind());
                result.output = Some(output);
            }
            Ok(Ok(Completion::Degraded { output, reason })) => {
                result.outcome = StageOutcome::Degraded;
                result.produced = Some(output.kind());
                result.output = Some(output);
                result.message = Some(reason);
            }
            Ok(Ok(Completion::Skipped(reason))) => {
                result.message = Some(reason);
            }
            Ok(Err(err)) => {
                warn!(error = %err, "stage failed");
                result.outcome = StageOutcome::Failed;
                result.failure = Some(failure_kind(&err));
                result.message = Some(err.to_string());
            }
            Err(_) => {
                warn!("stage timed out");
                result.outcome = StageOutcome::TimedOut;
                result.failure = Some(FailureKind::Timeout);
                result.message = Some(format!("exceeded {}", format_limit(limit)));
            }
        }

        result.duration = start.elapsed();
        debug!(outcome = ?result.outcome, duration_ms = result.duration.as_millis() as u64, "stage finished");
        result
    }
}

fn failure_kind(err: &CapabilityError) -> FailureKind {
    match err {
        CapabilityError::Failed(_) => FailureKind::Capability,
        CapabilityError::Malformed(_) => FailureKind::Malformed,
        CapabilityError::Unavailable(_) => FailureKind::Unavailable,
    }
}

fn format_limit(limit: Duration) -> String {
    if limit.subsec_millis() == 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{}ms", limit.as_millis())
    }
}
