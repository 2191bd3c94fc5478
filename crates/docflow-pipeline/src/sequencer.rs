// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline sequencer.
//
// Drives one job through its plan. Between stage groups it checks for
// cancellation and for enough remaining job budget, clips each stage's
// timeout to that budget, runs the group, and applies the fallback decision
// for every result in start order.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::error::{DocflowError, Result};
use docflow_core::human_errors::humanize_error;
use docflow_core::integrity::hash_bytes;
use docflow_core::{Artifact, Job, JobId, JobOutput, JobStatus, StageOutcome, StageResult};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::executor::StageExecutor;
use crate::fallback::{Decision, decide};
use crate::lifecycle::LifecycleManager;
use crate::plan::PipelinePlan;
use crate::pool::{WorkerPool, WorkerSlot};
use crate::stage::StageSpec;

pub struct Sequencer {
    lifecycle: Arc<LifecycleManager>,
    pool: WorkerPool,
}

impl Sequencer {
    pub fn new(lifecycle: Arc<LifecycleManager>, pool: WorkerPool) -> Self {
        Self { lifecycle, pool }
    }

    /// Run `plan` for job `id` starting from `artifact`.
    ///
    /// `slot` is the worker slot owned by the job; it is held until this
    /// returns. The returned record is terminal unless the job had already
    /// left `queued` before this was called.
    #[instrument(skip_all, fields(job_id = %id))]
    pub async fn execute(
        &self,
        id: JobId,
        plan: &PipelinePlan,
        mut artifact: Artifact,
        slot: Option<WorkerSlot>,
    ) -> Result<Job> {
        let _slot = slot;
        let context = self.lifecycle.context(&id).ok_or(DocflowError::NotFound(id))?;
        if !self.lifecycle.mark_running(&id)? {
            return self.lifecycle.get(&id);
        }
        let executor = StageExecutor::new(context.origin);
        let mut degraded_stages = Vec::new();

        for group in plan.groups() {
            if context.cancel.is_cancelled() {
                info!("cancellation observed at stage boundary");
                let reason = humanize_error(&DocflowError::Cancelled).reason();
                return self
                    .lifecycle
                    .finish(&id, JobStatus::Cancelled, Some(reason), None);
            }

            let remaining = context.deadline.saturating_duration_since(Instant::now());
            if let Some(stage) = group
                .stages
                .iter()
                .find(|s| remaining.is_zero() || remaining < s.min_timeout)
            {
                warn!(stage = %stage.name, remaining_ms = remaining.as_millis() as u64, "job budget exhausted");
                return self.deadline_exceeded(&id, stage);
            }

            let mut limits: Vec<Duration> = group
                .stages
                .iter()
                .map(|s| s.timeout.min(remaining))
                .collect();

            let mut results: Vec<(usize, StageResult)> = if group.is_parallel() {
                // The first sibling runs on the job's own slot. The others
                // start alongside it only with a borrowed slot; the rest
                // run afterwards on the job's slot.
                let mut concurrent = vec![(0, None)];
                let mut deferred = Vec::new();
                for index in 1..group.stages.len() {
                    match self.pool.try_borrow() {
                        Some(slot) => concurrent.push((index, Some(slot))),
                        None => deferred.push(index),
                    }
                }
                if !deferred.is_empty() {
                    info!(deferred = deferred.len(), "pool busy, running sibling stages after the group");
                }

                let runs = concurrent.into_iter().map(|(index, slot)| {
                    let run = executor.run_within(&group.stages[index], &artifact, limits[index], slot);
                    async move { (index, run.await) }
                });
                let mut results = join_all(runs).await;

                for index in deferred {
                    let remaining = context.deadline.saturating_duration_since(Instant::now());
                    limits[index] = group.stages[index].timeout.min(remaining);
                    let result = executor
                        .run_within(&group.stages[index], &artifact, limits[index], None)
                        .await;
                    results.push((index, result));
                }
                results
            } else {
                let stage = &group.stages[0];
                vec![(0, executor.run_within(stage, &artifact, limits[0], None).await)]
            };
            results.sort_by_key(|(_, result)| result.start_offset);

            for (index, mut result) in results {
                let stage = &group.stages[index];
                let limit = limits[index];

                if result.outcome == StageOutcome::TimedOut && limit < stage.timeout {
                    result.output = None;
                    self.lifecycle.append_stage(&id, result)?;
                    return self.deadline_exceeded(&id, stage);
                }

                match decide(stage, &result) {
                    Decision::Continue => {
                        if result.outcome == StageOutcome::Degraded {
                            degraded_stages.push(stage.name.clone());
                        }
                        if let Some(output) = result.output.take() {
                            artifact.apply(output);
                        }
                        self.lifecycle.append_stage(&id, result)?;
                    }
                    Decision::Fallback => {
                        warn!(stage = %stage.name, outcome = ?result.outcome, "stage fell back, passing input through");
                        let detail = result.message.take().unwrap_or_default();
                        result.fallback_from = Some(result.outcome);
                        result.outcome = StageOutcome::Degraded;
                        result.output = None;
                        result.produced = None;
                        result.message = Some(format!("{detail}; continued without {}", stage.name));
                        degraded_stages.push(stage.name.clone());
                        self.lifecycle.append_stage(&id, result)?;
                    }
                    Decision::Abort => {
                        let error = abort_error(stage, &result, limit);
                        result.output = None;
                        self.lifecycle.append_stage(&id, result)?;
                        let reason = humanize_error(&error).reason();
                        return self
                            .lifecycle
                            .finish(&id, JobStatus::Failed, Some(reason), None);
                    }
                }
            }
        }

        let output = JobOutput {
            converted: artifact.converted.take().unwrap_or_default(),
            text: artifact.text.take(),
            document_hash: hash_bytes(&artifact.document),
            languages: artifact.languages,
            degraded: !degraded_stages.is_empty(),
            degraded_stages,
        };
        self.lifecycle
            .finish(&id, JobStatus::Completed, None, Some(output))
    }

    fn deadline_exceeded(&self, id: &JobId, stage: &StageSpec) -> Result<Job> {
        let error = DocflowError::DeadlineExceeded {
            stage: stage.name.clone(),
        };
        let reason = humanize_error(&error).reason();
        self.lifecycle
            .finish(id, JobStatus::DeadlineExceeded, Some(reason), None)
    }
}

fn abort_error(stage: &StageSpec, result: &StageResult, limit: Duration) -> DocflowError {
    match result.outcome {
        StageOutcome::TimedOut => DocflowError::StageTimeout {
            stage: stage.name.clone(),
            timeout: limit,
        },
        _ => DocflowError::StageFailure {
            stage: stage.name.clone(),
            detail: result
                .message
                .clone()
                .unwrap_or_else(|| "no detail reported".into()),
        },
    }
}
