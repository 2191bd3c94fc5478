// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage specifications.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docflow_core::error::CapabilityError;
use docflow_core::{Artifact, StageKind, StageOutput};

/// What a stage failure means for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatality {
    /// Any failure fails the job.
    Fatal,
    /// Failure may be replaced by pass-through of the stage input.
    FallbackEligible,
}

/// Successful return of a stage runner.
#[derive(Debug, Clone)]
pub enum Completion {
    Done(StageOutput),
    /// Finished with a lower-fidelity result.
    Degraded { output: StageOutput, reason: String },
    /// Nothing to do for this input; the artifact is left unchanged.
    Skipped(String),
}

/// The callable behind a stage.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, input: &Artifact) -> Result<Completion, CapabilityError>;
}

/// One stage of a pipeline plan.
#[derive(Clone)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub runner: Arc<dyn StageRunner>,
    /// Hard wall-clock limit for one run.
    pub timeout: Duration,
    /// The stage is not started with less job budget than this.
    pub min_timeout: Duration,
    pub fatality: Fatality,
    /// Whether a fallback-eligible failure passes the input through.
    pub fallback_on_failure: bool,
    /// Whether the stage may share a group with siblings.
    pub parallel: bool,
}

impl StageSpec {
    pub fn new(kind: StageKind, runner: Arc<dyn StageRunner>, timeout: Duration) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            runner,
            timeout,
            min_timeout: Duration::from_secs(1),
            fatality: Fatality::Fatal,
            fallback_on_failure: false,
            parallel: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Mark fallback-eligible; `enabled` is the fallback-on-failure flag.
    pub fn fallback(mut self, enabled: bool) -> Self {
        self.fatality = Fatality::FallbackEligible;
        self.fallback_on_failure = enabled;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatality = Fatality::Fatal;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("min_timeout", &self.min_timeout)
            .field("fatality", &self.fatality)
            .field("fallback_on_failure", &self.fallback_on_failure)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}
