// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// docflow-pipeline — Job orchestration core.
//
// Sequences preprocessing stages, applies per-stage fallback, enforces stage
// and job timeouts, and multiplexes synchronous and asynchronous callers over
// a bounded worker pool.

pub mod admission;
pub mod executor;
pub mod fallback;
pub mod health;
pub mod lifecycle;
pub mod plan;
pub mod pool;
pub mod sequencer;
pub mod stage;
pub mod stages;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use admission::{AdmissionController, HealthReport, Submission};
pub use executor::StageExecutor;
pub use fallback::{Decision, decide};
pub use health::{CircuitState, CorrectionHealth};
pub use lifecycle::LifecycleManager;
pub use plan::{Capabilities, PipelinePlan, PlanBuilder};
pub use pool::{WorkerPool, WorkerSlot};
pub use sequencer::Sequencer;
pub use stage::{Completion, Fatality, StageRunner, StageSpec};
pub use store::JobArchive;
