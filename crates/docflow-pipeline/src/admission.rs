// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Admission controller.
//
// The front door for submissions. Plans the job, registers it, claims a
// free pool slot if there is one, and hands it to a worker task that
// otherwise waits for a slot. Synchronous callers block on
// the job for up to the configured wait and receive a handle instead when
// it runs longer; a saturated pool turns a synchronous request into an
// asynchronous one straight away.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::error::{DocflowError, Result};
use docflow_core::human_errors::humanize_error;
use docflow_core::integrity::hash_bytes;
use docflow_core::{
    Artifact, DocumentRef, DocumentType, Job, JobHandle, JobId, JobRequest, JobStatus,
    ResponseMode, ServiceConfig,
};
use serde::Serialize;
use tracing::{Instrument, info, info_span, instrument, warn};

use crate::health::{CircuitState, CorrectionHealth};
use crate::lifecycle::LifecycleManager;
use crate::plan::{Capabilities, PipelinePlan, PlanBuilder};
use crate::pool::{WorkerPool, WorkerSlot};
use crate::sequencer::Sequencer;
use crate::store::JobArchive;

/// What a caller gets back from [`AdmissionController::submit`].
#[derive(Debug, Clone)]
pub enum Submission {
    /// The job reached a terminal state within the synchronous wait.
    Completed(Job),
    /// The job is queued or running; poll with the handle.
    Accepted(JobHandle),
}

impl Submission {
    pub fn id(&self) -> JobId {
        match self {
            Self::Completed(job) => job.id,
            Self::Accepted(handle) => handle.id,
        }
    }
}

/// Point-in-time service health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub accepting: bool,
    pub workers: usize,
    pub workers_in_use: usize,
    pub queued: usize,
    pub running: usize,
    /// Circuit state per correction host.
    pub correction: Vec<(String, CircuitState)>,
}

pub struct AdmissionController {
    config: Arc<ServiceConfig>,
    lifecycle: Arc<LifecycleManager>,
    pool: WorkerPool,
    planner: PlanBuilder,
    sequencer: Arc<Sequencer>,
    health: Arc<CorrectionHealth>,
}

impl AdmissionController {
    pub fn new(config: Arc<ServiceConfig>, capabilities: Capabilities) -> Self {
        Self::with_archive(config, capabilities, None)
    }

    /// Build a controller whose finished jobs are mirrored to `archive`.
    pub fn with_archive(
        config: Arc<ServiceConfig>,
        capabilities: Capabilities,
        archive: Option<Arc<JobArchive>>,
    ) -> Self {
        let lifecycle = LifecycleManager::new(config.clone());
        let lifecycle = Arc::new(match archive {
            Some(archive) => lifecycle.with_archive(archive),
            None => lifecycle,
        });
        let pool = WorkerPool::new(config.workers);
        let health = Arc::new(CorrectionHealth::new());
        let planner = PlanBuilder::new(config.clone(), capabilities, health.clone());
        let sequencer = Arc::new(Sequencer::new(lifecycle.clone(), pool.clone()));
        info!(workers = pool.capacity(), "admission controller ready");
        Self {
            config,
            lifecycle,
            pool,
            planner,
            sequencer,
            health,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Admit a document.
    ///
    /// Fails only when no plan can be built for the request; every later
    /// failure is reported through the job record.
    #[instrument(skip_all, fields(document = %request.name, mode = ?request.mode))]
    pub async fn submit(&self, request: JobRequest) -> Result<Submission> {
        let JobRequest {
            name,
            document,
            options,
            mode,
        } = request;

        let document_type = DocumentType::detect(&name, &document);
        let size_bytes = document.len() as u64;
        let plan = self.planner.build(document_type, size_bytes, &options)?;

        let mut artifact = Artifact::new(name.clone(), document_type, document);
        artifact.languages = self.planner.initial_languages(&options);
        let document = DocumentRef {
            name,
            document_type,
            hash: hash_bytes(&artifact.document),
            size_bytes,
        };

        // An admitted job holds its slot before its worker is first polled.
        let slot = self.pool.try_borrow();
        let blocking = mode == ResponseMode::Sync && slot.is_some();
        if mode == ResponseMode::Sync && !blocking {
            info!("worker pool saturated, answering with a handle");
        }

        let handle = self.lifecycle.create(document, options);
        self.spawn_worker(handle.id, plan, artifact, slot)?;

        if !blocking {
            return Ok(Submission::Accepted(self.lifecycle.handle(&handle.id)?));
        }

        let job = self
            .lifecycle
            .wait(&handle.id, self.config.max_sync_wait())
            .await?;
        if job.status.is_terminal() {
            Ok(Submission::Completed(job))
        } else {
            info!(job_id = %handle.id, "synchronous wait elapsed, detaching");
            Ok(Submission::Accepted(self.lifecycle.handle(&handle.id)?))
        }
    }

    /// Start the task that runs the job, waiting for a slot unless one was
    /// claimed at admission.
    ///
    /// While queued the job can still be cancelled or run out of budget; both
    /// end it without taking a slot.
    fn spawn_worker(
        &self,
        id: JobId,
        plan: PipelinePlan,
        artifact: Artifact,
        claimed: Option<WorkerSlot>,
    ) -> Result<()> {
        let context = self.lifecycle.context(&id).ok_or(DocflowError::NotFound(id))?;
        let lifecycle = self.lifecycle.clone();
        let pool = self.pool.clone();
        let sequencer = self.sequencer.clone();

        tokio::spawn(
            async move {
                let slot = match claimed {
                    Some(slot) => Some(slot),
                    None => tokio::select! {
                        biased;
                        _ = context.cancel.cancelled() => {
                            let reason = humanize_error(&DocflowError::Cancelled).reason();
                            finish_queued(&lifecycle, &id, JobStatus::Cancelled, reason);
                            return;
                        }
                        _ = tokio::time::sleep_until(context.deadline) => {
                            let stage = plan
                                .stage_names()
                                .first()
                                .map(|name| name.to_string())
                                .unwrap_or_default();
                            let reason = humanize_error(&DocflowError::DeadlineExceeded { stage }).reason();
                            finish_queued(&lifecycle, &id, JobStatus::DeadlineExceeded, reason);
                            return;
                        }
                        slot = pool.acquire() => slot,
                    },
                };
                let Some(slot) = slot else {
                    warn!("worker pool closed");
                    return;
                };
                if let Err(e) = sequencer.execute(id, &plan, artifact, Some(slot)).await {
                    warn!(error = %e, "job could not be driven to completion");
                }
            }
            .instrument(info_span!("job", job_id = %id)),
        );
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.lifecycle.get(id)
    }

    pub fn handle(&self, id: &JobId) -> Result<JobHandle> {
        self.lifecycle.handle(id)
    }

    /// Request cancellation; see [`LifecycleManager::cancel`].
    pub fn cancel(&self, id: &JobId) -> bool {
        self.lifecycle.cancel(id)
    }

    /// Block until the job is terminal or `max_wait` passes.
    pub async fn wait(&self, id: &JobId, max_wait: Duration) -> Result<Job> {
        self.lifecycle.wait(id, max_wait).await
    }

    pub fn health(&self) -> HealthReport {
        let (queued, running) = self.lifecycle.counts();
        HealthReport {
            accepting: true,
            workers: self.pool.capacity(),
            workers_in_use: self.pool.in_use(),
            queued,
            running,
            correction: self.health.snapshot(),
        }
    }
}

fn finish_queued(lifecycle: &LifecycleManager, id: &JobId, status: JobStatus, reason: String) {
    info!(status = %status, "job ended while queued");
    if let Err(e) = lifecycle.finish(id, status, Some(reason), None) {
        warn!(error = %e, "failed to record queued job outcome");
    }
}

#[cfg(test)]
mod tests {
    use docflow_core::{JobOptions, OcrMode, StageKind, StageOutcome};

    use super::*;
    use crate::testing::{
        Behavior, FakeConverter, FakeCorrector, FakeDetector, FakeInspector, FakeOcr, Fakes,
        PDF_BYTES,
    };

    fn config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.ocr.enabled = true;
        config.ocr.timeout_secs = 300;
        config.max_sync_wait_secs = 900;
        config
    }

    fn controller(config: ServiceConfig, fakes: &Fakes) -> AdmissionController {
        AdmissionController::new(Arc::new(config), fakes.capabilities())
    }

    fn ocr_request() -> JobRequest {
        JobRequest::new("scan.pdf", PDF_BYTES.to_vec()).with_options(JobOptions {
            ocr: true,
            ..Default::default()
        })
    }

    fn completed(submission: Submission) -> Job {
        match submission {
            Submission::Completed(job) => job,
            Submission::Accepted(handle) => panic!("expected a finished job, got {handle:?}"),
        }
    }

    fn stage<'a>(job: &'a Job, kind: StageKind) -> &'a docflow_core::StageResult {
        job.stages
            .iter()
            .find(|s| s.kind == kind)
            .unwrap_or_else(|| panic!("no {kind:?} stage in {:?}", job.stages))
    }

    #[tokio::test(start_paused = true)]
    async fn ocr_then_conversion_completes() {
        let fakes = Fakes::default();
        let admission = controller(config(), &fakes);

        let job = completed(admission.submit(ocr_request()).await.unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.is_degraded());
        assert_eq!(stage(&job, StageKind::Ocr).outcome, StageOutcome::Succeeded);
        assert_eq!(fakes.ocr.last_mode(), Some(OcrMode::Force));
        // The converter received the OCR output.
        assert_eq!(fakes.converter.last_document().unwrap(), b"%PDF-1.7 ocr".to_vec());
        let output = job.output.unwrap();
        assert_eq!(output.languages, vec!["eng"]);
        assert!(output.converted.markdown.contains("recognised text"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ocr_falls_back_to_original_document() {
        let fakes = Fakes {
            ocr: FakeOcr::new(Behavior::Succeed).after(Duration::from_secs(301)),
            ..Default::default()
        };
        let admission = controller(config(), &fakes);

        let job = completed(admission.submit(ocr_request()).await.unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        let ocr = stage(&job, StageKind::Ocr);
        assert_eq!(ocr.outcome, StageOutcome::Degraded);
        assert_eq!(ocr.fallback_from, Some(StageOutcome::TimedOut));
        assert!(ocr.message.as_deref().unwrap().contains("exceeded 300s"));
        assert_eq!(ocr.duration, Duration::from_secs(300));
        assert_eq!(fakes.converter.last_document().unwrap(), PDF_BYTES.to_vec());
        assert_eq!(job.output.unwrap().degraded_stages, vec!["ocr"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ocr_without_fallback_fails() {
        let mut config = config();
        config.ocr.fallback_on_failure = false;
        let fakes = Fakes {
            ocr: FakeOcr::new(Behavior::Succeed).after(Duration::from_secs(301)),
            ..Default::default()
        };
        let admission = controller(config, &fakes);

        let job = completed(admission.submit(ocr_request()).await.unwrap());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(stage(&job, StageKind::Ocr).outcome, StageOutcome::TimedOut);
        assert!(job.reason.unwrap().contains("took too long"));
        assert_eq!(fakes.converter.calls.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_detection_uses_default_languages() {
        let mut config = config();
        config.ocr.default_languages = vec!["deu".into()];
        let fakes = Fakes {
            detector: FakeDetector::failing(),
            inspector: FakeInspector::recommending(OcrMode::Force).with_text("Texte eingebettet"),
            ..Default::default()
        };
        let admission = controller(config, &fakes);

        let job = completed(admission.submit(ocr_request()).await.unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        let detection = stage(&job, StageKind::LanguageDetection);
        assert_eq!(detection.outcome, StageOutcome::Degraded);
        assert_eq!(detection.fallback_from, Some(StageOutcome::Failed));
        assert_eq!(job.output.unwrap().languages, vec!["deu"]);
    }

    #[tokio::test(start_paused = true)]
    async fn correction_left_out_without_remote_services() {
        let fakes = Fakes::default();
        let admission = controller(config(), &fakes);
        let request = JobRequest::new("notes.txt", b"some ocr output".to_vec()).with_options(
            JobOptions {
                correction: true,
                ..Default::default()
            },
        );

        let job = completed(admission.submit(request).await.unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.stages.iter().all(|s| s.kind != StageKind::Correction));
        assert_eq!(fakes.corrector.calls.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_corrector_degrades() {
        let mut config = config();
        config.correction.enable_remote_services = true;
        config.correction.languages = vec!["eng".into()];
        let fakes = Fakes {
            corrector: FakeCorrector::new(Behavior::Unavailable("connection refused".into())),
            ..Default::default()
        };
        let admission = controller(config, &fakes);
        let request = JobRequest::new("notes.txt", b"plain english words".to_vec()).with_options(
            JobOptions {
                correction: true,
                ..Default::default()
            },
        );

        let job = completed(admission.submit(request).await.unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        let correction = stage(&job, StageKind::Correction);
        assert_eq!(correction.outcome, StageOutcome::Degraded);
        assert_eq!(correction.fallback_from, Some(StageOutcome::Failed));
        assert_eq!(
            job.output.unwrap().text.as_deref(),
            Some("plain english words")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn long_job_detaches_and_finishes_later() {
        let mut config = config();
        config.max_sync_wait_secs = 5;
        let fakes = Fakes {
            converter: FakeConverter::new(Behavior::Succeed).after(Duration::from_secs(20)),
            ..Default::default()
        };
        let admission = controller(config, &fakes);

        let submission = admission
            .submit(JobRequest::new("a.txt", b"hello".to_vec()))
            .await
            .unwrap();
        let Submission::Accepted(handle) = submission else {
            panic!("expected a handle");
        };
        assert_eq!(handle.status, JobStatus::Running);

        let job = admission
            .wait(&handle.id, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn job_deadline_exceeded() {
        let mut config = config();
        config.max_document_timeout_secs = 60;
        config.max_sync_wait_secs = 600;
        let fakes = Fakes {
            converter: FakeConverter::new(Behavior::Succeed).after(Duration::from_secs(500)),
            ..Default::default()
        };
        let admission = controller(config, &fakes);

        let job = completed(
            admission
                .submit(JobRequest::new("a.txt", b"hello".to_vec()))
                .await
                .unwrap(),
        );
        assert_eq!(job.status, JobStatus::DeadlineExceeded);
        assert!(job.reason.unwrap().contains("ran out of processing time"));
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_answers_with_handle() {
        let mut config = config();
        config.workers = 1;
        let fakes = Fakes {
            converter: FakeConverter::new(Behavior::Succeed).after(Duration::from_secs(30)),
            ..Default::default()
        };
        let admission = controller(config, &fakes);

        let first = admission
            .submit(JobRequest::new("a.txt", b"one".to_vec()).with_mode(ResponseMode::Async))
            .await
            .unwrap();
        assert!(admission.pool().is_saturated());

        // No yield between the submissions: the first job's slot is already
        // taken even though its worker has not run yet.
        let start = tokio::time::Instant::now();
        let second = admission
            .submit(JobRequest::new("b.txt", b"two".to_vec()))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        let Submission::Accepted(handle) = second else {
            panic!("expected a handle");
        };
        assert_eq!(handle.status, JobStatus::Queued);

        tokio::task::yield_now().await;
        assert_eq!(admission.handle(&handle.id).unwrap().queue_position, Some(1));
        let report = admission.health();
        assert_eq!(report.workers, 1);
        assert_eq!(report.workers_in_use, 1);
        assert_eq!((report.queued, report.running), (1, 1));

        let done = admission
            .wait(&handle.id, Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(
            admission.get(&first.id()).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_submissions_claim_slots_in_admission_order() {
        let mut config = config();
        config.workers = 2;
        let fakes = Fakes {
            converter: FakeConverter::new(Behavior::Succeed).after(Duration::from_secs(30)),
            ..Default::default()
        };
        let admission = Arc::new(controller(config, &fakes));

        let first = {
            let admission = admission.clone();
            tokio::spawn(async move {
                admission
                    .submit(JobRequest::new("a.txt", b"one".to_vec()))
                    .await
                    .unwrap()
            })
        };
        let second = {
            let admission = admission.clone();
            tokio::spawn(async move {
                admission
                    .submit(JobRequest::new("b.txt", b"two".to_vec()))
                    .await
                    .unwrap()
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(admission.pool().in_use(), 2);

        let third = admission
            .submit(JobRequest::new("c.txt", b"three".to_vec()))
            .await
            .unwrap();
        assert!(matches!(third, Submission::Accepted(_)));

        let start = tokio::time::Instant::now();
        assert!(matches!(first.await.unwrap(), Submission::Completed(_)));
        assert!(matches!(second.await.unwrap(), Submission::Completed(_)));
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        let job = admission
            .wait(&third.id(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(admission.pool().in_use() <= admission.pool().capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_queued_job() {
        let mut config = config();
        config.workers = 1;
        let fakes = Fakes {
            converter: FakeConverter::new(Behavior::Succeed).after(Duration::from_secs(30)),
            ..Default::default()
        };
        let admission = controller(config, &fakes);

        admission
            .submit(JobRequest::new("a.txt", b"one".to_vec()).with_mode(ResponseMode::Async))
            .await
            .unwrap();
        let queued = admission
            .submit(JobRequest::new("b.txt", b"two".to_vec()).with_mode(ResponseMode::Async))
            .await
            .unwrap();

        assert!(admission.cancel(&queued.id()));
        let job = admission
            .wait(&queued.id(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.stages.is_empty());
        assert!(!admission.cancel(&queued.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_running_job_stops_at_boundary() {
        let fakes = Fakes {
            ocr: FakeOcr::new(Behavior::Succeed).after(Duration::from_secs(10)),
            ..Default::default()
        };
        let admission = controller(config(), &fakes);
        let submission = admission
            .submit(ocr_request().with_mode(ResponseMode::Async))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(admission.cancel(&submission.id()));
        let job = admission
            .wait(&submission.id(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        // OCR finished; conversion never started.
        assert!(job.stages.iter().any(|s| s.kind == StageKind::Ocr));
        assert_eq!(fakes.converter.calls.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_is_not_found() {
        let admission = controller(config(), &Fakes::default());
        assert!(matches!(
            admission.get(&JobId::new()),
            Err(DocflowError::NotFound(_))
        ));
    }
}
