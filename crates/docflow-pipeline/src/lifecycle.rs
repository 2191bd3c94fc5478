// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job lifecycle manager.
//
// Owns every job record from admission to eviction. Enforces the state
// machine (queued → running → one terminal state), carries the cancellation
// signal and job deadline, and wakes callers waiting on a terminal state.
// Finished jobs are mirrored to the archive, when one is configured, so they
// can still be retrieved after eviction from memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use docflow_core::error::{DocflowError, Result};
use docflow_core::{
    DocumentRef, Job, JobHandle, JobId, JobOptions, JobOutput, JobStatus, ServiceConfig,
    StageResult,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::store::JobArchive;

/// Timing and cancellation state the sequencer needs to drive a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Monotonic creation instant; stage offsets are measured from here.
    pub origin: Instant,
    /// Job-level deadline.
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

struct Entry {
    job: Job,
    seq: u64,
    context: JobContext,
    finished: Option<Instant>,
    status: watch::Sender<JobStatus>,
}

pub struct LifecycleManager {
    config: Arc<ServiceConfig>,
    jobs: Mutex<HashMap<JobId, Entry>>,
    next_seq: AtomicU64,
    archive: Option<Arc<JobArchive>>,
}

impl LifecycleManager {
    pub fn new(config: Arc<ServiceConfig>) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            archive: None,
        }
    }

    /// Mirror finished jobs to `archive`.
    pub fn with_archive(mut self, archive: Arc<JobArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new job in `queued` with its deadline fixed from now.
    #[instrument(skip_all, fields(document = %document.name))]
    pub fn create(&self, document: DocumentRef, options: JobOptions) -> JobHandle {
        let budget = self.config.max_document_timeout();
        let now = Instant::now();
        let created_at = Utc::now();
        let job = Job {
            id: JobId::new(),
            document,
            options,
            status: JobStatus::Queued,
            stages: Vec::new(),
            created_at,
            deadline_at: created_at + to_chrono(budget),
            started_at: None,
            finished_at: None,
            reason: None,
            output: None,
            cancel_requested: false,
        };
        let (status, _) = watch::channel(JobStatus::Queued);
        let entry = Entry {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            context: JobContext {
                origin: now,
                deadline: now + budget,
                cancel: CancellationToken::new(),
            },
            finished: None,
            status,
            job,
        };
        let id = entry.job.id;

        let mut jobs = self.jobs();
        jobs.insert(id, entry);
        let queue_position = queue_position_of(&jobs, &id);
        info!(job_id = %id, deadline_secs = budget.as_secs(), "job admitted");
        JobHandle {
            id,
            status: JobStatus::Queued,
            queue_position,
            created_at,
            deadline_at: created_at + to_chrono(budget),
        }
    }

    /// Current record of a job, from memory or the archive.
    pub fn get(&self, id: &JobId) -> Result<Job> {
        if let Some(entry) = self.jobs().get(id) {
            return Ok(entry.job.clone());
        }
        match &self.archive {
            Some(archive) => archive.load(id)?.ok_or(DocflowError::NotFound(*id)),
            None => Err(DocflowError::NotFound(*id)),
        }
    }

    pub fn handle(&self, id: &JobId) -> Result<JobHandle> {
        let jobs = self.jobs();
        if let Some(handle) = handle_of(&jobs, id) {
            return Ok(handle);
        }
        drop(jobs);
        let job = self.get(id)?;
        Ok(JobHandle {
            id: job.id,
            status: job.status,
            queue_position: None,
            created_at: job.created_at,
            deadline_at: job.deadline_at,
        })
    }

    /// 1-based position among queued jobs, in admission order.
    pub fn queue_position(&self, id: &JobId) -> Option<usize> {
        queue_position_of(&self.jobs(), id)
    }

    /// Request cancellation. Returns `false` if the job is unknown or
    /// already finished. The job stops at its next stage boundary.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn cancel(&self, id: &JobId) -> bool {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        if entry.job.status.is_terminal() {
            return false;
        }
        entry.job.cancel_requested = true;
        entry.context.cancel.cancel();
        info!(status = %entry.job.status, "cancellation requested");
        true
    }

    pub fn context(&self, id: &JobId) -> Option<JobContext> {
        self.jobs().get(id).map(|entry| entry.context.clone())
    }

    /// Move a queued job to `running`. Returns `false` if it already left
    /// `queued` (cancelled or expired while waiting for a slot).
    pub fn mark_running(&self, id: &JobId) -> Result<bool> {
        let mut jobs = self.jobs();
        let entry = jobs.get_mut(id).ok_or(DocflowError::NotFound(*id))?;
        if entry.job.status != JobStatus::Queued {
            debug!(job_id = %id, status = %entry.job.status, "job not started");
            return Ok(false);
        }
        entry.job.status = JobStatus::Running;
        entry.job.started_at = Some(Utc::now());
        entry.status.send_replace(JobStatus::Running);
        debug!(job_id = %id, "job running");
        Ok(true)
    }

    /// Append a stage result to the job log.
    pub fn append_stage(&self, id: &JobId, result: StageResult) -> Result<()> {
        let mut jobs = self.jobs();
        let entry = jobs.get_mut(id).ok_or(DocflowError::NotFound(*id))?;
        if entry.job.status.is_terminal() {
            warn!(job_id = %id, stage = %result.stage, "stage result after job finished, dropped");
            return Ok(());
        }
        entry.job.stages.push(result);
        Ok(())
    }

    /// Move a job to a terminal state.
    ///
    /// A job that already finished keeps its first terminal state; the
    /// current record is returned unchanged.
    #[instrument(skip_all, fields(job_id = %id, status = %status))]
    pub fn finish(
        &self,
        id: &JobId,
        status: JobStatus,
        reason: Option<String>,
        output: Option<JobOutput>,
    ) -> Result<Job> {
        let job = {
            let mut jobs = self.jobs();
            let entry = jobs.get_mut(id).ok_or(DocflowError::NotFound(*id))?;
            if entry.job.status.is_terminal() {
                debug!(current = %entry.job.status, "job already finished");
                return Ok(entry.job.clone());
            }
            entry.job.status = status;
            entry.job.finished_at = Some(Utc::now());
            entry.job.reason = reason;
            entry.job.output = output;
            entry.finished = Some(Instant::now());
            entry.status.send_replace(status);
            entry.job.clone()
        };

        match &job.reason {
            Some(reason) => info!(reason = %reason, "job finished"),
            None => info!(degraded = job.is_degraded(), "job finished"),
        }

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save(&job) {
                warn!(error = %e, "failed to archive job");
            }
        }
        Ok(job)
    }

    /// Wait up to `max_wait` for the job to reach a terminal state, then
    /// return its record in whatever state it is in.
    pub async fn wait(&self, id: &JobId, max_wait: Duration) -> Result<Job> {
        let receiver = self.jobs().get(id).map(|entry| entry.status.subscribe());
        let Some(mut receiver) = receiver else {
            return self.get(id);
        };
        let reached = tokio::time::timeout(max_wait, async {
            receiver.wait_for(|status| status.is_terminal()).await.is_ok()
        })
        .await;
        if reached.is_err() {
            debug!(job_id = %id, wait_ms = max_wait.as_millis() as u64, "wait elapsed before job finished");
        }
        self.get(id)
    }

    /// Number of jobs in `queued` and `running`.
    pub fn counts(&self) -> (usize, usize) {
        let jobs = self.jobs();
        let queued = jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Queued)
            .count();
        let running = jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Running)
            .count();
        (queued, running)
    }

    /// Drop finished jobs older than `age` from memory and the archive.
    /// Returns how many in-memory records were removed.
    pub fn evict_finished_older_than(&self, age: Duration) -> usize {
        let evicted = {
            let mut jobs = self.jobs();
            let before = jobs.len();
            jobs.retain(|_, entry| entry.finished.is_none_or(|at| at.elapsed() < age));
            before - jobs.len()
        };
        if evicted > 0 {
            debug!(evicted, "finished jobs evicted from memory");
        }
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.delete_finished_before(Utc::now() - to_chrono(age)) {
                warn!(error = %e, "failed to sweep job archive");
            }
        }
        evicted
    }

    /// Periodically evict jobs past the configured retention until `shutdown`.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let retention = manager.config.result_retention();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.evict_finished_older_than(retention);
                    }
                }
            }
            debug!("eviction sweeper stopped");
        })
    }
}

fn handle_of(jobs: &HashMap<JobId, Entry>, id: &JobId) -> Option<JobHandle> {
    let entry = jobs.get(id)?;
    Some(JobHandle {
        id: *id,
        status: entry.job.status,
        queue_position: queue_position_of(jobs, id),
        created_at: entry.job.created_at,
        deadline_at: entry.job.deadline_at,
    })
}

fn queue_position_of(jobs: &HashMap<JobId, Entry>, id: &JobId) -> Option<usize> {
    let entry = jobs.get(id)?;
    if entry.job.status != JobStatus::Queued {
        return None;
    }
    let ahead = jobs
        .values()
        .filter(|e| e.job.status == JobStatus::Queued && e.seq < entry.seq)
        .count();
    Some(ahead + 1)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}

#[cfg(test)]
mod tests {
    use docflow_core::config::MAX_DOCUMENT_TIMEOUT_SECS;
    use docflow_core::{ConvertedDocument, DocumentType};

    use super::*;

    fn manager() -> LifecycleManager {
        LifecycleManager::new(Arc::new(ServiceConfig::default()))
    }

    fn document() -> DocumentRef {
        DocumentRef {
            name: "scan.pdf".into(),
            document_type: DocumentType::Pdf,
            hash: "abc".into(),
            size_bytes: 3,
        }
    }

    fn output() -> JobOutput {
        JobOutput {
            converted: ConvertedDocument::default(),
            text: None,
            languages: vec!["eng".into()],
            document_hash: "abc".into(),
            degraded: false,
            degraded_stages: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_budget_is_capped() {
        let config = ServiceConfig {
            max_document_timeout_secs: u64::MAX,
            ..Default::default()
        };
        let lifecycle = LifecycleManager::new(Arc::new(config));
        let handle = lifecycle.create(document(), JobOptions::default());
        assert_eq!(
            (handle.deadline_at - handle.created_at).num_seconds(),
            MAX_DOCUMENT_TIMEOUT_SECS as i64
        );
        let context = lifecycle.context(&handle.id).unwrap();
        assert_eq!(
            context.deadline - context.origin,
            Duration::from_secs(MAX_DOCUMENT_TIMEOUT_SECS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_sets_deadline_and_queue_position() {
        let lifecycle = manager();
        let first = lifecycle.create(document(), JobOptions::default());
        let second = lifecycle.create(document(), JobOptions::default());

        assert_eq!(first.status, JobStatus::Queued);
        assert_eq!(first.queue_position, Some(1));
        assert_eq!(second.queue_position, Some(2));
        assert_eq!(
            (second.deadline_at - second.created_at).num_seconds(),
            3600
        );

        lifecycle.mark_running(&first.id).unwrap();
        assert_eq!(lifecycle.queue_position(&first.id), None);
        assert_eq!(lifecycle.queue_position(&second.id), Some(1));
        assert_eq!(lifecycle.counts(), (1, 1));

        let context = lifecycle.context(&first.id).unwrap();
        assert_eq!(context.deadline - context.origin, Duration::from_secs(3600));
    }

    #[test]
    fn terminal_state_is_final() {
        let lifecycle = manager();
        let id = lifecycle.create(document(), JobOptions::default()).id;
        assert!(lifecycle.mark_running(&id).unwrap());

        let job = lifecycle
            .finish(&id, JobStatus::Completed, None, Some(output()))
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let again = lifecycle
            .finish(&id, JobStatus::Failed, Some("late".into()), None)
            .unwrap();
        assert_eq!(again.status, JobStatus::Completed);
        assert!(again.reason.is_none());
        assert!(!lifecycle.mark_running(&id).unwrap());
        assert!(!lifecycle.cancel(&id));
    }

    #[test]
    fn cancel_signals_token() {
        let lifecycle = manager();
        let id = lifecycle.create(document(), JobOptions::default()).id;
        let context = lifecycle.context(&id).unwrap();

        assert!(lifecycle.cancel(&id));
        assert!(context.cancel.is_cancelled());
        assert!(lifecycle.get(&id).unwrap().cancel_requested);
        assert!(!lifecycle.cancel(&JobId::new()));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let lifecycle = manager();
        let id = JobId::new();
        assert!(matches!(lifecycle.get(&id), Err(DocflowError::NotFound(_))));
        assert!(matches!(lifecycle.handle(&id), Err(DocflowError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_wakes_on_finish() {
        let lifecycle = Arc::new(manager());
        let id = lifecycle.create(document(), JobOptions::default()).id;

        let finisher = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            finisher.mark_running(&id).unwrap();
            finisher
                .finish(&id, JobStatus::Completed, None, Some(output()))
                .unwrap();
        });

        let start = Instant::now();
        let job = lifecycle.wait(&id, Duration::from_secs(60)).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_current_state_on_timeout() {
        let lifecycle = manager();
        let id = lifecycle.create(document(), JobOptions::default()).id;
        let job = lifecycle.wait(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_respects_retention() {
        let lifecycle = manager();
        let done = lifecycle.create(document(), JobOptions::default()).id;
        let live = lifecycle.create(document(), JobOptions::default()).id;
        lifecycle
            .finish(&done, JobStatus::Cancelled, Some("cancelled".into()), None)
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(lifecycle.evict_finished_older_than(Duration::from_secs(60)), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(lifecycle.evict_finished_older_than(Duration::from_secs(60)), 1);
        assert!(lifecycle.get(&done).is_err());
        assert!(lifecycle.get(&live).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn archived_jobs_outlive_eviction() {
        let archive = Arc::new(JobArchive::open_in_memory().unwrap());
        let lifecycle = manager().with_archive(archive.clone());
        let id = lifecycle.create(document(), JobOptions::default()).id;
        lifecycle.mark_running(&id).unwrap();
        lifecycle
            .finish(&id, JobStatus::Failed, Some("conversion failed".into()), None)
            .unwrap();
        assert_eq!(archive.count().unwrap(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(lifecycle.evict_finished_older_than(Duration::from_secs(1)), 1);

        let job = lifecycle.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(lifecycle.handle(&id).unwrap().queue_position, None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_shutdown() {
        let lifecycle = Arc::new(manager());
        let shutdown = CancellationToken::new();
        let sweeper = lifecycle.spawn_eviction(Duration::from_secs(30), shutdown.clone());
        shutdown.cancel();
        sweeper.await.unwrap();
    }
}
