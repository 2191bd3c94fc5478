// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: binds the concrete capabilities to the
// orchestration core and owns the background sweeper.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::capability::TextCorrector;
use docflow_core::error::Result;
use docflow_core::language::ScriptDetector;
use docflow_core::{Job, JobId, JobRequest, ServiceConfig};
use docflow_document::{CommandConverter, OcrMyPdf, OllamaCorrector, PdfInspector};
use docflow_pipeline::{AdmissionController, Capabilities, HealthReport, JobArchive, Submission};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Shared handles to every running subsystem.
#[derive(Clone)]
pub struct AppServices {
    config: Arc<ServiceConfig>,
    admission: Arc<AdmissionController>,
    shutdown: CancellationToken,
}

impl AppServices {
    /// Initialise all services from a validated configuration. Must be called
    /// inside a tokio runtime.
    pub fn init(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let archive = match &config.archive_path {
            Some(path) => {
                info!(path = %path.display(), "opening job archive");
                Some(Arc::new(JobArchive::open(path)?))
            }
            None => None,
        };

        let admission = Arc::new(AdmissionController::with_archive(
            config.clone(),
            capabilities(&config),
            archive,
        ));

        let shutdown = CancellationToken::new();
        admission
            .lifecycle()
            .spawn_eviction(EVICTION_INTERVAL, shutdown.clone());

        info!("app services initialised");
        Ok(Self {
            config,
            admission,
            shutdown,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn submit(&self, request: JobRequest) -> Result<Submission> {
        self.admission.submit(request).await
    }

    /// Poll until the job is terminal, logging progress between polls.
    pub async fn wait_until_finished(&self, id: &JobId, poll: Duration) -> Result<Job> {
        loop {
            let job = self.admission.wait(id, poll).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            let handle = self.admission.handle(id)?;
            info!(
                job_id = %id,
                status = %handle.status,
                queue_position = ?handle.queue_position,
                stages_done = job.stages.len(),
                "waiting for job"
            );
        }
    }

    /// Look up a job in memory or the archive.
    pub fn job(&self, id: &JobId) -> Result<Job> {
        self.admission.get(id)
    }

    pub fn health(&self) -> HealthReport {
        self.admission.health()
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Concrete capabilities named by the configuration.
fn capabilities(config: &ServiceConfig) -> Capabilities {
    let corrector: Option<Arc<dyn TextCorrector>> = if config.correction.is_available() {
        match OllamaCorrector::new(config.correction.host.clone()) {
            Ok(corrector) => Some(Arc::new(corrector)),
            Err(e) => {
                warn!(error = %e, "correction client unavailable, correction disabled");
                None
            }
        }
    } else {
        None
    };

    Capabilities {
        ocr: Arc::new(OcrMyPdf::new(config.ocr.program.clone())),
        detector: Arc::new(ScriptDetector),
        inspector: Arc::new(PdfInspector::new()),
        converter: Arc::new(CommandConverter::new(
            config.conversion.program.clone(),
            config.conversion.args.clone(),
        )),
        corrector,
    }
}
