//! Job lifecycle tracking.
//!
//! [`JobTracker`] creates jobs and answers status queries. All mutation of a
//! running job goes through its [`JobWriter`], a non-cloneable lease: at most
//! one writer exists per job, so progress updates are serialized.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use caseforge_core::{
    Error, EventBus, JobRepository, JobStatus, JobStatusReport, JobType, Phase, PipelineEvent,
    ProcessingJob, Result, TestCategory,
};

type Leases = Arc<Mutex<HashSet<Uuid>>>;

fn lock_leases(leases: &Leases) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Creates jobs, hands out writer leases and reports status.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<dyn JobRepository>,
    events: EventBus,
    leases: Leases,
}

impl JobTracker {
    pub fn new(jobs: Arc<dyn JobRepository>, events: EventBus) -> Self {
        Self {
            jobs,
            events,
            leases: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a pending job. Fails with `ConcurrencyViolation` while another
    /// job of the same type is active for the document.
    pub async fn create(&self, document_id: Uuid, job_type: JobType) -> Result<ProcessingJob> {
        let job = self.jobs.create_exclusive(document_id, job_type).await?;
        info!(
            subsystem = "jobs",
            component = "tracker",
            job_id = %job.id,
            %document_id,
            %job_type,
            "Job queued"
        );
        self.events.emit(PipelineEvent::JobQueued {
            job_id: job.id,
            document_id,
            job_type,
        });
        Ok(job)
    }

    /// Take the writer lease for `job`.
    pub fn writer(&self, job: &ProcessingJob) -> Result<JobWriter> {
        if !lock_leases(&self.leases).insert(job.id) {
            return Err(Error::ConcurrencyViolation {
                document_id: job.document_id,
                job_type: job.job_type.to_string(),
            });
        }
        Ok(JobWriter {
            job_id: job.id,
            document_id: job.document_id,
            job_type: job.job_type,
            jobs: self.jobs.clone(),
            events: self.events.clone(),
            leases: self.leases.clone(),
            started: Instant::now(),
            last_progress: job.progress_percent,
        })
    }

    /// Whether a writer lease is currently held for the job.
    pub fn is_leased(&self, job_id: Uuid) -> bool {
        lock_leases(&self.leases).contains(&job_id)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<ProcessingJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusReport> {
        Ok(self.get(job_id).await?.report())
    }

    pub async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>> {
        self.jobs.list_for_document(document_id).await
    }

    /// Request cancellation.
    ///
    /// The job is marked cancelled immediately; the running task notices at
    /// its next phase boundary. Returns false when the job was already terminal.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let job = self.get(job_id).await?;
        let cancelled = self.jobs.cancel(job_id).await?;
        if cancelled {
            info!(
                subsystem = "jobs",
                component = "tracker",
                %job_id,
                job_type = %job.job_type,
                "Job cancellation requested"
            );
            self.events.emit(PipelineEvent::JobCancelled {
                job_id,
                job_type: job.job_type,
            });
        } else {
            debug!(%job_id, status = job.status.as_str(), "Cancel ignored for terminal job");
        }
        Ok(cancelled)
    }
}

/// Exclusive handle for mutating one running job. Dropping it releases the lease.
pub struct JobWriter {
    job_id: Uuid,
    document_id: Uuid,
    job_type: JobType,
    jobs: Arc<dyn JobRepository>,
    events: EventBus,
    leases: Leases,
    started: Instant,
    last_progress: i32,
}

impl JobWriter {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Highest progress reported through this writer.
    pub fn progress_value(&self) -> i32 {
        self.last_progress
    }

    /// Move the job from pending to processing.
    pub async fn start(&mut self) -> Result<bool> {
        self.started = Instant::now();
        let started = self.jobs.mark_processing(self.job_id).await?;
        if started {
            info!(
                subsystem = "jobs",
                component = "tracker",
                job_id = %self.job_id,
                document_id = %self.document_id,
                job_type = %self.job_type,
                "Job started"
            );
            self.events.emit(PipelineEvent::JobStarted {
                job_id: self.job_id,
                document_id: self.document_id,
                job_type: self.job_type,
            });
        }
        Ok(started)
    }

    pub fn phase(&self, phase: Phase) {
        debug!(job_id = %self.job_id, phase = phase.as_str(), "Phase changed");
        self.events.emit(PipelineEvent::PhaseChanged {
            job_id: self.job_id,
            phase,
        });
    }

    pub fn category_generated(&self, category: TestCategory, accepted: usize, required: usize) {
        self.events.emit(PipelineEvent::CategoryGenerated {
            job_id: self.job_id,
            category,
            accepted,
            required,
        });
    }

    /// Raise progress. Values at or below the last reported one are ignored.
    pub async fn progress(&mut self, percent: i32, message: Option<&str>) -> Result<()> {
        let percent = percent.clamp(0, 100);
        if percent <= self.last_progress {
            return Ok(());
        }
        self.jobs
            .update_progress(self.job_id, percent, message)
            .await?;
        self.last_progress = percent;
        self.events.emit(PipelineEvent::JobProgress {
            job_id: self.job_id,
            progress: percent,
            message: message.map(String::from),
        });
        Ok(())
    }

    pub async fn set_total_items(&self, total: usize) -> Result<()> {
        self.jobs
            .set_total_items(self.job_id, total as i32)
            .await
    }

    /// Fails with `Cancelled` once the job has been cancelled.
    pub async fn check_cancelled(&self) -> Result<()> {
        let status = self
            .jobs
            .get(self.job_id)
            .await?
            .map(|job| job.status)
            .ok_or(Error::JobNotFound(self.job_id))?;
        if status == JobStatus::Cancelled {
            return Err(Error::Cancelled(format!("job {} was cancelled", self.job_id)));
        }
        Ok(())
    }

    fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    /// Mark the job completed. Returns false if it was already terminal.
    pub async fn complete(self, result: Option<JsonValue>) -> Result<bool> {
        let completed = self.jobs.complete(self.job_id, result).await?;
        let duration_ms = self.elapsed_ms();
        if completed {
            info!(
                subsystem = "jobs",
                component = "tracker",
                job_id = %self.job_id,
                job_type = %self.job_type,
                duration_ms,
                "Job completed"
            );
            self.events.emit(PipelineEvent::JobCompleted {
                job_id: self.job_id,
                job_type: self.job_type,
                duration_ms,
            });
        }
        Ok(completed)
    }

    /// Mark the job failed with `error` as its root cause. A job that already
    /// holds an error message keeps it.
    pub async fn fail(self, error: &Error, result: Option<JsonValue>) -> Result<bool> {
        let message = error.to_string();
        let failed = self.jobs.fail(self.job_id, &message, result).await?;
        if failed {
            warn!(
                subsystem = "jobs",
                component = "tracker",
                job_id = %self.job_id,
                job_type = %self.job_type,
                error = %message,
                duration_ms = self.elapsed_ms(),
                "Job failed"
            );
            self.events.emit(PipelineEvent::JobFailed {
                job_id: self.job_id,
                job_type: self.job_type,
                error: message,
            });
        }
        Ok(failed)
    }

    /// Acknowledge a cancellation noticed by the running task.
    pub async fn finish_cancelled(self) -> Result<bool> {
        let transitioned = self.jobs.cancel(self.job_id).await?;
        if transitioned {
            self.events.emit(PipelineEvent::JobCancelled {
                job_id: self.job_id,
                job_type: self.job_type,
            });
        }
        info!(
            subsystem = "jobs",
            component = "tracker",
            job_id = %self.job_id,
            job_type = %self.job_type,
            duration_ms = self.elapsed_ms(),
            "Job cancelled"
        );
        Ok(transitioned)
    }
}

impl Drop for JobWriter {
    fn drop(&mut self) {
        lock_leases(&self.leases).remove(&self.job_id);
    }
}
