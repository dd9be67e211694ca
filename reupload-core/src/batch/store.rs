use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch job not found: {0}")]
    NotFound(String),
    #[error("batch job {0} is already completed")]
    AlreadyCompleted(String),
}

impl From<BatchError> for PipelineError {
    fn from(error: BatchError) -> Self {
        match error {
            BatchError::NotFound(id) => PipelineError::not_found("batch job", id),
            other => PipelineError::Validation {
                field: "job_id".into(),
                message: other.to_string(),
            },
        }
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchJob {
    pub job_id: String,
    pub status: JobStatus,
    pub total_videos: usize,
    pub processed_videos: usize,
    pub failed_videos: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub video_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn is_terminal(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn finished_items(&self) -> usize {
        self.processed_videos + self.failed_videos
    }
}

/// In-process registry of batch jobs. Every mutation happens under one lock.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, BatchJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BatchJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, total: usize) -> BatchJob {
        let now = Utc::now();
        let job = BatchJob {
            job_id: format!(
                "batch_{}_{}",
                now.format("%Y%m%d_%H%M%S"),
                &Uuid::new_v4().simple().to_string()[..8]
            ),
            status: JobStatus::Processing,
            total_videos: total,
            processed_videos: 0,
            failed_videos: 0,
            errors: Vec::new(),
            video_ids: Vec::new(),
            created_at: now,
            completed_at: None,
        };
        self.lock().insert(job.job_id.clone(), job.clone());
        job
    }

    pub fn get(&self, job_id: &str) -> BatchResult<BatchJob> {
        self.lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| BatchError::NotFound(job_id.to_string()))
    }

    pub fn record_success(&self, job_id: &str, video_id: &str) -> BatchResult<()> {
        self.update(job_id, |job| {
            job.processed_videos += 1;
            job.video_ids.push(video_id.to_string());
        })
    }

    pub fn record_failure(&self, job_id: &str, error: String) -> BatchResult<()> {
        self.update(job_id, |job| {
            job.failed_videos += 1;
            job.errors.push(error);
        })
    }

    pub fn complete(&self, job_id: &str) -> BatchResult<BatchJob> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| BatchError::NotFound(job_id.to_string()))?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut BatchJob)) -> BatchResult<()> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| BatchError::NotFound(job_id.to_string()))?;
        if job.is_terminal() {
            return Err(BatchError::AlreadyCompleted(job_id.to_string()));
        }
        apply(job);
        Ok(())
    }
}
