use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::detect::DetectorStats;

// -------------------- Job identity --------------------

/// Opaque job identifier: 1..64 of `[A-Za-z0-9_-]`.
///
/// Job ids end up in log lines, file names and event payloads, so anything
/// outside the allowlist is rejected up front.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        static JOB_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = JOB_ID_RE
            .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok())
            .as_ref()
            .context("job id pattern failed to compile")?;
        if !re.is_match(&id) {
            return Err(anyhow!(
                "job id '{}' must match ^[A-Za-z0-9_-]{{1,64}}$",
                id
            ));
        }
        Ok(Self(id))
    }

    /// Random 128-bit id, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// -------------------- Cancellation --------------------

/// Cooperative cancellation flag, checked by the job between frames.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// -------------------- State --------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Completed { output_location: String },
    Failed { message: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// Mutable per-job bookkeeping, owned by the job's thread.
///
/// Status only moves forward: `Idle -> Running -> Completed | Failed`.
#[derive(Clone, Debug)]
pub struct JobState {
    pub job_id: JobId,
    /// Frame count reported by the container; 0 when unknown.
    pub total_frames: u64,
    pub frames_processed: u64,
    pub frames_sampled: u64,
    pub subjects_annotated: u64,
    pub progress_events: u64,
    pub last_progress_at: Option<Instant>,
    status: JobStatus,
}

impl JobState {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            total_frames: 0,
            frames_processed: 0,
            frames_sampled: 0,
            subjects_annotated: 0,
            progress_events: 0,
            last_progress_at: None,
            status: JobStatus::Idle,
        }
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn start(&mut self) -> bool {
        self.transition(JobStatus::Running)
    }

    pub fn complete(&mut self, output_location: &str) -> bool {
        self.transition(JobStatus::Completed {
            output_location: output_location.to_string(),
        })
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.transition(JobStatus::Failed {
            message: message.into(),
        })
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        let allowed = match (&self.status, &next) {
            (JobStatus::Idle, JobStatus::Running) => true,
            (JobStatus::Idle | JobStatus::Running, JobStatus::Failed { .. }) => true,
            (JobStatus::Running, JobStatus::Completed { .. }) => true,
            _ => false,
        };
        if allowed {
            self.status = next;
        } else {
            log::warn!(
                "job {}: ignoring transition {} -> {}",
                self.job_id,
                self.status.label(),
                next.label()
            );
        }
        allowed
    }
}

// -------------------- Report --------------------

/// Summary returned when a job thread finishes.
#[derive(Clone, Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_frames: u64,
    pub frames_processed: u64,
    pub frames_sampled: u64,
    pub subjects_annotated: u64,
    pub progress_events: u64,
    pub detector: DetectorStats,
    pub elapsed: Duration,
}

impl JobReport {
    pub(crate) fn from_state(state: JobState, detector: DetectorStats, elapsed: Duration) -> Self {
        Self {
            job_id: state.job_id,
            status: state.status,
            total_frames: state.total_frames,
            frames_processed: state.frames_processed,
            frames_sampled: state.frames_sampled,
            subjects_annotated: state.subjects_annotated,
            progress_events: state.progress_events,
            detector,
            elapsed,
        }
    }

    /// Report for a job whose thread died before producing its own.
    pub(crate) fn failed(job_id: JobId, message: impl Into<String>, elapsed: Duration) -> Self {
        let mut state = JobState::new(job_id);
        state.fail(message);
        Self::from_state(state, DetectorStats::default(), elapsed)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Completed { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { message } => Some(message),
            _ => None,
        }
    }
}
