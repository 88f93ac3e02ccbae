use anyhow::{anyhow, Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::job::{CancelToken, JobId, JobReport};
use super::runner::PipelineRunner;
use crate::detect::panic_message;
use crate::notify::JobEvent;

/// Starts jobs on their own OS threads. Cheap to clone; every clone shares the
/// same runner and therefore the same notifier and detector backend.
#[derive(Clone)]
pub struct JobRunner {
    runner: Arc<PipelineRunner>,
}

impl JobRunner {
    pub fn new(runner: PipelineRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }

    pub fn runner(&self) -> &PipelineRunner {
        &self.runner
    }

    /// Spawn `job_id` in the background. Progress and the terminal event are
    /// delivered through the notifier; the handle only exposes cancellation
    /// and the final report.
    pub fn start_job(
        &self,
        input: impl Into<String>,
        output: impl Into<String>,
        job_id: JobId,
    ) -> Result<JobHandle> {
        self.start_job_with_cancel(input, output, job_id, CancelToken::new())
    }

    /// Like [`start_job`](Self::start_job), but cancelled through a token the
    /// caller already holds. A token cancelled before the call fails the job
    /// before its first frame.
    ///
    /// A panic on the job thread is reported as `Failed` and turned into a
    /// failed report, so subscribers always see a terminal event.
    pub fn start_job_with_cancel(
        &self,
        input: impl Into<String>,
        output: impl Into<String>,
        job_id: JobId,
        cancel: CancelToken,
    ) -> Result<JobHandle> {
        let input = input.into();
        let output = output.into();

        let runner = self.runner.clone();
        let thread_cancel = cancel.clone();
        let thread_job = job_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("job-{}", job_id))
            .spawn(move || {
                let started = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    runner.run(&input, &output, &thread_job, &thread_cancel)
                }));
                outcome.unwrap_or_else(|payload| {
                    let message = format!("job panicked: {}", panic_message(payload.as_ref()));
                    log::error!("job {}: {}", thread_job, message);
                    runner.notifier().broadcast(&JobEvent::Failed {
                        job_id: thread_job.to_string(),
                        message: message.clone(),
                    });
                    JobReport::failed(thread_job, message, started.elapsed())
                })
            });

        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                let message = format!("failed to spawn job thread: {}", err);
                self.runner.notifier().broadcast(&JobEvent::Failed {
                    job_id: job_id.to_string(),
                    message: message.clone(),
                });
                return Err(anyhow!(message));
            }
        };

        log::debug!("job {}: started", job_id);
        Ok(JobHandle {
            job_id,
            cancel,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    cancel: CancelToken,
    join: Option<JoinHandle<JobReport>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Ask the job to stop at the next frame boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job, e.g. for a signal handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    pub fn join(mut self) -> Result<JobReport> {
        let join = self
            .join
            .take()
            .context("job handle already joined")?;
        join.join()
            .map_err(|_| anyhow!("job {} thread panicked", self.job_id))
    }
}
