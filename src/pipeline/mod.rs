//! Job orchestration.
//!
//! A job reads every frame of one input, runs detection on sampled frames,
//! draws overlays, re-encodes everything into the output and reports progress
//! through the shared `Notifier`. `JobRunner` puts each job on its own thread.

mod error;
mod job;
mod media;
mod runner;
mod worker;

pub use error::PipelineError;
pub use job::{CancelToken, JobId, JobReport, JobState, JobStatus};
pub use media::{FileMedia, MediaFactory};
pub use runner::{
    PipelineConfig, PipelineRunner, Scheduler, ThreadYield, DEFAULT_SAMPLING_STRIDE,
    DEFAULT_YIELD_EVERY,
};
pub use worker::{JobHandle, JobRunner};
