use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::PipelineError;
use super::job::{CancelToken, JobId, JobReport, JobState};
use super::media::{FileMedia, MediaFactory};
use crate::annotate::Annotator;
use crate::detect::{SharedBackend, SubjectDetector, COCO_PERSON, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::ingest::FrameSource;
use crate::notify::{JobEvent, Notifier};
use crate::output::FrameSink;
use crate::progress::{progress_percent, ProgressThrottle, DEFAULT_PROGRESS_INTERVAL};

pub const DEFAULT_SAMPLING_STRIDE: u64 = 3;
pub const DEFAULT_YIELD_EVERY: u64 = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Detection runs on frames whose position is a multiple of this.
    pub sampling_stride: u64,
    /// Frames between scheduler yield hints.
    pub yield_every: u64,
    pub progress_interval: Duration,
    /// Exclusive lower bound on detection confidence.
    pub confidence_threshold: f32,
    pub subject_class: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling_stride: DEFAULT_SAMPLING_STRIDE,
            yield_every: DEFAULT_YIELD_EVERY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            subject_class: COCO_PERSON,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_stride == 0 {
            return Err(anyhow!("sampling_stride must be >= 1"));
        }
        if self.yield_every == 0 {
            return Err(anyhow!("yield_every must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Cooperative yield hint issued by long-running jobs.
pub trait Scheduler: Send + Sync {
    fn yield_now(&self);
}

/// OS-thread scheduler: `std::thread::yield_now`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadYield;

impl Scheduler for ThreadYield {
    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Runs one job to completion on the calling thread.
///
/// Events go to the shared `Notifier`: throttled progress below 100 while
/// frames flow, then either `Progress(100)` followed by `Completed`, or a
/// single `Failed`.
pub struct PipelineRunner {
    config: PipelineConfig,
    backend: SharedBackend,
    notifier: Arc<Notifier>,
    media: Arc<dyn MediaFactory>,
    scheduler: Arc<dyn Scheduler>,
    annotator: Annotator,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig, backend: SharedBackend, notifier: Arc<Notifier>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            notifier,
            media: Arc::new(FileMedia),
            scheduler: Arc::new(ThreadYield),
            annotator: Annotator::new(),
        })
    }

    pub fn with_media(mut self, media: Arc<dyn MediaFactory>) -> Self {
        self.media = media;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn run(&self, input: &str, output: &str, job_id: &JobId, cancel: &CancelToken) -> JobReport {
        let started = Instant::now();
        let mut state = JobState::new(job_id.clone());
        let mut detector = SubjectDetector::new(self.backend.clone(), self.config.subject_class);
        state.start();
        log::info!(
            "job {}: {} -> {} (detector={}, stride={})",
            job_id,
            input,
            output,
            detector.backend_name(),
            self.config.sampling_stride
        );

        match self.process(input, output, &mut state, &mut detector, cancel) {
            Ok(()) => {
                state.complete(output);
                self.emit_progress(&mut state, 100.0);
                self.emit(JobEvent::Completed {
                    job_id: job_id.to_string(),
                    output_location: output.to_string(),
                });
                log::info!(
                    "job {}: completed {} frames ({} sampled, {} subjects) in {:.2?}",
                    job_id,
                    state.frames_processed,
                    state.frames_sampled,
                    state.subjects_annotated,
                    started.elapsed()
                );
            }
            Err(err) => {
                let message = err.to_string();
                log::error!(
                    "job {}: failed after {} frames: {}",
                    job_id,
                    state.frames_processed,
                    message
                );
                state.fail(message.clone());
                self.emit(JobEvent::Failed {
                    job_id: job_id.to_string(),
                    message,
                });
            }
        }

        JobReport::from_state(state, detector.stats(), started.elapsed())
    }

    /// Open both ends, pump frames, close both ends. A loop error wins over a
    /// finalize error.
    fn process(
        &self,
        input: &str,
        output: &str,
        state: &mut JobState,
        detector: &mut SubjectDetector,
        cancel: &CancelToken,
    ) -> Result<(), PipelineError> {
        let mut source = self
            .media
            .open_source(input)
            .map_err(|err| PipelineError::open(input, err))?;
        let metadata = source.metadata();
        state.total_frames = metadata.total_frames;
        log::debug!(
            "job {}: input {}x{} @ {:.2} fps, {} frames",
            state.job_id,
            metadata.width,
            metadata.height,
            metadata.frame_rate,
            metadata.total_frames
        );

        let mut sink = match self.media.create_sink(output, &metadata) {
            Ok(sink) => sink,
            Err(err) => {
                source.close();
                return Err(PipelineError::create_output(output, err));
            }
        };

        let pumped = self.pump(source.as_mut(), sink.as_mut(), state, detector, cancel);
        source.close();
        let closed = sink
            .close()
            .map_err(|err| PipelineError::finalize(output, err));
        pumped?;
        closed
    }

    fn pump(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        state: &mut JobState,
        detector: &mut SubjectDetector,
        cancel: &CancelToken,
    ) -> Result<(), PipelineError> {
        let mut throttle = ProgressThrottle::new(self.config.progress_interval);
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let position = state.frames_processed;
            let mut frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(err) => return Err(PipelineError::read(position, err)),
            };

            if position % self.config.sampling_stride == 0 {
                state.frames_sampled += 1;
                let detections = detector.detect(&frame, self.config.confidence_threshold);
                let drawn = self.annotator.annotate(&mut frame, &detections);
                state.subjects_annotated += drawn as u64;
            }

            sink.write_frame(&frame)
                .map_err(|err| PipelineError::write(position, err))?;
            state.frames_processed += 1;

            if let Some(progress) = progress_percent(state.frames_processed, state.total_frames) {
                // 100 is reserved for the completion event.
                let now = Instant::now();
                if progress < 100.0 && throttle.try_emit(now) {
                    state.last_progress_at = Some(now);
                    self.emit_progress(state, progress);
                }
            }

            if state.frames_processed % self.config.yield_every == 0 {
                self.scheduler.yield_now();
            }
        }
    }

    fn emit_progress(&self, state: &mut JobState, progress: f64) {
        state.progress_events += 1;
        self.emit(JobEvent::Progress {
            job_id: state.job_id.to_string(),
            progress,
        });
    }

    fn emit(&self, event: JobEvent) {
        let delivered = self.notifier.broadcast(&event);
        log::trace!("job {}: event delivered to {} observers", event.job_id(), delivered);
    }
}
