use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::backend::SharedBackend;
use super::backends::NoopBackend;
use super::result::{Detection, COCO_PERSON};
use crate::frame::Frame;

/// Default minimum confidence (exclusive) for a detection to be kept.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Per-job detection counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectorStats {
    /// Frames handed to the backend.
    pub frames_attempted: u64,
    /// Frames whose inference failed and were treated as empty.
    pub frames_failed: u64,
    /// Detections that survived filtering.
    pub detections_kept: u64,
}

/// Detector facing the pipeline: one shared backend plus the subject filter.
///
/// A backend failure on a frame is logged, counted and reported as "no
/// detections". It never reaches the caller as an error.
pub struct SubjectDetector {
    backend: SharedBackend,
    backend_name: &'static str,
    subject_class: u32,
    stats: DetectorStats,
}

impl SubjectDetector {
    pub fn new(backend: SharedBackend, subject_class: u32) -> Self {
        let backend_name = backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .name();
        Self {
            backend,
            backend_name,
            subject_class,
            stats: DetectorStats::default(),
        }
    }

    /// Degraded mode: detection disabled, frames pass through untouched.
    pub fn disabled() -> Self {
        Self::new(Arc::new(Mutex::new(NoopBackend::new())), COCO_PERSON)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn subject_class(&self) -> u32 {
        self.subject_class
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    /// Subjects in `frame` scoring above `confidence_threshold`, in backend order.
    ///
    /// A panicking backend is treated like a failing one. The panic is caught
    /// while the lock is still held, so the shared backend is not poisoned for
    /// other jobs.
    pub fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Vec<Detection> {
        self.stats.frames_attempted += 1;
        let raw = {
            let mut backend = self
                .backend
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            panic::catch_unwind(AssertUnwindSafe(|| backend.detect(frame))).unwrap_or_else(
                |payload| Err(anyhow!("backend panicked: {}", panic_message(payload.as_ref()))),
            )
        };

        match raw {
            Ok(raw) => {
                let kept = filter_subjects(raw, self.subject_class, confidence_threshold);
                self.stats.detections_kept += kept.len() as u64;
                kept
            }
            Err(err) => {
                self.stats.frames_failed += 1;
                log::warn!(
                    "detector '{}' failed on frame {}, continuing without detections: {:#}",
                    self.backend_name,
                    frame.index,
                    err
                );
                Vec::new()
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Keep detections of `subject_class` with confidence strictly above `threshold`,
/// preserving their relative order.
pub fn filter_subjects(raw: Vec<Detection>, subject_class: u32, threshold: f32) -> Vec<Detection> {
    raw.into_iter()
        .filter(|d| d.class_id == subject_class && d.confidence > threshold)
        .collect()
}
