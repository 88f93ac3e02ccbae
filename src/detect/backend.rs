use anyhow::Result;
use std::sync::{Arc, Mutex};

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend handle shared by concurrent jobs. Inference is serialised on the lock.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Detector backend trait.
///
/// A backend wraps one loaded classifier. It returns every box the classifier
/// produced; class and confidence filtering happen in `SubjectDetector`.
pub trait DetectorBackend: Send {
    /// Backend identifier, matched against `detector.backend` in configuration.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// The frame is borrowed for the duration of the call only. An error means
    /// this frame produced no usable result; it never aborts a job.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
