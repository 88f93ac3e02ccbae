use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Pass-through backend for degraded mode. Never reports a detection, so every
/// frame reaches the sink unannotated.
#[derive(Default)]
pub struct NoopBackend;

impl NoopBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
