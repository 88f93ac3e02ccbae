mod backend;
mod backends;
mod registry;
mod result;
mod subject;

pub use backend::{DetectorBackend, SharedBackend};
pub use backends::NoopBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{Detection, COCO_PERSON};
pub(crate) use subject::panic_message;
pub use subject::{filter_subjects, DetectorStats, SubjectDetector, DEFAULT_CONFIDENCE_THRESHOLD};
