//! vidmark
//!
//! Annotates people in video files. A job reads every frame of an input file,
//! runs a subject detector on every Nth frame, circles each detection above the
//! confidence threshold, and re-encodes all frames into an MPEG-4 output at the
//! input's resolution and frame rate. Progress and the job outcome are
//! broadcast to every registered observer.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames and stream metadata
//! - `ingest`: frame sources (local files, `stub://` synthetic clips)
//! - `detect`: detector backends, registry and the subject filter
//! - `annotate`: circle overlays
//! - `output`: frame sinks (MPEG-4 encoder, `stub://` digest sink)
//! - `progress`: wall-clock throttling of progress events
//! - `notify`: job events and the process-wide broadcaster
//! - `pipeline`: the per-job loop, job ids, cancellation and threads
//! - `config`: TOML configuration with `VIDMARK_*` overrides
//! - `ui`: terminal progress for the command-line front end

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod ui;

pub use annotate::{bounding_circle, Annotator, Circle};
pub use config::VidmarkConfig;
pub use detect::{
    BackendRegistry, Detection, DetectorBackend, SharedBackend, SubjectDetector, COCO_PERSON,
};
pub use frame::{Frame, VideoMetadata};
pub use ingest::{FileSource, FrameSource};
pub use notify::{EventObserver, JobEvent, Notifier, ObserverId};
pub use output::{FileSink, FrameSink};
pub use pipeline::{
    CancelToken, JobHandle, JobId, JobReport, JobRunner, JobStatus, PipelineConfig,
    PipelineError, PipelineRunner,
};
pub use progress::ProgressThrottle;
