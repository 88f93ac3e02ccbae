use anyhow::Result;

use crate::frame::VideoMetadata;
use crate::ingest::{FileSource, FrameSource};
use crate::output::{FileSink, FrameSink};

/// Opens the source and sink for a job.
///
/// The runner only talks to `FrameSource`/`FrameSink`, so tests and embedders
/// can swap the container layer out.
pub trait MediaFactory: Send + Sync {
    fn open_source(&self, input: &str) -> Result<Box<dyn FrameSource>>;

    /// Create a sink matching the input's resolution and frame rate.
    fn create_sink(&self, output: &str, metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>>;
}

/// Local files (and `stub://` locators) via `FileSource` and `FileSink`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileMedia;

impl MediaFactory for FileMedia {
    fn open_source(&self, input: &str) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FileSource::open(input)?))
    }

    fn create_sink(&self, output: &str, metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FileSink::create(
            output,
            metadata.width,
            metadata.height,
            metadata.frame_rate,
        )?))
    }
}
