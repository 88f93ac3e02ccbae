use thiserror::Error;

/// Fatal job errors. Anything not listed here (a detector failing on a frame,
/// an observer going away) is absorbed inside the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot open input '{path}': {detail}")]
    Open { path: String, detail: String },

    #[error("cannot create output '{path}': {detail}")]
    CreateOutput { path: String, detail: String },

    #[error("failed to decode frame {index}: {detail}")]
    Read { index: u64, detail: String },

    #[error("failed to write frame {index}: {detail}")]
    Write { index: u64, detail: String },

    #[error("failed to finalize output '{path}': {detail}")]
    Finalize { path: String, detail: String },

    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    pub(crate) fn open(path: &str, err: anyhow::Error) -> Self {
        Self::Open {
            path: path.to_string(),
            detail: format!("{:#}", err),
        }
    }

    pub(crate) fn create_output(path: &str, err: anyhow::Error) -> Self {
        Self::CreateOutput {
            path: path.to_string(),
            detail: format!("{:#}", err),
        }
    }

    pub(crate) fn read(index: u64, err: anyhow::Error) -> Self {
        Self::Read {
            index,
            detail: format!("{:#}", err),
        }
    }

    pub(crate) fn write(index: u64, err: anyhow::Error) -> Self {
        Self::Write {
            index,
            detail: format!("{:#}", err),
        }
    }

    pub(crate) fn finalize(path: &str, err: anyhow::Error) -> Self {
        Self::Finalize {
            path: path.to_string(),
            detail: format!("{:#}", err),
        }
    }

    /// True for errors raised before any frame was read.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::CreateOutput { .. })
    }
}
