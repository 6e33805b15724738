//! Error taxonomy shared by every backend and the layers above.

use thiserror::Error;

/// Unified error type for the rendering runtime.
///
/// `SwapchainOutOfDate` is the only recoverable kind: the caller rebuilds the
/// swapchain and render graph and resumes on the next frame. Everything else
/// surfaces to the application.
#[derive(Debug, Error)]
pub enum RhiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("staging upload of {requested} bytes exceeds ring capacity of {capacity} bytes")]
    StagingOverflow { requested: u64, capacity: u64 },

    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    #[error("device lost")]
    DeviceLost,

    #[error("cyclic render graph: {0}")]
    CyclicGraph(String),

    #[error("invalid command buffer state: {0}")]
    InvalidState(String),

    #[error("backend: {0}")]
    Backend(String),
}

pub type RhiResult<T> = Result<T, RhiError>;

impl RhiError {
    /// Helper for the common case of rejecting a bad create/update argument.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        RhiError::InvalidArgument(msg.into())
    }

    /// Helper for command-recording contract violations.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        RhiError::InvalidState(msg.into())
    }
}
