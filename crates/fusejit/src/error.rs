use thiserror::Error;

/// Failures surfaced by kernel generation and dispatch.
///
/// `ArgumentOverflow` and `ThreadgroupMismatch` are fatal configuration
/// errors: the operation is aborted with no retry and no partial dispatch.
/// Everything else is a collaborator or validation failure propagated as-is.
#[derive(Debug, Error)]
pub enum FuseError {
    /// The fused computation binds more resources than the device exposes
    /// argument slots for. Detected at source-generation time, before any
    /// compilation or dispatch.
    #[error(
        "too many inputs/outputs fused in kernel '{kernel}': \
         {bound} argument slots bound, the device limit is {limit}"
    )]
    ArgumentOverflow {
        kernel: String,
        bound: usize,
        limit: usize,
    },

    /// The strided dispatch path requires the pipeline to report a fixed
    /// threadgroup capacity; any other value is a backend inconsistency.
    #[error(
        "kernel '{kernel}' must run with a {expected}-thread threadgroup, \
         the pipeline reports {actual}"
    )]
    ThreadgroupMismatch {
        kernel: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid fused computation: {0}")]
    Invalid(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Execution(String),
}

impl FuseError {
    pub fn invalid(message: impl Into<String>) -> Self {
        FuseError::Invalid(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        FuseError::Unsupported(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        FuseError::Execution(message.into())
    }
}

/// Convenience alias for results returned by fusion routines.
pub type FuseResult<T> = Result<T, FuseError>;
