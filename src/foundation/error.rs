//! The crate-wide error type.

/// Convenience alias used by every fallible operation in the crate.
pub type FloeResult<T> = Result<T, FloeError>;

/// Error kinds surfaced by the codec and the compositing engine.
///
/// All errors propagate to the caller; none are recovered silently. A sparse
/// image that was the output of a failed operation is left partially written
/// and must not be forwarded.
#[derive(thiserror::Error, Debug)]
pub enum FloeError {
    /// Malformed input: size mismatch, bad format combination, or a corrupt
    /// sparse stream detected by the pixel-count check.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A legal call in the wrong state, e.g. blend compositing with a color
    /// format that has no alpha channel.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An internal invariant was violated; indicates a bug or corrupt memory.
    #[error("sanity check failed: {0}")]
    SanityCheck(String),

    /// An allocation or buffer reservation failed.
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// An error from an external collaborator, such as a transport backend.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FloeError {
    /// Construct an [`FloeError::InvalidValue`].
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Construct an [`FloeError::InvalidOperation`].
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Construct an [`FloeError::SanityCheck`].
    pub fn sanity_check(msg: impl Into<String>) -> Self {
        Self::SanityCheck(msg.into())
    }

    /// Construct an [`FloeError::OutOfResources`].
    pub fn out_of_resources(msg: impl Into<String>) -> Self {
        Self::OutOfResources(msg.into())
    }
}
