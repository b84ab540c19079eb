//! Common result and error types for the Kiln build system.

/// The standard result type for fallible internal operations.
///
/// `Err` indicates an unrecoverable internal error (a bug in Kiln or a broken
/// environment), not a user-facing build failure. Compile failures are
/// reported as target outcomes and diagnostics while the pass still returns `Ok`.
pub type KilnResult<T> = Result<T, InternalError>;

/// An internal error that aborts the current build pass.
#[derive(Debug, thiserror::Error)]
#[error("internal build error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
