//! Error types of a build pass.

use kiln_common::{InternalError, TargetId};

/// A problem with the module graph. Reported before anything is compiled.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A module depends on a module that does not exist.
    #[error("module '{module}' depends on unknown module '{dependency}'")]
    UnknownModule {
        /// The module declaring the dependency.
        module: String,
        /// The missing module.
        dependency: String,
    },

    /// A module depends on a library that does not exist.
    #[error("module '{module}' depends on unknown library '{library}'")]
    UnknownLibrary {
        /// The module declaring the dependency.
        module: String,
        /// The missing library.
        library: String,
    },

    /// A dependency cycle mixes compilation kinds.
    #[error("dependency cycle {chunk} mixes compilation kinds ({kinds})")]
    CrossKindCycle {
        /// Name of the offending chunk.
        chunk: String,
        /// The kinds found in the cycle.
        kinds: String,
    },

    /// The same target was added twice.
    #[error("duplicate module {0}")]
    DuplicateModule(TargetId),
}

/// Errors that abort a build pass.
///
/// Compile failures are not errors: they are reported as failed targets in
/// the pass result.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The module configuration is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(#[from] GraphError),

    /// Something went wrong that no project configuration can explain.
    #[error(transparent)]
    Internal(#[from] InternalError),
}
