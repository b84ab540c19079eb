//! Shared foundational types used across the Kiln build system.
//!
//! This crate provides content hashing, build target identities, and the
//! internal error type shared by every other crate in the workspace.

#![warn(missing_docs)]

pub mod hash;
pub mod id;
pub mod result;

pub use hash::ContentHash;
pub use id::TargetId;
pub use result::{InternalError, KilnResult};
