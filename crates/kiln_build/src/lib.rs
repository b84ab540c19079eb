//! Incremental chunk builds over a module graph.
//!
//! A build pass partitions the selected targets into [`ModuleChunk`]s (the
//! strongly connected components of the dependency graph), orders them, and
//! drives one [`BuildTarget`] per chunk through its state machine. Each target
//! compares its sources against the cached snapshot, hands the dirty ones to
//! the [`Compiler`] of its compilation kind, and records the new outputs.
//!
//! The entry point is [`BuildOrchestrator::run_build_pass`].

#![warn(missing_docs)]

pub mod compiler;
pub mod context;
pub mod dirty;
pub mod error;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod target;

pub use compiler::{
    CancellationToken, CompileOutput, CompileRequest, Compiler, CompilerRegistry, GeneratedFile,
};
pub use context::PassContext;
pub use dirty::{classify, discover_sources, DirtyFile, DirtyFilesHolder, DirtyReason, MemberFiles};
pub use error::{BuildError, GraphError};
pub use graph::{BuildPlan, DependencyResolver};
pub use model::{destination, Library, LibraryRoot, Module, ModuleChunk, ModuleSet, RootKind};
pub use orchestrator::{BuildOrchestrator, PassResult, PassStats, TargetOutcome};
pub use policy::PolicyTable;
pub use target::{BuildTarget, ChunkReport, SkipReason, TargetState};
