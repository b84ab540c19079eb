//! The interface to compile backends.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_common::{KilnResult, TargetId};
use kiln_config::CompileKind;
use kiln_diagnostics::Diagnostic;

/// A shared flag requesting that a build pass stop.
///
/// Clones share the flag. The orchestrator checks it between chunks; backends
/// that compile file by file should check it between files.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a backend needs to compile one chunk.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Name of the chunk being compiled.
    pub chunk: String,
    /// Members of the chunk.
    pub members: Vec<TargetId>,
    /// Compilation kind of the chunk.
    pub kind: CompileKind,
    /// Source files to compile, sorted.
    pub sources: Vec<PathBuf>,
    /// Library roots and upstream output directories, in lookup order.
    pub classpath: Vec<PathBuf>,
    /// Directory outputs are written to.
    pub output_dir: PathBuf,
    /// Extra compiler options.
    pub options: Vec<String>,
    /// Cancellation flag of the pass.
    pub cancel: CancellationToken,
}

/// An output file and the sources it was generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Source files that produced the output. May be empty when unknown.
    pub sources: Vec<PathBuf>,
    /// The output file.
    pub output: PathBuf,
}

impl GeneratedFile {
    /// An output produced by a single source file.
    pub fn from_source(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            sources: vec![source.into()],
            output: output.into(),
        }
    }
}

/// Result of one compile invocation.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// `false` when the compiler reported errors.
    pub success: bool,
    /// Files written by the compiler.
    pub generated: Vec<GeneratedFile>,
    /// Messages reported by the compiler.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    /// A successful compile that produced `generated`.
    pub fn succeeded(generated: Vec<GeneratedFile>) -> Self {
        Self {
            success: true,
            generated,
            diagnostics: Vec::new(),
        }
    }

    /// A failed compile.
    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            generated: Vec::new(),
            diagnostics,
        }
    }
}

/// A compile backend.
///
/// Compile errors in the sources are reported through
/// [`CompileOutput::success`]; `Err` means the backend itself broke and
/// aborts the pass.
pub trait Compiler: Send + Sync {
    /// Compiles the request's sources into its output directory.
    fn compile(&self, request: &CompileRequest) -> KilnResult<CompileOutput>;
}

/// The backend registered for each compilation kind.
#[derive(Clone, Default)]
pub struct CompilerRegistry {
    compilers: BTreeMap<CompileKind, Arc<dyn Compiler>>,
}

impl CompilerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the backend for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: CompileKind, compiler: Arc<dyn Compiler>) {
        self.compilers.insert(kind, compiler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, kind: CompileKind, compiler: Arc<dyn Compiler>) -> Self {
        self.register(kind, compiler);
        self
    }

    /// The backend of `kind`, if one is registered.
    pub fn get(&self, kind: CompileKind) -> Option<&Arc<dyn Compiler>> {
        self.compilers.get(&kind)
    }
}

impl std::fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.compilers.keys()).finish()
    }
}
