//! Kind resolution: merging built-in kind defaults with `[kinds.<kind>]` overrides.

use crate::types::{CircularPolicy, CompileKind, IncrementalPolicy, ProjectConfig};

/// A fully resolved compilation kind policy.
///
/// Every policy field is filled in: values from `kiln.toml` win, the rest come
/// from the defaults of the kind (see [`ResolvedKind::defaults`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKind {
    /// The compilation kind this policy applies to.
    pub kind: CompileKind,
    /// How dirty chunks are recompiled.
    pub incremental: IncrementalPolicy,
    /// What happens to multi-module chunks.
    pub circular: CircularPolicy,
    /// Kinds whose outputs this kind places on its classpath.
    pub consumes: Vec<CompileKind>,
    /// Source file extensions; empty means every file.
    pub extensions: Vec<String>,
    /// Extra compiler options.
    pub options: Vec<String>,
    /// External compiler command line, empty when none is configured.
    pub command: Vec<String>,
    /// Output path templates of the external compiler.
    pub outputs: Vec<String>,
    /// Invoke the command once per source file.
    pub per_file: bool,
}

impl ResolvedKind {
    /// The built-in policy of a kind.
    ///
    /// Platform code compiles incrementally, compiles cycles together and sees
    /// both platform and metadata outputs. Metadata code recompiles fully,
    /// skips cycles with a warning and only sees other metadata outputs.
    pub fn defaults(kind: CompileKind) -> Self {
        let (incremental, circular, consumes) = match kind {
            CompileKind::Platform => (
                IncrementalPolicy::Incremental,
                CircularPolicy::CompileTogether,
                vec![CompileKind::Platform, CompileKind::Metadata],
            ),
            CompileKind::Metadata => (
                IncrementalPolicy::Full,
                CircularPolicy::ReportAndSkip,
                vec![CompileKind::Metadata],
            ),
        };
        Self {
            kind,
            incremental,
            circular,
            consumes,
            extensions: Vec::new(),
            options: Vec::new(),
            command: Vec::new(),
            outputs: Vec::new(),
            per_file: false,
        }
    }

    /// Returns `true` if outputs of `other` belong on this kind's classpath.
    pub fn consumes(&self, other: CompileKind) -> bool {
        self.consumes.contains(&other)
    }

    /// Returns `true` if `path` has one of the configured extensions.
    pub fn accepts(&self, path: &std::path::Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.trim_start_matches('.') == ext))
    }
}

/// Resolves the policy of `kind` by overlaying its `[kinds.<kind>]` table on
/// the built-in defaults.
pub fn resolve_kind(config: &ProjectConfig, kind: CompileKind) -> ResolvedKind {
    let mut resolved = ResolvedKind::defaults(kind);
    let Some(overrides) = config.kinds.get(kind.as_str()) else {
        return resolved;
    };

    if let Some(incremental) = overrides.incremental {
        resolved.incremental = incremental;
    }
    if let Some(circular) = overrides.circular {
        resolved.circular = circular;
    }
    if let Some(consumes) = &overrides.consumes {
        resolved.consumes = consumes.clone();
    }
    resolved.extensions = overrides.extensions.clone();
    resolved.options = overrides.options.clone();
    resolved.command = overrides.command.clone();
    resolved.outputs = overrides.outputs.clone();
    resolved.per_file = overrides.per_file;
    resolved
}
