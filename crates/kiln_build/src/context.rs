//! Per-pass state shared by every build target of the pass.

use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_cache::CacheStore;
use kiln_common::{ContentHash, TargetId};
use kiln_config::{IncrementalPolicy, ResolvedKind};
use kiln_diagnostics::{Diagnostic, DiagnosticSink};

use crate::compiler::{CancellationToken, CompilerRegistry};
use crate::dirty::discover_sources;
use crate::error::GraphError;
use crate::graph::{BuildPlan, DependencyResolver};
use crate::model::{ModuleChunk, ModuleSet};
use crate::policy::PolicyTable;

/// Everything a build pass knows, created when the pass starts and consumed
/// when it ends. Nothing in here outlives the pass.
pub struct PassContext<'a> {
    /// The modules of the pass.
    pub modules: &'a ModuleSet,
    /// Dependency queries over `modules`.
    pub resolver: DependencyResolver<'a>,
    /// The chunks of the pass, in build order.
    pub plan: BuildPlan,
    /// Per-kind policies.
    pub policies: &'a PolicyTable,
    /// Compile backends.
    pub compilers: &'a CompilerRegistry,
    /// Persistent cache.
    pub store: &'a CacheStore,
    /// Cancellation flag of the pass.
    pub cancel: CancellationToken,
    /// Diagnostics collected during the pass.
    pub sink: DiagnosticSink,
    sources: BTreeMap<TargetId, Vec<PathBuf>>,
}

impl<'a> PassContext<'a> {
    /// Resolves and plans the module graph and discovers every module's
    /// source files.
    pub fn new(
        modules: &'a ModuleSet,
        policies: &'a PolicyTable,
        compilers: &'a CompilerRegistry,
        store: &'a CacheStore,
        cancel: CancellationToken,
        include_tests: bool,
    ) -> Result<Self, GraphError> {
        let resolver = DependencyResolver::new(modules);
        let plan = resolver.plan(include_tests)?;
        let sources = modules
            .modules()
            .map(|m| {
                let files = discover_sources(&m.source_roots, policies.get(m.kind));
                (m.id.clone(), files)
            })
            .collect();

        Ok(Self {
            modules,
            resolver,
            plan,
            policies,
            compilers,
            store,
            cancel,
            sink: DiagnosticSink::new(),
            sources,
        })
    }

    /// Current source files of `id`, sorted.
    pub fn sources(&self, id: &TargetId) -> &[PathBuf] {
        self.sources.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns `true` if `id` has at least one source file.
    pub fn has_sources(&self, id: &TargetId) -> bool {
        !self.sources(id).is_empty()
    }

    /// The classpath of `chunk`: compiled library roots, then the outputs of
    /// consumable upstream targets, then, for incremental kinds, the chunk's
    /// own destinations so previously compiled classes stay visible.
    pub fn classpath(&self, chunk: &ModuleChunk, policy: &ResolvedKind) -> Vec<PathBuf> {
        let mut classpath: Vec<PathBuf> = Vec::new();
        let mut push = |path: PathBuf| {
            if !classpath.contains(&path) {
                classpath.push(path);
            }
        };

        for member in &chunk.members {
            for root in self.resolver.library_roots(member) {
                push(root);
            }
        }
        for dir in self
            .resolver
            .dependency_output_dirs(chunk, self.policies, |id| self.has_sources(id))
        {
            push(dir);
        }
        if policy.incremental == IncrementalPolicy::Incremental {
            for member in &chunk.members {
                if let Some(module) = self.modules.get(member) {
                    push(module.destination.clone());
                }
            }
        }
        classpath
    }

    /// Fingerprint of the cached outputs of every target `member` depends on,
    /// as currently stored. Upstream chunks always finish before `chunk`
    /// starts, so the value is stable while `chunk` builds.
    pub fn upstream_fingerprint(&self, member: &TargetId, chunk: &ModuleChunk) -> ContentHash {
        let mut upstream = self.resolver.upstream_targets(member, chunk);
        upstream.sort();
        let mut bytes = Vec::new();
        for id in upstream {
            bytes.extend_from_slice(id.storage_key().as_bytes());
            bytes.push(0);
            for (path, digest) in &self.store.load(&id).outputs {
                bytes.extend_from_slice(path.to_string_lossy().as_bytes());
                bytes.push(0);
                bytes.extend_from_slice(digest.to_string().as_bytes());
                bytes.push(b'\n');
            }
        }
        ContentHash::from_bytes(&bytes)
    }

    /// Destinations of the chunk members, in member order.
    pub fn destinations(&self, chunk: &ModuleChunk) -> Vec<PathBuf> {
        chunk
            .members
            .iter()
            .filter_map(|m| self.modules.get(m))
            .map(|m| m.destination.clone())
            .collect()
    }

    /// Ends the pass, returning its diagnostics.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.sink.take_all()
    }
}
