//! Dependency graph resolution and chunk planning.
//!
//! Targets form a directed graph with an edge from every upstream target to
//! each target that depends on it. Strongly connected components of that
//! graph become [`ModuleChunk`]s, and the condensed DAG of chunks is ordered
//! with Kahn's algorithm (ties broken by chunk name) and grouped into waves
//! of mutually independent chunks.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use kiln_common::TargetId;
use kiln_config::CompileKind;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::GraphError;
use crate::model::{ModuleChunk, ModuleSet};
use crate::policy::PolicyTable;

/// Answers dependency questions about a module set.
pub struct DependencyResolver<'a> {
    modules: &'a ModuleSet,
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver over `modules`.
    pub fn new(modules: &'a ModuleSet) -> Self {
        Self { modules }
    }

    /// Checks that every referenced module and library exists.
    pub fn validate(&self) -> Result<(), GraphError> {
        for module in self.modules.modules() {
            for dep in &module.dependencies {
                if !self.modules.has_module_named(dep) {
                    return Err(GraphError::UnknownModule {
                        module: module.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
            for lib in &module.libraries {
                if self.modules.library(lib).is_none() {
                    return Err(GraphError::UnknownLibrary {
                        module: module.name().to_string(),
                        library: lib.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Names of the modules reachable from `id` through dependencies, in
    /// breadth-first, first-seen order.
    ///
    /// Past the first hop the production dependencies are followed: test
    /// dependencies are not exported.
    pub fn reachable_modules(&self, id: &TargetId) -> Vec<&'a str> {
        let Some(start) = self.modules.get(id) else {
            return Vec::new();
        };
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = start.dependencies.iter().map(String::as_str).collect();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            order.push(name);
            if let Some(dep) = self.modules.get(&TargetId::production(name)) {
                queue.extend(dep.dependencies.iter().map(String::as_str));
            }
        }
        order
    }

    /// Compiled library roots visible to `id`: its own libraries followed by
    /// those of every reachable module, de-duplicated in first-seen order.
    pub fn library_roots(&self, id: &TargetId) -> Vec<PathBuf> {
        let Some(module) = self.modules.get(id) else {
            return Vec::new();
        };
        let mut library_names: Vec<&str> = module.libraries.iter().map(String::as_str).collect();
        for name in self.reachable_modules(id) {
            if let Some(dep) = self.modules.get(&TargetId::production(name)) {
                library_names.extend(dep.libraries.iter().map(String::as_str));
            }
        }

        let mut seen = HashSet::new();
        let mut roots = Vec::new();
        for name in library_names {
            let Some(library) = self.modules.library(name) else {
                continue;
            };
            for root in library.compiled_roots() {
                if seen.insert(root.to_path_buf()) {
                    roots.push(root.to_path_buf());
                }
            }
        }
        roots
    }

    /// Targets whose output `id` compiles against.
    ///
    /// For every reachable module its production target, and for a test
    /// module also the test target when one exists. `id` itself and the
    /// members of `chunk` are excluded: chunk members compile together from
    /// source.
    pub fn upstream_targets(&self, id: &TargetId, chunk: &ModuleChunk) -> Vec<TargetId> {
        self.collect_targets(id, self.reachable_modules(id), chunk)
    }

    /// The targets `id` directly depends on, ignoring chunk membership.
    pub fn direct_upstream(&self, id: &TargetId) -> Vec<TargetId> {
        let Some(module) = self.modules.get(id) else {
            return Vec::new();
        };
        let names = module.dependencies.iter().map(String::as_str).collect();
        self.collect_targets(id, names, &ModuleChunk::new(Vec::new(), module.kind))
    }

    fn collect_targets(&self, id: &TargetId, names: Vec<&str>, chunk: &ModuleChunk) -> Vec<TargetId> {
        let mut targets = Vec::new();
        for name in names {
            let mut candidates = vec![TargetId::production(name)];
            if id.tests {
                candidates.push(TargetId::test(name));
            }
            for candidate in candidates {
                if &candidate == id
                    || chunk.contains(&candidate)
                    || self.modules.get(&candidate).is_none()
                    || targets.contains(&candidate)
                {
                    continue;
                }
                targets.push(candidate);
            }
        }
        targets
    }

    /// Output directories of the upstream targets of `chunk` whose kind the
    /// chunk's kind consumes and for which `has_sources` holds.
    pub fn dependency_output_dirs(
        &self,
        chunk: &ModuleChunk,
        policies: &PolicyTable,
        has_sources: impl Fn(&TargetId) -> bool,
    ) -> Vec<PathBuf> {
        let policy = policies.get(chunk.kind);
        let mut dirs: Vec<PathBuf> = Vec::new();
        for member in &chunk.members {
            for upstream in self.upstream_targets(member, chunk) {
                let Some(module) = self.modules.get(&upstream) else {
                    continue;
                };
                if !policy.consumes(module.kind) || !has_sources(&upstream) {
                    continue;
                }
                if !dirs.contains(&module.destination) {
                    dirs.push(module.destination.clone());
                }
            }
        }
        dirs
    }

    /// Partitions the selected targets into chunks and orders them.
    ///
    /// Test targets are only selected when `include_tests` is set.
    pub fn plan(&self, include_tests: bool) -> Result<BuildPlan, GraphError> {
        self.validate()?;

        let mut graph: DiGraph<TargetId, ()> = DiGraph::new();
        let mut indices: HashMap<TargetId, NodeIndex> = HashMap::new();
        for module in self.modules.modules() {
            if module.is_tests() && !include_tests {
                continue;
            }
            let idx = graph.add_node(module.id.clone());
            indices.insert(module.id.clone(), idx);
        }
        for (id, &to) in &indices {
            for upstream in self.direct_upstream(id) {
                if let Some(&from) = indices.get(&upstream) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let mut chunks = Vec::new();
        let mut chunk_of: HashMap<NodeIndex, usize> = HashMap::new();
        for component in tarjan_scc(&graph) {
            let members: Vec<TargetId> = component.iter().map(|&n| graph[n].clone()).collect();
            let kinds: BTreeSet<CompileKind> = members
                .iter()
                .filter_map(|m| self.modules.get(m).map(|module| module.kind))
                .collect();
            let kind = kinds.iter().next().copied().unwrap_or_default();
            let chunk = ModuleChunk::new(members, kind);
            if kinds.len() > 1 {
                let kinds: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
                return Err(GraphError::CrossKindCycle {
                    chunk: chunk.to_string(),
                    kinds: kinds.join(", "),
                });
            }
            for n in component {
                chunk_of.insert(n, chunks.len());
            }
            chunks.push(chunk);
        }

        let mut upstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); chunks.len()];
        for edge in graph.raw_edges() {
            let from = chunk_of[&edge.source()];
            let to = chunk_of[&edge.target()];
            if from != to {
                upstream[to].insert(from);
            }
        }

        Ok(BuildPlan::order(chunks, upstream))
    }
}

/// Chunks in build order, with their dependencies and parallel waves.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    chunks: Vec<ModuleChunk>,
    upstream: Vec<Vec<usize>>,
    waves: Vec<Vec<usize>>,
}

impl BuildPlan {
    /// Orders chunks with Kahn's algorithm. Among ready chunks the one with
    /// the smallest (name, role) comes first.
    fn order(chunks: Vec<ModuleChunk>, upstream: Vec<BTreeSet<usize>>) -> Self {
        let key = |i: usize| (chunks[i].name(), chunks[i].is_tests(), i);

        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); chunks.len()];
        for (to, ups) in upstream.iter().enumerate() {
            for &from in ups {
                downstream[from].push(to);
            }
        }
        let mut in_degree: Vec<usize> = upstream.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<(String, bool, usize)> = (0..chunks.len())
            .filter(|&i| in_degree[i] == 0)
            .map(key)
            .collect();

        let mut order = Vec::with_capacity(chunks.len());
        while let Some(first) = ready.pop_first() {
            let current = first.2;
            order.push(current);
            for &next in &downstream[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(key(next));
                }
            }
        }

        // Chunks are strongly connected components, so the condensed graph is
        // acyclic and every chunk is ordered.
        let mut position = vec![0; chunks.len()];
        for (pos, &old) in order.iter().enumerate() {
            position[old] = pos;
        }

        let mut slots: Vec<Option<ModuleChunk>> = chunks.into_iter().map(Some).collect();
        let ordered: Vec<ModuleChunk> = order.iter().filter_map(|&old| slots[old].take()).collect();
        let ordered_upstream: Vec<Vec<usize>> = order
            .iter()
            .map(|&old| {
                let mut ups: Vec<usize> = upstream[old].iter().map(|&u| position[u]).collect();
                ups.sort_unstable();
                ups
            })
            .collect();

        let mut level = vec![0usize; ordered.len()];
        for i in 0..ordered.len() {
            level[i] = ordered_upstream[i]
                .iter()
                .map(|&u| level[u] + 1)
                .max()
                .unwrap_or(0);
        }
        let wave_count = level.iter().max().map_or(0, |m| m + 1);
        let mut waves: Vec<Vec<usize>> = vec![Vec::new(); wave_count];
        for (i, &l) in level.iter().enumerate() {
            waves[l].push(i);
        }

        Self {
            chunks: ordered,
            upstream: ordered_upstream,
            waves,
        }
    }

    /// Chunks in build order. Every chunk comes after all chunks it depends on.
    pub fn chunks(&self) -> &[ModuleChunk] {
        &self.chunks
    }

    /// Positions of the chunks that chunk `index` directly depends on.
    pub fn upstream_of(&self, index: usize) -> &[usize] {
        &self.upstream[index]
    }

    /// Groups of chunk positions that may be built concurrently. Every chunk
    /// of a wave depends only on chunks of earlier waves.
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// Position of the chunk containing `id`.
    pub fn chunk_index(&self, id: &TargetId) -> Option<usize> {
        self.chunks.iter().position(|c| c.contains(id))
    }

    /// Positions of every chunk that depends on chunk `index`, directly or
    /// transitively.
    pub fn downstream_of(&self, index: usize) -> Vec<usize> {
        let mut affected = vec![false; self.chunks.len()];
        affected[index] = true;
        let mut result = Vec::new();
        for i in index + 1..self.chunks.len() {
            if self.upstream[i].iter().any(|&u| affected[u]) {
                affected[i] = true;
                result.push(i);
            }
        }
        result
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if there is nothing to build.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
