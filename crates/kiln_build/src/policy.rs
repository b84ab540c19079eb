//! The per-kind policy table.
//!
//! Kinds do not override behavior; every difference between them is a row in
//! this table, looked up by the build target at each decision point.

use std::collections::BTreeMap;

use kiln_config::{resolve_kind, CompileKind, ProjectConfig, ResolvedKind};

/// Resolved policy of every compilation kind.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    kinds: BTreeMap<CompileKind, ResolvedKind>,
}

impl PolicyTable {
    /// The built-in policies.
    pub fn defaults() -> Self {
        Self {
            kinds: CompileKind::ALL
                .into_iter()
                .map(|k| (k, ResolvedKind::defaults(k)))
                .collect(),
        }
    }

    /// Policies with the `[kinds.*]` overrides of a project applied.
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            kinds: CompileKind::ALL
                .into_iter()
                .map(|k| (k, resolve_kind(config, k)))
                .collect(),
        }
    }

    /// Replaces the policy of one kind.
    pub fn with(mut self, policy: ResolvedKind) -> Self {
        self.kinds.insert(policy.kind, policy);
        self
    }

    /// The policy of `kind`.
    pub fn get(&self, kind: CompileKind) -> &ResolvedKind {
        // Every kind is inserted by both constructors.
        &self.kinds[&kind]
    }

    /// All policies, ordered by kind.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedKind> {
        self.kinds.values()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::defaults()
    }
}
