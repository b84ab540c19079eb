//! Runs build passes over a module set.
//!
//! A pass plans the chunks, then drives every chunk's [`BuildTarget`] in
//! dependency order. Chunks downstream of a failure are skipped; chunks
//! downstream of a rebuild see all their files as dirty. In parallel mode the
//! chunks of one wave run concurrently on the rayon pool.

use std::collections::BTreeMap;
use std::time::Instant;

use kiln_cache::CacheStore;
use kiln_common::{KilnResult, TargetId};
use kiln_diagnostics::Diagnostic;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compiler::{CancellationToken, CompilerRegistry};
use crate::context::PassContext;
use crate::error::BuildError;
use crate::model::ModuleSet;
use crate::policy::PolicyTable;
use crate::target::{BuildTarget, ChunkReport, SkipReason, TargetState};

/// Terminal state of one target after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetOutcome {
    /// Compiled and cached.
    Done,
    /// Not compiled.
    Skipped(SkipReason),
    /// Compilation or cache update failed.
    Failed,
}

impl TargetOutcome {
    /// The outcome for a terminal `state`, or `None` if the state is not
    /// terminal.
    pub fn from_state(state: TargetState) -> Option<Self> {
        match state {
            TargetState::Done => Some(TargetOutcome::Done),
            TargetState::Skipped(reason) => Some(TargetOutcome::Skipped(reason)),
            TargetState::Failed => Some(TargetOutcome::Failed),
            _ => None,
        }
    }
}

/// Counters of a finished pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Chunks in the plan.
    pub chunks: usize,
    /// Chunks that reached `Done`.
    pub compiled: usize,
    /// Chunks that were skipped for any reason.
    pub skipped: usize,
    /// Chunks that failed.
    pub failed: usize,
    /// Source files handed to compile backends.
    pub files_compiled: usize,
    /// Wall-clock time of the pass.
    pub elapsed_ms: u64,
}

/// Result of a build pass.
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Terminal outcome of every selected target.
    pub outcomes: BTreeMap<TargetId, TargetOutcome>,
    /// States every target passed through, starting with `Pending`.
    pub transitions: BTreeMap<TargetId, Vec<TargetState>>,
    /// `false` if any target failed.
    pub success: bool,
    /// `true` if the pass was cancelled.
    pub cancelled: bool,
    /// Counters.
    pub stats: PassStats,
    /// Every diagnostic reported during the pass.
    pub diagnostics: Vec<Diagnostic>,
    /// Chunk names in build order.
    pub order: Vec<String>,
}

impl PassResult {
    /// The outcome of `id`, if it was part of the pass.
    pub fn outcome(&self, id: &TargetId) -> Option<TargetOutcome> {
        self.outcomes.get(id).copied()
    }

    /// Targets that failed, sorted.
    pub fn failed_targets(&self) -> Vec<&TargetId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == TargetOutcome::Failed)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Owns the cache, the policies and the backends, and runs passes.
pub struct BuildOrchestrator {
    store: CacheStore,
    policies: PolicyTable,
    compilers: CompilerRegistry,
    parallel: bool,
    cancel: CancellationToken,
}

impl BuildOrchestrator {
    /// Creates a sequential orchestrator.
    pub fn new(store: CacheStore, policies: PolicyTable, compilers: CompilerRegistry) -> Self {
        Self {
            store,
            policies,
            compilers,
            parallel: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Enables or disables building independent chunks concurrently.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// The token that cancels passes of this orchestrator. Cancelling it stops
    /// the current pass and every later one.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The persistent cache.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The per-kind policies.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Builds every production target of `modules`, and every test target as
    /// well when `tests` is set.
    ///
    /// Returns `Err` only for configuration problems, found before anything
    /// is compiled, and for internal errors. Compile failures are reported in
    /// the [`PassResult`].
    pub fn run_build_pass(&self, modules: &ModuleSet, tests: bool) -> Result<PassResult, BuildError> {
        let start = Instant::now();
        let ctx = PassContext::new(
            modules,
            &self.policies,
            &self.compilers,
            &self.store,
            self.cancel.clone(),
            tests,
        )?;
        info!(
            chunks = ctx.plan.len(),
            tests,
            parallel = self.parallel,
            "starting build pass"
        );

        let count = ctx.plan.len();
        let mut reports: Vec<Option<ChunkReport>> = vec![None; count];
        let mut propagates = vec![false; count];

        let batches: Vec<Vec<usize>> = if self.parallel {
            ctx.plan.waves().to_vec()
        } else {
            (0..count).map(|i| vec![i]).collect()
        };

        for batch in batches {
            let finished: Vec<(usize, KilnResult<ChunkReport>)> = if batch.len() > 1 {
                batch
                    .par_iter()
                    .map(|&i| (i, run_chunk(&ctx, i, &reports, &propagates)))
                    .collect()
            } else {
                batch
                    .iter()
                    .map(|&i| (i, run_chunk(&ctx, i, &reports, &propagates)))
                    .collect()
            };
            for (i, report) in finished {
                let report = report?;
                propagates[i] = report.rebuilt
                    || ctx.plan.upstream_of(i).iter().any(|&u| propagates[u]);
                reports[i] = Some(report);
            }
        }

        let order: Vec<String> = ctx.plan.chunks().iter().map(|c| c.to_string()).collect();
        let cancelled = ctx.cancel.is_cancelled();
        let diagnostics = ctx.into_diagnostics();
        let mut result = summarize(reports.into_iter().flatten(), diagnostics, order, cancelled);
        result.stats.elapsed_ms = start.elapsed().as_millis() as u64;

        if result.cancelled {
            warn!("build pass cancelled");
        }
        info!(
            compiled = result.stats.compiled,
            skipped = result.stats.skipped,
            failed = result.stats.failed,
            files = result.stats.files_compiled,
            elapsed_ms = result.stats.elapsed_ms,
            "build pass finished"
        );
        Ok(result)
    }
}

/// Runs chunk `index`, given the reports of the chunks finished so far.
fn run_chunk(
    ctx: &PassContext<'_>,
    index: usize,
    reports: &[Option<ChunkReport>],
    propagates: &[bool],
) -> KilnResult<ChunkReport> {
    let chunk = ctx.plan.chunks()[index].clone();
    let policy = ctx.policies.get(chunk.kind).clone();
    let target = BuildTarget::new(chunk, policy);
    let upstream = ctx.plan.upstream_of(index);

    let upstream_failed = upstream.iter().any(|&u| {
        matches!(
            reports[u].as_ref().map(|r| r.state),
            Some(TargetState::Failed | TargetState::Skipped(SkipReason::UpstreamFailed))
        )
    });
    if upstream_failed {
        debug!(chunk = %target.chunk(), "skipping, upstream failed");
        return target.skip(SkipReason::UpstreamFailed);
    }

    let upstream_rebuilt = upstream.iter().any(|&u| propagates[u]);
    target.run(ctx, upstream_rebuilt)
}

fn summarize(
    reports: impl Iterator<Item = ChunkReport>,
    diagnostics: Vec<Diagnostic>,
    order: Vec<String>,
    cancelled: bool,
) -> PassResult {
    let mut outcomes = BTreeMap::new();
    let mut transitions = BTreeMap::new();
    let mut stats = PassStats::default();

    for report in reports {
        stats.chunks += 1;
        stats.files_compiled += report.files_compiled;
        match report.state {
            TargetState::Done => stats.compiled += 1,
            TargetState::Skipped(_) => stats.skipped += 1,
            TargetState::Failed => stats.failed += 1,
            _ => {}
        }
        let Some(outcome) = TargetOutcome::from_state(report.state) else {
            continue;
        };
        for member in &report.chunk.members {
            outcomes.insert(member.clone(), outcome);
            transitions.insert(member.clone(), report.history.clone());
        }
    }

    PassResult {
        success: stats.failed == 0,
        outcomes,
        transitions,
        cancelled,
        stats,
        diagnostics,
        order,
    }
}
