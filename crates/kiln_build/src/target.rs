//! Build targets and their state machine.
//!
//! ```text
//! Pending ──> CheckingDirty ──> Compiling ──> UpdatingCache ──> Done
//!    │              │               │               │
//!    │              └─> Skipped     ├─> Failed <────┘
//!    └─> Skipped                    └─> Skipped (cancelled)
//! ```
//!
//! Every difference between compilation kinds comes from the target's
//! [`ResolvedKind`] row of the policy table; the transitions are the same for
//! all kinds.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use kiln_cache::{hash_file, CacheError, CacheSnapshot};
use kiln_common::{ContentHash, InternalError, KilnResult};
use kiln_config::{CircularPolicy, IncrementalPolicy, ResolvedKind};
use kiln_diagnostics::Diagnostic;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compiler::{CompileOutput, CompileRequest, GeneratedFile};
use crate::context::PassContext;
use crate::dirty::{classify, is_within, DirtyFilesHolder, MemberFiles};
use crate::model::ModuleChunk;

/// Why a target was not compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// No file is dirty or removed and nothing upstream was rebuilt.
    UpToDate,
    /// A target this one depends on failed.
    UpstreamFailed,
    /// The chunk is circular and its kind does not compile cycles.
    CircularUnsupported,
    /// The pass was cancelled before the target finished.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::UpToDate => "up to date",
            SkipReason::UpstreamFailed => "upstream failed",
            SkipReason::CircularUnsupported => "circular chunk not supported",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// State of a build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    /// Waiting for its upstream targets.
    Pending,
    /// Classifying source files.
    CheckingDirty,
    /// The compile backend is running.
    Compiling,
    /// Recording outputs and digests.
    UpdatingCache,
    /// Compiled and cached.
    Done,
    /// Not compiled.
    Skipped(SkipReason),
    /// Compilation or cache update failed.
    Failed,
}

impl TargetState {
    /// Returns `true` for `Done`, `Skipped` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetState::Done | TargetState::Skipped(_) | TargetState::Failed
        )
    }

    /// Returns `true` if the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: TargetState) -> bool {
        use SkipReason::*;
        use TargetState::*;
        matches!(
            (self, next),
            (Pending, CheckingDirty)
                | (Pending, Skipped(UpstreamFailed | Cancelled))
                | (CheckingDirty, Compiling)
                | (CheckingDirty, Skipped(UpToDate | CircularUnsupported))
                | (Compiling, UpdatingCache | Failed | Skipped(Cancelled))
                | (UpdatingCache, Done | Failed)
        )
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Pending => f.write_str("pending"),
            TargetState::CheckingDirty => f.write_str("checking"),
            TargetState::Compiling => f.write_str("compiling"),
            TargetState::UpdatingCache => f.write_str("updating cache"),
            TargetState::Done => f.write_str("done"),
            TargetState::Skipped(reason) => write!(f, "skipped ({reason})"),
            TargetState::Failed => f.write_str("failed"),
        }
    }
}

/// What became of one chunk in a pass.
#[derive(Debug, Clone)]
pub struct ChunkReport {
    /// The chunk.
    pub chunk: ModuleChunk,
    /// Final state.
    pub state: TargetState,
    /// Every state the target passed through, starting with `Pending`.
    pub history: Vec<TargetState>,
    /// `true` if a backend produced new outputs, which makes downstream
    /// targets dirty.
    pub rebuilt: bool,
    /// Number of source files handed to the backend.
    pub files_compiled: usize,
}

/// One chunk plus the policy of its compilation kind.
#[derive(Debug)]
pub struct BuildTarget {
    chunk: ModuleChunk,
    policy: ResolvedKind,
    state: TargetState,
    history: Vec<TargetState>,
}

impl BuildTarget {
    /// Creates a pending target.
    pub fn new(chunk: ModuleChunk, policy: ResolvedKind) -> Self {
        Self {
            chunk,
            policy,
            state: TargetState::Pending,
            history: vec![TargetState::Pending],
        }
    }

    /// The chunk being built.
    pub fn chunk(&self) -> &ModuleChunk {
        &self.chunk
    }

    /// Current state.
    pub fn state(&self) -> TargetState {
        self.state
    }

    /// States visited so far.
    pub fn history(&self) -> &[TargetState] {
        &self.history
    }

    /// Moves to `next`. An illegal transition is an internal error.
    pub fn transition(&mut self, next: TargetState) -> KilnResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(InternalError::new(format!(
                "illegal transition of {} from {} to {}",
                self.chunk, self.state, next
            )));
        }
        debug!(chunk = %self.chunk, from = %self.state, to = %next, "transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Skips a pending target without looking at its files.
    pub fn skip(mut self, reason: SkipReason) -> KilnResult<ChunkReport> {
        self.transition(TargetState::Skipped(reason))?;
        Ok(self.into_report(false, 0))
    }

    /// Drives the target from `Pending` to a terminal state.
    ///
    /// `upstream_rebuilt` tells whether any target this chunk depends on was
    /// rebuilt in this pass. Compile failures end in `Failed`; only internal
    /// errors are returned as `Err`, and they leave the cache of this target
    /// untouched.
    pub fn run(mut self, ctx: &PassContext<'_>, upstream_rebuilt: bool) -> KilnResult<ChunkReport> {
        if ctx.cancel.is_cancelled() {
            return self.skip(SkipReason::Cancelled);
        }
        self.transition(TargetState::CheckingDirty)?;

        if self.chunk.is_circular() && self.policy.circular == CircularPolicy::ReportAndSkip {
            warn!(chunk = %self.chunk, kind = %self.chunk.kind, "skipping circular chunk");
            ctx.sink.emit(
                Diagnostic::warning(format!(
                    "circular dependency between {} is not supported for {} modules, skipping",
                    self.chunk.name(),
                    self.chunk.kind
                ))
                .with_target(self.chunk.members[0].clone()),
            );
            self.transition(TargetState::Skipped(SkipReason::CircularUnsupported))?;
            return Ok(self.into_report(false, 0));
        }

        let snapshots: Vec<CacheSnapshot> =
            self.chunk.members.iter().map(|m| ctx.store.load(m)).collect();
        let fingerprints: Vec<ContentHash> = self
            .chunk
            .members
            .iter()
            .map(|m| ctx.upstream_fingerprint(m, &self.chunk))
            .collect();
        let holder = DirtyFilesHolder::new(
            self.chunk
                .members
                .iter()
                .zip(snapshots.iter().zip(&fingerprints))
                .map(|(m, (snap, fingerprint))| {
                    // A rebuild of an upstream target that this member never
                    // compiled against, in this pass or an earlier one.
                    let stale_upstream = snap.upstream.as_ref() != Some(fingerprint);
                    classify(m, ctx.sources(m), snap, upstream_rebuilt || stale_upstream)
                })
                .collect(),
        );

        if holder.is_clean() {
            debug!(chunk = %self.chunk, "up to date");
            self.transition(TargetState::Skipped(SkipReason::UpToDate))?;
            return Ok(self.into_report(false, 0));
        }

        self.transition(TargetState::Compiling)?;
        let sources = self.select_sources(&holder);
        info!(
            chunk = %self.chunk,
            dirty = holder.dirty_count(),
            removed = holder.removed_count(),
            compiling = sources.len(),
            "compiling"
        );

        let Some(CompileOutput {
            success,
            generated,
            diagnostics,
        }) = self.compile(ctx, &sources)?
        else {
            self.transition(TargetState::Failed)?;
            return Ok(self.into_report(false, 0));
        };

        if !success {
            if ctx.cancel.is_cancelled() {
                self.transition(TargetState::Skipped(SkipReason::Cancelled))?;
                return Ok(self.into_report(false, 0));
            }
            let reported_error = diagnostics.iter().any(|d| d.severity.is_error());
            self.report_diagnostics(ctx, &holder, diagnostics);
            if !reported_error {
                ctx.sink.emit(
                    Diagnostic::error(format!("compilation of {} failed", self.chunk))
                        .with_target(self.chunk.members[0].clone()),
                );
            }
            self.transition(TargetState::Failed)?;
            return Ok(self.into_report(false, sources.len()));
        }

        self.report_diagnostics(ctx, &holder, diagnostics);
        self.transition(TargetState::UpdatingCache)?;
        let recorded = match self.policy.incremental {
            IncrementalPolicy::NoBackend => holder
                .members()
                .iter()
                .flat_map(MemberFiles::all_files)
                .collect(),
            _ => sources.clone(),
        };

        match self.update_caches(ctx, &holder, snapshots, &fingerprints, &recorded, &generated) {
            Ok(()) => {
                self.transition(TargetState::Done)?;
                let rebuilt = self.policy.incremental != IncrementalPolicy::NoBackend;
                Ok(self.into_report(rebuilt, sources.len()))
            }
            Err(e) => {
                warn!(chunk = %self.chunk, error = %e, "cache update failed");
                ctx.sink.emit(
                    Diagnostic::error(format!("failed to update build cache: {e}"))
                        .with_target(self.chunk.members[0].clone()),
                );
                self.transition(TargetState::Failed)?;
                Ok(self.into_report(false, sources.len()))
            }
        }
    }

    /// The files handed to the backend under the kind's incremental policy.
    fn select_sources(&self, holder: &DirtyFilesHolder) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = match self.policy.incremental {
            IncrementalPolicy::Incremental => holder
                .members()
                .iter()
                .flat_map(MemberFiles::dirty_paths)
                .collect(),
            IncrementalPolicy::Full => holder
                .members()
                .iter()
                .flat_map(MemberFiles::all_files)
                .collect(),
            IncrementalPolicy::NoBackend => Vec::new(),
        };
        sources.sort();
        sources.dedup();
        sources
    }

    /// Runs the backend. `None` means the target failed before a backend
    /// could run; the reason was reported to the sink.
    fn compile(&self, ctx: &PassContext<'_>, sources: &[PathBuf]) -> KilnResult<Option<CompileOutput>> {
        if self.policy.incremental == IncrementalPolicy::NoBackend {
            debug!(chunk = %self.chunk, "kind has no compile backend");
            return Ok(Some(CompileOutput::succeeded(Vec::new())));
        }
        if sources.is_empty() {
            // Only removals: nothing to compile, stale outputs still go.
            return Ok(Some(CompileOutput::succeeded(Vec::new())));
        }

        let first = self.chunk.members[0].clone();
        let Some(compiler) = ctx.compilers.get(self.chunk.kind) else {
            ctx.sink.emit(
                Diagnostic::error(format!(
                    "no compiler configured for {} modules",
                    self.chunk.kind
                ))
                .with_target(first),
            );
            return Ok(None);
        };

        let destinations = ctx.destinations(&self.chunk);
        for dir in &destinations {
            if let Err(e) = std::fs::create_dir_all(dir) {
                ctx.sink.emit(
                    Diagnostic::error(format!(
                        "cannot create output directory {}: {e}",
                        dir.display()
                    ))
                    .with_target(first),
                );
                return Ok(None);
            }
        }

        let request = CompileRequest {
            chunk: self.chunk.name(),
            members: self.chunk.members.clone(),
            kind: self.chunk.kind,
            sources: sources.to_vec(),
            classpath: ctx.classpath(&self.chunk, &self.policy),
            output_dir: destinations.first().cloned().unwrap_or_default(),
            options: self.policy.options.clone(),
            cancel: ctx.cancel.clone(),
        };
        compiler.compile(&request).map(Some)
    }

    /// Attributes backend diagnostics to the member owning their file.
    fn report_diagnostics(&self, ctx: &PassContext<'_>, holder: &DirtyFilesHolder, diagnostics: Vec<Diagnostic>) {
        for diag in diagnostics {
            let owner = diag
                .file
                .as_deref()
                .and_then(|file| {
                    holder
                        .members()
                        .iter()
                        .find(|m| m.digests.contains_key(file))
                })
                .map(|m| m.target.clone())
                .unwrap_or_else(|| self.chunk.members[0].clone());
            let diag = match diag.target {
                Some(_) => diag,
                None => diag.with_target(owner),
            };
            ctx.sink.emit(diag);
        }
    }

    /// Writes the new snapshot of every member and deletes stale outputs.
    ///
    /// Each snapshot records the upstream fingerprint it was compiled
    /// against, so an interrupted or failed pass leaves the member dirty.
    ///
    /// Outputs of recompiled or removed sources that were not regenerated are
    /// stale. They are deleted only when they lie under one of the chunk's
    /// destinations.
    fn update_caches(
        &self,
        ctx: &PassContext<'_>,
        holder: &DirtyFilesHolder,
        snapshots: Vec<CacheSnapshot>,
        fingerprints: &[ContentHash],
        recorded: &[PathBuf],
        generated: &[GeneratedFile],
    ) -> Result<(), CacheError> {
        let destinations = ctx.destinations(&self.chunk);
        let recorded: HashSet<&Path> = recorded.iter().map(PathBuf::as_path).collect();

        for (index, (member, mut snapshot)) in holder.members().iter().zip(snapshots).enumerate() {
            let mut stale: BTreeSet<PathBuf> = BTreeSet::new();

            for (path, digest) in &member.digests {
                if recorded.contains(path.as_path()) {
                    stale.extend(snapshot.forget_source(path));
                    snapshot.sources.insert(path.clone(), *digest);
                }
            }
            for path in &member.removed {
                stale.extend(snapshot.forget_source(path));
            }

            for file in generated {
                if owner_of(file, holder, &destinations) != index {
                    continue;
                }
                let digest = match hash_file(&file.output) {
                    Ok(digest) => digest,
                    Err(e) => {
                        warn!(output = %file.output.display(), error = %e, "reported output is missing");
                        continue;
                    }
                };
                snapshot.outputs.insert(file.output.clone(), digest);
                stale.remove(&file.output);
                for source in &file.sources {
                    if member.digests.contains_key(source) {
                        snapshot.associate(source.clone(), file.output.clone());
                    }
                }
            }

            let referenced: HashSet<PathBuf> = snapshot
                .referenced_outputs()
                .into_iter()
                .map(Path::to_path_buf)
                .collect();
            for output in stale {
                if referenced.contains(&output) {
                    continue;
                }
                snapshot.outputs.remove(&output);
                if !destinations.iter().any(|d| is_within(&output, d)) {
                    debug!(output = %output.display(), "leaving stale output outside destination");
                    continue;
                }
                match std::fs::remove_file(&output) {
                    Ok(()) => debug!(output = %output.display(), "deleted stale output"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CacheError::Io {
                            path: output,
                            source: e,
                        })
                    }
                }
            }

            snapshot.upstream = fingerprints.get(index).copied();
            ctx.store.update(&member.target, &snapshot)?;
        }
        Ok(())
    }

    fn into_report(self, rebuilt: bool, files_compiled: usize) -> ChunkReport {
        ChunkReport {
            chunk: self.chunk,
            state: self.state,
            history: self.history,
            rebuilt,
            files_compiled,
        }
    }
}

/// Index of the member a generated file belongs to: the member owning one of
/// its sources, else the member whose destination contains it, else the
/// first member.
fn owner_of(file: &GeneratedFile, holder: &DirtyFilesHolder, destinations: &[PathBuf]) -> usize {
    let members = holder.members();
    file.sources
        .iter()
        .find_map(|s| members.iter().position(|m| m.digests.contains_key(s)))
        .or_else(|| {
            destinations
                .iter()
                .position(|d| is_within(&file.output, d))
        })
        .unwrap_or(0)
}
