//! End-to-end build passes against a recording compiler.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kiln_build::{
    BuildOrchestrator, CancellationToken, CompileOutput, CompileRequest, Compiler,
    CompilerRegistry, GeneratedFile, Module, ModuleSet, PassResult, PolicyTable, SkipReason,
    TargetOutcome, TargetState,
};
use kiln_cache::CacheStore;
use kiln_common::{KilnResult, TargetId};
use kiln_config::{load_config_from_str, CompileKind, IncrementalPolicy, ResolvedKind};
use kiln_diagnostics::{Diagnostic, Severity};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Call {
    chunk: String,
    sources: Vec<String>,
    classpath: Vec<PathBuf>,
}

/// Writes `<output_dir>/<stem>.out` for every source and fails on sources
/// containing `ERROR`.
#[derive(Default)]
struct RecordingCompiler {
    calls: Mutex<Vec<Call>>,
    cancel_after_compile: Mutex<Option<CancellationToken>>,
}

impl RecordingCompiler {
    fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn compiled_chunks(&self) -> Vec<String> {
        self.take_calls().into_iter().map(|c| c.chunk).collect()
    }
}

impl Compiler for RecordingCompiler {
    fn compile(&self, request: &CompileRequest) -> KilnResult<CompileOutput> {
        self.calls.lock().unwrap().push(Call {
            chunk: request.chunk.clone(),
            sources: request
                .sources
                .iter()
                .map(|s| s.file_name().unwrap().to_string_lossy().into_owned())
                .collect(),
            classpath: request.classpath.clone(),
        });

        let mut errors = Vec::new();
        let mut generated = Vec::new();
        for source in &request.sources {
            let text = fs::read_to_string(source).unwrap();
            if text.contains("ERROR") {
                errors.push(
                    Diagnostic::error("unresolved reference")
                        .with_file(source)
                        .with_line(1),
                );
                continue;
            }
            let stem = source.file_stem().unwrap().to_string_lossy();
            let output = request.output_dir.join(format!("{stem}.out"));
            fs::write(&output, text).unwrap();
            generated.push(GeneratedFile::from_source(source, output));
        }

        if let Some(token) = self.cancel_after_compile.lock().unwrap().as_ref() {
            token.cancel();
        }
        if errors.is_empty() {
            Ok(CompileOutput::succeeded(generated))
        } else {
            Ok(CompileOutput::failed(errors))
        }
    }
}

struct Project {
    dir: TempDir,
    compiler: Arc<RecordingCompiler>,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            compiler: Arc::new(RecordingCompiler::default()),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn out(&self, module: &str) -> PathBuf {
        self.root().join("out").join(module)
    }

    fn module(&self, name: &str, kind: CompileKind, deps: &[&str]) -> Module {
        let mut module = Module::new(TargetId::production(name), kind, self.out(name))
            .with_source_root(self.root().join(name).join("src"));
        for dep in deps {
            module = module.with_dependency(*dep);
        }
        module
    }

    fn modules(&self, modules: Vec<Module>) -> ModuleSet {
        let mut set = ModuleSet::new();
        for module in modules {
            set.add_module(module).unwrap();
        }
        set
    }

    fn registry(&self) -> CompilerRegistry {
        CompilerRegistry::new()
            .with(CompileKind::Platform, self.compiler.clone())
            .with(CompileKind::Metadata, self.compiler.clone())
    }

    fn orchestrator(&self) -> BuildOrchestrator {
        self.orchestrator_with(PolicyTable::defaults(), "1.0.0")
    }

    fn orchestrator_with(&self, policies: PolicyTable, version: &str) -> BuildOrchestrator {
        BuildOrchestrator::new(
            CacheStore::open(&self.root().join(".kiln-cache"), version),
            policies,
            self.registry(),
        )
    }
}

fn outcome(result: &PassResult, name: &str) -> TargetOutcome {
    result.outcome(&TargetId::production(name)).unwrap()
}

const UP_TO_DATE: TargetOutcome = TargetOutcome::Skipped(SkipReason::UpToDate);

#[test]
fn chain_builds_in_order_then_stays_up_to_date() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("c", CompileKind::Platform, &["b"]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("a", CompileKind::Platform, &[]),
    ]);
    let orchestrator = p.orchestrator();

    let first = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(first.success);
    assert_eq!(first.order, vec!["a", "b", "c"]);
    assert_eq!(p.compiler.compiled_chunks(), vec!["a", "b", "c"]);
    assert!(p.out("a").join("A.out").exists());
    assert_eq!(first.stats.compiled, 3);
    assert_eq!(first.stats.files_compiled, 3);
    assert_eq!(
        first.transitions[&TargetId::production("a")],
        vec![
            TargetState::Pending,
            TargetState::CheckingDirty,
            TargetState::Compiling,
            TargetState::UpdatingCache,
            TargetState::Done,
        ]
    );

    let second = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(second.success);
    for name in ["a", "b", "c"] {
        assert_eq!(outcome(&second, name), UP_TO_DATE);
    }
    assert!(p.compiler.take_calls().is_empty());
    assert_eq!(
        second.transitions[&TargetId::production("c")],
        vec![
            TargetState::Pending,
            TargetState::CheckingDirty,
            TargetState::Skipped(SkipReason::UpToDate),
        ]
    );
}

#[test]
fn modified_file_rebuilds_itself_and_downstream() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("b/src/B2.kt", "class B2");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["b"]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    p.write("b/src/B.kt", "class B { fun f() = 1 }");
    let result = orchestrator.run_build_pass(&modules, false).unwrap();

    assert_eq!(outcome(&result, "a"), UP_TO_DATE);
    assert_eq!(outcome(&result, "b"), TargetOutcome::Done);
    assert_eq!(outcome(&result, "c"), TargetOutcome::Done);
    let calls = p.compiler.take_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].chunk, "b");
    assert_eq!(calls[0].sources, vec!["B.kt"]);
    assert_eq!(calls[1].chunk, "c");
    assert_eq!(calls[1].sources, vec!["C.kt"]);
}

#[test]
fn classpath_contains_upstream_outputs() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
    ]);
    p.orchestrator().run_build_pass(&modules, false).unwrap();

    let calls = p.compiler.take_calls();
    assert_eq!(calls[1].chunk, "b");
    assert_eq!(calls[1].classpath, vec![p.out("a"), p.out("b")]);
}

#[test]
fn cycle_compiles_as_one_chunk() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &["b"]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["a"]),
    ]);
    let orchestrator = p.orchestrator();

    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(result.success);
    assert_eq!(result.order, vec!["a+b", "c"]);
    let calls = p.compiler.take_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].chunk, "a+b");
    assert_eq!(calls[0].sources, vec!["A.kt", "B.kt"]);
    for name in ["a", "b", "c"] {
        assert_eq!(outcome(&result, name), TargetOutcome::Done);
    }

    // Each member's snapshot owns the output of its own source.
    let b_snapshot = orchestrator.store().load(&TargetId::production("b"));
    assert!(b_snapshot.outputs.contains_key(&p.out("a").join("B.out")));

    let again = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&again, "a"), UP_TO_DATE);
    assert_eq!(outcome(&again, "b"), UP_TO_DATE);
}

#[test]
fn failure_skips_downstream_but_not_siblings() {
    let p = Project::new();
    p.write("a/src/A.kt", "ERROR");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    p.write("d/src/D.kt", "class D");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["b"]),
        p.module("d", CompileKind::Platform, &[]),
    ]);
    let orchestrator = p.orchestrator();

    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(!result.success);
    assert_eq!(outcome(&result, "a"), TargetOutcome::Failed);
    assert_eq!(
        outcome(&result, "b"),
        TargetOutcome::Skipped(SkipReason::UpstreamFailed)
    );
    assert_eq!(
        outcome(&result, "c"),
        TargetOutcome::Skipped(SkipReason::UpstreamFailed)
    );
    assert_eq!(outcome(&result, "d"), TargetOutcome::Done);
    assert_eq!(result.failed_targets(), vec![&TargetId::production("a")]);
    assert_eq!(result.stats.failed, 1);

    let errors: Vec<&Diagnostic> = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].target, Some(TargetId::production("a")));
    assert_eq!(errors[0].file.as_deref(), Some(p.root().join("a/src/A.kt").as_path()));

    // The failed target recorded nothing, so fixing it rebuilds the chain.
    p.write("a/src/A.kt", "class A");
    p.compiler.take_calls();
    let fixed = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(fixed.success);
    assert_eq!(p.compiler.compiled_chunks(), vec!["a", "b", "c"]);
    assert_eq!(outcome(&fixed, "d"), UP_TO_DATE);
}

#[test]
fn removed_source_deletes_its_output() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    let gone = p.write("a/src/Gone.kt", "class Gone");
    p.write("b/src/B.kt", "class B");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(p.out("a").join("Gone.out").exists());
    p.compiler.take_calls();

    fs::remove_file(gone).unwrap();
    let result = orchestrator.run_build_pass(&modules, false).unwrap();

    assert_eq!(outcome(&result, "a"), TargetOutcome::Done);
    assert!(!p.out("a").join("Gone.out").exists());
    assert!(p.out("a").join("A.out").exists());
    // Only removals: the backend is not invoked for `a`, but `b` is dirty.
    assert_eq!(p.compiler.compiled_chunks(), vec!["b"]);

    let snapshot = orchestrator.store().load(&TargetId::production("a"));
    assert_eq!(snapshot.sources.len(), 1);
    assert!(!snapshot.outputs.contains_key(&p.out("a").join("Gone.out")));
}

#[test]
fn outputs_outside_destination_are_kept() {
    let p = Project::new();
    let source = p.write("a/src/A.kt", "class A");
    let stray = p.write("elsewhere/A.gen", "generated");
    let modules = p.modules(vec![p.module("a", CompileKind::Platform, &[])]);
    let store = CacheStore::open(&p.root().join(".kiln-cache"), "1.0.0");

    let mut snapshot = kiln_cache::CacheSnapshot::new();
    snapshot
        .sources
        .insert(source.clone(), kiln_common::ContentHash::from_bytes(b"old"));
    snapshot
        .outputs
        .insert(stray.clone(), kiln_common::ContentHash::from_bytes(b"generated"));
    snapshot.associate(source, stray.clone());
    store.update(&TargetId::production("a"), &snapshot).unwrap();

    let orchestrator = BuildOrchestrator::new(store, PolicyTable::defaults(), p.registry());
    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&result, "a"), TargetOutcome::Done);
    assert!(stray.exists());
    let snapshot = orchestrator.store().load(&TargetId::production("a"));
    assert!(!snapshot.outputs.contains_key(&stray));
}

#[test]
fn metadata_cycle_is_reported_and_skipped() {
    let p = Project::new();
    p.write("m1/src/M1.kt", "expect class M1");
    p.write("m2/src/M2.kt", "expect class M2");
    let modules = p.modules(vec![
        p.module("m1", CompileKind::Metadata, &["m2"]),
        p.module("m2", CompileKind::Metadata, &["m1"]),
    ]);

    let result = p.orchestrator().run_build_pass(&modules, false).unwrap();
    assert!(result.success);
    for name in ["m1", "m2"] {
        assert_eq!(
            outcome(&result, name),
            TargetOutcome::Skipped(SkipReason::CircularUnsupported)
        );
    }
    assert!(p.compiler.take_calls().is_empty());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("m1+m2")));
}

#[test]
fn full_policy_recompiles_every_file() {
    let p = Project::new();
    p.write("m/src/One.kt", "expect fun one()");
    p.write("m/src/Two.kt", "expect fun two()");
    let modules = p.modules(vec![p.module("m", CompileKind::Metadata, &[])]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    p.write("m/src/One.kt", "expect fun one(x: Int)");
    orchestrator.run_build_pass(&modules, false).unwrap();
    let calls = p.compiler.take_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sources, vec!["One.kt", "Two.kt"]);
}

#[test]
fn no_backend_kind_records_digests_without_compiling() {
    let p = Project::new();
    p.write("m/src/Common.kt", "expect class C");
    p.write("app/src/App.kt", "class App");
    let modules = p.modules(vec![
        p.module("m", CompileKind::Metadata, &[]),
        p.module("app", CompileKind::Platform, &["m"]),
    ]);
    let policies = PolicyTable::defaults().with(ResolvedKind {
        incremental: IncrementalPolicy::NoBackend,
        ..ResolvedKind::defaults(CompileKind::Metadata)
    });
    let orchestrator = p.orchestrator_with(policies, "1.0.0");

    let first = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&first, "m"), TargetOutcome::Done);
    assert_eq!(p.compiler.compiled_chunks(), vec!["app"]);

    let second = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&second, "m"), UP_TO_DATE);

    // A change without a backend does not make downstream targets dirty.
    p.write("m/src/Common.kt", "expect class C2");
    let third = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&third, "m"), TargetOutcome::Done);
    assert_eq!(outcome(&third, "app"), UP_TO_DATE);
    assert!(p.compiler.take_calls().is_empty());
}

#[test]
fn missing_compiler_fails_the_target() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    let modules = p.modules(vec![p.module("a", CompileKind::Platform, &[])]);
    let orchestrator = BuildOrchestrator::new(
        CacheStore::open(&p.root().join(".kiln-cache"), "1.0.0"),
        PolicyTable::defaults(),
        CompilerRegistry::new(),
    );

    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(!result.success);
    assert_eq!(outcome(&result, "a"), TargetOutcome::Failed);
    assert!(result.diagnostics[0].message.contains("no compiler"));
}

#[test]
fn cancelled_before_start_skips_everything() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.cancellation_token().cancel();

    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(result.cancelled);
    assert!(result.success);
    for name in ["a", "b"] {
        assert_eq!(
            outcome(&result, name),
            TargetOutcome::Skipped(SkipReason::Cancelled)
        );
    }
    assert!(p.compiler.take_calls().is_empty());
}

#[test]
fn cancellation_during_a_pass_stops_later_chunks() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
    ]);
    let orchestrator = p.orchestrator();
    *p.compiler.cancel_after_compile.lock().unwrap() = Some(orchestrator.cancellation_token());

    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(result.cancelled);
    assert_eq!(outcome(&result, "a"), TargetOutcome::Done);
    assert_eq!(
        outcome(&result, "b"),
        TargetOutcome::Skipped(SkipReason::Cancelled)
    );
    assert_eq!(p.compiler.compiled_chunks(), vec!["a"]);
}

#[test]
fn parallel_pass_matches_sequential_outcomes() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    p.write("d/src/D.kt", "ERROR");
    p.write("e/src/E.kt", "class E");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &[]),
        p.module("c", CompileKind::Platform, &["a", "b"]),
        p.module("d", CompileKind::Platform, &[]),
        p.module("e", CompileKind::Platform, &["d"]),
    ]);
    let orchestrator = p.orchestrator().with_parallel(true);

    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(!result.success);
    assert_eq!(outcome(&result, "a"), TargetOutcome::Done);
    assert_eq!(outcome(&result, "b"), TargetOutcome::Done);
    assert_eq!(outcome(&result, "c"), TargetOutcome::Done);
    assert_eq!(outcome(&result, "d"), TargetOutcome::Failed);
    assert_eq!(
        outcome(&result, "e"),
        TargetOutcome::Skipped(SkipReason::UpstreamFailed)
    );
    let mut chunks = p.compiler.compiled_chunks();
    chunks.sort();
    assert_eq!(chunks, vec!["a", "b", "c", "d"]);
}

#[test]
fn cache_survives_a_new_store() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    let modules = p.modules(vec![p.module("a", CompileKind::Platform, &[])]);
    p.orchestrator().run_build_pass(&modules, false).unwrap();

    let reopened = p.orchestrator().run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&reopened, "a"), UP_TO_DATE);

    // A different tool version discards the cache.
    let upgraded = p
        .orchestrator_with(PolicyTable::defaults(), "2.0.0")
        .run_build_pass(&modules, false)
        .unwrap();
    assert_eq!(outcome(&upgraded, "a"), TargetOutcome::Done);
}

#[test]
fn invalidated_target_is_rebuilt() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &[]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    assert!(orchestrator
        .store()
        .invalidate(&TargetId::production("b"))
        .unwrap());
    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&result, "a"), UP_TO_DATE);
    assert_eq!(outcome(&result, "b"), TargetOutcome::Done);
    assert_eq!(p.compiler.compiled_chunks(), vec!["b"]);
}

#[test]
fn project_from_config_with_tests() {
    let p = Project::new();
    p.write("core/src/Core.kt", "class Core");
    p.write("core/test/CoreTest.kt", "class CoreTest");
    p.write("app/src/App.kt", "class App");
    let config = load_config_from_str(
        r#"
[project]
name = "demo"

[modules.core]
sources = ["core/src"]
test_sources = ["core/test"]

[modules.app]
sources = ["app/src"]
dependencies = ["core"]
"#,
    )
    .unwrap();
    let modules = ModuleSet::from_config(p.root(), &config).unwrap();
    let orchestrator = p.orchestrator();

    let production = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(production.order, vec!["core", "app"]);
    assert!(production.outcome(&TargetId::test("core")).is_none());
    p.compiler.take_calls();

    let with_tests = orchestrator.run_build_pass(&modules, true).unwrap();
    assert!(with_tests.success);
    assert_eq!(
        with_tests.outcome(&TargetId::test("core")),
        Some(TargetOutcome::Done)
    );
    let calls = p.compiler.take_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].chunk, "core");
    assert_eq!(calls[0].sources, vec!["CoreTest.kt"]);
    assert!(calls[0]
        .classpath
        .contains(&p.root().join("out/production/core")));
    assert!(p.root().join("out/test/core/CoreTest.out").exists());
}

#[test]
fn change_in_shared_upstream_rebuilds_both_dependents() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["a"]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    p.write("a/src/A.kt", "class A { val x = 1 }");
    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    for name in ["a", "b", "c"] {
        assert_eq!(outcome(&result, name), TargetOutcome::Done);
    }
    assert_eq!(p.compiler.compiled_chunks(), vec!["a", "b", "c"]);

    let repeat = orchestrator.run_build_pass(&modules, false).unwrap();
    for name in ["a", "b", "c"] {
        assert_eq!(outcome(&repeat, name), UP_TO_DATE);
    }
    assert!(p.compiler.take_calls().is_empty());
}

#[test]
fn change_inside_cycle_recompiles_chunk_and_dependent() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &["b"]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["b"]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    p.write("a/src/A.kt", "class A { fun g() = 2 }");
    let result = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(result.success);
    let calls = p.compiler.take_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].chunk, "a+b");
    assert_eq!(calls[0].sources, vec!["A.kt"]);
    assert_eq!(calls[1].chunk, "c");
    assert_eq!(outcome(&result, "c"), TargetOutcome::Done);
}

#[test]
fn downstream_cancelled_after_upstream_rebuild_is_rebuilt_next_pass() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
    ]);
    p.orchestrator().run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    p.write("a/src/A.kt", "class A { val y = 2 }");
    let interrupted = p.orchestrator();
    *p.compiler.cancel_after_compile.lock().unwrap() = Some(interrupted.cancellation_token());
    let result = interrupted.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&result, "a"), TargetOutcome::Done);
    assert_eq!(
        outcome(&result, "b"),
        TargetOutcome::Skipped(SkipReason::Cancelled)
    );
    p.compiler.take_calls();

    *p.compiler.cancel_after_compile.lock().unwrap() = None;
    let resumed = p.orchestrator().run_build_pass(&modules, false).unwrap();
    assert!(resumed.success);
    assert_eq!(outcome(&resumed, "a"), UP_TO_DATE);
    assert_eq!(outcome(&resumed, "b"), TargetOutcome::Done);
    let calls = p.compiler.take_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].chunk, "b");
    assert_eq!(calls[0].sources, vec!["B.kt"]);

    let settled = p.orchestrator().run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&settled, "b"), UP_TO_DATE);
}

#[test]
fn downstream_failing_after_upstream_rebuild_stays_dirty() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &[]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["b"]),
    ]);
    let orchestrator = p.orchestrator();
    orchestrator.run_build_pass(&modules, false).unwrap();
    p.compiler.take_calls();

    p.write("a/src/A.kt", "class A { val y = 2 }");
    p.write("b/src/B.kt", "ERROR");
    let broken = orchestrator.run_build_pass(&modules, false).unwrap();
    assert_eq!(outcome(&broken, "a"), TargetOutcome::Done);
    assert_eq!(outcome(&broken, "b"), TargetOutcome::Failed);
    assert_eq!(
        outcome(&broken, "c"),
        TargetOutcome::Skipped(SkipReason::UpstreamFailed)
    );
    p.compiler.take_calls();

    // B is back to the content it was last compiled from, but A changed
    // since then.
    p.write("b/src/B.kt", "class B");
    let fixed = orchestrator.run_build_pass(&modules, false).unwrap();
    assert!(fixed.success);
    assert_eq!(outcome(&fixed, "a"), UP_TO_DATE);
    assert_eq!(outcome(&fixed, "b"), TargetOutcome::Done);
    assert_eq!(outcome(&fixed, "c"), TargetOutcome::Done);
    assert_eq!(p.compiler.compiled_chunks(), vec!["b", "c"]);

    let settled = orchestrator.run_build_pass(&modules, false).unwrap();
    for name in ["a", "b", "c"] {
        assert_eq!(outcome(&settled, name), UP_TO_DATE);
    }
}

#[test]
fn downstream_of_cycle_sees_every_member_destination() {
    let p = Project::new();
    p.write("a/src/A.kt", "class A");
    p.write("b/src/B.kt", "class B");
    p.write("c/src/C.kt", "class C");
    let modules = p.modules(vec![
        p.module("a", CompileKind::Platform, &["b"]),
        p.module("b", CompileKind::Platform, &["a"]),
        p.module("c", CompileKind::Platform, &["b"]),
    ]);
    p.orchestrator().run_build_pass(&modules, false).unwrap();

    // The chunk writes into its first member's destination.
    assert!(p.out("a").join("B.out").exists());
    let calls = p.compiler.take_calls();
    assert_eq!(calls[1].chunk, "c");
    assert!(calls[1].classpath.contains(&p.out("a")));
    assert!(calls[1].classpath.contains(&p.out("b")));
}
