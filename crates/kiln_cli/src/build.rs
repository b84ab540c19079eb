//! `kiln build`: runs one incremental build pass over the project.

use kiln_build::{PassResult, TargetOutcome};
use kiln_diagnostics::{DiagnosticRenderer, Severity, TerminalRenderer};
use serde_json::json;

use crate::pipeline::{load_project, orchestrator};
use crate::{BuildArgs, GlobalArgs, ReportFormat};

/// Runs the `kiln build` command.
///
/// Returns exit code 0 if every target succeeded, 1 if any failed or the pass
/// was cancelled.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let parallel = args.parallel || project.config.build.parallel;

    if !global.quiet && args.format == ReportFormat::Text {
        eprintln!(
            "   Building {} ({} targets)",
            project.config.project.name,
            project.modules.len()
        );
    }

    let orchestrator = orchestrator(&project, parallel);
    let result = orchestrator.run_build_pass(&project.modules, args.tests)?;

    match args.format {
        ReportFormat::Text => report_text(&result, global),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report_json(&result))?),
    }

    Ok(if result.success && !result.cancelled { 0 } else { 1 })
}

fn report_text(result: &PassResult, global: &GlobalArgs) {
    let renderer = TerminalRenderer::new(global.color);
    for diag in &result.diagnostics {
        if global.quiet && diag.severity != Severity::Error {
            continue;
        }
        eprint!("{}", renderer.render(diag));
    }
    if global.quiet {
        return;
    }

    for (id, outcome) in &result.outcomes {
        let label = match outcome {
            TargetOutcome::Done => "Compiled".to_string(),
            TargetOutcome::Failed => "Failed".to_string(),
            TargetOutcome::Skipped(reason) if global.verbose => format!("Skipped ({reason})"),
            TargetOutcome::Skipped(_) => continue,
        };
        eprintln!("{label:>12} {id}");
    }

    let stats = &result.stats;
    eprintln!(
        "   Finished {} compiled, {} skipped, {} failed ({} files) in {} ms",
        stats.compiled, stats.skipped, stats.failed, stats.files_compiled, stats.elapsed_ms
    );
    if result.cancelled {
        eprintln!("   Cancelled");
    }
}

/// The pass result as a JSON document.
pub fn report_json(result: &PassResult) -> serde_json::Value {
    let targets: Vec<serde_json::Value> = result
        .outcomes
        .iter()
        .map(|(id, outcome)| {
            json!({
                "module": id.module,
                "role": id.role(),
                "outcome": outcome,
                "transitions": result.transitions.get(id),
            })
        })
        .collect();
    json!({
        "success": result.success,
        "cancelled": result.cancelled,
        "order": result.order,
        "stats": result.stats,
        "targets": targets,
        "diagnostics": result.diagnostics,
    })
}
