//! `kiln graph`: prints the chunks of a pass in build order.

use kiln_build::{BuildPlan, DependencyResolver};
use serde_json::json;

use crate::pipeline::load_project;
use crate::{GlobalArgs, GraphArgs, ReportFormat};

/// Runs the `kiln graph` command. Compiles nothing.
pub fn run(args: &GraphArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let plan = DependencyResolver::new(&project.modules).plan(args.tests)?;

    match args.format {
        ReportFormat::Text => print!("{}", render_text(&plan)),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&render_json(&plan))?),
    }
    Ok(0)
}

/// One line per chunk: position, name, kind, and the chunks it waits for.
pub fn render_text(plan: &BuildPlan) -> String {
    let mut out = String::new();
    for (wave_no, wave) in plan.waves().iter().enumerate() {
        out.push_str(&format!("wave {wave_no}\n"));
        for &i in wave {
            let chunk = &plan.chunks()[i];
            let upstream: Vec<String> = plan
                .upstream_of(i)
                .iter()
                .map(|&u| plan.chunks()[u].to_string())
                .collect();
            out.push_str(&format!("  {:>3}. {} [{}]", i + 1, chunk, chunk.kind));
            if chunk.is_circular() {
                out.push_str(" (circular)");
            }
            if !upstream.is_empty() {
                out.push_str(&format!(" <- {}", upstream.join(", ")));
            }
            out.push('\n');
        }
    }
    out
}

/// The plan as a JSON document.
pub fn render_json(plan: &BuildPlan) -> serde_json::Value {
    let chunks: Vec<serde_json::Value> = plan
        .chunks()
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            json!({
                "name": chunk.to_string(),
                "kind": chunk.kind.as_str(),
                "members": chunk.members.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
                "upstream": plan.upstream_of(i),
            })
        })
        .collect();
    json!({ "chunks": chunks, "waves": plan.waves() })
}
