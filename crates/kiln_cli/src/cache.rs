//! `kiln invalidate` and `kiln clean`: cache maintenance.

use kiln_common::TargetId;

use crate::pipeline::{load_project, open_store};
use crate::{GlobalArgs, InvalidateArgs};

/// Drops the snapshot of one target so the next pass rebuilds it.
pub fn invalidate(args: &InvalidateArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let id = TargetId::production(args.module.clone()).with_role(args.tests);
    if project.modules.get(&id).is_none() {
        eprintln!("error: no module {id} in {}", project.config.project.name);
        return Ok(1);
    }

    let existed = open_store(&project).invalidate(&id)?;
    if !global.quiet {
        if existed {
            eprintln!(" Invalidated {id}");
        } else {
            eprintln!("   Unchanged {id} has no cached state");
        }
    }
    Ok(0)
}

/// Drops every snapshot and removes leftover cache files.
pub fn clean(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let store = open_store(&project);
    let removed = store.invalidate_all()?;
    let collected = store.gc()?;
    if !global.quiet {
        eprintln!(
            "     Cleaned {removed} snapshot(s), {collected} stray file(s) in {}",
            store.cache_dir().display()
        );
    }
    Ok(0)
}
