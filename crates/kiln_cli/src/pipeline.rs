//! Shared helpers for CLI commands: project root resolution, project loading
//! and orchestrator construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_build::{BuildOrchestrator, CompilerRegistry, ModuleSet, PolicyTable};
use kiln_cache::CacheStore;
use kiln_config::{ProjectConfig, CONFIG_FILE_NAME};
use tracing::debug;

use crate::command::CommandCompiler;
use crate::GlobalArgs;

/// Version recorded in cache files. A different version discards the cache.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A loaded project.
pub struct Project {
    /// Directory containing `kiln.toml`.
    pub root: PathBuf,
    /// The parsed configuration.
    pub config: ProjectConfig,
    /// Modules and libraries of the project.
    pub modules: ModuleSet,
}

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE_NAME} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// `--config` may name the configuration file or its directory. Without it
/// the current directory and its parents are searched.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_file() {
                Ok(p.parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")))
            } else {
                Ok(p)
            }
        }
        None => find_project_root(&std::env::current_dir()?),
    }
}

/// Loads the configuration and module set of the project `global` points at.
pub fn load_project(global: &GlobalArgs) -> Result<Project, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = kiln_config::load_config(&root)?;
    let modules = ModuleSet::from_config(&root, &config)?;
    debug!(root = %root.display(), modules = modules.len(), "loaded project");
    Ok(Project {
        root,
        config,
        modules,
    })
}

/// Opens the cache of `project`.
pub fn open_store(project: &Project) -> CacheStore {
    CacheStore::open(&project.root.join(&project.config.build.cache_dir), TOOL_VERSION)
}

/// Creates an orchestrator with one [`CommandCompiler`] per kind that has a
/// command configured.
pub fn orchestrator(project: &Project, parallel: bool) -> BuildOrchestrator {
    let policies = PolicyTable::from_config(&project.config);
    let mut compilers = CompilerRegistry::new();
    for policy in policies.iter() {
        if let Some(compiler) = CommandCompiler::from_policy(policy, &project.root) {
            compilers.register(policy.kind, Arc::new(compiler));
        }
    }
    debug!(compilers = ?compilers, "registered compilers");
    BuildOrchestrator::new(open_store(project), policies, compilers).with_parallel(parallel)
}
