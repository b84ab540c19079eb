//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{CompileKind, ProjectConfig};
use std::path::Path;

/// File name of the project configuration.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a project directory.
///
/// Reads `<project_dir>/kiln.toml`, parses it, and validates required fields.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks the parts of the configuration that serde cannot express.
///
/// Cross-references between modules and libraries are left to the graph
/// resolver, which reports them as configuration errors of the build pass.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.build.output_dir.is_empty() {
        return Err(ConfigError::MissingField("build.output_dir".to_string()));
    }
    if config.build.cache_dir.is_empty() {
        return Err(ConfigError::MissingField("build.cache_dir".to_string()));
    }

    for (name, kind) in &config.kinds {
        if CompileKind::from_name(name).is_none() {
            return Err(ConfigError::UnknownKind(name.clone()));
        }
        if kind.per_file && kind.command.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "kinds.{name}: per_file requires a command"
            )));
        }
        if !kind.outputs.is_empty() && kind.command.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "kinds.{name}: outputs require a command"
            )));
        }
    }

    for (name, module) in &config.modules {
        if name.is_empty() || name.contains('+') {
            return Err(ConfigError::ValidationError(format!(
                "invalid module name '{name}'"
            )));
        }
        if module.sources.iter().chain(&module.test_sources).any(|s| s.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "modules.{name}: empty source root"
            )));
        }
        if module.test_destination.is_some() && module.test_sources.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "modules.{name}: test_destination set without test_sources"
            )));
        }
    }

    Ok(())
}
