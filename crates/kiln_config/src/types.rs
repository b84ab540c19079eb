//! Configuration types deserialized from `kiln.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The top-level project configuration parsed from `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Core project metadata.
    pub project: ProjectMeta,
    /// Output and cache locations, scheduling.
    #[serde(default)]
    pub build: BuildSettings,
    /// Per compilation-kind settings, keyed by kind name (`metadata`, `platform`).
    #[serde(default)]
    pub kinds: BTreeMap<String, KindConfig>,
    /// External libraries that modules can depend on.
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryConfig>,
    /// Build modules, keyed by module name.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

/// Core project metadata required in every `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// The project version string.
    #[serde(default)]
    pub version: String,
    /// A brief description of the project.
    #[serde(default)]
    pub description: String,
}

/// Project-wide build settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Root under which module destinations are placed.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Directory holding the persisted build cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Compile independent chunks of a wave on worker threads.
    #[serde(default)]
    pub parallel: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            parallel: false,
        }
    }
}

fn default_output_dir() -> String {
    "out".to_string()
}

fn default_cache_dir() -> String {
    ".kiln-cache".to_string()
}

/// The compilation kind of a module.
///
/// Modules of different kinds are compiled by different backends and may not
/// form a dependency cycle with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileKind {
    /// Platform-independent code compiled to metadata only.
    Metadata,
    /// Platform-specific code compiled to loadable output (default).
    #[default]
    Platform,
}

impl CompileKind {
    /// Every kind, in declaration order.
    pub const ALL: [CompileKind; 2] = [CompileKind::Metadata, CompileKind::Platform];

    /// The name used in `kiln.toml`.
    pub fn as_str(self) -> &'static str {
        match self {
            CompileKind::Metadata => "metadata",
            CompileKind::Platform => "platform",
        }
    }

    /// Parses a kind name as used in `kiln.toml`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for CompileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a kind recompiles a chunk that has dirty files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncrementalPolicy {
    /// Only dirty files are handed to the compiler.
    Incremental,
    /// Every file of the chunk is recompiled when anything is dirty.
    Full,
    /// The kind has no compile backend: the compile step succeeds without
    /// invoking anything and produces no outputs.
    NoBackend,
}

/// What a kind does with a chunk of more than one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircularPolicy {
    /// All chunk members are compiled together as one unit.
    CompileTogether,
    /// The chunk is reported with a warning and not compiled.
    ReportAndSkip,
}

/// Settings for one compilation kind. Unset policy fields fall back to the
/// built-in defaults of the kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KindConfig {
    /// Incremental compilation policy.
    pub incremental: Option<IncrementalPolicy>,
    /// Policy for circular chunks.
    pub circular: Option<CircularPolicy>,
    /// Kinds whose outputs are placed on this kind's classpath.
    pub consumes: Option<Vec<CompileKind>>,
    /// Source file extensions (without dot). Empty means every file.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub extensions: Vec<String>,
    /// Extra options handed to the compiler.
    #[serde(default)]
    pub options: Vec<String>,
    /// Command line of the external compiler, with placeholders.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub command: Vec<String>,
    /// Output path templates produced per source file.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub outputs: Vec<String>,
    /// Run the command once per source file instead of once per chunk.
    #[serde(default)]
    pub per_file: bool,
}

/// An external library: a named set of roots.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryConfig {
    /// Compiled artifact roots (jars, archives, class directories).
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub compiled: Vec<String>,
    /// Source roots, never placed on a classpath.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub sources: Vec<String>,
    /// Documentation roots, never placed on a classpath.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub docs: Vec<String>,
}

/// A build module as declared in `kiln.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleConfig {
    /// Compilation kind of the module.
    #[serde(default)]
    pub kind: CompileKind,
    /// Production source roots, relative to the project root.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub sources: Vec<String>,
    /// Test source roots. A test target exists only when this is non-empty.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub test_sources: Vec<String>,
    /// Names of modules this module depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Names of libraries this module depends on.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Explicit destination of the production output.
    pub destination: Option<String>,
    /// Explicit destination of the test output.
    pub test_destination: Option<String>,
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Allows `sources = "src"` as well as `sources = ["src", "gen"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}
