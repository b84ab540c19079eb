//! The build model: modules, libraries and module chunks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use kiln_common::TargetId;
use kiln_config::{CompileKind, ProjectConfig};

use crate::error::GraphError;

/// The kind of content a library root holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    /// Compiled artifacts; the only roots placed on a classpath.
    Compiled,
    /// Sources attached for navigation.
    Sources,
    /// Documentation.
    Docs,
}

/// One root of a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRoot {
    /// Location of the root.
    pub path: PathBuf,
    /// What the root contains.
    pub kind: RootKind,
}

/// An external library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    /// Name modules refer to the library by.
    pub name: String,
    /// The library's roots, in declaration order.
    pub roots: Vec<LibraryRoot>,
}

impl Library {
    /// Creates a library without roots.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roots: Vec::new(),
        }
    }

    /// Adds a root.
    pub fn with_root(mut self, path: impl Into<PathBuf>, kind: RootKind) -> Self {
        self.roots.push(LibraryRoot {
            path: path.into(),
            kind,
        });
        self
    }

    /// The compiled roots, in declaration order.
    pub fn compiled_roots(&self) -> impl Iterator<Item = &Path> {
        self.roots
            .iter()
            .filter(|r| r.kind == RootKind::Compiled)
            .map(|r| r.path.as_path())
    }
}

/// A compilation unit: one role (production or test) of a configured module.
///
/// Immutable for the duration of a build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Identity of the module: its name and role.
    pub id: TargetId,
    /// Compilation kind.
    pub kind: CompileKind,
    /// Source roots.
    pub source_roots: Vec<PathBuf>,
    /// Names of the modules this module depends on.
    pub dependencies: Vec<String>,
    /// Names of the libraries this module depends on.
    pub libraries: Vec<String>,
    /// Output directory.
    ///
    /// A circular chunk compiles into the destination of its first member,
    /// so the other members' destinations may stay empty. Every downstream
    /// target reaches all members of a cycle, so its classpath lists each of
    /// these destinations.
    pub destination: PathBuf,
}

impl Module {
    /// Creates a module with no sources or dependencies.
    pub fn new(id: TargetId, kind: CompileKind, destination: impl Into<PathBuf>) -> Self {
        Self {
            id,
            kind,
            source_roots: Vec::new(),
            dependencies: Vec::new(),
            libraries: Vec::new(),
            destination: destination.into(),
        }
    }

    /// Adds a source root.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_roots.push(root.into());
        self
    }

    /// Adds a module dependency.
    pub fn with_dependency(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    /// Adds a library dependency.
    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.libraries.push(library.into());
        self
    }

    /// The module name.
    pub fn name(&self) -> &str {
        &self.id.module
    }

    /// Returns `true` for the test role of a module.
    pub fn is_tests(&self) -> bool {
        self.id.tests
    }
}

/// Where a module's output goes.
///
/// An explicit override wins (relative overrides are resolved against the
/// project root); otherwise `<output_root>/<production|test>/<module>`.
/// Depends on nothing but its arguments.
pub fn destination(
    project_root: &Path,
    output_root: &Path,
    id: &TargetId,
    explicit: Option<&str>,
) -> PathBuf {
    match explicit {
        Some(dir) => project_root.join(dir),
        None => output_root.join(id.role()).join(&id.module),
    }
}

/// Every module and library of a project.
#[derive(Debug, Clone, Default)]
pub struct ModuleSet {
    modules: BTreeMap<TargetId, Module>,
    libraries: BTreeMap<String, Library>,
}

impl ModuleSet {
    /// Creates an empty module set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the module set described by a project configuration.
    ///
    /// Every configured module yields a production module, and a test module
    /// when it declares test sources. The test module depends on its own
    /// production module in addition to the declared dependencies.
    pub fn from_config(project_root: &Path, config: &ProjectConfig) -> Result<Self, GraphError> {
        let output_root = project_root.join(&config.build.output_dir);
        let mut set = ModuleSet::new();

        for (name, lib) in &config.libraries {
            let mut library = Library::new(name.clone());
            for path in &lib.compiled {
                library = library.with_root(project_root.join(path), RootKind::Compiled);
            }
            for path in &lib.sources {
                library = library.with_root(project_root.join(path), RootKind::Sources);
            }
            for path in &lib.docs {
                library = library.with_root(project_root.join(path), RootKind::Docs);
            }
            set.add_library(library);
        }

        for (name, cfg) in &config.modules {
            let id = TargetId::production(name.clone());
            let dest = destination(project_root, &output_root, &id, cfg.destination.as_deref());
            let mut production = Module::new(id, cfg.kind, dest);
            production.source_roots = cfg.sources.iter().map(|s| project_root.join(s)).collect();
            production.dependencies = cfg.dependencies.clone();
            production.libraries = cfg.libraries.clone();

            if !cfg.test_sources.is_empty() {
                let id = TargetId::test(name.clone());
                let dest =
                    destination(project_root, &output_root, &id, cfg.test_destination.as_deref());
                let mut test = Module::new(id, cfg.kind, dest);
                test.source_roots = cfg
                    .test_sources
                    .iter()
                    .map(|s| project_root.join(s))
                    .collect();
                test.dependencies = std::iter::once(name.clone())
                    .chain(cfg.dependencies.iter().cloned())
                    .collect();
                test.libraries = cfg.libraries.clone();
                set.add_module(test)?;
            }
            set.add_module(production)?;
        }

        Ok(set)
    }

    /// Adds a module. Fails if a module with the same identity exists.
    pub fn add_module(&mut self, module: Module) -> Result<(), GraphError> {
        if self.modules.contains_key(&module.id) {
            return Err(GraphError::DuplicateModule(module.id));
        }
        self.modules.insert(module.id.clone(), module);
        Ok(())
    }

    /// Adds a library, replacing one of the same name.
    pub fn add_library(&mut self, library: Library) {
        self.libraries.insert(library.name.clone(), library);
    }

    /// Looks up a module by identity.
    pub fn get(&self, id: &TargetId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Looks up a library by name.
    pub fn library(&self, name: &str) -> Option<&Library> {
        self.libraries.get(name)
    }

    /// Returns `true` if a module of that name exists in any role.
    pub fn has_module_named(&self, name: &str) -> bool {
        self.modules.contains_key(&TargetId::production(name))
            || self.modules.contains_key(&TargetId::test(name))
    }

    /// All modules, ordered by identity.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if the set has no modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// A maximal set of mutually dependent modules, compiled as one unit.
///
/// All members share a compilation kind and a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChunk {
    /// Members, sorted.
    pub members: Vec<TargetId>,
    /// Compilation kind shared by the members.
    pub kind: CompileKind,
}

impl ModuleChunk {
    /// Creates a chunk; members are sorted.
    pub fn new(mut members: Vec<TargetId>, kind: CompileKind) -> Self {
        members.sort();
        Self { members, kind }
    }

    /// Member module names joined by `+`.
    pub fn name(&self) -> String {
        let names: Vec<&str> = self.members.iter().map(|m| m.module.as_str()).collect();
        names.join("+")
    }

    /// Returns `true` when the chunk is the test role.
    pub fn is_tests(&self) -> bool {
        self.members.first().is_some_and(|m| m.tests)
    }

    /// Returns `true` when the chunk has more than one member.
    pub fn is_circular(&self) -> bool {
        self.members.len() > 1
    }

    /// Returns `true` if `id` is a member.
    pub fn contains(&self, id: &TargetId) -> bool {
        self.members.binary_search(id).is_ok()
    }
}

impl fmt::Display for ModuleChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tests() {
            write!(f, "{} (tests)", self.name())
        } else {
            f.write_str(&self.name())
        }
    }
}
