//! Build target identities.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::ContentHash;

/// Identity of a module build target: the module name plus its role.
///
/// Every module can produce a production target and a test target. Cache
/// snapshots and pass outcomes are keyed by this pair, so it stays stable
/// across build passes as long as the module keeps its name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId {
    /// Module name as declared in the project configuration.
    pub module: String,
    /// `true` for the test target of the module.
    pub tests: bool,
}

impl TargetId {
    /// Production target of a module.
    pub fn production(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            tests: false,
        }
    }

    /// Test target of a module.
    pub fn test(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            tests: true,
        }
    }

    /// The target with the same module name and the given role.
    pub fn with_role(&self, tests: bool) -> Self {
        Self {
            module: self.module.clone(),
            tests,
        }
    }

    /// `"production"` or `"test"`.
    pub fn role(&self) -> &'static str {
        if self.tests {
            "test"
        } else {
            "production"
        }
    }

    /// A file-system safe key for this target.
    ///
    /// Non-alphanumeric characters are replaced, so a hash of the exact
    /// identity is appended to keep distinct names from colliding.
    pub fn storage_key(&self) -> String {
        let sanitized: String = self
            .module
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let exact = ContentHash::from_bytes(format!("{}\0{}", self.module, self.role()).as_bytes());
        format!("{sanitized}.{}.{}", self.role(), exact.short())
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tests {
            write!(f, "{} (tests)", self.module)
        } else {
            write!(f, "{}", self.module)
        }
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({}:{})", self.module, self.role())
    }
}
