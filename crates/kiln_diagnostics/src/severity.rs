//! Diagnostic severity levels ordered from least to most severe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The severity level of a diagnostic message.
///
/// Ordered from least severe (`Note`) to most severe (`Error`), matching the
/// derived `PartialOrd`/`Ord` implementation based on declaration order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational output, such as a compiler note.
    Note,
    /// A problem that does not fail the target.
    Warning,
    /// A problem that fails the target.
    Error,
}

impl Severity {
    /// Returns `true` if this severity is [`Error`](Severity::Error).
    pub fn is_error(self) -> bool {
        self == Severity::Error
    }

    /// Recognizes the level prefixes compilers print (`error`, `warning`,
    /// `note`, `info`, `e`, `w`), ignoring case.
    pub fn from_tool_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "e" | "fatal error" => Some(Severity::Error),
            "warning" | "w" => Some(Severity::Warning),
            "note" | "info" | "i" => Some(Severity::Note),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}
