//! Structured diagnostic messages reported by compile backends.

use std::path::PathBuf;

use kiln_common::TargetId;
use serde::{Deserialize, Serialize};

use crate::severity::Severity;

/// A structured diagnostic message.
///
/// Each diagnostic has a severity and a message, and optionally names the
/// build target that produced it, the source file and line it refers to,
/// and explanatory notes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level of this diagnostic.
    pub severity: Severity,
    /// The main diagnostic message.
    pub message: String,
    /// The build target this diagnostic belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetId>,
    /// The source file the diagnostic points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// 1-based line number inside `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Explanatory footnotes (e.g., "note: ...").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Creates a diagnostic with the given severity and message.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            target: None,
            file: None,
            line: None,
            notes: Vec::new(),
        }
    }

    /// Creates a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Creates a new note diagnostic.
    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message)
    }

    /// Attributes this diagnostic to a build target.
    pub fn with_target(mut self, target: TargetId) -> Self {
        self.target = Some(target);
        self
    }

    /// Points this diagnostic at a source file.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Points this diagnostic at a line of its file.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Adds a note to this diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Parses the text a compiler printed into diagnostics.
///
/// Recognizes `file:line[:col]: level: message` and `level: message` lines.
/// Unrecognized lines become notes of the preceding diagnostic, or a new
/// diagnostic with the `fallback` severity when nothing precedes them.
pub fn parse_tool_output(output: &str, fallback: Severity) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for raw in output.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if let Some(diag) = parse_located(line).or_else(|| parse_plain(line)) {
            diagnostics.push(diag);
        } else if let Some(last) = diagnostics.last_mut() {
            last.notes.push(line.trim().to_string());
        } else {
            diagnostics.push(Diagnostic::new(fallback, line.trim()));
        }
    }

    diagnostics
}

fn parse_located(line: &str) -> Option<Diagnostic> {
    let mut parts = line.splitn(5, ':');
    let file = parts.next()?.trim();
    if file.is_empty() || file.contains(' ') {
        return None;
    }
    let line_no: u32 = parts.next()?.trim().parse().ok()?;
    let rest: Vec<&str> = parts.collect();

    let (level, message) = match rest.as_slice() {
        [col, level, message @ ..] if col.trim().parse::<u32>().is_ok() => {
            (*level, message.join(":"))
        }
        [level, message @ ..] => (*level, message.join(":")),
        _ => return None,
    };

    let severity = Severity::from_tool_label(level)?;
    Some(
        Diagnostic::new(severity, message.trim())
            .with_file(file)
            .with_line(line_no),
    )
}

fn parse_plain(line: &str) -> Option<Diagnostic> {
    let (level, message) = line.split_once(':')?;
    let severity = Severity::from_tool_label(level)?;
    Some(Diagnostic::new(severity, message.trim()))
}
