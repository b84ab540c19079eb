//! Diagnostic rendering backends for human-readable and machine-readable output.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic) -> String;

    /// Renders a list of diagnostics, one after another.
    fn render_all(&self, diags: &[Diagnostic]) -> String {
        diags.iter().map(|d| self.render(d)).collect()
    }
}

/// Renders diagnostics in a rustc-style terminal format.
///
/// Produces output like:
/// ```text
/// error[core]: unresolved reference: foo
///   --> core/src/A.kt:12
///    = note: ...
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, severity: Severity) -> String {
        if !self.color {
            return severity.to_string();
        }
        let code = match severity {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Note => "36",
        };
        format!("\x1b[1;{code}m{severity}\x1b[0m")
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();

        match &diag.target {
            Some(target) => out.push_str(&format!(
                "{}[{}]: {}\n",
                self.paint(diag.severity),
                target,
                diag.message
            )),
            None => out.push_str(&format!("{}: {}\n", self.paint(diag.severity), diag.message)),
        }

        if let Some(file) = &diag.file {
            match diag.line {
                Some(line) => out.push_str(&format!("  --> {}:{line}\n", file.display())),
                None => out.push_str(&format!("  --> {}\n", file.display())),
            }
        }

        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }

        out
    }
}

/// Renders each diagnostic as one line of JSON.
pub struct JsonRenderer;

impl DiagnosticRenderer for JsonRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        match serde_json::to_string(diag) {
            Ok(json) => format!("{json}\n"),
            Err(e) => format!("{{\"severity\":\"error\",\"message\":\"unserializable diagnostic: {e}\"}}\n"),
        }
    }
}
