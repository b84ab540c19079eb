//! Thread-safe diagnostic accumulator for parallel chunk compilation.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;
use kiln_common::TargetId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A thread-safe accumulator for diagnostics emitted during a build pass.
///
/// Chunks compiled on different threads emit into the same sink via
/// [`emit`](Self::emit). Error and warning counts are tracked atomically so
/// that summaries do not need to lock the diagnostic vector.
pub struct DiagnosticSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    error_count: AtomicUsize,
    warning_count: AtomicUsize,
}

impl DiagnosticSink {
    /// Creates a new empty diagnostic sink.
    pub fn new() -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            error_count: AtomicUsize::new(0),
            warning_count: AtomicUsize::new(0),
        }
    }

    /// Emits a diagnostic into the sink.
    pub fn emit(&self, diag: Diagnostic) {
        match diag.severity {
            Severity::Error => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
            Severity::Warning => {
                self.warning_count.fetch_add(1, Ordering::Relaxed);
            }
            Severity::Note => {}
        }
        self.lock().push(diag);
    }

    /// Emits every diagnostic of `diags`.
    pub fn extend(&self, diags: impl IntoIterator<Item = Diagnostic>) {
        for diag in diags {
            self.emit(diag);
        }
    }

    /// Returns `true` if any error-severity diagnostics have been emitted.
    pub fn has_errors(&self) -> bool {
        self.error_count.load(Ordering::Relaxed) > 0
    }

    /// Returns the number of error-severity diagnostics emitted so far.
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Returns the number of warnings emitted so far.
    pub fn warning_count(&self) -> usize {
        self.warning_count.load(Ordering::Relaxed)
    }

    /// Takes all accumulated diagnostics, leaving the sink empty.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        self.error_count.store(0, Ordering::Relaxed);
        self.warning_count.store(0, Ordering::Relaxed);
        std::mem::take(&mut *self.lock())
    }

    /// Returns a snapshot of all accumulated diagnostics without draining.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    /// Diagnostics attributed to one target.
    pub fn for_target(&self, target: &TargetId) -> Vec<Diagnostic> {
        self.lock()
            .iter()
            .filter(|d| d.target.as_ref() == Some(target))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        // A panic while holding the lock leaves the vector intact.
        self.diagnostics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}
