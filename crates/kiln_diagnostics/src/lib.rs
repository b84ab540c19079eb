//! Diagnostic creation, severity management, and rendering.
//!
//! Compile backends report problems as structured [`Diagnostic`] values. The
//! thread-safe [`DiagnosticSink`] accumulates them while chunks compile in
//! parallel, and [`DiagnosticRenderer`] implementations format them for the
//! terminal or as JSON.

#![warn(missing_docs)]

pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use diagnostic::{parse_tool_output, Diagnostic};
pub use renderer::{DiagnosticRenderer, JsonRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
