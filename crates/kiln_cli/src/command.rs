//! A compile backend that runs the command configured for a kind.
//!
//! The command line comes from `[kinds.<kind>] command` and may use these
//! placeholders:
//!
//! | placeholder    | expands to                                          |
//! |----------------|-----------------------------------------------------|
//! | `{sources}`    | one argument per source file (whole token only)     |
//! | `{options}`    | one argument per configured option (whole token)    |
//! | `{classpath}`  | classpath entries joined with the path separator    |
//! | `{output_dir}` | the chunk's output directory                        |
//! | `{source}`     | the current source file, per-file mode only         |
//! | `{stem}`       | file name of `{source}` without extension           |
//!
//! `outputs` templates name the files each source produces, using the same
//! placeholders. Only outputs that exist after the command ran are reported.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use kiln_build::{CompileOutput, CompileRequest, Compiler, GeneratedFile};
use kiln_common::KilnResult;
use kiln_config::ResolvedKind;
use kiln_diagnostics::{parse_tool_output, Diagnostic, Severity};
use tracing::{debug, warn};

/// Runs an external compiler command.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: Vec<String>,
    outputs: Vec<String>,
    per_file: bool,
    working_dir: PathBuf,
}

impl CommandCompiler {
    /// The backend of `policy`, or `None` if the kind has no command.
    ///
    /// A single-string command is split on whitespace.
    pub fn from_policy(policy: &ResolvedKind, working_dir: &Path) -> Option<Self> {
        let command: Vec<String> = match policy.command.as_slice() {
            [] => return None,
            [line] => line.split_whitespace().map(str::to_string).collect(),
            args => args.to_vec(),
        };
        if command.is_empty() {
            return None;
        }
        Some(Self {
            command,
            outputs: policy.outputs.clone(),
            per_file: policy.per_file,
            working_dir: working_dir.to_path_buf(),
        })
    }

    /// Expands the command line for `request`, for a single `source` in
    /// per-file mode.
    ///
    /// A classpath that cannot be joined into one argument fails only this
    /// compile, as an error diagnostic.
    fn expand(&self, request: &CompileRequest, source: Option<&Path>) -> Result<Vec<OsString>, Diagnostic> {
        let classpath = if self.command.iter().any(|t| t == "{classpath}") {
            std::env::join_paths(&request.classpath)
                .map_err(|e| Diagnostic::error(format!("invalid classpath entry for {}: {e}", request.chunk)))?
        } else {
            OsString::new()
        };
        let mut args: Vec<OsString> = Vec::new();
        for token in &self.command {
            match token.as_str() {
                "{sources}" => match source {
                    Some(s) => args.push(s.as_os_str().to_owned()),
                    None => args.extend(request.sources.iter().map(|s| s.as_os_str().to_owned())),
                },
                "{options}" => args.extend(request.options.iter().map(OsString::from)),
                "{classpath}" => args.push(classpath.clone()),
                _ => args.push(OsString::from(substitute(token, request, source))),
            }
        }
        Ok(args)
    }

    /// Outputs that `source` produced according to the `outputs` templates.
    fn generated_by(&self, request: &CompileRequest, source: &Path) -> Vec<GeneratedFile> {
        self.outputs
            .iter()
            .map(|template| PathBuf::from(substitute(template, request, Some(source))))
            .map(|output| {
                if output.is_relative() {
                    self.working_dir.join(output)
                } else {
                    output
                }
            })
            .filter(|output| output.is_file())
            .map(|output| GeneratedFile::from_source(source, output))
            .collect()
    }

    /// Runs one expanded command line. `Ok(false)` means the tool reported
    /// failure; its messages are appended to `diagnostics`.
    fn run(&self, args: &[OsString], diagnostics: &mut Vec<Diagnostic>) -> bool {
        let Some((program, rest)) = args.split_first() else {
            return false;
        };
        debug!(program = ?program, args = rest.len(), "running compiler");

        let output = match Command::new(program)
            .args(rest)
            .current_dir(&self.working_dir)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                diagnostics.push(Diagnostic::error(format!(
                    "failed to run {}: {e}",
                    program.to_string_lossy()
                )));
                return false;
            }
        };

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout)
        );
        let fallback = if output.status.success() {
            Severity::Note
        } else {
            Severity::Error
        };
        let mut reported = parse_tool_output(&text, fallback);
        for diag in &mut reported {
            if let Some(file) = diag.file.as_mut() {
                if file.is_relative() {
                    *file = self.working_dir.join(&*file);
                }
            }
        }

        if !output.status.success() {
            warn!(program = ?program, status = %output.status, "compiler failed");
            if !reported.iter().any(|d| d.severity.is_error()) {
                reported.push(Diagnostic::error(format!(
                    "{} exited with {}",
                    program.to_string_lossy(),
                    output.status
                )));
            }
        }
        diagnostics.extend(reported);
        output.status.success()
    }
}

impl Compiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest) -> KilnResult<CompileOutput> {
        let mut diagnostics = Vec::new();
        let mut generated = Vec::new();

        if self.per_file {
            let mut success = true;
            for source in &request.sources {
                if request.cancel.is_cancelled() {
                    debug!(chunk = %request.chunk, "cancelled between files");
                    return Ok(CompileOutput::failed(diagnostics));
                }
                let args = match self.expand(request, Some(source)) {
                    Ok(args) => args,
                    Err(diag) => {
                        diagnostics.push(diag);
                        return Ok(CompileOutput::failed(diagnostics));
                    }
                };
                if self.run(&args, &mut diagnostics) {
                    generated.extend(self.generated_by(request, source));
                } else {
                    success = false;
                }
            }
            return Ok(CompileOutput {
                success,
                generated,
                diagnostics,
            });
        }

        let args = match self.expand(request, None) {
            Ok(args) => args,
            Err(diag) => {
                diagnostics.push(diag);
                return Ok(CompileOutput::failed(diagnostics));
            }
        };
        let success = self.run(&args, &mut diagnostics);
        if success {
            for source in &request.sources {
                generated.extend(self.generated_by(request, source));
            }
        }
        Ok(CompileOutput {
            success,
            generated,
            diagnostics,
        })
    }
}

/// Replaces the inline placeholders of `template`.
fn substitute(template: &str, request: &CompileRequest, source: Option<&Path>) -> String {
    let mut text = template.replace("{output_dir}", &request.output_dir.to_string_lossy());
    if let Some(source) = source {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        text = text
            .replace("{source}", &source.to_string_lossy())
            .replace("{stem}", &stem);
    }
    text
}
