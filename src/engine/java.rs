use std::fmt;
use std::path::{Component, Path};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use super::compile::run_compiler;
use super::language::{ExecutionRequest, Pipeline};
use super::outcome::{CompilationOutcome, ExecutionOutcome};
use super::process::{ProcessCommand, ProcessExecutor};
use super::workspace::Workspace;

/// `Main.java:3: error: ';' expected`
static JAVAC_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.*[/\\])?[^/\\]+\.java:(\d+): (error|warning): (.*)$")
        .expect("javac diagnostic pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("ERROR"),
            Self::Warning => f.write_str("WARNING"),
        }
    }
}

/// One structured compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: [{}] {}", self.line, self.severity, self.message)
    }
}

/// Extracts diagnostics from javac output, skipping source excerpts and carets
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let caps = JAVAC_DIAGNOSTIC.captures(line.trim_end())?;
            let severity = match &caps[2] {
                "error" => Severity::Error,
                _ => Severity::Warning,
            };
            Some(Diagnostic {
                severity,
                line: caps[1].parse().ok()?,
                message: caps[3].to_string(),
            })
        })
        .collect()
}

/// One diagnostic per line, or the raw output if javac printed nothing parseable
fn render_diagnostics(output: &str) -> String {
    let diagnostics = parse_diagnostics(output);
    if diagnostics.is_empty() {
        return output.to_string();
    }

    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `<entry>.java`, provided the entry point names a file directly inside the workspace
fn source_file_name(entry_point: &str) -> Option<String> {
    let mut components = Path::new(entry_point).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == entry_point => {
            Some(format!("{entry_point}.java"))
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct JavaPipeline {
    javac: String,
    java: String,
}

impl JavaPipeline {
    pub fn new(javac: &str, java: &str) -> Self {
        Self {
            javac: javac.to_string(),
            java: java.to_string(),
        }
    }
}

impl Pipeline for JavaPipeline {
    async fn compile(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<Option<CompilationOutcome>> {
        // javac insists that a public class lives in a file of the same name
        let Some(source_name) = source_file_name(&request.entry_point) else {
            log::info!("Rejected Java entry point `{}`", request.entry_point);
            return Ok(Some(CompilationOutcome::failed(format!(
                "Invalid entry point `{}`: expected a class name",
                request.entry_point
            ))));
        };
        tokio::fs::write(workspace.join(&source_name), &request.source_code)
            .await
            .with_context(|| format!("Failed to write {source_name}"))?;

        let command = ProcessCommand::new(&self.javac)
            .args(["-J-Duser.language=en", "-encoding", "UTF-8", "-d"])
            .arg(workspace.path())
            .arg("-cp")
            .arg(workspace.path())
            .arg(&source_name);

        let outcome = run_compiler(executor, &command, workspace, render_diagnostics).await?;
        Ok(Some(outcome))
    }

    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<ExecutionOutcome> {
        let command = ProcessCommand::new(&self.java)
            .arg("-Dfile.encoding=UTF-8")
            .arg("-cp")
            .arg(workspace.path())
            .arg(&request.entry_point);

        Ok(executor
            .execute(
                &command,
                workspace.path(),
                request.stdin.as_deref(),
                executor.limits().run_timeout,
            )
            .await)
    }
}
