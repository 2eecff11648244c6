mod compile;
mod cpp;
mod evaluate;
mod java;
mod language;
mod outcome;
mod process;
mod python;
mod workspace;

pub use cpp::CppPipeline;
pub use evaluate::evaluate;
pub use java::{Diagnostic, JavaPipeline, Severity, parse_diagnostics};
pub use language::{ExecutionRequest, Language, LanguagePipeline, Pipeline, UnsupportedLanguage};
pub use outcome::{CompilationOutcome, ExecutionOutcome, ExecutionResult, ExecutionStatus};
pub use process::{
    ExecutionLimits, ProcessCommand, ProcessExecutor, TRUNCATION_MARKER, WaitOutcome,
    wait_with_deadline,
};
pub use python::PythonPipeline;
pub use workspace::Workspace;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ToolchainConfig};

/// Java class name used when the caller does not name one
pub const DEFAULT_ENTRY_POINT: &str = "Main";

/// Raw code submission as received from a caller
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CodeSubmission {
    pub source_code: String,
    pub language: String,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// Compiles and runs untrusted submissions, one workspace per request
///
/// There is no admission control: every call spawns its own compiler and
/// program processes, bounded only in wall-clock time and captured output.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    workspace_root: PathBuf,
    toolchains: ToolchainConfig,
    executor: ProcessExecutor,
}

impl ExecutionEngine {
    pub fn new(workspace_root: PathBuf, toolchains: ToolchainConfig, limits: ExecutionLimits) -> Self {
        Self {
            workspace_root,
            toolchains,
            executor: ProcessExecutor::new(limits),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.workspace_root(),
            config.toolchains.clone(),
            ExecutionLimits::from(&config.limits),
        )
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn limits(&self) -> &ExecutionLimits {
        self.executor.limits()
    }

    /// Runs a submission end to end and always produces a result
    pub async fn execute_code(&self, submission: CodeSubmission) -> ExecutionResult {
        let start_time = Instant::now();

        let language = match submission.language.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                log::info!("Rejected submission: {e}");
                return ExecutionResult::rejected(
                    ExecutionStatus::UnsupportedLanguage,
                    e.to_string(),
                    submission.expected_output.as_deref(),
                    start_time.elapsed().as_millis() as u64,
                );
            }
        };

        let request = ExecutionRequest {
            source_code: submission.source_code,
            language,
            entry_point: resolve_entry_point(submission.entry_point),
            stdin: submission.stdin,
            expected_output: submission.expected_output,
        };

        let result = match self.run_in_workspace(&request).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Execution of {language} submission failed: {e:#}");
                ExecutionResult {
                    status: ExecutionStatus::SystemError,
                    output: String::new(),
                    duration_ms: start_time.elapsed().as_millis() as u64,
                    correct: request.expected_output.as_ref().map(|_| false),
                    exit_code: None,
                    truncated: false,
                    message: Some(format!("System error: {e:#}")),
                }
            }
        };

        log::info!(
            "Executed {language} submission: {:?} in {} ms",
            result.status,
            result.duration_ms
        );
        result
    }

    async fn run_in_workspace(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let workspace = Workspace::acquire(&self.workspace_root).await?;
        let pipeline = LanguagePipeline::for_language(request.language, &self.toolchains);

        let result = self.drive(&pipeline, &workspace, request).await;
        workspace.release().await;
        result
    }

    /// Compile (if the language has that stage), run, evaluate
    async fn drive(
        &self,
        pipeline: &LanguagePipeline,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let start_time = Instant::now();
        let mut state = StateTracker::new(workspace.id());
        let expected = request.expected_output.as_deref();

        if request.language.is_compiled() {
            state.advance(ExecutionStatus::Compiling);
        }
        if let Some(compilation) = pipeline.compile(workspace, request, &self.executor).await? {
            if let Some(status) = compilation.failure_status() {
                state.advance(status);
                return Ok(ExecutionResult {
                    status,
                    output: compilation.diagnostics,
                    duration_ms: start_time.elapsed().as_millis() as u64,
                    correct: expected.map(|_| false),
                    exit_code: None,
                    truncated: false,
                    message: Some(match status {
                        ExecutionStatus::CompileTimeout => "Compilation timed out".to_string(),
                        _ => "Compilation failed".to_string(),
                    }),
                });
            }
        }

        state.advance(ExecutionStatus::Running);
        let outcome = pipeline.run(workspace, request, &self.executor).await?;
        state.advance(outcome.status);

        // Anything but a clean exit scores zero
        let correct = match outcome.status {
            ExecutionStatus::Success => evaluate(&outcome.output, expected),
            _ => expected.map(|_| false),
        };

        Ok(ExecutionResult {
            status: outcome.status,
            output: outcome.output,
            duration_ms: outcome.duration_ms,
            correct,
            exit_code: outcome.exit_code,
            truncated: outcome.truncated,
            message: outcome.message,
        })
    }
}

fn resolve_entry_point(entry_point: Option<String>) -> String {
    entry_point
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string())
}

/// Logs the lifecycle of one execution
struct StateTracker<'a> {
    id: &'a str,
    state: ExecutionStatus,
}

impl<'a> StateTracker<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            state: ExecutionStatus::Pending,
        }
    }

    fn advance(&mut self, next: ExecutionStatus) {
        debug_assert!(!self.state.is_terminal(), "{:?} is terminal", self.state);
        log::debug!("Execution {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}
