use anyhow::{Result, bail};

use super::outcome::{CompilationOutcome, ExecutionOutcome, ExecutionStatus};
use super::process::{ProcessCommand, ProcessExecutor};
use super::workspace::Workspace;

/// Runs a compiler process in the workspace and turns its outcome into a verdict
///
/// `render` formats the compiler's merged output into the diagnostics shown
/// to the user when the build fails.
pub(super) async fn run_compiler(
    executor: &ProcessExecutor,
    command: &ProcessCommand,
    workspace: &Workspace,
    render: impl FnOnce(&str) -> String,
) -> Result<CompilationOutcome> {
    let deadline = executor.limits().compile_timeout;
    let outcome = executor
        .execute(command, workspace.path(), None, deadline)
        .await;

    log::debug!(
        "Compiler `{command}` finished with {:?} in {} ms",
        outcome.status,
        outcome.duration_ms
    );
    interpret(outcome, render)
}

fn interpret(
    outcome: ExecutionOutcome,
    render: impl FnOnce(&str) -> String,
) -> Result<CompilationOutcome> {
    match outcome.status {
        ExecutionStatus::Success => Ok(CompilationOutcome::passed()),
        ExecutionStatus::RuntimeError => {
            let mut diagnostics = render(&outcome.output);
            if diagnostics.trim().is_empty() {
                diagnostics = outcome
                    .message
                    .unwrap_or_else(|| "Compilation failed".to_string());
            }
            Ok(CompilationOutcome::failed(diagnostics))
        }
        ExecutionStatus::Timeout => Ok(CompilationOutcome::timed_out(
            outcome
                .message
                .unwrap_or_else(|| "Compilation timed out".to_string()),
        )),
        ExecutionStatus::ExecutionError => bail!(
            "Unable to run compiler: {}",
            outcome.message.unwrap_or_default()
        ),
        other => bail!("Compiler finished in unexpected state {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ExecutionStatus, output: &str, message: Option<&str>) -> ExecutionOutcome {
        ExecutionOutcome {
            status,
            output: output.to_string(),
            truncated: false,
            exit_code: None,
            duration_ms: 1,
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_success_passes() {
        let verdict = interpret(outcome(ExecutionStatus::Success, "", None), |s| s.to_string());
        assert!(verdict.unwrap().success);
    }

    #[test]
    fn test_failure_renders_output() {
        let verdict = interpret(
            outcome(ExecutionStatus::RuntimeError, "main.cpp:1:1: error: x", Some("Process exited with code 1")),
            |s| format!("rendered: {s}"),
        )
        .unwrap();
        assert_eq!(verdict.failure_status(), Some(ExecutionStatus::CompileError));
        assert_eq!(verdict.diagnostics, "rendered: main.cpp:1:1: error: x");
    }

    #[test]
    fn test_silent_failure_falls_back_to_exit_message() {
        let verdict = interpret(
            outcome(ExecutionStatus::RuntimeError, "", Some("Process exited with code 1")),
            |s| s.to_string(),
        )
        .unwrap();
        assert_eq!(verdict.diagnostics, "Process exited with code 1");
    }

    #[test]
    fn test_timeout_is_compile_timeout() {
        let verdict = interpret(
            outcome(ExecutionStatus::Timeout, "partial", Some("Execution timed out after 10 ms")),
            |s| s.to_string(),
        )
        .unwrap();
        assert_eq!(verdict.failure_status(), Some(ExecutionStatus::CompileTimeout));
    }

    #[test]
    fn test_unstartable_compiler_is_an_error() {
        let verdict = interpret(
            outcome(ExecutionStatus::ExecutionError, "", Some("Failed to execute g++: not found")),
            |s| s.to_string(),
        );
        assert!(verdict.unwrap_err().to_string().contains("not found"));
    }
}
