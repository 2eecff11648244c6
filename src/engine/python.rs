use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tokio::time::timeout;

use super::language::{ExecutionRequest, Pipeline};
use super::outcome::{CompilationOutcome, ExecutionOutcome};
use super::process::{ProcessCommand, ProcessExecutor};
use super::workspace::Workspace;

const SCRIPT_NAME: &str = "main.py";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PythonPipeline {
    /// Interpreter names, preferred first
    candidates: Vec<String>,
}

impl PythonPipeline {
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    /// Picks the first candidate whose `--version` probe succeeds
    ///
    /// If every probe fails the last candidate is returned anyway, so the run
    /// itself reports why the interpreter cannot be started.
    async fn resolve_interpreter(&self) -> Result<&str> {
        let Some(last) = self.candidates.last() else {
            bail!("No Python interpreter configured");
        };

        for candidate in &self.candidates {
            if probe(candidate).await {
                return Ok(candidate.as_str());
            }
            log::debug!("Python interpreter `{candidate}` not usable, trying the next one");
        }

        Ok(last.as_str())
    }
}

async fn probe(interpreter: &str) -> bool {
    let status = Command::new(interpreter)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    matches!(timeout(PROBE_TIMEOUT, status).await, Ok(Ok(status)) if status.success())
}

impl Pipeline for PythonPipeline {
    async fn compile(
        &self,
        _workspace: &Workspace,
        _request: &ExecutionRequest,
        _executor: &ProcessExecutor,
    ) -> Result<Option<CompilationOutcome>> {
        Ok(None)
    }

    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<ExecutionOutcome> {
        tokio::fs::write(workspace.join(SCRIPT_NAME), &request.source_code)
            .await
            .with_context(|| format!("Failed to write {SCRIPT_NAME}"))?;

        let interpreter = self.resolve_interpreter().await?;
        let command = ProcessCommand::new(interpreter).arg(SCRIPT_NAME);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_interpreters_fall_back_to_last() {
        let pipeline = PythonPipeline::new(vec![
            "no-such-python-a".to_string(),
            "no-such-python-b".to_string(),
        ]);
        assert_eq!(pipeline.resolve_interpreter().await.unwrap(), "no-such-python-b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_working_candidate_wins() {
        // `true --version` exits zero on both GNU and BSD userlands
        let pipeline = PythonPipeline::new(vec![
            "no-such-python".to_string(),
            "true".to_string(),
            "also-missing".to_string(),
        ]);
        assert_eq!(pipeline.resolve_interpreter().await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_no_candidates_is_an_error() {
        let pipeline = PythonPipeline::new(Vec::new());
        assert!(pipeline.resolve_interpreter().await.is_err());
    }
}
