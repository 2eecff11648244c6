use anyhow::{Context, Result};

use super::compile::run_compiler;
use super::language::{ExecutionRequest, Pipeline};
use super::outcome::{CompilationOutcome, ExecutionOutcome};
use super::process::{ProcessCommand, ProcessExecutor};
use super::workspace::Workspace;

const SOURCE_NAME: &str = "main.cpp";
const EXECUTABLE_NAME: &str = if cfg!(windows) { "main.exe" } else { "main" };

#[derive(Debug, Clone)]
pub struct CppPipeline {
    compiler: String,
    flags: Vec<String>,
}

impl CppPipeline {
    pub fn new(compiler: &str, flags: Vec<String>) -> Self {
        Self {
            compiler: compiler.to_string(),
            flags,
        }
    }

    fn compile_command(&self) -> ProcessCommand {
        ProcessCommand::new(&self.compiler)
            .args(&self.flags)
            .args(["-o", EXECUTABLE_NAME, SOURCE_NAME])
    }
}

impl Pipeline for CppPipeline {
    async fn compile(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<Option<CompilationOutcome>> {
        tokio::fs::write(workspace.join(SOURCE_NAME), &request.source_code)
            .await
            .with_context(|| format!("Failed to write {SOURCE_NAME}"))?;

        let command = self.compile_command();
        let outcome = run_compiler(executor, &command, workspace, str::to_string).await?;
        Ok(Some(outcome))
    }

    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<ExecutionOutcome> {
        // An absolute path, so no shell-style `./main` lookup is involved
        let command = ProcessCommand::new(workspace.join(EXECUTABLE_NAME));

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
