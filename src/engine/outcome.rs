use serde::{Deserialize, Serialize};

/// Lifecycle state of one execution
///
/// `Pending`, `Compiling` and `Running` are transient. Every other variant is
/// terminal and is what callers see on an [`ExecutionResult`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Compiling,
    Running,
    Success,
    CompileError,
    CompileTimeout,
    RuntimeError,
    Timeout,
    ExecutionError,
    UnsupportedLanguage,
    SystemError,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Compiling | Self::Running)
    }
}

/// Verdict of the compile stage of a compiled language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationOutcome {
    pub success: bool,
    pub timed_out: bool,
    pub diagnostics: String,
}

impl CompilationOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            timed_out: false,
            diagnostics: String::new(),
        }
    }

    pub fn failed(diagnostics: String) -> Self {
        Self {
            success: false,
            timed_out: false,
            diagnostics,
        }
    }

    pub fn timed_out(diagnostics: String) -> Self {
        Self {
            success: false,
            timed_out: true,
            diagnostics,
        }
    }

    /// Terminal status for a failed compilation, `None` if it succeeded
    pub fn failure_status(&self) -> Option<ExecutionStatus> {
        match (self.success, self.timed_out) {
            (true, _) => None,
            (false, true) => Some(ExecutionStatus::CompileTimeout),
            (false, false) => Some(ExecutionStatus::CompileError),
        }
    }
}

/// What the process executor observed for one child process
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub output: String,
    pub truncated: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Why the process did not succeed, e.g. its exit code or the timeout
    pub message: Option<String>,
}

/// The value handed back to callers, one per request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ExecutionResult {
    /// A result that never reached a process, e.g. a rejected language
    pub fn rejected(
        status: ExecutionStatus,
        message: String,
        expected: Option<&str>,
        duration_ms: u64,
    ) -> Self {
        Self {
            status,
            output: String::new(),
            duration_ms,
            correct: expected.map(|_| false),
            exit_code: None,
            truncated: false,
            message: Some(message),
        }
    }
}
