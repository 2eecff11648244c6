use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;

use super::cpp::CppPipeline;
use super::java::JavaPipeline;
use super::outcome::{CompilationOutcome, ExecutionOutcome};
use super::process::ProcessExecutor;
use super::python::PythonPipeline;
use super::workspace::Workspace;
use crate::config::ToolchainConfig;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Cpp,
    Python,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Java, Language::Cpp, Language::Python];

    pub fn name(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::Python => "python",
        }
    }

    /// Every identifier accepted for this language, case-insensitively
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Java => &["java"],
            Self::Cpp => &["cpp", "c++"],
            Self::Python => &["python"],
        }
    }

    pub fn is_compiled(self) -> bool {
        !matches!(self, Self::Python)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedLanguage(pub String);

impl fmt::Display for UnsupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unsupported language: '{}'. Supported languages: java, cpp (c++), python",
            self.0
        )
    }
}

impl std::error::Error for UnsupportedLanguage {}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|language| language.aliases().contains(&lowered.as_str()))
            .ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

/// A validated request, built once the language is known
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language: Language,
    /// Public class name for Java, ignored elsewhere
    pub entry_point: String,
    pub stdin: Option<String>,
    pub expected_output: Option<String>,
}

/// The compile/run capability every language variant provides
#[allow(async_fn_in_trait)]
pub trait Pipeline {
    /// Compiles the request inside `workspace`
    ///
    /// Returns `None` for languages without a compile stage. An `Err` means the
    /// toolchain could not be driven at all, not that the code failed to build.
    async fn compile(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<Option<CompilationOutcome>>;

    /// Runs the (compiled) program with the request's stdin
    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<ExecutionOutcome>;
}

/// Closed set of pipeline variants, selected once per request
#[derive(Debug, Clone)]
pub enum LanguagePipeline {
    Java(JavaPipeline),
    Cpp(CppPipeline),
    Python(PythonPipeline),
}

impl LanguagePipeline {
    pub fn for_language(language: Language, toolchains: &ToolchainConfig) -> Self {
        match language {
            Language::Java => Self::Java(JavaPipeline::new(&toolchains.javac, &toolchains.java)),
            Language::Cpp => Self::Cpp(CppPipeline::new(
                &toolchains.cpp_compiler,
                toolchains.cpp_flags.clone(),
            )),
            Language::Python => Self::Python(PythonPipeline::new(toolchains.python.clone())),
        }
    }
}

impl Pipeline for LanguagePipeline {
    async fn compile(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<Option<CompilationOutcome>> {
        match self {
            Self::Java(pipeline) => pipeline.compile(workspace, request, executor).await,
            Self::Cpp(pipeline) => pipeline.compile(workspace, request, executor).await,
            Self::Python(pipeline) => pipeline.compile(workspace, request, executor).await,
        }
    }

    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        executor: &ProcessExecutor,
    ) -> Result<ExecutionOutcome> {
        match self {
            Self::Java(pipeline) => pipeline.run(workspace, request, executor).await,
            Self::Cpp(pipeline) => pipeline.run(workspace, request, executor).await,
            Self::Python(pipeline) => pipeline.run(workspace, request, executor).await,
        }
    }
}
