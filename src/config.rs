use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "code-runner", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Address to bind, overrides the configuration file
    #[arg(long = "bind")]
    pub bind_address: Option<String>,

    /// Port to bind, overrides the configuration file
    #[arg(long = "port", short = 'p')]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration from the specified file, or the defaults if none was given
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(address) = &self.bind_address {
            config.server.bind_address = Some(address.clone());
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = Some(port);
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub toolchains: ToolchainConfig,
    pub workspace_root: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub run_timeout_ms: MilliSecond,
    pub compile_timeout_ms: MilliSecond,
    pub max_output_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: MilliSecond(10_000),
            compile_timeout_ms: MilliSecond(10_000),
            max_output_chars: 1024 * 1024,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ToolchainConfig {
    pub javac: String,
    pub java: String,
    pub cpp_compiler: String,
    pub cpp_flags: Vec<String>,
    /// Interpreter names in order of preference
    pub python: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            javac: "javac".to_string(),
            java: "java".to_string(),
            cpp_compiler: "g++".to_string(),
            cpp_flags: vec!["-std=c++17".to_string(), "-O2".to_string()],
            python: vec!["python3".to_string(), "python".to_string()],
        }
    }
}

impl Config {
    /// Directory under which per-execution workspaces are created
    pub fn workspace_root(&self) -> PathBuf {
        if let Some(root) = &self.workspace_root {
            return root.clone();
        }

        use directories::ProjectDirs;

        match ProjectDirs::from("", "", "code-runner") {
            Some(proj_dirs) => proj_dirs.cache_dir().join("workspaces"),
            None => {
                log::warn!("Unable to find user cache directory, using system temp dir");
                std::env::temp_dir().join("code-runner")
            }
        }
    }
}
