use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BenchmarkConfig, Result};

pub const CONFIG_DIR_NAME: &str = "burnoff";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Machine-level settings: where the backends live and how long they may take.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub llama_cpp: LlamaCppConfig,
    #[serde(default)]
    pub python: PythonConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub iterations: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub iteration_delay_ms: u64,
    pub cooldown_ms: u64,
    pub context_length: u32,
    pub use_gpu: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            max_tokens: 100,
            temperature: 0.7,
            iteration_delay_ms: 1000,
            cooldown_ms: 2000,
            context_length: 2048,
            use_gpu: true,
        }
    }
}

impl DefaultsConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Seed a request from these defaults.
    pub fn benchmark_config(&self, prompt: impl Into<String>) -> BenchmarkConfig {
        BenchmarkConfig {
            prompt: prompt.into(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            iterations: self.iterations,
            iteration_delay: Duration::from_millis(self.iteration_delay_ms),
            model_path: None,
            use_gpu: self.use_gpu,
            context_length: self.context_length,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlamaCppConfig {
    /// Checked in order before falling back to a `PATH` lookup.
    pub candidate_paths: Vec<PathBuf>,
    pub executable_names: Vec<String>,
    pub threads: Option<u32>,
    pub batch_size: u32,
    pub warmup_timeout_secs: u64,
    pub iteration_timeout_secs: u64,
}

impl Default for LlamaCppConfig {
    fn default() -> Self {
        Self {
            candidate_paths: vec![
                PathBuf::from("llama.cpp/build/bin/llama-cli"),
                PathBuf::from("../llama.cpp/build/bin/llama-cli"),
                PathBuf::from("/usr/local/bin/llama-cli"),
                PathBuf::from("/opt/homebrew/bin/llama-cli"),
            ],
            executable_names: vec!["llama-cli".to_string()],
            threads: None,
            batch_size: 512,
            warmup_timeout_secs: 60,
            iteration_timeout_secs: 300,
        }
    }
}

impl LlamaCppConfig {
    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_secs)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    pub install_dir: PathBuf,
    /// Relative to `install_dir`, which is also the working directory of every invocation.
    pub required_scripts: Vec<String>,
    pub interpreter: String,
    pub module: String,
    pub required_imports: Vec<String>,
    pub warmup_timeout_secs: u64,
    pub iteration_timeout_secs: u64,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("gpt-oss"),
            required_scripts: vec![
                "gpt_oss/generate.py".to_string(),
                "gpt_oss/chat.py".to_string(),
            ],
            interpreter: "python3".to_string(),
            module: "gpt_oss.generate".to_string(),
            required_imports: vec!["torch".to_string()],
            warmup_timeout_secs: 120,
            iteration_timeout_secs: 600,
        }
    }
}

impl PythonConfig {
    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_secs)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("benchmark_results"),
        }
    }
}

impl HarnessConfig {
    /// Explicit file, else the per-user config file if present, else defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading harness config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("BURNOFF_LLAMA_CPP") {
            self.llama_cpp.candidate_paths.insert(0, PathBuf::from(path));
        }
        if let Some(interpreter) = var("BURNOFF_PYTHON") {
            self.python.interpreter = interpreter;
        }
        if let Some(dir) = var("BURNOFF_PYTHON_DIR") {
            self.python.install_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("BURNOFF_RESULTS_DIR") {
            self.output.results_dir = PathBuf::from(dir);
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
