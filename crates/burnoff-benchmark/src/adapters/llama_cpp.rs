use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use burnoff_core::system::cpu_count;
use burnoff_core::{BenchmarkConfig, BenchmarkRun, BurnoffError, EngineKind, LlamaCppConfig, Result};

use super::{execute, kill_strays, EngineAdapter};
use crate::extractor::OutputParser;
use crate::process::{find_executable, is_executable, CommandRunner, CommandSpec, ProcessRunner};

const WARMUP_MAX_TOKENS: u32 = 8;
/// Offload every layer; llama.cpp clamps this to the real layer count.
const ALL_GPU_LAYERS: &str = "999";

/// Prefixes of llama.cpp runtime log lines, which never belong to generated text.
const LOG_PREFIXES: &[&str] = &[
    "llama_",
    "llm_load",
    "load",
    "main:",
    "build:",
    "system_info",
    "sampler",
    "generate:",
    "print_info",
    "ggml_",
    "gguf_",
    "common_",
    "clip_",
    "Log start",
];
const END_OF_TEXT: &str = "[end of text]";

pub struct LlamaCppAdapter {
    config: LlamaCppConfig,
    runner: Arc<dyn CommandRunner>,
    parser: OutputParser,
    executable: Option<PathBuf>,
    warmed_up: bool,
}

impl LlamaCppAdapter {
    pub fn new(config: LlamaCppConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    pub fn with_runner(config: LlamaCppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            parser: OutputParser::llama_cpp(),
            executable: None,
            warmed_up: false,
        }
    }

    /// First executable candidate path, then a `PATH` lookup of the known binary names.
    pub fn locate_executable(&self) -> Option<PathBuf> {
        self.config
            .candidate_paths
            .iter()
            .find(|p| is_executable(p))
            .cloned()
            .or_else(|| {
                self.config
                    .executable_names
                    .iter()
                    .find_map(|name| find_executable(name))
            })
    }

    pub fn build_command(
        &self,
        executable: &Path,
        model: &Path,
        config: &BenchmarkConfig,
        max_tokens: u32,
    ) -> CommandSpec {
        let threads = self.config.threads.unwrap_or_else(cpu_count);

        let mut spec = CommandSpec::new(executable)
            .arg("-m")
            .arg(model.to_string_lossy())
            .arg("-p")
            .arg(config.prompt.as_str())
            .arg("-n")
            .arg(max_tokens.to_string())
            .arg("--temp")
            .arg(config.temperature.to_string())
            .arg("-t")
            .arg(threads.to_string())
            .arg("-b")
            .arg(self.config.batch_size.to_string())
            .arg("-c")
            .arg(config.context_length.to_string())
            .arg("-no-cnv");

        if config.use_gpu {
            spec = spec.arg("-ngl").arg(ALL_GPU_LAYERS);
        }

        spec
    }

    fn model_path(config: &BenchmarkConfig) -> std::result::Result<&Path, String> {
        let model = config
            .model_path
            .as_deref()
            .ok_or_else(|| "llama.cpp requires a model path".to_string())?;
        if !model.is_file() {
            return Err(format!("model file not found: {}", model.display()));
        }
        Ok(model)
    }

    async fn invoke(
        &self,
        executable: &Path,
        model: &Path,
        config: &BenchmarkConfig,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<BenchmarkRun> {
        let spec = self.build_command(executable, model, config, max_tokens);
        let result = execute(self.runner.as_ref(), &spec, timeout, "llama.cpp").await?;
        let latency_ms = result.elapsed.as_secs_f64() * 1000.0;

        let mut metrics = self.parser.parse(&result.combined_output());
        if metrics.is_empty() {
            metrics.tokens_generated = estimate_tokens_from_text(&result.stdout, &config.prompt);
            debug!(
                "No token counts in llama.cpp output, estimated {} from text",
                metrics.tokens_generated
            );
        }

        let metrics = metrics.resolve(Some(latency_ms));
        if metrics.is_empty() {
            return Err(BurnoffError::InferenceFailed(
                "llama.cpp output contained no recoverable metrics".to_string(),
            ));
        }

        Ok(metrics.into_run(latency_ms))
    }
}

#[async_trait]
impl EngineAdapter for LlamaCppAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::LlamaCpp
    }

    fn display_name(&self) -> &str {
        EngineKind::LlamaCpp.label()
    }

    fn is_available(&self) -> bool {
        self.locate_executable().is_some()
    }

    #[instrument(skip(self, config), fields(engine = "llama_cpp"))]
    async fn warmup(&mut self, config: &BenchmarkConfig) -> Result<()> {
        self.warmed_up = false;

        let executable = self.locate_executable().ok_or_else(|| {
            BurnoffError::WarmupFailed("llama.cpp executable not found".to_string())
        })?;
        let model = Self::model_path(config).map_err(BurnoffError::WarmupFailed)?;
        info!("Using llama.cpp at {}", executable.display());

        let max_tokens = config.max_tokens.min(WARMUP_MAX_TOKENS);
        self.invoke(&executable, model, config, max_tokens, self.config.warmup_timeout())
            .await
            .map_err(|e| BurnoffError::WarmupFailed(e.to_string()))?;

        self.executable = Some(executable);
        self.warmed_up = true;
        Ok(())
    }

    async fn run_inference(&mut self, config: &BenchmarkConfig) -> Result<BenchmarkRun> {
        let executable = match (&self.executable, self.warmed_up) {
            (Some(exe), true) => exe.clone(),
            _ => return Err(BurnoffError::NotWarmedUp(self.display_name().to_string())),
        };
        let model = Self::model_path(config).map_err(BurnoffError::InferenceFailed)?;

        self.invoke(
            &executable,
            model,
            config,
            config.max_tokens,
            self.config.iteration_timeout(),
        )
        .await
    }

    async fn cleanup(&mut self) {
        self.warmed_up = false;

        let pattern = self
            .executable
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .or_else(|| self.config.executable_names.first().cloned())
            .unwrap_or_default();

        kill_strays(self.runner.as_ref(), &pattern).await;
    }
}

/// Approximate a token count from the words of generated text, for builds that print no timings.
pub fn estimate_tokens_from_text(stdout: &str, prompt: &str) -> u32 {
    let text = stdout
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !LOG_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .replace(END_OF_TEXT, "");

    let text = text.trim_start();
    let generated = text.strip_prefix(prompt.trim()).unwrap_or(text);

    generated.split_whitespace().count() as u32
}
