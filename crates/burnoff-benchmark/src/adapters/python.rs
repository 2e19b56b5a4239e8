use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use burnoff_core::{BenchmarkConfig, BenchmarkRun, BurnoffError, EngineKind, PythonConfig, Result};

use super::{execute, kill_strays, EngineAdapter};
use crate::extractor::OutputParser;
use crate::process::{find_executable, CommandRunner, CommandSpec, ProcessRunner};

const WARMUP_MAX_TOKENS: u32 = 8;

/// Drives the Python reference implementation as `python -m <module>` in benchmark mode.
pub struct PythonReferenceAdapter {
    config: PythonConfig,
    runner: Arc<dyn CommandRunner>,
    parser: OutputParser,
    interpreter: Option<PathBuf>,
    warmed_up: bool,
}

impl PythonReferenceAdapter {
    pub fn new(config: PythonConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    pub fn with_runner(config: PythonConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            parser: OutputParser::python_reference(),
            interpreter: None,
            warmed_up: false,
        }
    }

    pub fn missing_scripts(&self) -> Vec<String> {
        self.config
            .required_scripts
            .iter()
            .filter(|s| !self.config.install_dir.join(s).is_file())
            .cloned()
            .collect()
    }

    pub fn resolve_interpreter(&self) -> Option<PathBuf> {
        find_executable(&self.config.interpreter)
    }

    pub fn build_command(
        &self,
        interpreter: &Path,
        config: &BenchmarkConfig,
        max_tokens: u32,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(interpreter)
            .arg("-m")
            .arg(self.config.module.as_str());

        if let Some(model) = &config.model_path {
            spec = spec.arg(model.to_string_lossy());
        }

        spec = spec
            .arg("--prompt")
            .arg(config.prompt.as_str())
            .arg("--max-tokens")
            .arg(max_tokens.to_string())
            .arg("--temperature")
            .arg(config.temperature.to_string())
            .arg("--context-length")
            .arg(config.context_length.to_string())
            .arg("--benchmark")
            .arg("--no-stream");

        if !config.use_gpu {
            spec = spec.arg("--device").arg("cpu");
        }

        spec.current_dir(&self.config.install_dir)
    }

    /// The interpreter must import every required library before any generation is attempted.
    async fn verify_imports(&self, interpreter: &Path) -> Result<()> {
        if self.config.required_imports.is_empty() {
            return Ok(());
        }

        let statement = format!("import {}", self.config.required_imports.join(", "));
        let spec = CommandSpec::new(interpreter)
            .arg("-c")
            .arg(statement)
            .current_dir(&self.config.install_dir);

        execute(self.runner.as_ref(), &spec, self.config.warmup_timeout(), "python")
            .await
            .map(|_| ())
            .map_err(|e| {
                BurnoffError::WarmupFailed(format!(
                    "interpreter cannot import {}: {}",
                    self.config.required_imports.join(", "),
                    e
                ))
            })
    }

    async fn invoke(
        &self,
        interpreter: &Path,
        config: &BenchmarkConfig,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<BenchmarkRun> {
        let spec = self.build_command(interpreter, config, max_tokens);
        let result = execute(self.runner.as_ref(), &spec, timeout, "python").await?;
        let latency_ms = result.elapsed.as_secs_f64() * 1000.0;

        let metrics = self
            .parser
            .parse(&result.combined_output())
            .resolve(Some(latency_ms));

        if metrics.is_empty() {
            return Err(BurnoffError::InferenceFailed(
                "python reference output contained no recoverable metrics".to_string(),
            ));
        }

        Ok(metrics.into_run(latency_ms))
    }
}

#[async_trait]
impl EngineAdapter for PythonReferenceAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Python
    }

    fn display_name(&self) -> &str {
        EngineKind::Python.label()
    }

    fn is_available(&self) -> bool {
        self.config.install_dir.is_dir()
            && self.missing_scripts().is_empty()
            && self.resolve_interpreter().is_some()
    }

    #[instrument(skip(self, config), fields(engine = "python"))]
    async fn warmup(&mut self, config: &BenchmarkConfig) -> Result<()> {
        self.warmed_up = false;

        let missing = self.missing_scripts();
        if !missing.is_empty() {
            return Err(BurnoffError::WarmupFailed(format!(
                "installation at {} is missing {}",
                self.config.install_dir.display(),
                missing.join(", ")
            )));
        }

        let interpreter = self.resolve_interpreter().ok_or_else(|| {
            BurnoffError::WarmupFailed(format!("interpreter '{}' not found", self.config.interpreter))
        })?;
        info!("Using Python interpreter at {}", interpreter.display());

        self.verify_imports(&interpreter).await?;

        let max_tokens = config.max_tokens.min(WARMUP_MAX_TOKENS);
        self.invoke(&interpreter, config, max_tokens, self.config.warmup_timeout())
            .await
            .map_err(|e| BurnoffError::WarmupFailed(e.to_string()))?;

        self.interpreter = Some(interpreter);
        self.warmed_up = true;
        Ok(())
    }

    async fn run_inference(&mut self, config: &BenchmarkConfig) -> Result<BenchmarkRun> {
        let interpreter = match (&self.interpreter, self.warmed_up) {
            (Some(path), true) => path.clone(),
            _ => return Err(BurnoffError::NotWarmedUp(self.display_name().to_string())),
        };

        self.invoke(&interpreter, config, config.max_tokens, self.config.iteration_timeout())
            .await
    }

    async fn cleanup(&mut self) {
        self.warmed_up = false;
        if self.config.module.is_empty() {
            warn!("No module configured, skipping stray process cleanup");
            return;
        }
        kill_strays(self.runner.as_ref(), &self.config.module).await;
    }
}
