//! The capability contract every backend satisfies, and the registry the
//! orchestrator resolves backends through.

mod llama_cpp;
mod native;
mod python;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use burnoff_core::{BenchmarkConfig, BenchmarkRun, BurnoffError, EngineKind, Result};

use crate::process::{CommandResult, CommandRunner, CommandSpec};

pub use llama_cpp::{estimate_tokens_from_text, LlamaCppAdapter};
pub use native::{Generation, NativeAdapter, NativeEngine};
pub use python::PythonReferenceAdapter;

#[async_trait]
pub trait EngineAdapter: Send {
    fn kind(&self) -> EngineKind;

    fn display_name(&self) -> &str;

    /// Cheap and side-effect free: filesystem and executable lookups only.
    fn is_available(&self) -> bool;

    /// Unmeasured priming run. Must succeed before [`EngineAdapter::run_inference`].
    async fn warmup(&mut self, config: &BenchmarkConfig) -> Result<()>;

    /// One measured sample. Returns `BurnoffError::NotWarmedUp` without a prior successful warmup.
    async fn run_inference(&mut self, config: &BenchmarkConfig) -> Result<BenchmarkRun>;

    /// Best-effort and idempotent; safe to call even if warmup never succeeded.
    async fn cleanup(&mut self);
}

/// Adapters keyed by the backend they drive.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn EngineAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any adapter already registered for the same kind.
    pub fn register(&mut self, adapter: Box<dyn EngineAdapter>) {
        let kind = adapter.kind();
        self.adapters.retain(|a| a.kind() != kind);
        self.adapters.push(adapter);
    }

    pub fn with(mut self, adapter: Box<dyn EngineAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get_mut(&mut self, kind: EngineKind) -> Option<&mut (dyn EngineAdapter + 'static)> {
        self.adapters
            .iter_mut()
            .find(|a| a.kind() == kind)
            .map(|a| a.as_mut())
    }

    pub fn contains(&self, kind: EngineKind) -> bool {
        self.adapters.iter().any(|a| a.kind() == kind)
    }

    /// Availability of every known kind, registered or not.
    pub fn availability(&self) -> Vec<(EngineKind, Option<String>, bool)> {
        EngineKind::all()
            .iter()
            .map(|kind| match self.adapters.iter().find(|a| a.kind() == *kind) {
                Some(a) => (*kind, Some(a.display_name().to_string()), a.is_available()),
                None => (*kind, None, false),
            })
            .collect()
    }
}

const PKILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a backend command, turning timeouts and non-zero exits into errors.
async fn execute(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    timeout: Duration,
    engine: &str,
) -> Result<CommandResult> {
    let result = runner.run(spec, timeout).await;

    if result.timed_out() {
        return Err(BurnoffError::Timeout(timeout));
    }
    if !result.success() {
        return Err(BurnoffError::Process(format!(
            "{} exited with code {}: {}",
            engine,
            result.exit_code,
            result.error_summary()
        )));
    }

    Ok(result)
}

/// Best-effort `pkill -f` of leftover backend processes.
///
/// Matching by command line is racy: unrelated processes whose command line
/// contains the same pattern are killed too.
async fn kill_strays(runner: &dyn CommandRunner, pattern: &str) {
    if pattern.is_empty() {
        return;
    }

    let spec = CommandSpec::new("pkill").arg("-f").arg(pattern);
    let result = runner.run(&spec, PKILL_TIMEOUT).await;
    match result.exit_code {
        0 => info!("Terminated stray processes matching '{}'", pattern),
        1 => debug!("No stray processes matching '{}'", pattern),
        code => warn!(
            "Stray process cleanup for '{}' failed (exit {}): {}",
            pattern,
            code,
            result.error_summary()
        ),
    }
}
