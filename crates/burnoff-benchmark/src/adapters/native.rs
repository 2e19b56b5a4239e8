use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use burnoff_core::system::process_rss_mb;
use burnoff_core::{BenchmarkConfig, BenchmarkRun, BurnoffError, EngineKind, Result};

use super::EngineAdapter;

const WARMUP_MAX_TOKENS: u32 = 8;

/// Structured result of one in-process generation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Generation {
    pub tokens_generated: u32,
    pub gpu_memory_mb: f64,
}

/// Handle to the in-process GPU engine. Owned by the adapter for its whole lifetime.
#[async_trait]
pub trait NativeEngine: Send + Sync {
    /// Cheap readiness check, e.g. model loaded and device present.
    fn detect(&self) -> bool;

    async fn generate_once(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<Generation>;
}

pub struct NativeAdapter {
    engine: Arc<dyn NativeEngine>,
    display_name: String,
    warmed_up: bool,
}

impl NativeAdapter {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            display_name: EngineKind::Native.label().to_string(),
            warmed_up: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

#[async_trait]
impl EngineAdapter for NativeAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Native
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_available(&self) -> bool {
        self.engine.detect()
    }

    #[instrument(skip(self, config), fields(engine = "native"))]
    async fn warmup(&mut self, config: &BenchmarkConfig) -> Result<()> {
        self.warmed_up = false;
        let max_tokens = config.max_tokens.min(WARMUP_MAX_TOKENS);

        let generation = self
            .engine
            .generate_once(&config.prompt, max_tokens, config.temperature)
            .await
            .map_err(|e| BurnoffError::WarmupFailed(e.to_string()))?;

        if generation.tokens_generated == 0 {
            return Err(BurnoffError::WarmupFailed(
                "native engine produced no tokens".to_string(),
            ));
        }

        info!("Native engine warmed up ({} tokens)", generation.tokens_generated);
        self.warmed_up = true;
        Ok(())
    }

    async fn run_inference(&mut self, config: &BenchmarkConfig) -> Result<BenchmarkRun> {
        if !self.warmed_up {
            return Err(BurnoffError::NotWarmedUp(self.display_name.clone()));
        }

        let start = Instant::now();
        let generation = self
            .engine
            .generate_once(&config.prompt, config.max_tokens, config.temperature)
            .await
            .map_err(|e| BurnoffError::InferenceFailed(e.to_string()))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if generation.tokens_generated == 0 {
            return Err(BurnoffError::InferenceFailed(
                "native engine produced no tokens".to_string(),
            ));
        }

        Ok(BenchmarkRun {
            tokens_generated: generation.tokens_generated,
            inference_time_ms: elapsed_ms,
            tokens_per_second: BenchmarkRun::derived_tokens_per_second(
                generation.tokens_generated,
                elapsed_ms,
            ),
            latency_ms: elapsed_ms,
            memory_usage_mb: process_rss_mb().unwrap_or(0.0),
            gpu_usage_mb: generation.gpu_memory_mb,
        })
    }

    async fn cleanup(&mut self) {
        debug!("Releasing native engine session");
        self.warmed_up = false;
    }
}
