use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use burnoff_core::{BenchmarkConfig, BenchmarkReport, BenchmarkRun, EngineKind, EngineResults, Result};

use crate::adapters::{AdapterRegistry, EngineAdapter};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BenchmarkEvent {
    EngineStarted { engine: EngineKind, name: String },
    EngineSkipped { engine: EngineKind, reason: String },
    Warmup { engine: EngineKind },
    Iteration { engine: EngineKind, current: u32, total: u32 },
    IterationComplete { engine: EngineKind, current: u32, run: BenchmarkRun },
    IterationFailed { engine: EngineKind, current: u32, error: String },
    EngineComplete { engine: EngineKind, successful: u32, total: u32 },
    Cancelled,
}

/// Optional progress channel. A closed or absent receiver never stalls the run.
#[derive(Default)]
struct EventSink(Option<mpsc::Sender<BenchmarkEvent>>);

impl EventSink {
    async fn emit(&self, event: BenchmarkEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}

enum EngineOutcome {
    Finished(Vec<BenchmarkRun>),
    WarmupFailed(String),
    Cancelled(Vec<BenchmarkRun>),
}

/// Runs backends one at a time, in request order, and aggregates their samples.
pub struct BenchmarkRunner {
    registry: AdapterRegistry,
    cooldown: Duration,
    events: EventSink,
    cancel_token: CancellationToken,
}

impl BenchmarkRunner {
    pub fn new(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            cooldown: DEFAULT_COOLDOWN,
            events: EventSink::default(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Pause after each backend's cleanup so released resources settle.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<BenchmarkEvent>) -> Self {
        self.events = EventSink(Some(tx));
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Benchmark `engines` in order.
    ///
    /// Only an invalid config or a broken adapter contract fails the whole run;
    /// every other problem drops an iteration or skips a backend. Backends with
    /// no successful run are left out of the report.
    pub async fn run(&mut self, config: &BenchmarkConfig, engines: &[EngineKind]) -> Result<BenchmarkReport> {
        config.validate()?;

        let start = Instant::now();
        let mut requested: Vec<EngineKind> = Vec::with_capacity(engines.len());
        for kind in engines {
            if requested.contains(kind) {
                warn!("{} requested more than once, running it once", kind);
                continue;
            }
            requested.push(*kind);
        }

        let mut results: Vec<EngineResults> = Vec::new();
        let mut cancelled = false;

        for (idx, kind) in requested.iter().copied().enumerate() {
            if self.cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }

            let adapter = match self.registry.get_mut(kind) {
                Some(adapter) if adapter.is_available() => adapter,
                Some(adapter) => {
                    let reason = format!("{} is not available on this machine", adapter.display_name());
                    warn!("Skipping {}: {}", kind, reason);
                    self.events.emit(BenchmarkEvent::EngineSkipped { engine: kind, reason }).await;
                    continue;
                }
                None => {
                    let reason = "no adapter registered".to_string();
                    warn!("Skipping {}: {}", kind, reason);
                    self.events.emit(BenchmarkEvent::EngineSkipped { engine: kind, reason }).await;
                    continue;
                }
            };

            let name = adapter.display_name().to_string();
            info!("Benchmarking {} ({} iterations)", name, config.iterations);
            self.events
                .emit(BenchmarkEvent::EngineStarted {
                    engine: kind,
                    name: name.clone(),
                })
                .await;

            let outcome = run_engine(&mut *adapter, config, &self.events, &self.cancel_token).await;
            adapter.cleanup().await;

            let runs = match outcome {
                Ok(EngineOutcome::Finished(runs)) => runs,
                Ok(EngineOutcome::WarmupFailed(reason)) => {
                    self.events.emit(BenchmarkEvent::EngineSkipped { engine: kind, reason }).await;
                    Vec::new()
                }
                Ok(EngineOutcome::Cancelled(runs)) => {
                    cancelled = true;
                    runs
                }
                Err(e) => {
                    error!("Aborting benchmark: {}", e);
                    return Err(e);
                }
            };

            let successful = runs.len() as u32;
            match EngineResults::from_runs(kind, name, runs) {
                Some(engine_results) => {
                    info!(
                        "{}: {:.2} tokens/s average over {} runs",
                        engine_results.display_name,
                        engine_results.avg_tokens_per_second,
                        successful
                    );
                    results.push(engine_results);
                }
                None => warn!("{} produced no successful runs, omitting it from the report", kind),
            }
            self.events
                .emit(BenchmarkEvent::EngineComplete {
                    engine: kind,
                    successful,
                    total: config.iterations,
                })
                .await;

            if cancelled {
                break;
            }
            if idx + 1 < requested.len() && pause(self.cooldown, &self.cancel_token).await {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            warn!("Benchmark cancelled, returning partial report");
            self.events.emit(BenchmarkEvent::Cancelled).await;
        }

        let total_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut report = BenchmarkReport::new(config.clone(), results, total_time_ms);
        report.cancelled = cancelled;
        Ok(report)
    }
}

/// Warmup, then iterations 1..=N. Cleanup is the caller's job so it runs on every path.
async fn run_engine(
    adapter: &mut dyn EngineAdapter,
    config: &BenchmarkConfig,
    events: &EventSink,
    cancel_token: &CancellationToken,
) -> Result<EngineOutcome> {
    let kind = adapter.kind();
    events.emit(BenchmarkEvent::Warmup { engine: kind }).await;

    let warmup = tokio::select! {
        _ = cancel_token.cancelled() => None,
        result = adapter.warmup(config) => Some(result),
    };
    match warmup {
        None => return Ok(EngineOutcome::Cancelled(Vec::new())),
        Some(Err(e)) if e.is_fatal() => return Err(e),
        Some(Err(e)) => {
            warn!("{} warmup failed: {}", kind, e);
            return Ok(EngineOutcome::WarmupFailed(e.to_string()));
        }
        Some(Ok(())) => {}
    }

    let total = config.iterations;
    let mut runs = Vec::with_capacity(total as usize);

    for current in 1..=total {
        events.emit(BenchmarkEvent::Iteration { engine: kind, current, total }).await;

        let outcome = tokio::select! {
            _ = cancel_token.cancelled() => None,
            result = adapter.run_inference(config) => Some(result),
        };

        match outcome {
            None => return Ok(EngineOutcome::Cancelled(runs)),
            Some(Ok(run)) => {
                info!(
                    "{} iteration {}/{}: {} tokens, {:.2} tokens/s",
                    kind, current, total, run.tokens_generated, run.tokens_per_second
                );
                events
                    .emit(BenchmarkEvent::IterationComplete {
                        engine: kind,
                        current,
                        run: run.clone(),
                    })
                    .await;
                runs.push(run);
            }
            Some(Err(e)) if e.is_fatal() => return Err(e),
            Some(Err(e)) => {
                warn!("{} iteration {}/{} failed: {}", kind, current, total, e);
                events
                    .emit(BenchmarkEvent::IterationFailed {
                        engine: kind,
                        current,
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        if current < total && pause(config.iteration_delay, cancel_token).await {
            return Ok(EngineOutcome::Cancelled(runs));
        }
    }

    Ok(EngineOutcome::Finished(runs))
}

/// Sleep unless cancelled first. Returns true on cancellation.
async fn pause(duration: Duration, cancel_token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return cancel_token.is_cancelled();
    }
    tokio::select! {
        _ = cancel_token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use burnoff_core::{BurnoffError, PythonConfig};

    use crate::adapters::PythonReferenceAdapter;
    use crate::testing::{print_stdout, ScriptedRunner};

    type Log = Arc<Mutex<Vec<String>>>;

    struct MockAdapter {
        kind: EngineKind,
        available: bool,
        warmup_ok: bool,
        outcomes: VecDeque<Result<BenchmarkRun>>,
        inference_delay: Duration,
        log: Log,
    }

    impl MockAdapter {
        fn new(kind: EngineKind, log: &Log) -> Self {
            Self {
                kind,
                available: true,
                warmup_ok: true,
                outcomes: VecDeque::new(),
                inference_delay: Duration::ZERO,
                log: log.clone(),
            }
        }

        fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        fn failing_warmup(mut self) -> Self {
            self.warmup_ok = false;
            self
        }

        fn outcomes(mut self, outcomes: Vec<Result<BenchmarkRun>>) -> Self {
            self.outcomes = outcomes.into();
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.inference_delay = delay;
            self
        }

        fn record(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.kind.id(), what));
        }
    }

    #[async_trait]
    impl EngineAdapter for MockAdapter {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn display_name(&self) -> &str {
            self.kind.label()
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn warmup(&mut self, _config: &BenchmarkConfig) -> Result<()> {
            self.record("warmup");
            match self.warmup_ok {
                true => Ok(()),
                false => Err(BurnoffError::WarmupFailed("model failed to load".to_string())),
            }
        }

        async fn run_inference(&mut self, _config: &BenchmarkConfig) -> Result<BenchmarkRun> {
            self.record("run");
            if !self.inference_delay.is_zero() {
                tokio::time::sleep(self.inference_delay).await;
            }
            self.outcomes.pop_front().unwrap_or_else(|| Ok(sample(10, 10.0)))
        }

        async fn cleanup(&mut self) {
            self.record("cleanup");
        }
    }

    fn sample(tokens: u32, tps: f64) -> BenchmarkRun {
        BenchmarkRun {
            tokens_generated: tokens,
            inference_time_ms: tokens as f64 * 1000.0 / tps,
            tokens_per_second: tps,
            latency_ms: tokens as f64 * 1000.0 / tps,
            ..Default::default()
        }
    }

    fn config(iterations: u32) -> BenchmarkConfig {
        BenchmarkConfig {
            prompt: "Hello".to_string(),
            max_tokens: 5,
            iterations,
            iteration_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn runner(registry: AdapterRegistry) -> BenchmarkRunner {
        BenchmarkRunner::new(registry).with_cooldown(Duration::ZERO)
    }

    fn python_install() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("gpt_oss")).unwrap();
        std::fs::write(dir.path().join("gpt_oss/generate.py"), "").unwrap();
        std::fs::write(dir.path().join("gpt_oss/chat.py"), "").unwrap();
        dir
    }

    fn python_adapter(dir: &tempfile::TempDir, scripts: Vec<String>) -> PythonReferenceAdapter {
        let config = PythonConfig {
            install_dir: dir.path().to_path_buf(),
            interpreter: "sh".to_string(),
            warmup_timeout_secs: 5,
            iteration_timeout_secs: 1,
            ..Default::default()
        };
        PythonReferenceAdapter::with_runner(config, Arc::new(ScriptedRunner::new(scripts)))
    }

    fn drain(rx: &mut mpsc::Receiver<BenchmarkEvent>) -> Vec<BenchmarkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_single_subprocess_sample() {
        let dir = python_install();
        let output = print_stdout("Generated tokens: 5\nTokens per second: 10.0");
        let adapter = python_adapter(&dir, vec!["exit 0".to_string(), output]);
        let mut runner = runner(AdapterRegistry::new().with(Box::new(adapter)));

        let report = runner.run(&config(1), &[EngineKind::Python]).await.unwrap();

        let results = report.get(EngineKind::Python).unwrap();
        assert_eq!(results.runs.len(), 1);
        assert_eq!(results.runs[0].tokens_generated, 5);
        assert_eq!(results.runs[0].tokens_per_second, 10.0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_hanging_backend_is_absent_from_report() {
        let dir = python_install();
        let adapter = python_adapter(
            &dir,
            vec![
                "exit 0".to_string(),
                print_stdout("Generated tokens: 5\nTokens per second: 10.0"),
                "exec sleep 30".to_string(),
            ],
        );
        let mut runner = runner(AdapterRegistry::new().with(Box::new(adapter)));

        let report = runner.run(&config(1), &[EngineKind::Python]).await.unwrap();

        assert!(report.results.is_empty());
        assert!(report.get(EngineKind::Python).is_none());
    }

    #[tokio::test]
    async fn test_warmup_failure_does_not_abort_other_backends() {
        let log = Log::default();
        let registry = AdapterRegistry::new()
            .with(Box::new(MockAdapter::new(EngineKind::LlamaCpp, &log).failing_warmup()))
            .with(Box::new(MockAdapter::new(EngineKind::Python, &log)));
        let mut runner = runner(registry);

        let report = runner
            .run(&config(3), &[EngineKind::LlamaCpp, EngineKind::Python])
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].engine, EngineKind::Python);
        assert_eq!(report.results[0].runs.len(), 3);
        assert_eq!(
            log.lock().unwrap()[..2],
            ["llama_cpp:warmup".to_string(), "llama_cpp:cleanup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_iterations_are_dropped_in_order() {
        let log = Log::default();
        let adapter = MockAdapter::new(EngineKind::Python, &log).outcomes(vec![
            Ok(sample(10, 10.0)),
            Err(BurnoffError::InferenceFailed("no metrics".to_string())),
            Ok(sample(30, 30.0)),
            Err(BurnoffError::Timeout(Duration::from_secs(600))),
        ]);
        let mut runner = runner(AdapterRegistry::new().with(Box::new(adapter)));

        let report = runner.run(&config(4), &[EngineKind::Python]).await.unwrap();

        let runs = &report.results[0].runs;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].tokens_generated, 10);
        assert_eq!(runs[1].tokens_generated, 30);
        assert_eq!(report.results[0].avg_tokens_per_second, 20.0);
    }

    #[tokio::test]
    async fn test_backends_keep_request_order() {
        let log = Log::default();
        let registry = AdapterRegistry::new()
            .with(Box::new(MockAdapter::new(EngineKind::Native, &log)))
            .with(Box::new(MockAdapter::new(EngineKind::LlamaCpp, &log)))
            .with(Box::new(MockAdapter::new(EngineKind::Python, &log)));
        let mut runner = runner(registry);

        let order = [EngineKind::Python, EngineKind::Native, EngineKind::LlamaCpp];
        let report = runner.run(&config(1), &order).await.unwrap();

        let engines: Vec<EngineKind> = report.results.iter().map(|r| r.engine).collect();
        assert_eq!(engines, order);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_only_between_iterations_and_backends() {
        let log = Log::default();
        let registry = AdapterRegistry::new()
            .with(Box::new(MockAdapter::new(EngineKind::LlamaCpp, &log)))
            .with(Box::new(MockAdapter::new(EngineKind::Python, &log)));
        let mut runner = BenchmarkRunner::new(registry).with_cooldown(Duration::from_millis(5000));
        let paced = BenchmarkConfig {
            iteration_delay: Duration::from_millis(1000),
            ..config(3)
        };

        let start = tokio::time::Instant::now();
        let report = runner
            .run(&paced, &[EngineKind::LlamaCpp, EngineKind::Python])
            .await
            .unwrap();

        // Two gaps per backend, one cooldown between the two backends.
        assert_eq!(start.elapsed(), Duration::from_millis(2 * 2 * 1000 + 5000));
        assert_eq!(report.results.len(), 2);

        let log = Log::default();
        let registry = AdapterRegistry::new().with(Box::new(MockAdapter::new(EngineKind::Python, &log)));
        let mut runner = BenchmarkRunner::new(registry).with_cooldown(Duration::from_millis(5000));
        let paced = BenchmarkConfig {
            iteration_delay: Duration::from_millis(1000),
            ..config(1)
        };

        let start = tokio::time::Instant::now();
        runner.run(&paced, &[EngineKind::Python]).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_invalid_config_runs_nothing() {
        let log = Log::default();
        let mut runner = runner(AdapterRegistry::new().with(Box::new(MockAdapter::new(EngineKind::Python, &log))));

        let err = runner.run(&config(0), &[EngineKind::Python]).await.unwrap_err();

        assert!(matches!(err, BurnoffError::InvalidConfig(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_contract_violation_is_fatal_but_cleans_up() {
        let log = Log::default();
        let adapter = MockAdapter::new(EngineKind::Python, &log)
            .outcomes(vec![Err(BurnoffError::NotWarmedUp("Python reference".to_string()))]);
        let mut runner = runner(AdapterRegistry::new().with(Box::new(adapter)));

        let err = runner.run(&config(3), &[EngineKind::Python]).await.unwrap_err();

        assert!(matches!(err, BurnoffError::NotWarmedUp(_)));
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("python:cleanup"));
    }

    #[tokio::test]
    async fn test_unavailable_and_unregistered_are_skipped() {
        let log = Log::default();
        let (tx, mut rx) = mpsc::channel(64);
        let registry = AdapterRegistry::new()
            .with(Box::new(MockAdapter::new(EngineKind::LlamaCpp, &log).unavailable()))
            .with(Box::new(MockAdapter::new(EngineKind::Python, &log)));
        let mut runner = runner(registry).with_events(tx);

        let report = runner
            .run(
                &config(1),
                &[EngineKind::Native, EngineKind::LlamaCpp, EngineKind::Python],
            )
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        assert!(!log.lock().unwrap().iter().any(|l| l.starts_with("llama_cpp")));

        let skipped: Vec<EngineKind> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                BenchmarkEvent::EngineSkipped { engine, .. } => Some(engine),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![EngineKind::Native, EngineKind::LlamaCpp]);
    }

    #[tokio::test]
    async fn test_duplicate_request_runs_once() {
        let log = Log::default();
        let mut runner = runner(AdapterRegistry::new().with(Box::new(MockAdapter::new(EngineKind::Python, &log))));

        let report = runner
            .run(&config(1), &[EngineKind::Python, EngineKind::Python])
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        let warmups = log.lock().unwrap().iter().filter(|l| l.ends_with("warmup")).count();
        assert_eq!(warmups, 1);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let log = Log::default();
        let (tx, mut rx) = mpsc::channel(64);
        let adapter = MockAdapter::new(EngineKind::Python, &log).outcomes(vec![
            Ok(sample(10, 10.0)),
            Err(BurnoffError::InferenceFailed("no metrics".to_string())),
        ]);
        let mut runner = runner(AdapterRegistry::new().with(Box::new(adapter))).with_events(tx);

        runner.run(&config(2), &[EngineKind::Python]).await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], BenchmarkEvent::EngineStarted { .. }));
        assert!(matches!(events[1], BenchmarkEvent::Warmup { .. }));
        assert!(matches!(events[2], BenchmarkEvent::Iteration { current: 1, total: 2, .. }));
        assert!(matches!(events[3], BenchmarkEvent::IterationComplete { current: 1, .. }));
        assert!(matches!(events[4], BenchmarkEvent::Iteration { current: 2, .. }));
        assert!(matches!(events[5], BenchmarkEvent::IterationFailed { current: 2, .. }));
        assert!(matches!(
            events[6],
            BenchmarkEvent::EngineComplete { successful: 1, total: 2, .. }
        ));
        assert_eq!(events.len(), 7);

        let json = serde_json::to_value(&events[5]).unwrap();
        assert_eq!(json["type"], "iteration_failed");
        assert_eq!(json["engine"], "python");
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_report() {
        let log = Log::default();
        let registry = AdapterRegistry::new()
            .with(Box::new(
                MockAdapter::new(EngineKind::LlamaCpp, &log)
                    .outcomes(vec![Ok(sample(10, 10.0))])
                    .slow(Duration::from_millis(200)),
            ))
            .with(Box::new(MockAdapter::new(EngineKind::Python, &log)));
        let mut runner = runner(registry);
        let token = runner.cancel_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let report = runner
            .run(&config(5), &[EngineKind::LlamaCpp, EngineKind::Python])
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].runs.len(), 1);

        let log = log.lock().unwrap();
        assert_eq!(log.last().map(String::as_str), Some("llama_cpp:cleanup"));
        assert!(!log.iter().any(|l| l.starts_with("python")));
    }
}
