use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stats;
use super::BenchmarkConfig;
use crate::{EngineKind, SystemInfo};

/// One measured inference sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub tokens_generated: u32,
    pub inference_time_ms: f64,
    pub tokens_per_second: f64,
    /// Wall-clock time including process start-up and teardown.
    pub latency_ms: f64,
    pub memory_usage_mb: f64,
    pub gpu_usage_mb: f64,
}

impl BenchmarkRun {
    pub fn derived_tokens_per_second(tokens_generated: u32, inference_time_ms: f64) -> f64 {
        if inference_time_ms > 0.0 {
            tokens_generated as f64 * 1000.0 / inference_time_ms
        } else {
            0.0
        }
    }
}

/// Aggregate for one backend, built once all of its iterations have finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResults {
    pub engine: EngineKind,
    pub display_name: String,
    pub runs: Vec<BenchmarkRun>,
    pub total_tokens: u64,
    pub avg_tokens_per_second: f64,
    pub best_tokens_per_second: f64,
    pub worst_tokens_per_second: f64,
    pub std_dev_tokens_per_second: f64,
    pub avg_latency_ms: f64,
    pub total_inference_time_ms: f64,
}

impl EngineResults {
    /// Returns `None` when no iteration succeeded; such a backend is left out of the report.
    pub fn from_runs(
        engine: EngineKind,
        display_name: impl Into<String>,
        runs: Vec<BenchmarkRun>,
    ) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }

        let tps: Vec<f64> = runs.iter().map(|r| r.tokens_per_second).collect();
        let latencies: Vec<f64> = runs.iter().map(|r| r.latency_ms).collect();

        Some(Self {
            engine,
            display_name: display_name.into(),
            total_tokens: runs.iter().map(|r| r.tokens_generated as u64).sum(),
            avg_tokens_per_second: stats::mean(&tps),
            best_tokens_per_second: stats::max(&tps),
            worst_tokens_per_second: stats::min(&tps),
            std_dev_tokens_per_second: stats::population_std_dev(&tps),
            avg_latency_ms: stats::mean(&latencies),
            total_inference_time_ms: runs.iter().map(|r| r.inference_time_ms).sum(),
            runs,
        })
    }

    pub fn iterations(&self) -> usize {
        self.runs.len()
    }
}

/// The full comparison artifact and the unit of persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub id: Uuid,
    pub config: BenchmarkConfig,
    /// Backends in the order they were requested; backends with no successful run are absent.
    pub results: Vec<EngineResults>,
    pub total_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub system: SystemInfo,
    #[serde(default)]
    pub cancelled: bool,
}

impl BenchmarkReport {
    pub fn new(config: BenchmarkConfig, results: Vec<EngineResults>, total_time_ms: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            results,
            total_time_ms,
            timestamp: Utc::now(),
            system: SystemInfo::collect(),
            cancelled: false,
        }
    }

    pub fn get(&self, engine: EngineKind) -> Option<&EngineResults> {
        self.results.iter().find(|r| r.engine == engine)
    }

    /// Results ordered by average tokens/sec, fastest first.
    pub fn ranked(&self) -> Vec<&EngineResults> {
        let mut ranked: Vec<&EngineResults> = self.results.iter().collect();
        ranked.sort_by(|a, b| b.avg_tokens_per_second.total_cmp(&a.avg_tokens_per_second));
        ranked
    }

    /// Percentage slowdown of every non-leading backend relative to the leader.
    pub fn relative_performance(&self) -> Vec<(EngineKind, f64)> {
        let ranked = self.ranked();
        let Some(leader) = ranked.first() else {
            return Vec::new();
        };
        let best = leader.avg_tokens_per_second;

        ranked
            .iter()
            .skip(1)
            .map(|r| {
                let slowdown = if best > 0.0 {
                    (best - r.avg_tokens_per_second) / best * 100.0
                } else {
                    0.0
                };
                (r.engine, slowdown)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tokens: u32, tps: f64, latency_ms: f64) -> BenchmarkRun {
        BenchmarkRun {
            tokens_generated: tokens,
            inference_time_ms: tokens as f64 * 1000.0 / tps,
            tokens_per_second: tps,
            latency_ms,
            ..Default::default()
        }
    }

    fn results(engine: EngineKind, tps: &[f64]) -> EngineResults {
        let runs = tps.iter().map(|t| run(50, *t, 1000.0)).collect();
        EngineResults::from_runs(engine, engine.label(), runs).unwrap()
    }

    #[test]
    fn test_empty_runs_yield_none() {
        assert!(EngineResults::from_runs(EngineKind::Native, "native", Vec::new()).is_none());
    }

    #[test]
    fn test_aggregates() {
        let runs = vec![run(40, 20.0, 2100.0), run(60, 30.0, 2050.0), run(50, 25.0, 2000.0)];
        let r = EngineResults::from_runs(EngineKind::LlamaCpp, "llama.cpp", runs).unwrap();

        assert_eq!(r.total_tokens, 150);
        assert_eq!(r.iterations(), 3);
        assert!((r.avg_tokens_per_second - 25.0).abs() < 1e-9);
        assert_eq!(r.best_tokens_per_second, 30.0);
        assert_eq!(r.worst_tokens_per_second, 20.0);
        assert!((r.avg_latency_ms - 2050.0).abs() < 1e-9);
        assert!((r.total_inference_time_ms - 6000.0).abs() < 1e-6);
        // population std dev of {20, 30, 25}
        assert!((r.std_dev_tokens_per_second - (50.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!(r.worst_tokens_per_second <= r.avg_tokens_per_second);
        assert!(r.avg_tokens_per_second <= r.best_tokens_per_second);
    }

    #[test]
    fn test_single_sample_has_zero_deviation() {
        let r = results(EngineKind::Python, &[12.5]);
        assert_eq!(r.std_dev_tokens_per_second, 0.0);
        assert_eq!(r.best_tokens_per_second, r.worst_tokens_per_second);
    }

    #[test]
    fn test_ranking_and_relative_performance() {
        let report = BenchmarkReport::new(
            BenchmarkConfig::default(),
            vec![
                results(EngineKind::Python, &[10.0]),
                results(EngineKind::Native, &[40.0]),
                results(EngineKind::LlamaCpp, &[30.0]),
            ],
            1234.0,
        );

        let order: Vec<EngineKind> = report.ranked().iter().map(|r| r.engine).collect();
        assert_eq!(order, vec![EngineKind::Native, EngineKind::LlamaCpp, EngineKind::Python]);

        let relative = report.relative_performance();
        assert_eq!(relative.len(), 2);
        assert_eq!(relative[0].0, EngineKind::LlamaCpp);
        assert!((relative[0].1 - 25.0).abs() < 1e-9);
        assert!((relative[1].1 - 75.0).abs() < 1e-9);

        // insertion order is untouched by ranking
        assert_eq!(report.results[0].engine, EngineKind::Python);
        assert!(report.get(EngineKind::Native).is_some());
    }

    #[test]
    fn test_report_json_round_trip() {
        let report = BenchmarkReport::new(
            BenchmarkConfig::default(),
            vec![
                results(EngineKind::LlamaCpp, &[31.27, 29.91, 30.4]),
                results(EngineKind::Python, &[3.3333333333]),
            ],
            98765.4321,
        );

        let json = serde_json::to_string_pretty(&report).unwrap();
        let back: BenchmarkReport = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, report.id);
        assert_eq!(back.timestamp, report.timestamp);
        assert_eq!(back.results.len(), 2);
        for (a, b) in report.results.iter().zip(back.results.iter()) {
            assert_eq!(a.engine, b.engine);
            assert_eq!(a.total_tokens, b.total_tokens);
            assert!((a.avg_tokens_per_second - b.avg_tokens_per_second).abs() < 1e-9);
            assert!((a.std_dev_tokens_per_second - b.std_dev_tokens_per_second).abs() < 1e-9);
            assert_eq!(a.runs.len(), b.runs.len());
        }
    }
}
