//! Line-oriented extraction of performance metrics from free-form backend output.
//!
//! Every backend prints its numbers differently, so each adapter supplies its own
//! [`OutputParser`]. A pattern's first capture group holds the value when present;
//! otherwise the first decimal number on the matching line is used.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use burnoff_core::BenchmarkRun;

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"));

/// Reported and derived throughput may disagree by this fraction before a warning is logged.
const TPS_DISAGREEMENT_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricField {
    TokensGenerated,
    InferenceTimeMs,
    TokensPerSecond,
    MemoryUsageMb,
    GpuMemoryMb,
}

/// Which occurrence wins when a field matches on several lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPick {
    First,
    Last,
}

#[derive(Debug, Clone)]
pub struct MetricPattern {
    pub field: MetricField,
    regex: Regex,
    /// Multiplier applied to the extracted value, e.g. 1000 for seconds to ms.
    scale: f64,
}

impl MetricPattern {
    pub fn new(field: MetricField, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            field,
            regex: Regex::new(pattern)?,
            scale: 1.0,
        })
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    fn extract(&self, line: &str) -> Option<f64> {
        let caps = self.regex.captures(line)?;
        let value = match caps.get(1) {
            Some(m) => m.as_str().parse::<f64>().ok(),
            None => first_number(line),
        }?;
        Some(value * self.scale)
    }
}

/// First decimal number appearing anywhere on the line.
pub fn first_number(line: &str) -> Option<f64> {
    FIRST_NUMBER
        .find(line)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Normalized metrics; every field is zero when nothing matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMetrics {
    pub tokens_generated: u32,
    pub inference_time_ms: f64,
    pub tokens_per_second: f64,
    pub memory_usage_mb: f64,
    pub gpu_memory_mb: f64,
}

impl ParsedMetrics {
    /// No token count and no rate: nothing usable was recovered.
    pub fn is_empty(&self) -> bool {
        self.tokens_generated == 0 && self.tokens_per_second <= 0.0
    }

    /// Fill whichever of rate or time is missing from the other two.
    ///
    /// A reported rate is never overwritten, even when it disagrees with the
    /// token count and time printed next to it.
    pub fn derive_missing(mut self) -> Self {
        let tokens = self.tokens_generated as f64;

        if self.tokens_per_second <= 0.0 && tokens > 0.0 && self.inference_time_ms > 0.0 {
            self.tokens_per_second =
                BenchmarkRun::derived_tokens_per_second(self.tokens_generated, self.inference_time_ms);
        } else if self.inference_time_ms <= 0.0 && tokens > 0.0 && self.tokens_per_second > 0.0 {
            self.inference_time_ms = tokens * 1000.0 / self.tokens_per_second;
        } else if tokens > 0.0 && self.inference_time_ms > 0.0 && self.tokens_per_second > 0.0 {
            let derived =
                BenchmarkRun::derived_tokens_per_second(self.tokens_generated, self.inference_time_ms);
            if (self.tokens_per_second - derived).abs() / derived > TPS_DISAGREEMENT_THRESHOLD {
                warn!(
                    "Reported {:.2} tokens/s disagrees with {:.2} derived from {} tokens in {:.1}ms; keeping reported value",
                    self.tokens_per_second, derived, self.tokens_generated, self.inference_time_ms
                );
            }
        }

        self
    }

    /// Derive what the output allows, then fall back to a measured wall-clock time.
    pub fn resolve(self, wall_clock_ms: Option<f64>) -> Self {
        let mut metrics = self.derive_missing();
        if metrics.inference_time_ms <= 0.0 {
            if let Some(ms) = wall_clock_ms.filter(|ms| *ms > 0.0) {
                metrics.inference_time_ms = ms;
                metrics = metrics.derive_missing();
            }
        }
        metrics
    }

    pub fn into_run(self, latency_ms: f64) -> BenchmarkRun {
        BenchmarkRun {
            tokens_generated: self.tokens_generated,
            inference_time_ms: self.inference_time_ms,
            tokens_per_second: self.tokens_per_second,
            latency_ms,
            memory_usage_mb: self.memory_usage_mb,
            gpu_usage_mb: self.gpu_memory_mb,
        }
    }

    fn set(&mut self, field: MetricField, value: f64) {
        match field {
            MetricField::TokensGenerated => self.tokens_generated = value.round().max(0.0) as u32,
            MetricField::InferenceTimeMs => self.inference_time_ms = value,
            MetricField::TokensPerSecond => self.tokens_per_second = value,
            MetricField::MemoryUsageMb => self.memory_usage_mb = value,
            MetricField::GpuMemoryMb => self.gpu_memory_mb = value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputParser {
    patterns: Vec<MetricPattern>,
    pick: MatchPick,
}

impl OutputParser {
    pub fn new(patterns: Vec<MetricPattern>, pick: MatchPick) -> Self {
        Self { patterns, pick }
    }

    pub fn pick(&self) -> MatchPick {
        self.pick
    }

    /// llama.cpp prints a perf summary on exit; the last timing block wins.
    pub fn llama_cpp() -> Self {
        static PATTERNS: LazyLock<Vec<MetricPattern>> = LazyLock::new(|| {
            build(&[
                // llama_perf_context_print:        eval time =  1234.56 ms /    63 runs   (...)
                (MetricField::InferenceTimeMs, r"^\w*:?\s*eval time\s*=\s*([\d.]+)\s*ms", 1.0),
                (
                    MetricField::TokensGenerated,
                    r"^\w*:?\s*eval time\s*=\s*[\d.]+\s*ms\s*/\s*(\d+)\s*(?:runs|tokens)",
                    1.0,
                ),
                (
                    MetricField::TokensPerSecond,
                    r"^\w*:?\s*eval time\s*=.*?([\d.]+)\s*tokens per second",
                    1.0,
                ),
                // eval: 63 tokens, 1234.56 ms, 51.03 tokens per second
                (MetricField::TokensGenerated, r"^\s*eval:\s*(\d+)\s*tokens", 1.0),
                (MetricField::InferenceTimeMs, r"^\s*eval:\s*\d+\s*tokens,\s*([\d.]+)\s*ms", 1.0),
                (MetricField::TokensPerSecond, r"^\s*eval:.*?([\d.]+)\s*tokens per second", 1.0),
                (
                    MetricField::GpuMemoryMb,
                    r"(?:CUDA\d*|Metal|ROCm\d*|Vulkan\d*)(?:_Mapped)? model buffer size\s*=\s*([\d.]+)\s*MiB",
                    1.0,
                ),
                (
                    MetricField::MemoryUsageMb,
                    r"CPU(?:_Mapped)? model buffer size\s*=\s*([\d.]+)\s*MiB",
                    1.0,
                ),
            ])
        });
        Self::new(PATTERNS.clone(), MatchPick::Last)
    }

    /// The Python reference prints one labeled summary block in benchmark mode; the first match wins.
    pub fn python_reference() -> Self {
        static PATTERNS: LazyLock<Vec<MetricPattern>> = LazyLock::new(|| {
            build(&[
                (MetricField::TokensGenerated, r"(?i)^\s*generated tokens\s*:", 1.0),
                (MetricField::TokensPerSecond, r"(?i)^\s*tokens per second\s*:", 1.0),
                (MetricField::TokensPerSecond, r"(?i)^\s*tokens/s(?:ec)?\s*:", 1.0),
                (
                    MetricField::InferenceTimeMs,
                    r"(?i)^\s*(?:inference|generation|total) time\s*:\s*([\d.]+)\s*ms",
                    1.0,
                ),
                (
                    MetricField::InferenceTimeMs,
                    r"(?i)^\s*(?:inference|generation|total) time\s*:\s*([\d.]+)\s*s\b",
                    1000.0,
                ),
                (
                    MetricField::MemoryUsageMb,
                    r"(?i)^\s*(?:peak )?memory(?: usage)?\s*:\s*([\d.]+)\s*MB",
                    1.0,
                ),
                (MetricField::GpuMemoryMb, r"(?i)^\s*gpu memory\s*:\s*([\d.]+)\s*MB", 1.0),
            ])
        });
        Self::new(PATTERNS.clone(), MatchPick::First)
    }

    pub fn parse(&self, output: &str) -> ParsedMetrics {
        let mut metrics = ParsedMetrics::default();
        let mut seen: Vec<MetricField> = Vec::new();

        for line in output.lines() {
            for pattern in &self.patterns {
                if self.pick == MatchPick::First && seen.contains(&pattern.field) {
                    continue;
                }
                if let Some(value) = pattern.extract(line) {
                    debug!("Matched {:?} = {} in {:?}", pattern.field, value, line.trim());
                    metrics.set(pattern.field, value);
                    if !seen.contains(&pattern.field) {
                        seen.push(pattern.field);
                    }
                }
            }
        }

        metrics
    }
}

fn build(specs: &[(MetricField, &str, f64)]) -> Vec<MetricPattern> {
    specs
        .iter()
        .map(|(field, pattern, scale)| {
            MetricPattern::new(*field, pattern)
                .expect("built-in metric pattern")
                .scaled(*scale)
        })
        .collect()
}
