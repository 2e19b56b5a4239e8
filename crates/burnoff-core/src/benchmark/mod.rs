mod benchmark_config;
pub mod stats;
mod types;

pub use benchmark_config::{
    BenchmarkConfig, MAX_CONTEXT_LENGTH, MAX_ITERATIONS, MAX_PROMPT_CHARS, MAX_TEMPERATURE,
    MAX_TOKENS_LIMIT,
};
pub use types::{BenchmarkReport, BenchmarkRun, EngineResults};
