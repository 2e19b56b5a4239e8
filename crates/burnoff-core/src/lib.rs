pub mod benchmark;
pub mod config;
pub mod engine_kind;
pub mod error;
pub mod system;

pub use benchmark::{BenchmarkConfig, BenchmarkReport, BenchmarkRun, EngineResults};
pub use config::{DefaultsConfig, HarnessConfig, LlamaCppConfig, OutputConfig, PythonConfig};
pub use engine_kind::EngineKind;
pub use error::{format_secs, BurnoffError, Result};
pub use system::SystemInfo;
