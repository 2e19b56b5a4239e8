pub mod adapters;
pub mod extractor;
pub mod process;
pub mod report;
pub mod runner;

#[cfg(test)]
mod testing;

pub use adapters::{
    AdapterRegistry, EngineAdapter, Generation, LlamaCppAdapter, NativeAdapter, NativeEngine,
    PythonReferenceAdapter,
};
pub use extractor::{MatchPick, MetricField, MetricPattern, OutputParser, ParsedMetrics};
pub use process::{CommandResult, CommandRunner, CommandSpec, ProcessRunner};
pub use report::{load_report, render_csv, render_json, render_table, render_text, save_report};
pub use runner::{BenchmarkEvent, BenchmarkRunner};
