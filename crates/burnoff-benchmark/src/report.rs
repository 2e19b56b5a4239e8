//! Human-readable and machine-readable renderings of a [`BenchmarkReport`], plus
//! persistence to the results directory.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use burnoff_core::{BenchmarkReport, Result};

const RULE_WIDTH: usize = 72;

pub const CSV_HEADER: &str =
    "engine,iteration,tokens,inference_ms,tokens_per_sec,latency_ms,memory_mb,gpu_mb";

/// Full sectioned report: header, ranked table, relative performance,
/// per-backend detail and system information.
pub fn render_text(report: &BenchmarkReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "INFERENCE BACKEND BENCHMARK REPORT");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Report ID:     {}", report.id);
    let _ = writeln!(out, "Timestamp:     {}", report.timestamp.to_rfc3339());
    let _ = writeln!(out, "Prompt:        {}", report.config.prompt);
    let _ = writeln!(out, "Max tokens:    {}", report.config.max_tokens);
    let _ = writeln!(out, "Temperature:   {}", report.config.temperature);
    let _ = writeln!(out, "Iterations:    {}", report.config.iterations);
    let _ = writeln!(out, "GPU enabled:   {}", report.config.use_gpu);
    if let Some(model) = &report.config.model_path {
        let _ = writeln!(out, "Model:         {}", model.display());
    }
    let _ = writeln!(out, "Total time:    {:.1}s", report.total_time_ms / 1000.0);
    if report.cancelled {
        let _ = writeln!(out, "Status:        CANCELLED (partial results)");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "PERFORMANCE");
    let _ = writeln!(out, "{:-<width$}", "", width = RULE_WIDTH);
    out.push_str(&render_table(report));
    let _ = writeln!(out);

    let relative = report.relative_performance();
    if let Some(leader) = report.ranked().first() {
        let _ = writeln!(out, "RELATIVE PERFORMANCE");
        let _ = writeln!(out, "{:-<width$}", "", width = RULE_WIDTH);
        let _ = writeln!(out, "  {} is fastest", leader.display_name);
        for (kind, slowdown) in &relative {
            let name = report
                .get(*kind)
                .map(|r| r.display_name.as_str())
                .unwrap_or_else(|| kind.label());
            let _ = writeln!(out, "  {:<24} {:>6.1}% slower", name, slowdown);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "DETAILED RESULTS");
    let _ = writeln!(out, "{:-<width$}", "", width = RULE_WIDTH);
    for r in &report.results {
        let _ = writeln!(out, "{}", r.display_name);
        let _ = writeln!(out, "  Successful runs:    {}/{}", r.iterations(), report.config.iterations);
        let _ = writeln!(out, "  Total tokens:       {}", r.total_tokens);
        let _ = writeln!(out, "  Avg tokens/s:       {:.2}", r.avg_tokens_per_second);
        let _ = writeln!(out, "  Best / worst:       {:.2} / {:.2}", r.best_tokens_per_second, r.worst_tokens_per_second);
        let _ = writeln!(out, "  Std deviation:      {:.2}", r.std_dev_tokens_per_second);
        let _ = writeln!(out, "  Avg latency:        {:.1} ms", r.avg_latency_ms);
        let _ = writeln!(out, "  Total inference:    {:.1} ms", r.total_inference_time_ms);
        for (i, run) in r.runs.iter().enumerate() {
            let _ = writeln!(
                out,
                "    #{:<3} {:>5} tokens  {:>9.1} ms  {:>8.2} tok/s  mem {:.0} MB  gpu {:.0} MB",
                i + 1,
                run.tokens_generated,
                run.inference_time_ms,
                run.tokens_per_second,
                run.memory_usage_mb,
                run.gpu_usage_mb
            );
        }
        let _ = writeln!(out);
    }

    let system = &report.system;
    let _ = writeln!(out, "SYSTEM");
    let _ = writeln!(out, "{:-<width$}", "", width = RULE_WIDTH);
    let _ = writeln!(out, "  OS:     {} ({})", system.os, system.arch);
    let _ = writeln!(out, "  CPU:    {} x{}", system.cpu_model, system.cpu_count);
    let _ = writeln!(out, "  Memory: {:.1} GB", system.memory_gb);

    out
}

/// Ranked table, fastest first. Also used for the CLI's default output.
pub fn render_table(report: &BenchmarkReport) -> String {
    let mut out = String::new();

    if report.results.is_empty() {
        out.push_str("  No backend produced a successful run.\n");
        return out;
    }

    let _ = writeln!(
        out,
        "  {:<4} {:<22} {:>10} {:>10} {:>10} {:>8} {:>12}",
        "#", "Backend", "Avg tok/s", "Best", "Worst", "StdDev", "Latency ms"
    );
    for (rank, r) in report.ranked().iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:<4} {:<22} {:>10.2} {:>10.2} {:>10.2} {:>8.2} {:>12.1}",
            rank + 1,
            r.display_name,
            r.avg_tokens_per_second,
            r.best_tokens_per_second,
            r.worst_tokens_per_second,
            r.std_dev_tokens_per_second,
            r.avg_latency_ms
        );
    }

    out
}

/// One row per successful sample.
pub fn render_csv(report: &BenchmarkReport) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for r in &report.results {
        for (i, run) in r.runs.iter().enumerate() {
            let _ = writeln!(
                out,
                "{},{},{},{:.2},{:.2},{:.2},{:.1},{:.1}",
                r.engine.id(),
                i + 1,
                run.tokens_generated,
                run.inference_time_ms,
                run.tokens_per_second,
                run.latency_ms,
                run.memory_usage_mb,
                run.gpu_usage_mb
            );
        }
    }

    out
}

pub fn render_json(report: &BenchmarkReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write `benchmark_<YYYYMMDD_HHMMSS>.txt` and `.json` into `dir`, creating it if needed.
pub fn save_report(report: &BenchmarkReport, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;

    let stem = report_stem(report);
    let text_path = dir.join(format!("{}.txt", stem));
    let json_path = dir.join(format!("{}.json", stem));

    std::fs::write(&text_path, render_text(report))?;
    std::fs::write(&json_path, render_json(report)?)?;

    info!("Saved report to {} and {}", text_path.display(), json_path.display());
    Ok((text_path, json_path))
}

/// `benchmark_<YYYYMMDD_HHMMSS>_<id prefix>`, so runs finishing in the same second keep separate files.
fn report_stem(report: &BenchmarkReport) -> String {
    let id = report.id.simple().to_string();
    format!(
        "benchmark_{}_{}",
        report.timestamp.format("%Y%m%d_%H%M%S"),
        &id[..8]
    )
}

pub fn load_report(path: &Path) -> Result<BenchmarkReport> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
