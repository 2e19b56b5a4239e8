use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use burnoff_benchmark::{
    load_report, render_csv, render_json, render_table, render_text, save_report, AdapterRegistry,
    BenchmarkEvent, BenchmarkRunner, LlamaCppAdapter, PythonReferenceAdapter,
};
use burnoff_core::{BenchmarkConfig, BenchmarkReport, EngineKind, HarnessConfig};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "burnoff")]
#[command(about = "Burnoff - compare local LLM inference backends", long_about = None)]
struct Cli {
    /// Harness config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark one or more backends on the same prompt
    Run {
        /// Backends to run, in order (native, llama_cpp, python)
        #[arg(short, long, value_delimiter = ',')]
        engines: Vec<EngineKind>,

        #[arg(short, long, default_value = "Explain what machine learning is in simple terms.")]
        prompt: String,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(short, long)]
        temperature: Option<f32>,

        #[arg(short, long)]
        iterations: Option<u32>,

        /// Pause between iterations of the same backend
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Model file or checkpoint directory passed to each backend
        #[arg(short, long)]
        model: Option<PathBuf>,

        #[arg(long)]
        no_gpu: bool,

        #[arg(long)]
        context_length: Option<u32>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Print only, do not write report files
        #[arg(long)]
        no_save: bool,
    },

    /// Show which backends are usable on this machine
    Engines,

    /// Re-render a saved JSON report
    Show {
        path: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Text,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        true => EnvFilter::new("debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let harness = HarnessConfig::load(cli.config.as_deref()).context("loading harness config")?;

    match cli.command {
        Some(Commands::Run {
            engines,
            prompt,
            max_tokens,
            temperature,
            iterations,
            delay_ms,
            model,
            no_gpu,
            context_length,
            output,
            results_dir,
            no_save,
        }) => {
            let mut config = harness.defaults.benchmark_config(prompt);
            if let Some(v) = max_tokens {
                config.max_tokens = v;
            }
            if let Some(v) = temperature {
                config.temperature = v;
            }
            if let Some(v) = iterations {
                config.iterations = v;
            }
            if let Some(v) = delay_ms {
                config.iteration_delay = Duration::from_millis(v);
            }
            if let Some(v) = context_length {
                config.context_length = v;
            }
            config.model_path = model;
            config.use_gpu = config.use_gpu && !no_gpu;

            let engines = match engines.is_empty() {
                true => EngineKind::all().to_vec(),
                false => engines,
            };
            let results_dir = (!no_save).then(|| results_dir.unwrap_or_else(|| harness.output.results_dir.clone()));

            cmd_run(&harness, &config, &engines, output, results_dir).await?
        }
        Some(Commands::Show { path, output }) => cmd_show(&path, output)?,
        Some(Commands::Engines) | None => cmd_engines(&harness),
    }

    Ok(())
}

fn build_registry(harness: &HarnessConfig) -> AdapterRegistry {
    AdapterRegistry::new()
        .with(Box::new(LlamaCppAdapter::new(harness.llama_cpp.clone())))
        .with(Box::new(PythonReferenceAdapter::new(harness.python.clone())))
}

async fn cmd_run(
    harness: &HarnessConfig,
    config: &BenchmarkConfig,
    engines: &[EngineKind],
    output: OutputFormat,
    results_dir: Option<PathBuf>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(64);
    let mut runner = BenchmarkRunner::new(build_registry(harness))
        .with_cooldown(harness.defaults.cooldown())
        .with_events(tx);

    let cancel_token = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after cleanup");
            cancel_token.cancel();
        }
    });

    let progress = tokio::spawn(print_progress(rx));

    eprintln!();
    eprintln!("Running benchmark...");
    eprintln!(
        "  Engines:    {}",
        engines.iter().map(|e| e.id()).collect::<Vec<_>>().join(", ")
    );
    eprintln!("  Iterations: {}", config.iterations);
    eprintln!("  Max tokens: {}", config.max_tokens);
    eprintln!();

    let result = runner.run(config, engines).await;
    drop(runner);
    let _ = progress.await;
    let report = result?;

    print_report(&report, output)?;

    if let Some(dir) = results_dir {
        let (text_path, json_path) = save_report(&report, &dir)
            .with_context(|| format!("writing report to {}", dir.display()))?;
        eprintln!();
        eprintln!("Report saved:");
        eprintln!("  {}", text_path.display());
        eprintln!("  {}", json_path.display());
    }

    if report.cancelled {
        info!("Run was cancelled; report is partial");
    }

    Ok(())
}

async fn print_progress(mut rx: mpsc::Receiver<BenchmarkEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            BenchmarkEvent::EngineStarted { name, .. } => eprintln!("== {} ==", name),
            BenchmarkEvent::EngineSkipped { engine, reason } => {
                eprintln!("  {} skipped: {}", engine, reason)
            }
            BenchmarkEvent::Warmup { .. } => eprintln!("  warming up..."),
            BenchmarkEvent::Iteration { current, total, .. } => {
                eprint!("  iteration {}/{}: ", current, total)
            }
            BenchmarkEvent::IterationComplete { run, .. } => eprintln!(
                "{} tokens, {:.2} tok/s, {:.0} ms",
                run.tokens_generated, run.tokens_per_second, run.inference_time_ms
            ),
            BenchmarkEvent::IterationFailed { error, .. } => eprintln!("failed ({})", error),
            BenchmarkEvent::EngineComplete { successful, total, .. } => {
                eprintln!("  {}/{} runs succeeded", successful, total)
            }
            BenchmarkEvent::Cancelled => eprintln!("Cancelled."),
        }
    }
}

fn print_report(report: &BenchmarkReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Csv => print!("{}", render_csv(report)),
        OutputFormat::Text => print!("{}", render_text(report)),
        OutputFormat::Table => {
            println!();
            println!("Results:");
            println!("{:-<80}", "");
            print!("{}", render_table(report));
            for (kind, slowdown) in report.relative_performance() {
                println!("  {} is {:.1}% slower than the leader", kind, slowdown);
            }
        }
    }
    Ok(())
}

fn cmd_show(path: &std::path::Path, output: OutputFormat) -> Result<()> {
    let report = load_report(path).with_context(|| format!("reading {}", path.display()))?;
    print_report(&report, output)
}

fn cmd_engines(harness: &HarnessConfig) {
    let registry = build_registry(harness);

    println!();
    println!("Backends:");
    println!("{:-<50}", "");
    for (kind, name, available) in registry.availability() {
        let status = match (name.is_some(), available) {
            (false, _) => "not linked into this binary",
            (true, true) => "available",
            (true, false) => "not found",
        };
        println!("  {:<12} {:<20} {}", kind.id(), name.unwrap_or_else(|| kind.label().to_string()), status);
    }
    println!();
}
