// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tasktrace_core::config::Output;
use tasktrace_core::{yaml_to_json, TraceConfig, TracePipeline};
use tasktrace_storage::{compute_window, discover_slices, RecordFileSet, WindowRequest};
use tracing::info;

/// tasktrace – host/device task trace reconstruction and analysis
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode, match and analyze a profiling directory
    Analyze {
        /// Path to a trace YAML config file
        #[arg(short, long)]
        config: PathBuf,

        /// Write the JSON report here (overrides output.path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Embed every matched and unmatched task in the report
        #[arg(long)]
        include_tasks: bool,
    },
    /// Validate a trace config without running it
    Validate {
        /// Path to a trace YAML config file
        #[arg(short, long)]
        config: PathBuf,

        /// Convert YAML to JSON and print it
        #[arg(long)]
        to_json: bool,
    },
    /// Print the record window reconciled for a set of rotated slices
    Window {
        /// Directory holding the slices
        #[arg(long)]
        dir: PathBuf,

        /// Glob pattern of the slices, e.g. "hwts.data.*.slice_*"
        #[arg(long)]
        pattern: String,

        /// Fixed record size in bytes
        #[arg(long)]
        record_size: usize,

        /// Records already persisted by a prior run
        #[arg(long)]
        persisted: Option<u64>,

        /// Offset of the prior run's window
        #[arg(long, default_value_t = 0)]
        prior_offset: u64,

        /// Number of records requested
        #[arg(long)]
        count: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "tasktrace={0},tasktrace_core={0},tasktrace_storage={0},tasktrace_formats={0}",
            log_level
        ))
        .init();

    info!("tasktrace v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Analyze { config, output, include_tasks } => run_analyze(&config, output, include_tasks),
        Commands::Validate { config, to_json } => validate_trace_config(&config, to_json),
        Commands::Window { dir, pattern, record_size, persisted, prior_offset, count } => {
            print_window(&dir, &pattern, record_size, persisted, prior_offset, count)
        }
    }
}

fn run_analyze(config_path: &Path, output: Option<PathBuf>, include_tasks: bool) -> Result<()> {
    info!("Loading trace config from: {:?}", config_path);
    let mut config = TraceConfig::from_yaml_file(config_path)?;
    if let Some(path) = output {
        config.output = Some(Output { path, include_tasks });
    } else if let Some(out) = config.output.as_mut() {
        out.include_tasks |= include_tasks;
    }

    let pipeline = TracePipeline::new(config).context("Invalid trace config")?;
    let report = pipeline.run().context("Trace analysis failed")?;

    report.metrics.print_summary();
    for it in &report.iterations {
        if let Some(cp) = &it.critical_path {
            println!(
                "device {} model {:?} iteration {:?}: critical path {} events, {:.3} us",
                it.device_id,
                it.model_id,
                it.iteration_id,
                cp.path.len(),
                cp.span_end - cp.span_start
            );
        }
    }
    if !report.failures.is_empty() {
        println!("⚠️  {} units failed:", report.failures.len());
        for f in &report.failures {
            println!("  - {}: {}", f.scope, f.reason);
        }
    }
    Ok(())
}

fn validate_trace_config(config_path: &Path, to_json: bool) -> Result<()> {
    info!("Validating trace config: {:?}", config_path);

    let yaml_content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {:?}", config_path))?;

    if to_json {
        println!("{}", yaml_to_json(&yaml_content)?);
        return Ok(());
    }

    let config = TraceConfig::from_yaml(&yaml_content)?;
    config.validate()?;

    println!("✅ YAML parsing: SUCCESS");
    println!("✅ Data dir: {:?}", config.profile.data_dir);
    println!("✅ Device: {:?}", config.profile.device_id);
    println!("✅ Clock: {} MHz", config.profile.clock_freq_mhz);
    for (kind, pattern) in config.effective_sources() {
        println!("  - {:<14} {}", kind.name(), pattern);
    }
    if config.iterations.is_empty() {
        println!("✅ Scope: operator scene (all tasks)");
    } else {
        println!("✅ Scope: {} iterations", config.iterations.len());
    }
    println!("✅ Workers: {}", config.worker_count());
    Ok(())
}

fn print_window(
    dir: &Path,
    pattern: &str,
    record_size: usize,
    persisted: Option<u64>,
    prior_offset: u64,
    count: Option<u64>,
) -> Result<()> {
    let slices = discover_slices(dir, pattern)?;
    let files = RecordFileSet::new(&slices, record_size)?;
    let request = persisted.map(|persisted_count| WindowRequest { persisted_count, prior_offset, count });
    let window = compute_window(&files, request.as_ref());

    let summary = serde_json::json!({
        "slices": slices.len(),
        "total_available": files.total_records(),
        "offset": window.offset,
        "count": window.count,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
