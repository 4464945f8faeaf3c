//! dijetshape CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dijetshape")]
#[command(about = "Dijet angular correlation shapes and systematic uncertainties")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive stages, project shapes and compute uncertainties
    Run {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for the JSON artifacts
        #[arg(short, long)]
        output: PathBuf,

        /// Threads (0 = auto). Overrides the configuration when given.
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Check a run configuration and its nominal dataset without running
    Validate {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { config, output, threads } => cmd_run(&config, &output, threads),
        Commands::Validate { config } => cmd_validate(&config),
    }
}

fn cmd_run(config: &Path, output: &Path, threads: Option<usize>) -> Result<()> {
    let mut cfg = dj_pipeline::read_run_config(config)?;
    if let Some(t) = threads {
        cfg.threads = t;
    }
    tracing::info!(path = %config.display(), threads = cfg.threads, "starting run");

    let out = dj_pipeline::run(&cfg)?;
    tracing::info!(
        slices = out.shapes.len(),
        uncertainties = out.uncertainties.len(),
        failures = out.n_failures(),
        "run complete"
    );

    let written = dj_pipeline::output::write_all(&out, &cfg, output)?;
    let report = serde_json::json!({
        "output_dir": output,
        "written": written,
        "slices": out.shapes.len(),
        "integrated": out.integrated.len(),
        "failures": out.n_failures(),
        "tool_version": dj_core::VERSION,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_validate(config: &Path) -> Result<()> {
    let cfg = dj_pipeline::read_run_config(config)?;
    cfg.validate()?;
    let store = dj_pipeline::io::load_store(&cfg.dataset, cfg.normalization)?;
    for (name, path) in &cfg.auxiliary {
        let aux = dj_pipeline::io::load_store(path, cfg.normalization)?;
        tracing::info!(dataset = %name, distributions = aux.len(), "auxiliary dataset ok");
    }
    let provided: Vec<String> = store.provided().iter().map(|s| s.to_string()).collect();
    let reachable: Vec<String> = store.reachable().iter().map(|s| s.to_string()).collect();

    let report = serde_json::json!({
        "valid": true,
        "distributions": store.len(),
        "slices": store.slices().len(),
        "provided": provided,
        "reachable": reachable,
        "sources": cfg.uncertainties.sources.keys().map(|s| s.name()).collect::<Vec<_>>(),
        "grouping": cfg.uncertainties.grouping,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
