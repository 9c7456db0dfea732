//! Registry Build CLI
//!
//! Scans the modules tree, validates every module and writes the index
//! artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mlld_registry::{
    write_outputs, BuildMode, GithubClient, IntegrityChecker, RegistryAggregator, RegistryConfig,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-build")]
#[command(about = "Build the module registry index")]
struct Cli {
    /// Config file (defaults to registry.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Modules directory
    #[arg(short, long)]
    modules: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip fetching and verifying module content
    #[arg(long)]
    skip_content: bool,

    /// Report errors without failing the build
    #[arg(long)]
    best_effort: bool,

    /// Write validation-report.json
    #[arg(long)]
    save_report: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = RegistryConfig::load_from(cli.config.as_deref())?;
    if let Some(modules) = cli.modules {
        config.paths.modules_dir = modules;
    }
    if let Some(output) = cli.output {
        config.paths.output_dir = output;
    }
    if cli.skip_content {
        config.validation.skip_content = true;
    }
    if cli.best_effort {
        config.validation.mode = BuildMode::BestEffort;
    }
    if cli.save_report {
        config.validation.save_report = true;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut aggregator = RegistryAggregator::new(&config.paths.modules_dir);
    if !config.validation.skip_content {
        let client = GithubClient::from_config(&config.github)?;
        aggregator = aggregator.with_integrity(IntegrityChecker::new(Arc::new(client)));
    }

    println!("🔨 Building registry from {}", config.paths.modules_dir.display());
    if config.validation.skip_content {
        println!("  (content verification skipped)");
    }
    println!();

    let aggregation = aggregator.aggregate(&cancel).await?;

    for (key, diagnostics) in aggregation.invalid_modules() {
        println!("❌ {}", key);
        for diagnostic in diagnostics {
            println!("   └─ {}", diagnostic);
        }
    }

    let written = write_outputs(
        &aggregation,
        &config.paths.output_files(),
        config.validation.save_report,
    )?;

    println!();
    println!(
        "✅ {} module(s) included, {} skipped, {} error(s)",
        aggregation.index.len(),
        aggregation.invalid_modules().count(),
        aggregation.error_count()
    );
    for path in &written {
        println!("  📄 {}", path.display());
    }

    let mode = config.validation.mode;
    if aggregation.is_success(mode) {
        Ok(true)
    } else {
        println!();
        println!("❌ Build failed ({} mode)", mode);
        Ok(false)
    }
}
