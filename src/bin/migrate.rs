//! Registry Migration CLI
//!
//! Converts legacy flat module files into the versioned directory layout.

use std::path::PathBuf;

use clap::Parser;
use mlld_registry::migrate::{apply_migration, plan_migration};
use mlld_registry::RegistryConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-migrate")]
#[command(about = "Migrate legacy module files to the versioned layout")]
struct Cli {
    /// Modules directory (defaults to the configured one)
    #[arg(short, long)]
    modules: Option<PathBuf>,

    /// Config file
    #[arg(short, long)]
    config: Option<String>,

    /// Dry run - print the plan without writing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let modules_dir = match cli.modules {
        Some(dir) => dir,
        None => RegistryConfig::load_from(cli.config.as_deref())?.paths.modules_dir,
    };

    println!("🔄 Planning migration of {}", modules_dir.display());
    println!();

    let plan = plan_migration(&modules_dir)?;

    for skipped in &plan.skipped {
        println!("⏭️  {} - skipped: {}", skipped.key, skipped.reason);
    }
    for step in &plan.steps {
        println!("📦 {} ({})", step.key, step.version);
        println!("   📁 {}/", step.target_dir.display());
        for output in step.outputs() {
            if let Some(name) = output.file_name() {
                println!("      ├── {}", name.to_string_lossy());
            }
        }
        println!("   💾 {}", step.backup_path().display());
    }

    if plan.is_empty() {
        println!("✅ Nothing to migrate");
        return Ok(());
    }

    println!();
    if cli.dry_run {
        println!("🔍 Dry run - {} module(s) would be migrated", plan.steps.len());
        return Ok(());
    }

    let backups = apply_migration(&plan)?;
    println!("✨ Migrated {} module(s)", backups.len());
    println!();
    println!("Next steps:");
    println!("  1. Run registry-build to regenerate modules.json");
    println!("  2. Remove the .backup files once verified");
    Ok(())
}
