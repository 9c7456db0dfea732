//! Registry Config CLI
//!
//! Shows, creates and checks the registry configuration.

use clap::{Parser, Subcommand};
use mlld_registry::RegistryConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-config")]
#[command(about = "Manage registry configuration")]
struct Cli {
    /// Config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Target file
        #[arg(default_value = "registry.toml")]
        path: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check the effective configuration
    Validate,
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
    match cli.command {
        Commands::Show => {
            let config = RegistryConfig::load_from(cli.config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }

        Commands::Init { path, force } => {
            if std::path::Path::new(&path).exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path);
            }
            RegistryConfig::default().save(&path)?;
            println!("✅ Wrote {}", path);
        }

        Commands::Validate => {
            let config = RegistryConfig::load_from(cli.config.as_deref())?;
            let problems = config.validate();
            if problems.is_empty() {
                println!("✅ Configuration is valid");
            } else {
                println!("❌ {} problem(s):", problems.len());
                for problem in &problems {
                    println!("   └─ {}", problem);
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
