//! Source Resolve CLI
//!
//! Pins a module reference to an exact revision and prints the source
//! descriptor to put in a version record.

use clap::Parser;
use mlld_registry::{Checksum, ContentFetcher, GithubClient, RegistryConfig, SourceResolver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-resolve")]
#[command(about = "Resolve a module reference to a pinned source descriptor")]
struct Cli {
    /// Gist link, GitHub blob link, raw URL or any http(s) URL
    reference: String,

    /// Fetch the content and record its SHA-256
    #[arg(long)]
    hash: bool,

    /// Config file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::load_from(cli.config.as_deref())?;
    let client = GithubClient::from_config(&config.github)?;
    let cancel = CancellationToken::new();

    let resolver = SourceResolver::new(client.clone());
    let resolved = resolver.resolve(&cli.reference, &cancel).await?;
    eprintln!("📌 {}", resolved);

    let content_hash = if cli.hash {
        let content = client.fetch(&resolved.url()).await?;
        Some(Checksum::sha256(&content))
    } else {
        None
    };

    let descriptor = resolved.to_descriptor(content_hash.as_ref());
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
