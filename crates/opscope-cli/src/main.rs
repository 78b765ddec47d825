use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use opscope_core::{
    DocumentIdentifier, FailureKind, OpsConfig, PatentResolver, SearchClient, SearchRange,
    TokenManager,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "opscope",
    about = "Patent bibliographic metadata from the EPO Open Patent Services API",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting OPSCOPE_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search published patents by CQL query and resolve each hit.
    Search {
        query: String,
        /// First result to return (1-based, inclusive).
        #[arg(long, default_value = "1")]
        start: u32,
        /// Last result to return (inclusive).
        #[arg(long, default_value = "25")]
        end: u32,
    },

    /// Resolve one publication, e.g. `opscope resolve EP.1234567.B1`.
    Resolve { id: String },
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("OPSCOPE_JSON").as_deref() == Ok("1");

    let config = OpsConfig::from_env()?;
    let auth = Arc::new(TokenManager::new(&config)?);
    let resolver = PatentResolver::new(&config, auth.clone())?;

    match cli.command {
        Commands::Search { query, start, end } => {
            let search = SearchClient::new(&config, auth)?;
            let page = search.search(&query, &SearchRange { start, end }).await?;
            let records = resolver.resolve_all(&page.identifiers).await?;

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": {
                        "total_count": page.total_count,
                        "records": records,
                    },
                }))?;
            } else {
                println!(
                    "{} total results, showing {}:",
                    page.total_count,
                    records.len()
                );
                for record in &records {
                    print_record(record);
                }
            }
        }

        Commands::Resolve { id } => {
            let identifier = DocumentIdentifier::parse(&id)?;
            let record = resolver.resolve(&identifier).await?;

            if json_output {
                print_json(&serde_json::json!({"status": "ok", "data": record}))?;
            } else {
                print_record(&record);
            }
        }
    }

    Ok(())
}

fn print_record(record: &opscope_core::PatentRecord) {
    println!("{} — {}", record.identifier, record.title);
    if !record.inventors.is_empty() {
        println!("  inventors: {}", record.inventors.join("; "));
    }
    if !record.classifications.is_empty() {
        println!("  ipc: {}", record.classifications.join(", "));
    }
    if record.error != FailureKind::None {
        println!("  error: {:?}", record.error);
    }
    if let Some(url) = &record.espacenet_url {
        println!("  espacenet: {url}");
    }
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}
