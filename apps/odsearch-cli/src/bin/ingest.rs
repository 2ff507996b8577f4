use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use odsearch_cli::ingest::{ingest, read_records};
use odsearch_cli::{bootstrap, init_tracing};
use odsearch_core::config::Config;

#[derive(Parser)]
#[command(name = "odsearch-ingest", about = "Embed JSONL catalogue records and upsert them into the collection")]
struct Args {
    /// JSONL file with one {id, text, metadata?} object per line; `-` reads stdin
    input: PathBuf,
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
    /// Drop and recreate the collection before writing
    #[arg(long)]
    reset: bool,
    /// Records per embed + upsert round (defaults to retrieval.batch_size)
    #[arg(long)]
    batch_size: Option<usize>,
    /// Attempts per batch on transient index or provider failures
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Milliseconds between attempts (defaults to index.retry_backoff_ms)
    #[arg(long)]
    retry_backoff_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = Config::load_from(&args.config_dir)?.settings()?;
    settings.require_durable_index()?;

    let parsed = if args.input.as_os_str() == "-" {
        read_records(io::stdin().lock())?
    } else {
        let file = File::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?;
        read_records(BufReader::new(file))?
    };
    println!("Read {} records ({} skipped)", parsed.records.len(), parsed.skipped);

    let app = bootstrap(settings).await?;
    if args.reset {
        println!("Resetting collection '{}'", app.store.collection());
        app.store.reset().await?;
    }

    let batch_size = args.batch_size.unwrap_or(app.settings.retrieval.batch_size);
    let pb = ProgressBar::new(parsed.records.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} records ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let backoff = Duration::from_millis(args.retry_backoff_ms.unwrap_or(app.settings.index.retry_backoff_ms));
    let written = ingest(&app.embedder, &app.store, &parsed.records, batch_size, args.retries, backoff, |n| {
        pb.inc(n as u64)
    })
    .await?;
    pb.finish_and_clear();

    println!("Upserted {written} records into '{}'", app.store.collection());
    Ok(())
}
