use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use odsearch_cli::{bootstrap, init_tracing};
use odsearch_core::config::Config;
use odsearch_core::filter::Filter;

#[derive(Parser)]
#[command(name = "odsearch-search", about = "Run a hybrid query against the catalogue collection")]
struct Args {
    query: String,
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
    /// Number of hits (defaults to retrieval.default_limit)
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
    /// Restrict to object types, e.g. --type dataset --type resource
    #[arg(long = "type")]
    types: Vec<String>,
    /// Treat QUERY as the id of a stored record and list its neighbours
    #[arg(long)]
    similar: bool,
    /// Characters of text shown per hit
    #[arg(long, default_value_t = 120)]
    snippet: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = Config::load_from(&args.config_dir)?.settings()?;
    settings.require_durable_index()?;
    let app = bootstrap(settings).await?;

    let top_k = args.top_k.unwrap_or(app.settings.retrieval.default_limit);
    let filter = Filter::object_types(&args.types);
    let items = if args.similar {
        app.retriever.aretrieve_similar(&args.query, top_k, filter.as_ref()).await?
    } else {
        app.retriever.aretrieve(args.query.trim(), top_k, filter.as_ref()).await?
    };

    println!("Top {top_k} results for {:?} (returned {})", args.query, items.len());
    for (rank, item) in items.iter().enumerate() {
        let dist = item.distance.map_or_else(|| "?".to_string(), |d| format!("{d:.4}"));
        println!("{}. dist={dist} id={} text={}", rank + 1, item.id, item.snippet(args.snippet));
    }
    Ok(())
}
