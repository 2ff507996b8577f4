use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use odsearch_cli::{bootstrap, build_app, init_tracing, AppState};
use odsearch_core::config::Config;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "odsearch-server", about = "Serve hybrid catalogue search over HTTP")]
struct Args {
    /// Directory holding config.toml and its per-environment overlays
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
    /// Host to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (overrides server.port)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut settings = Config::load_from(&args.config_dir)?.settings()?;
    settings.require_durable_index()?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let app = bootstrap(settings).await?;
    let addr: SocketAddr = format!("{}:{}", app.settings.server.host, app.settings.server.port).parse()?;
    let router = build_app(AppState::from(&app));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
