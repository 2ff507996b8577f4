//! Wiring shared by the odsearch binaries: component bootstrap from
//! settings, the axum router and the JSONL ingest loop.

pub mod bootstrap;
pub mod ingest;
pub mod server;

pub use bootstrap::{bootstrap, App};
pub use server::{build_app, AppState};

/// `RUST_LOG`-driven fmt subscriber used by every binary.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
