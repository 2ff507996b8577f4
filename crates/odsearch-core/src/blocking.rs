//! Bridge for the synchronous call paths.
//!
//! Sync entry points drive async work on one lazily built multi-thread
//! runtime that lives for the rest of the process, so pooled connections
//! created on it stay usable across calls.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Error, Result};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> Result<&'static Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = Builder::new_multi_thread()
        .thread_name("odsearch-blocking")
        .enable_all()
        .build()
        .map_err(|e| Error::Configuration(format!("failed to start blocking runtime: {e}")))?;
    tracing::debug!("blocking runtime started");
    // A concurrent caller may have won the race; its runtime is kept and ours dropped.
    let _ = RUNTIME.set(rt);
    RUNTIME
        .get()
        .ok_or_else(|| Error::Configuration("blocking runtime unavailable".to_string()))
}

/// Runs `fut` to completion from synchronous code.
///
/// Returns `UnsupportedOperation` when called from inside an async context,
/// where blocking the executor thread would stall other tasks.
pub fn block_on<F: Future>(fut: F) -> Result<F::Output> {
    if Handle::try_current().is_ok() {
        return Err(Error::UnsupportedOperation(
            "synchronous call made from within an async runtime; use the async variant".to_string(),
        ));
    }
    Ok(runtime()?.block_on(fut))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_futures_from_sync_code() {
        let out = block_on(async { 21 * 2 }).expect("block_on");
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn refuses_inside_runtime() {
        let err = block_on(async { 1 }).expect_err("must refuse");
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }
}
