//! Shared building blocks for the odsearch crates: domain types, the error
//! taxonomy, layered configuration, filter predicates and the two backend
//! seams (`EmbeddingBackend`, `VectorIndex`).

pub mod blocking;
pub mod config;
pub mod error;
pub mod filter;
pub mod schema;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
