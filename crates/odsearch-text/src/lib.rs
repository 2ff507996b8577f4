//! odsearch-text
//!
//! In-memory tantivy index that scores record text with BM25. The embedded
//! vector backend uses it as its sparse side.
pub mod tantivy_utils;
pub mod index;

pub use index::LexicalIndex;
