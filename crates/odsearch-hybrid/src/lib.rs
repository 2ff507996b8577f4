//! odsearch-hybrid
//!
//! Query-side façade: the `Retriever` turns query strings into ranked
//! `SearchItem`s, the `SearchService` adds type filters, deadlines and the
//! `{id, metadata}` projection served over HTTP.
pub mod retriever;
pub mod service;

pub use retriever::{to_search_item, Retriever};
pub use service::SearchService;
