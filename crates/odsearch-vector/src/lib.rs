//! odsearch-vector
//!
//! Collection lifecycle and hybrid (dense + BM25) search on top of a
//! `VectorIndex`. Two index implementations ship here: a Milvus REST client
//! and an embedded in-process engine.
pub mod collection;
pub mod local;
pub mod milvus;
pub mod schema;
pub mod store;

pub use collection::{CollectionManager, CollectionState};
pub use local::LocalIndex;
pub use milvus::MilvusIndex;
pub use store::VectorStore;
