//! Collection lifecycle: create-if-absent, drop, reset.

use std::sync::Arc;

use odsearch_core::schema::CollectionSpec;
use odsearch_core::traits::VectorIndex;
use odsearch_core::Result;
use parking_lot::Mutex;

use crate::schema::catalogue_collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Absent,
    Creating,
    Ready,
    Dropped,
}

/// Owns the schema of one named collection. The dense dimension is fixed
/// here at construction and never changes for the lifetime of the
/// collection; migrating means `reset`.
pub struct CollectionManager {
    index: Arc<dyn VectorIndex>,
    spec: CollectionSpec,
    state: Mutex<CollectionState>,
}

impl CollectionManager {
    pub fn new(index: Arc<dyn VectorIndex>, name: &str, dim: usize) -> Self {
        Self::with_spec(index, catalogue_collection(name, dim))
    }

    pub fn with_spec(index: Arc<dyn VectorIndex>, spec: CollectionSpec) -> Self {
        Self { index, spec, state: Mutex::new(CollectionState::Absent) }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn dim(&self) -> usize {
        self.spec.dense_dim().unwrap_or_default()
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn state(&self) -> CollectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: CollectionState) {
        *self.state.lock() = next;
    }

    pub async fn ensure(&self) -> Result<()> {
        if self.index.has_collection(self.name()).await? {
            self.set_state(CollectionState::Ready);
            return Ok(());
        }
        self.set_state(CollectionState::Creating);
        tracing::info!(collection = self.name(), dim = self.dim(), backend = self.index.name(), "creating collection");
        match self.index.create_collection(&self.spec).await {
            Ok(()) => {
                self.set_state(CollectionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(CollectionState::Absent);
                Err(e)
            }
        }
    }

    /// Idempotent: dropping a missing collection succeeds.
    pub async fn drop(&self) -> Result<()> {
        if !self.index.has_collection(self.name()).await? {
            self.set_state(CollectionState::Absent);
            return Ok(());
        }
        tracing::info!(collection = self.name(), "dropping collection");
        self.index.drop_collection(self.name()).await?;
        self.set_state(CollectionState::Dropped);
        tracing::info!(collection = self.name(), "collection dropped");
        Ok(())
    }

    /// Drop followed by ensure. A failure in between leaves the collection absent.
    pub async fn reset(&self) -> Result<()> {
        self.drop().await?;
        self.ensure().await
    }
}
