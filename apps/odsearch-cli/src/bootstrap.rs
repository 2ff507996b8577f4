use std::sync::Arc;
use std::time::Duration;

use odsearch_core::config::{IndexBackendKind, Settings};
use odsearch_core::traits::{CollectionAdmin, VectorIndex};
use odsearch_core::Result;
use odsearch_embed::Embedder;
use odsearch_hybrid::{Retriever, SearchService};
use odsearch_vector::{CollectionManager, LocalIndex, MilvusIndex, VectorStore};

/// Every long-lived component of a running deployment.
pub struct App {
    pub settings: Settings,
    pub embedder: Arc<Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub admin: Arc<dyn CollectionAdmin>,
    pub store: Arc<VectorStore>,
    pub retriever: Arc<Retriever>,
    pub service: Arc<SearchService>,
}

fn split<B>(backend: Arc<B>) -> (Arc<dyn VectorIndex>, Arc<dyn CollectionAdmin>)
where
    B: VectorIndex + CollectionAdmin + 'static,
{
    let index: Arc<dyn VectorIndex> = backend.clone();
    let admin: Arc<dyn CollectionAdmin> = backend;
    (index, admin)
}

/// Builds the embedder, connects the index and makes sure the collection
/// exists. The embedding dimension is settled here, before any write.
///
/// A local backend without `index.data_dir` is kept in memory; processes
/// that need their writes to persist call
/// [`Settings::require_durable_index`] first.
pub async fn bootstrap(settings: Settings) -> Result<App> {
    settings.validate()?;
    let embedder = Arc::new(Embedder::from_settings(&settings.embedding)?);
    let dim = embedder.adim().await?;

    let (index, admin) = match settings.index.backend {
        IndexBackendKind::Milvus => split(Arc::new(MilvusIndex::connect(&settings.index).await?)),
        IndexBackendKind::Local => match settings.index.local_dir() {
            Some(dir) => split(Arc::new(LocalIndex::open(&dir)?)),
            None => {
                tracing::warn!("index.data_dir is not set; the local index lives in memory only");
                split(Arc::new(LocalIndex::new()))
            }
        },
    };
    tracing::info!(
        backend = index.name(),
        collection = %settings.index.collection,
        embedder = embedder.name(),
        dim,
        "bootstrapping search stack"
    );

    let manager = Arc::new(CollectionManager::new(index.clone(), &settings.index.collection, dim));
    let store = Arc::new(VectorStore::open(manager).await?);
    let retriever = Arc::new(
        Retriever::new(embedder.clone(), store.clone())
            .with_batch_size(settings.retrieval.batch_size)
            .with_weights(settings.retrieval.weights()?),
    );
    let timeout = settings.retrieval.request_timeout_ms.map(Duration::from_millis);
    let service = Arc::new(SearchService::new(retriever.clone()).with_timeout(timeout));

    Ok(App { settings, embedder, index, admin, store, retriever, service })
}
