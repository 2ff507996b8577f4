use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use odsearch_core::filter::Filter;
use odsearch_core::schema::CollectionSpec;
use odsearch_core::traits::{AnnData, HybridRequest, UpsertRow, VectorIndex};
use odsearch_core::types::{Metadata, RankerWeights, RawHit};
use odsearch_core::{Error, Result};
use odsearch_vector::schema::{catalogue_collection, DENSE_FIELD, METADATA_FIELD, SPARSE_FIELD};
use odsearch_vector::store::{candidate_pool, MetadataSupport};
use odsearch_vector::{CollectionManager, CollectionState, LocalIndex, VectorStore};
use parking_lot::Mutex;
use serde_json::json;

const DIM: usize = 4;

/// Counts calls and keeps the last hybrid request, delegating to an
/// embedded index.
#[derive(Default)]
struct Recording {
    inner: LocalIndex,
    calls: AtomicUsize,
    upserts: AtomicUsize,
    searches: AtomicUsize,
    fail_create: AtomicBool,
    last_request: Mutex<Option<HybridRequest>>,
    last_rows: Mutex<Vec<UpsertRow>>,
}

impl Recording {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorIndex for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.hit();
        self.inner.list_collections().await
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        self.hit();
        self.inner.has_collection(collection).await
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        self.hit();
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::provider("create_collection", &spec.name, "boom"));
        }
        self.inner.create_collection(spec).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.hit();
        self.inner.drop_collection(collection).await
    }

    async fn upsert(&self, collection: &str, rows: &[UpsertRow]) -> Result<()> {
        self.hit();
        self.upserts.fetch_add(1, Ordering::SeqCst);
        *self.last_rows.lock() = rows.to_vec();
        self.inner.upsert(collection, rows).await
    }

    async fn hybrid_search(&self, collection: &str, request: &HybridRequest) -> Result<Vec<Vec<RawHit>>> {
        self.hit();
        self.searches.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        self.inner.hybrid_search(collection, request).await
    }

    async fn get(&self, collection: &str, ids: &[String], output_fields: &[String]) -> Result<Vec<RawHit>> {
        self.hit();
        self.inner.get(collection, ids, output_fields).await
    }
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn meta(kind: &str) -> Metadata {
    json!({ "type": kind, "title": format!("a {kind}") }).as_object().cloned().unwrap()
}

async fn store_on(index: Arc<Recording>, spec: CollectionSpec) -> VectorStore {
    let manager = Arc::new(CollectionManager::with_spec(index, spec));
    VectorStore::open(manager).await.expect("open store")
}

async fn seeded() -> (Arc<Recording>, VectorStore) {
    let index = Arc::new(Recording::default());
    let store = store_on(index.clone(), catalogue_collection("programs", DIM)).await;
    store
        .upsert(
            &strings(&["a", "b", "c"]),
            &strings(&["tram stops of the city", "air quality measurements", "tram timetable weekly"]),
            &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0], vec![0.7, 0.0, 0.7, 0.0]],
            Some(&[meta("dataset"), meta("dataservice"), meta("resource")]),
        )
        .await
        .expect("seed");
    (index, store)
}

#[tokio::test]
async fn mismatched_upsert_never_reaches_the_index() {
    let index = Arc::new(Recording::default());
    let store = VectorStore::new(Arc::new(CollectionManager::new(index.clone(), "programs", DIM)));

    let err = store.upsert(&strings(&["a", "b"]), &strings(&["x"]), &[vec![0.0; DIM]], None).await;
    assert!(matches!(err, Err(Error::Validation(_))));

    let err = store.upsert(&strings(&["a"]), &strings(&["x"]), &[vec![0.0; DIM + 1]], None).await;
    assert!(matches!(err, Err(Error::Validation(_))));

    let err = store.upsert(&strings(&["a"]), &strings(&["x"]), &[vec![0.0; DIM]], Some(&[])).await;
    assert!(matches!(err, Err(Error::Validation(_))));

    assert_eq!(index.calls(), 0);
}

#[tokio::test]
async fn invalid_queries_never_reach_the_index() {
    let index = Arc::new(Recording::default());
    let store = VectorStore::new(Arc::new(CollectionManager::new(index.clone(), "programs", DIM)));

    let wrong_dim = store.hybrid_search(&strings(&["q"]), &[vec![0.0; 3]], 5, None, None).await;
    assert!(matches!(wrong_dim, Err(Error::Validation(_))));
    let mismatched = store.hybrid_search(&strings(&["q", "r"]), &[vec![0.0; DIM]], 5, None, None).await;
    assert!(matches!(mismatched, Err(Error::Validation(_))));
    let empty = store.hybrid_search(&[], &[], 5, None, None).await.unwrap();
    assert!(empty.is_empty());

    assert_eq!(index.calls(), 0);
}

#[test]
fn candidate_pool_is_clamped() {
    assert_eq!(candidate_pool(1), 512);
    assert_eq!(candidate_pool(100), 1000);
    assert_eq!(candidate_pool(5000), 16_384);
    assert_eq!(candidate_pool(usize::MAX), 16_384);
}

#[tokio::test]
async fn hybrid_request_shape() {
    let (index, store) = seeded().await;
    let filter = Filter::object_types(&["dataset"]);
    store
        .hybrid_search(&strings(&["tram"]), &[vec![1.0, 0.0, 0.0, 0.0]], 5, None, filter.as_ref())
        .await
        .unwrap();

    let req = index.last_request.lock().clone().expect("request recorded");
    assert_eq!(req.limit, 5);
    assert_eq!(req.weights, RankerWeights::default());
    assert_eq!(req.output_fields, strings(&["id", "text", "metadata"]));
    let (dense, sparse) = (&req.requests[0], &req.requests[1]);
    assert_eq!(dense.anns_field, DENSE_FIELD);
    assert_eq!(sparse.anns_field, SPARSE_FIELD);
    assert!(matches!(dense.data, AnnData::Dense(_)));
    assert!(matches!(sparse.data, AnnData::Text(_)));
    assert_eq!(dense.limit, 512);
    assert_eq!(dense.params["nprobe"], 10);
    assert!((sparse.params["drop_ratio_search"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    for sub in &req.requests {
        assert_eq!(sub.filter, filter);
        assert_eq!(sub.params["hints"], "iterative_filter");
    }

    store.hybrid_search(&strings(&["tram"]), &[vec![1.0, 0.0, 0.0, 0.0]], 5, None, None).await.unwrap();
    let req = index.last_request.lock().clone().unwrap();
    assert!(req.requests.iter().all(|r| r.filter.is_none() && !r.params.contains_key("hints")));
}

#[tokio::test]
async fn same_text_and_vector_find_the_record() {
    let (_, store) = seeded().await;
    let hits = store
        .hybrid_search(&strings(&["air quality measurements"]), &[vec![0.0, 1.0, 0.0, 0.0]], 3, None, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    match &hits[0][0] {
        RawHit::Entity(h) => {
            assert_eq!(h.id, "b");
            assert_eq!(h.text.as_deref(), Some("air quality measurements"));
            assert_eq!(h.metadata.as_ref().unwrap()["type"], "dataservice");
            assert!(h.distance.is_some());
        }
        other => panic!("unexpected hit shape {other:?}"),
    }
    assert_eq!(store.metadata_support(), MetadataSupport::Supported);
}

#[tokio::test]
async fn batch_results_follow_query_order() {
    let (_, store) = seeded().await;
    let hits = store
        .hybrid_search(
            &strings(&["tram timetable weekly", "air quality measurements"]),
            &[vec![0.7, 0.0, 0.7, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
            1,
            None,
            None,
        )
        .await
        .unwrap();
    let top: Vec<String> = hits
        .iter()
        .map(|h| match &h[0] {
            RawHit::Entity(e) => e.id.clone(),
            RawHit::Map(m) => m["id"].as_str().unwrap_or_default().to_string(),
        })
        .collect();
    assert_eq!(top, strings(&["c", "b"]));
}

#[tokio::test]
async fn filter_restricts_both_sub_searches() {
    let (_, store) = seeded().await;
    let filter = Filter::object_types(&["resource"]);
    let hits = store
        .hybrid_search(&strings(&["tram"]), &[vec![1.0, 0.0, 0.0, 0.0]], 10, None, filter.as_ref())
        .await
        .unwrap();
    let ids: Vec<String> = hits[0]
        .iter()
        .map(|h| match h {
            RawHit::Entity(e) => e.id.clone(),
            RawHit::Map(_) => String::new(),
        })
        .collect();
    assert_eq!(ids, strings(&["c"]));
}

#[tokio::test]
async fn collection_without_metadata_falls_back_once() {
    let index = Arc::new(Recording::default());
    let mut legacy = catalogue_collection("legacy", DIM);
    legacy.fields.retain(|f| f.name != METADATA_FIELD);
    let store = store_on(index.clone(), legacy).await;

    store
        .upsert(&strings(&["a"]), &strings(&["bus stops"]), &[vec![1.0, 0.0, 0.0, 0.0]], Some(&[meta("dataset")]))
        .await
        .expect("falls back");
    assert_eq!(index.upserts.load(Ordering::SeqCst), 2);
    assert_eq!(store.metadata_support(), MetadataSupport::Unsupported);
    assert!(index.last_rows.lock()[0].metadata.is_none());

    store
        .upsert(&strings(&["b"]), &strings(&["tram stops"]), &[vec![0.0, 1.0, 0.0, 0.0]], Some(&[meta("dataset")]))
        .await
        .unwrap();
    assert_eq!(index.upserts.load(Ordering::SeqCst), 3, "known-unsupported skips the doomed attempt");

    let hits = store
        .hybrid_search(&strings(&["bus"]), &[vec![1.0, 0.0, 0.0, 0.0]], 5, None, None)
        .await
        .unwrap();
    assert_eq!(index.searches.load(Ordering::SeqCst), 1);
    match &hits[0][0] {
        RawHit::Entity(h) => {
            assert_eq!(h.id, "a");
            assert!(h.metadata.is_none());
        }
        other => panic!("unexpected hit shape {other:?}"),
    }
}

#[tokio::test]
async fn search_falls_back_when_metadata_is_missing() {
    let index = Arc::new(Recording::default());
    let mut legacy = catalogue_collection("legacy", DIM);
    legacy.fields.retain(|f| f.name != METADATA_FIELD);
    let store = store_on(index.clone(), legacy).await;
    store.upsert(&strings(&["a"]), &strings(&["bus stops"]), &[vec![1.0, 0.0, 0.0, 0.0]], None).await.unwrap();
    assert_eq!(store.metadata_support(), MetadataSupport::Unknown);

    let hits = store
        .hybrid_search(&strings(&["bus"]), &[vec![1.0, 0.0, 0.0, 0.0]], 5, None, None)
        .await
        .unwrap();
    assert_eq!(hits[0].len(), 1);
    assert_eq!(index.searches.load(Ordering::SeqCst), 2);
    assert_eq!(store.metadata_support(), MetadataSupport::Unsupported);
    let last = index.last_request.lock().clone().unwrap();
    assert_eq!(last.output_fields, strings(&["id", "text"]));
}

#[tokio::test]
async fn fetch_reads_back_a_point() {
    let (_, store) = seeded().await;
    let rec = store.fetch("c").await.unwrap().expect("stored");
    assert_eq!(rec.text, "tram timetable weekly");
    assert_eq!(rec.dense, vec![0.7, 0.0, 0.7, 0.0]);
    assert_eq!(rec.metadata.unwrap()["type"], "resource");
    assert!(store.fetch("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_is_last_write_wins() {
    let (_, store) = seeded().await;
    store
        .upsert(&strings(&["a"]), &strings(&["groundwater wells"]), &[vec![0.0, 0.0, 0.0, 1.0]], Some(&[meta("dataset")]))
        .await
        .unwrap();
    let rec = store.fetch("a").await.unwrap().unwrap();
    assert_eq!(rec.text, "groundwater wells");
    let hits = store
        .hybrid_search(&strings(&["stops"]), &[vec![0.0, 0.0, 0.0, 1.0]], 10, None, None)
        .await
        .unwrap();
    assert_eq!(hits[0].len(), 3);
}

#[tokio::test]
async fn manager_lifecycle() {
    let index = Arc::new(Recording::default());
    let manager = CollectionManager::new(index.clone(), "programs", DIM);
    assert_eq!(manager.state(), CollectionState::Absent);

    index.fail_create.store(true, Ordering::SeqCst);
    assert!(manager.ensure().await.is_err());
    assert_eq!(manager.state(), CollectionState::Absent);

    index.fail_create.store(false, Ordering::SeqCst);
    manager.ensure().await.unwrap();
    assert_eq!(manager.state(), CollectionState::Ready);
    let before = index.calls();
    manager.ensure().await.unwrap();
    assert_eq!(index.calls(), before + 1, "existing collection costs one existence check");

    manager.drop().await.unwrap();
    assert_eq!(manager.state(), CollectionState::Dropped);
    manager.drop().await.unwrap();
    assert_eq!(manager.state(), CollectionState::Absent);

    manager.reset().await.unwrap();
    assert_eq!(manager.state(), CollectionState::Ready);
    assert!(index.inner.has_collection("programs").await.unwrap());
}

#[tokio::test]
async fn reset_empties_the_collection() {
    let (_, store) = seeded().await;
    store.reset().await.unwrap();
    assert!(store.fetch("a").await.unwrap().is_none());
    assert_eq!(store.manager().state(), CollectionState::Ready);
}
