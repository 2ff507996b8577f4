use std::io::Cursor;
use std::time::Duration;

use odsearch_cli::bootstrap;
use odsearch_cli::ingest::{ingest, read_records};
use odsearch_core::config::{IndexBackendKind, Settings};
use tempfile::TempDir;
use uuid::Uuid;

fn local_settings(dir: &TempDir) -> Settings {
    let mut s = Settings::default();
    s.embedding.provider = Some("hashing".into());
    s.embedding.model = Some("test".into());
    s.embedding.dim = Some(64);
    s.index.backend = IndexBackendKind::Local;
    s.index.data_dir = Some(dir.path().join("index").display().to_string());
    s.index.retry_backoff_ms = 10;
    s
}

#[tokio::test]
async fn ingested_records_are_searchable_after_restart() {
    let dir = TempDir::new().unwrap();
    let settings = local_settings(&dir);
    settings.require_durable_index().unwrap();

    let (river, tram) = (Uuid::new_v4(), Uuid::new_v4());
    let input = format!(
        "{{\"id\": \"{river}\", \"text\": \"Abflussmengen der Flüsse\", \"metadata\": {{\"type\": \"dataset\"}}}}\n\
         {{\"id\": \"{tram}\", \"text\": \"tram punctuality report\", \"metadata\": {{\"type\": \"resource\"}}}}\n"
    );
    let parsed = read_records(Cursor::new(input)).unwrap();

    {
        let app = bootstrap(settings.clone()).await.unwrap();
        let backoff = Duration::from_millis(app.settings.index.retry_backoff_ms);
        let written = ingest(&app.embedder, &app.store, &parsed.records, 1, 2, backoff, |_| {}).await.unwrap();
        assert_eq!(written, 2);
    }

    let app = bootstrap(settings).await.unwrap();
    let info = app.admin.collection_info("programs").await.unwrap();
    assert_eq!(info.n_entities, Some(2));
    let hits = app.service.asearch_by_query("Flüsse", 1, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, river.to_string());
    assert_eq!(hits[0].metadata["type"], "dataset");
}

#[tokio::test]
async fn memory_only_local_index_starts_empty_each_time() {
    let mut settings = local_settings(&TempDir::new().unwrap());
    settings.index.data_dir = None;
    assert!(settings.require_durable_index().is_err());

    let first = bootstrap(settings.clone()).await.unwrap();
    let texts = vec!["bus stops".to_string()];
    let vectors = first.embedder.aembed_documents(&texts).await.unwrap();
    first.store.upsert(&[Uuid::new_v4().to_string()], &texts, &vectors, None).await.unwrap();

    let second = bootstrap(settings).await.unwrap();
    assert_eq!(second.admin.collection_info("programs").await.unwrap().n_entities, Some(0));
}
