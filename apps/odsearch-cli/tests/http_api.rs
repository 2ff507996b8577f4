use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use odsearch_cli::server::status_for;
use odsearch_cli::{bootstrap, build_app, App, AppState};
use odsearch_core::config::{IndexBackendKind, Settings};
use odsearch_core::types::Metadata;
use odsearch_core::Error;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

struct Fixture {
    app: App,
    router: Router,
    ids: Vec<String>,
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.embedding.provider = Some("hashing".into());
    s.embedding.model = Some("test".into());
    s.embedding.dim = Some(64);
    s.index.backend = IndexBackendKind::Local;
    s.retrieval.request_timeout_ms = Some(5_000);
    s
}

async fn fixture() -> Fixture {
    let app = bootstrap(settings()).await.unwrap();
    let rows = [
        ("bicycle parking counts zurich", "dataset"),
        ("groundwater levels monitoring wells", "dataset"),
        ("ferry timetable lake geneva", "resource"),
        ("tram delays punctuality report", "resource"),
    ];
    let ids: Vec<String> = rows.iter().map(|_| Uuid::new_v4().to_string()).collect();
    let texts: Vec<String> = rows.iter().map(|(t, _)| t.to_string()).collect();
    let metas: Vec<Metadata> =
        rows.iter().map(|(_, k)| json!({ "type": k }).as_object().cloned().unwrap()).collect();
    let vectors = app.embedder.aembed_documents(&texts).await.unwrap();
    app.store.upsert(&ids, &texts, &vectors, Some(&metas)).await.unwrap();

    let router = build_app(AppState::from(&app));
    Fixture { app, router, ids }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let f = fixture().await;
    let (status, body) = send(&f.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn search_returns_id_and_metadata_only() {
    let f = fixture().await;
    let (status, body) =
        send(&f.router, "POST", "/search", Some(json!({ "query": "groundwater wells", "options": { "top_k": 2 } }))).await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["id"], f.ids[1].as_str());
    assert_eq!(hits[0]["metadata"]["type"], "dataset");
    assert_eq!(hits[0].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn search_filters_by_object_type() {
    let f = fixture().await;
    let req = json!({ "query": "bicycle ferry tram", "filters": { "types": ["resource"] } });
    let (status, body) = send(&f.router, "POST", "/search", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h["metadata"]["type"] == "resource"));
}

#[tokio::test]
async fn search_request_validation_is_unprocessable() {
    let f = fixture().await;
    for req in [
        json!({ "query": "" }),
        json!({ "query": "tram", "options": { "top_k": 0 } }),
        json!({ "query": "tram", "options": { "top_k": 101 } }),
        json!({ "query": "tram", "filters": { "types": ["spreadsheet"] } }),
        json!({ "filters": {} }),
    ] {
        let (status, body) = send(&f.router, "POST", "/search", Some(req.clone())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "request {req}");
        assert!(body["detail"].is_string(), "request {req}");
    }
}

#[tokio::test]
async fn whitespace_query_yields_empty_list() {
    let f = fixture().await;
    let (status, body) = send(&f.router, "POST", "/search", Some(json!({ "query": "   " }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn similar_search_excludes_source_and_404s_on_unknown() {
    let f = fixture().await;
    let (status, body) =
        send(&f.router, "POST", "/search/similar", Some(json!({ "source_id": f.ids[2], "options": { "top_k": 3 } })))
            .await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h["id"] != f.ids[2].as_str()));

    let missing = Uuid::new_v4().to_string();
    let (status, body) = send(&f.router, "POST", "/search/similar", Some(json!({ "source_id": missing }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains(&missing));
}

#[tokio::test]
async fn collections_are_listed_with_status() {
    let f = fixture().await;
    let (status, body) = send(&f.router, "GET", "/vectorstore/collections", None).await;
    assert_eq!(status, StatusCode::OK);
    let info = &body["collections"][0];
    assert_eq!(info["name"], "programs");
    assert_eq!(info["state"], "LOADED");
    assert_eq!(info["state_code"], 3);
    assert_eq!(info["n_entities"], 4);
    assert_eq!(info["aliases"], json!([]));
}

#[tokio::test]
async fn released_collection_fails_searches_until_loaded() {
    let f = fixture().await;
    let (status, body) = send(&f.router, "POST", "/vectorstore/collections/programs/release", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "released");

    let (status, _) = send(&f.router, "POST", "/search", Some(json!({ "query": "tram" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = send(&f.router, "POST", "/vectorstore/collections/programs/load", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&f.router, "POST", "/search", Some(json!({ "query": "tram" }))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn aliases_can_be_created_and_dropped() {
    let f = fixture().await;
    let (status, body) =
        send(&f.router, "POST", "/vectorstore/collections/programs/alias", Some(json!({ "alias_name": "live" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aliases"], json!(["live"]));

    let (status, _) = send(&f.router, "DELETE", "/vectorstore/collections/programs/aliases/other", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&f.router, "DELETE", "/vectorstore/collections/programs/aliases/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alias_dropped");
    assert_eq!(body["aliases"], json!([]));
}

#[tokio::test]
async fn schema_rename_and_drop() {
    let f = fixture().await;
    let (status, body) = send(&f.router, "GET", "/vectorstore/collections/programs/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collection_schema"]["collectionName"], "programs");

    let (status, _) = send(&f.router, "GET", "/vectorstore/collections/nope/schema", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        send(&f.router, "POST", "/vectorstore/collections/programs/rename", Some(json!({ "new_name": "archive" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collection"], "archive");
    assert_eq!(f.app.index.list_collections().await.unwrap(), vec!["archive".to_string()]);

    let (status, body) = send(&f.router, "DELETE", "/vectorstore/collections/archive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "dropped");
    assert!(f.app.index.list_collections().await.unwrap().is_empty());
}

#[test]
fn error_kinds_map_to_statuses() {
    assert_eq!(status_for(&Error::Validation("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(status_for(&Error::NotFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(status_for(&Error::NotImplemented("x".into())), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(status_for(&Error::Timeout("x".into())), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(status_for(&Error::provider("search", "programs", "boom")), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(status_for(&Error::DataIntegrity("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
}
