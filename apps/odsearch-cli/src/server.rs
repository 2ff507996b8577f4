use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use odsearch_core::traits::{CollectionAdmin, VectorIndex};
use odsearch_core::types::{CollectionInfo, SearchResult};
use odsearch_core::Error;
use odsearch_hybrid::SearchService;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const MAX_TOP_K: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SearchService>,
    pub index: Arc<dyn VectorIndex>,
    pub admin: Arc<dyn CollectionAdmin>,
}

impl From<&crate::App> for AppState {
    fn from(app: &crate::App) -> Self {
        Self { service: app.service.clone(), index: app.index.clone(), admin: app.admin.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Catalogue,
    Dataset,
    Dataservice,
    Resource,
    Vocabulary,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalogue => "catalogue",
            Self::Dataset => "dataset",
            Self::Dataservice => "dataservice",
            Self::Resource => "resource",
            Self::Vocabulary => "vocabulary",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub types: Option<Vec<ObjectType>>,
}

impl SearchFilters {
    fn type_names(&self) -> Option<Vec<String>> {
        self.types
            .as_ref()
            .filter(|t| !t.is_empty())
            .map(|t| t.iter().map(|o| o.as_str().to_string()).collect())
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_k: default_top_k() }
    }
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct QuerySearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    #[serde(default)]
    pub options: SearchOptions,
}

#[derive(Debug, Deserialize)]
pub struct SimilarSearchRequest {
    pub source_id: String,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    #[serde(default)]
    pub options: SearchOptions,
}

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub alias_name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
}

#[derive(Debug, Serialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionInfo>,
}

/// Error body is always `{"detail": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn unprocessable(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::UNPROCESSABLE_ENTITY, detail: detail.into() }
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self { status, detail: err.to_string() }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self { status: rejection.status(), detail: rejection.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn check_top_k(top_k: usize) -> Result<(), ApiError> {
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(ApiError::unprocessable(format!("options.top_k must be between 1 and {MAX_TOP_K}, got {top_k}")));
    }
    Ok(())
}

fn cors_layer() -> CorsLayer {
    let permissive = || CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                permissive()
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => permissive(),
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/search", post(search_by_query))
        .route("/search/similar", post(search_similar))
        .route("/vectorstore/collections", get(list_collections))
        .route("/vectorstore/collections/:name", delete(drop_collection))
        .route("/vectorstore/collections/:name/load", post(load_collection))
        .route("/vectorstore/collections/:name/release", post(release_collection))
        .route("/vectorstore/collections/:name/rename", post(rename_collection))
        .route("/vectorstore/collections/:name/alias", post(create_alias))
        .route("/vectorstore/collections/:name/aliases/:alias", delete(drop_alias))
        .route("/vectorstore/collections/:name/schema", get(collection_schema))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

async fn search_by_query(
    State(state): State<AppState>,
    payload: Result<Json<QuerySearchRequest>, JsonRejection>,
) -> ApiResult<Vec<SearchResult>> {
    let Json(req) = payload?;
    if req.query.is_empty() {
        return Err(ApiError::unprocessable("query must not be empty"));
    }
    check_top_k(req.options.top_k)?;
    let types = req.filters.as_ref().and_then(SearchFilters::type_names);
    let results = state.service.asearch_by_query(&req.query, req.options.top_k, types.as_deref()).await?;
    Ok(Json(results))
}

async fn search_similar(
    State(state): State<AppState>,
    payload: Result<Json<SimilarSearchRequest>, JsonRejection>,
) -> ApiResult<Vec<SearchResult>> {
    let Json(req) = payload?;
    if req.source_id.is_empty() {
        return Err(ApiError::unprocessable("source_id must not be empty"));
    }
    check_top_k(req.options.top_k)?;
    let types = req.filters.as_ref().and_then(SearchFilters::type_names);
    let results = state.service.asearch_similar_by_id(&req.source_id, req.options.top_k, types.as_deref()).await?;
    Ok(Json(results))
}

async fn list_collections(State(state): State<AppState>) -> ApiResult<ListCollectionsResponse> {
    let names = state.index.list_collections().await?;
    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let info = match state.admin.collection_info(&name).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(collection = %name, error = %e, "collection status unavailable");
                CollectionInfo { name, state: "UNKNOWN".to_string(), state_code: -1, n_entities: None, aliases: Vec::new() }
            }
        };
        collections.push(info);
    }
    Ok(Json(ListCollectionsResponse { collections }))
}

async fn load_collection(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Value> {
    state.admin.load(&name).await?;
    Ok(Json(json!({ "status": "loaded", "collection": name })))
}

async fn release_collection(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Value> {
    state.admin.release(&name).await?;
    Ok(Json(json!({ "status": "released", "collection": name })))
}

async fn drop_collection(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Value> {
    state.index.drop_collection(&name).await?;
    tracing::info!(collection = %name, "collection dropped over HTTP");
    Ok(Json(json!({ "status": "dropped", "collection": name })))
}

async fn rename_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(req) = payload?;
    if req.new_name.trim().is_empty() {
        return Err(ApiError::unprocessable("new_name must not be empty"));
    }
    state.admin.rename(&name, &req.new_name).await?;
    Ok(Json(json!({ "status": "renamed", "collection": req.new_name })))
}

async fn create_alias(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<AliasRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(req) = payload?;
    if req.alias_name.trim().is_empty() {
        return Err(ApiError::unprocessable("alias_name must not be empty"));
    }
    state.admin.create_alias(&name, &req.alias_name).await?;
    let aliases = state.admin.list_aliases(&name).await?;
    Ok(Json(json!({ "status": "aliased", "collection": name, "aliases": aliases })))
}

async fn drop_alias(State(state): State<AppState>, Path((name, alias)): Path<(String, String)>) -> ApiResult<Value> {
    let aliases = state.admin.list_aliases(&name).await?;
    if !aliases.contains(&alias) {
        return Err(Error::NotFound(format!("alias '{alias}' not found for collection '{name}'")).into());
    }
    state.admin.drop_alias(&alias).await?;
    let aliases = state.admin.list_aliases(&name).await?;
    Ok(Json(json!({ "status": "alias_dropped", "collection": name, "aliases": aliases })))
}

async fn collection_schema(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Value> {
    let schema = state.admin.describe(&name).await?;
    Ok(Json(json!({ "collection_schema": schema })))
}
