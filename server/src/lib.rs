use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ezsearch_core::{parse_search_body, DocId, Engine, EngineConfig, EngineError, Namespace, StoredDocument, DEFAULT_PAGE_SIZE};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

#[derive(Serialize)]
pub struct InsertResponse {
    pub status: u8,
    pub took: u64,
    pub index: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: DocId,
    pub version: Option<u64>,
    pub result: &'static str,
    pub created: bool,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub status: u8,
    pub took: u64,
    pub index: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub total: usize,
    pub hits: Vec<Hit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "_source")]
    pub source: Value,
}

impl From<StoredDocument> for Hit {
    fn from(doc: StoredDocument) -> Self { Hit { id: doc.id, source: doc.source } }
}

/// An engine failure on its way out: non-zero `status` plus a message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self { status, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "status": 1, "error": self.message }))).into_response()
    }
}

pub fn build_app(config: EngineConfig) -> Result<Router> {
    let engine = Engine::open(config)?;
    Ok(router(Arc::new(engine)))
}

pub fn router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/:index/:kind", post(insert_handler))
        .route("/:index/:kind/_search", post(search_handler))
        .route("/:index/:kind/_doc/:id", get(doc_handler))
        .route("/:index/:kind/_stats", get(stats_handler))
        .route("/:index/:kind/_mapping", get(mapping_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Run an engine call on the blocking pool; every engine operation does disk I/O.
async fn with_engine<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> ezsearch_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ApiError::internal(format!("engine task failed: {e}")))?
        .map_err(ApiError::from)
}

fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::from(EngineError::from(e)))
}

fn elapsed_ms(start: Instant) -> u64 { start.elapsed().as_millis() as u64 }

pub async fn insert_handler(
    State(state): State<AppState>,
    Path((index, kind)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<InsertResponse>, ApiError> {
    let start = Instant::now();
    let ns = Namespace::new(index.clone(), kind.clone())?;
    let doc = parse_json(&body)?;
    let id = with_engine(&state, move |engine| engine.add_document(&ns, &doc)).await.map_err(|err| {
        tracing::warn!(%index, %kind, error = %err.message, "insert failed");
        err
    })?;
    Ok(Json(InsertResponse {
        status: 0,
        took: elapsed_ms(start),
        index,
        kind,
        id,
        version: None,
        result: "created",
        created: true,
    }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Path((index, kind)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    match run_search(&state, &index, &kind, &params, &body).await {
        Ok((total, hits)) => Json(SearchResponse {
            status: 0,
            took: elapsed_ms(start),
            index,
            kind,
            total,
            hits,
            error: None,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(%index, %kind, error = %err.message, "search failed");
            let resp = SearchResponse {
                status: 1,
                took: elapsed_ms(start),
                index,
                kind,
                total: 0,
                hits: Vec::new(),
                error: Some(err.message),
            };
            (err.status, Json(resp)).into_response()
        }
    }
}

async fn run_search(
    state: &AppState,
    index: &str,
    kind: &str,
    params: &HashMap<String, String>,
    body: &Bytes,
) -> Result<(usize, Vec<Hit>), ApiError> {
    let size = match params.get("size") {
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| ApiError {
            status: StatusCode::BAD_REQUEST,
            message: format!("size must be a non-negative integer, got {raw:?}"),
        })?,
        None => DEFAULT_PAGE_SIZE,
    };
    let ns = Namespace::new(index, kind)?;
    let request = parse_search_body(&parse_json(body)?)?;
    let found = with_engine(state, move |engine| engine.execute(&ns, &request, size)).await?;
    Ok((found.total, found.hits.into_iter().map(Hit::from).collect()))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path((index, kind, id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let ns = Namespace::new(index, kind)?;
    let id: DocId = id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid document id {id:?}")))?;
    match with_engine(&state, move |engine| engine.get_document(&ns, id)).await? {
        Some(doc) => Ok(Json(json!({ "status": 0, "_id": doc.id, "_source": doc.source, "found": true }))),
        None => Err(ApiError::from(EngineError::NotFound(format!("document {id}")))),
    }
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Path((index, kind)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let ns = Namespace::new(index, kind)?;
    let stats = with_engine(&state, move |engine| engine.stats(&ns)).await?;
    Ok(Json(json!({
        "status": 0,
        "documents": stats.documents,
        "fields": stats.fields,
        "terms": stats.terms,
    })))
}

pub async fn mapping_handler(
    State(state): State<AppState>,
    Path((index, kind)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let ns = Namespace::new(index, kind)?;
    let fields = with_engine(&state, move |engine| engine.field_mapping(&ns)).await?;
    let fields: serde_json::Map<String, Value> = fields.into_iter().map(|(path, id)| (path, json!(id))).collect();
    Ok(Json(json!({ "status": 0, "fields": fields })))
}
