//! HTTP server for knowledge-base search and pack analysis.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check |
//! | `GET` | `/search` | Semantic, hybrid, or article search; KB stats without `q` |
//! | `GET` | `/packs` | List configured packs |
//! | `POST` | `/packs/{id}/analyze` | Run a pack against `{ "text": ... }` |
//!
//! Every JSON body carries `success`. Failures add an `error` object with
//! `code` and `message`:
//!
//! | Status | Code | When |
//! |--------|------|------|
//! | 400 | `bad_request` | Missing or malformed parameters |
//! | 404 | `not_found` | Unknown pack |
//! | 502 | `retrieval_failed` / `timeout` | Provider or store failure |
//! | 503 | `not_configured` | No KB database or embedding provider |

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use compliance_kb_core::citation::CitationAttacher;
use compliance_kb_core::models::{KbStats, PackResult, SearchResult};
use compliance_kb_core::search::Retriever;
use compliance_kb_core::KbError;

use crate::config::Config;
use crate::pack::{run_pack, AnalysisInput, PackRegistry, RunOptions};
use crate::search::{open_retriever, parse_keywords, preview, search_kb, KbSearchRequest};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    retriever: Option<Retriever>,
    attacher: CitationAttacher,
    packs: Arc<PackRegistry>,
}

impl AppState {
    pub fn new(config: Config, retriever: Option<Retriever>, packs: PackRegistry) -> Self {
        let opts = config.citations.options();
        let attacher = match &retriever {
            Some(r) => CitationAttacher::new(r.clone(), opts),
            None => CitationAttacher::disabled(opts),
        };
        Self {
            config: Arc::new(config),
            retriever,
            attacher,
            packs: Arc::new(packs),
        }
    }

    /// Open the configured KB (if any) and load packs from config.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let packs = PackRegistry::from_config(config)?;
        let retriever = open_retriever(config).await?;
        Ok(Self::new(config.clone(), retriever, packs))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", get(handle_search))
        .route("/packs", get(handle_list_packs))
        .route("/packs/{id}/analyze", post(handle_analyze))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::from_config(config).await?;

    if state.retriever.is_none() {
        eprintln!("Warning: knowledge base not configured; /search returns 503 and citations are empty.");
    }
    println!("Loaded {} pack(s)", state.packs.len());
    for p in state.packs.packs() {
        println!("  POST /packs/{}/analyze — {} ({})", p.id(), p.title(), p.version());
    }

    let app = router(state);

    println!("Compliance KB server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Envelope ============

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn not_configured() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "not_configured",
        message: "knowledge base is not configured".to_string(),
    }
}

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        let message = err.to_string();
        match err {
            KbError::InvalidQuery(_) => bad_request(message),
            KbError::Disabled | KbError::Config(_) => AppError {
                message,
                ..not_configured()
            },
            KbError::Timeout(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "timeout",
                message,
            },
            KbError::Auth(_)
            | KbError::RateLimited { .. }
            | KbError::Provider(_)
            | KbError::Rejected(_)
            | KbError::Store(_) => {
                tracing::warn!(error = %message, "search failed");
                AppError {
                    status: StatusCode::BAD_GATEWAY,
                    code: "retrieval_failed",
                    message,
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    kb_configured: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        kb_configured: state.retriever.is_some(),
    })
}

// ============ GET /search ============

/// Query parameters, kept as strings so parse errors get a JSON 400.
#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    pack: Option<String>,
    version: Option<String>,
    k: Option<String>,
    min_similarity: Option<String>,
    keywords: Option<String>,
    article: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    id: String,
    reg_code: String,
    article: Option<String>,
    section: Option<String>,
    similarity: f64,
    url: String,
    preview: String,
    full_text: String,
}

impl From<SearchResult> for SearchHit {
    fn from(r: SearchResult) -> Self {
        Self {
            preview: preview(&r.text),
            id: r.id,
            reg_code: r.reg_code,
            article: r.article,
            section: r.section,
            similarity: r.similarity,
            url: r.url,
            full_text: r.text,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    query: String,
    pack_id: String,
    version: String,
    result_count: usize,
    results: Vec<SearchHit>,
}

#[derive(Serialize)]
struct StatsData {
    stats: Vec<KbStats>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let retriever = state.retriever.as_ref().ok_or_else(not_configured)?;

    let query = non_blank(&params.q);
    let article = non_blank(&params.article);

    if query.is_none() && article.is_none() {
        let stats = retriever
            .store()
            .stats(non_blank(&params.pack), non_blank(&params.version))
            .await
            .map_err(|e| AppError::from(KbError::Store(format!("{e:#}"))))?;
        return Ok(ok(StatsData { stats }).into_response());
    }

    let pack_id = non_blank(&params.pack).ok_or_else(|| bad_request("pack is required"))?;
    let version = non_blank(&params.version).ok_or_else(|| bad_request("version is required"))?;

    let k = match non_blank(&params.k) {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| bad_request(format!("k must be a non-negative integer, got '{raw}'")))?,
        ),
        None => None,
    };
    let min_similarity = match non_blank(&params.min_similarity) {
        Some(raw) => Some(
            raw.parse::<f64>()
                .map_err(|_| bad_request(format!("min_similarity must be a number, got '{raw}'")))?,
        ),
        None => None,
    };

    let req = KbSearchRequest {
        pack_id: pack_id.to_string(),
        version: version.to_string(),
        query: query.unwrap_or_default().to_string(),
        article: article.map(str::to_string),
        k,
        min_similarity,
        keywords: params.keywords.as_deref().map(parse_keywords).unwrap_or_default(),
    };

    let results = search_kb(retriever, &state.config.retrieval, &req).await?;
    let data = SearchData {
        query: req.query,
        pack_id: req.pack_id,
        version: req.version,
        result_count: results.len(),
        results: results.into_iter().map(SearchHit::from).collect(),
    };
    Ok(ok(data).into_response())
}

// ============ GET /packs ============

#[derive(Serialize)]
struct PackInfo {
    id: String,
    version: String,
    title: String,
}

async fn handle_list_packs(State(state): State<AppState>) -> Json<Envelope<Vec<PackInfo>>> {
    ok(state
        .packs
        .packs()
        .iter()
        .map(|p| PackInfo {
            id: p.id().to_string(),
            version: p.version().to_string(),
            title: p.title().to_string(),
        })
        .collect())
}

// ============ POST /packs/{id}/analyze ============

async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<AnalysisInput>,
) -> Result<Json<Envelope<PackResult>>, AppError> {
    let pack = state
        .packs
        .find(&id)
        .ok_or_else(|| not_found(format!("no pack registered with id: {}", id)))?;

    let result = run_pack(
        pack.as_ref(),
        &input,
        &state.attacher,
        &state.config.scoring,
        &RunOptions::from_config(&state.config),
    )
    .await;
    Ok(ok(result))
}
