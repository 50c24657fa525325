use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::engine::Engine;
use crate::models::{ContentItem, TrafficLevel};
use crate::proxy::{ProxyInfo, ProxyProtocol, ProxyStats, RefreshOutcome};
use crate::store::{persist_items, ContentStore};

const DEFAULT_DISCOVERY_LIMIT: usize = 10;
const MAX_DISCOVERY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Option<Arc<dyn ContentStore>>,
}

#[derive(OpenApi)]
#[openapi(
    paths(discover, extract, list_proxies, proxy_stats, refresh_proxies),
    components(schemas(
        DiscoverRequest,
        DiscoverResponse,
        ExtractRequest,
        ExtractResponse,
        RefreshResponse,
        ErrorBody,
        ContentItem,
        TrafficLevel,
        ProxyInfo,
        ProxyStats,
        ProxyProtocol
    )),
    tags(
        (name = "discovery", description = "Competitor discovery and content extraction"),
        (name = "proxy", description = "Proxy pool inspection")
    )
)]
pub struct ApiDoc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/discover", post(discover))
        .route("/extract", post(extract))
        .route("/proxies", get(list_proxies))
        .route("/proxies/stats", get(proxy_stats))
        .route("/proxies/refresh", post(refresh_proxies))
        .with_state(state)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

fn bad_request(message: &str) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, message.to_string())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DiscoverRequest {
    pub domain: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiscoverResponse {
    pub domain: String,
    pub competitors: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/discover",
    request_body = DiscoverRequest,
    responses(
        (status = 200, description = "Competitor domains, possibly empty", body = DiscoverResponse),
        (status = 400, description = "Missing domain", body = ErrorBody)
    ),
    tag = "discovery"
)]
pub async fn discover(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DiscoverRequest>,
) -> Result<Json<DiscoverResponse>, ApiError> {
    if payload.domain.trim().is_empty() {
        return Err(bad_request("domain is required"));
    }
    let limit = payload
        .limit
        .unwrap_or(DEFAULT_DISCOVERY_LIMIT)
        .clamp(1, MAX_DISCOVERY_LIMIT);
    info!(domain = %payload.domain, limit, "📥 discovery requested");

    let competitors = state
        .engine
        .discover_competitors(&payload.domain, &payload.keywords, limit)
        .await;
    Ok(Json(DiscoverResponse {
        domain: payload.domain,
        competitors,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExtractRequest {
    pub domain: String,
    pub competitors: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Store the items as a new analysis when a database is configured.
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExtractResponse {
    pub domain: String,
    pub items: Vec<ContentItem>,
    pub analysis_id: Option<Uuid>,
}

#[utoipa::path(
    post,
    path = "/extract",
    request_body = ExtractRequest,
    responses(
        (status = 200, description = "Scored competitor articles, possibly empty", body = ExtractResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 500, description = "Persisting the analysis failed", body = ErrorBody)
    ),
    tag = "discovery"
)]
pub async fn extract(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    if payload.domain.trim().is_empty() {
        return Err(bad_request("domain is required"));
    }
    if payload.competitors.is_empty() {
        return Err(bad_request("at least one competitor domain is required"));
    }

    let items = state
        .engine
        .extract_competitor_content(&payload.domain, &payload.competitors, &payload.keywords)
        .await;

    let mut analysis_id = None;
    if payload.persist {
        match &state.store {
            Some(store) => {
                let analysis = persist_items(store.as_ref(), &payload.domain, &items)
                    .await
                    .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
                analysis_id = Some(analysis.id);
            }
            None => warn!("persistence requested but no store is configured"),
        }
    }

    Ok(Json(ExtractResponse {
        domain: payload.domain,
        items,
        analysis_id,
    }))
}

#[utoipa::path(
    get,
    path = "/proxies",
    responses((status = 200, description = "Pooled proxies", body = [ProxyInfo])),
    tag = "proxy"
)]
pub async fn list_proxies(State(state): State<Arc<AppState>>) -> Json<Vec<ProxyInfo>> {
    Json(state.engine.proxies().snapshot())
}

#[utoipa::path(
    get,
    path = "/proxies/stats",
    responses((status = 200, description = "Pool health counters", body = ProxyStats)),
    tag = "proxy"
)]
pub async fn proxy_stats(State(state): State<Arc<AppState>>) -> Json<ProxyStats> {
    Json(state.engine.proxies().stats())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    /// `refreshed`, `in_flight` or `throttled`.
    pub status: String,
    pub added: usize,
    pub size: usize,
}

#[utoipa::path(
    post,
    path = "/proxies/refresh",
    responses((status = 200, description = "Refresh outcome", body = RefreshResponse)),
    tag = "proxy"
)]
pub async fn refresh_proxies(State(state): State<Arc<AppState>>) -> Json<RefreshResponse> {
    let proxies = state.engine.proxies();
    let response = match proxies.refresh().await {
        RefreshOutcome::Refreshed { added, size } => RefreshResponse {
            status: "refreshed".to_string(),
            added,
            size,
        },
        RefreshOutcome::InFlight => RefreshResponse {
            status: "in_flight".to_string(),
            added: 0,
            size: proxies.size(),
        },
        RefreshOutcome::Throttled => RefreshResponse {
            status: "throttled".to_string(),
            added: 0,
            size: proxies.size(),
        },
    };
    Json(response)
}
