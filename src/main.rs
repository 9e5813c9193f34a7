mod agent;
mod browser;
mod catalog;
mod config;
mod http;
mod idempotency;
mod jobs;
mod lens;
mod llm;
mod matcher;
mod metrics;
mod models;
mod pipeline;
mod retrieval;
mod security;
mod supabase;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use browser::{ChromiumBrowser, PagePool};
use catalog::{CatalogService, TierLimits};
use config::InventoryConfig;
use eyre::{WrapErr, eyre};
use idempotency::IdempotencyStore;
use llm::{LlmConfig, OpenAiClient};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, CatalogResponse, InventoryRequest, InventoryResponse};
use pipeline::{InventoryPipeline, PipelineError, PipelineErrorKind, resolve_images};
use retrieval::HttpFetcher;
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use supabase::SupabaseClient;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const OPENAPI_YAML: &str = include_str!("../docs/openapi.yaml");

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "furniflip.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let supabase = SupabaseClient::from_env()
        .ok_or_else(|| eyre!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set"))?;
    let config = InventoryConfig::from_env();

    let browser = Arc::new(ChromiumBrowser::launch().await.wrap_err("launching browser")?);
    let pool = Arc::new(
        PagePool::start(browser, config.page_pool_size)
            .await
            .wrap_err("warming page pool")?,
    );

    let openai = Arc::new(OpenAiClient::new(LlmConfig::from_env()));
    let pipeline = InventoryPipeline::new(
        pool.clone(),
        Arc::new(supabase.clone()),
        openai.clone(),
        openai,
        Arc::new(HttpFetcher::new()),
        config,
    );
    let catalogs = Arc::new(CatalogService::new(
        Arc::new(supabase.clone()),
        pipeline.clone(),
        TierLimits::from_env(),
    ));
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let auth_state = AuthState::from_env(Some(supabase));

    let openapi: serde_json::Value =
        serde_yaml::from_str(OPENAPI_YAML).unwrap_or_else(|_| json!({"openapi": "3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        pipeline,
        catalogs,
        queue,
        openapi: Arc::new(openapi),
        idempotency: IdempotencyStore::from_env(),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/inventory/analyze", post(analyze_inventory))
        .route("/inventory/create", post(create_catalog))
        .nest(
            "/jobs",
            Router::new()
                .route("/inventory", post(enqueue_inventory_job))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "furniflip.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    pool.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "furniflip.api", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "furniflip.api", "shutdown signal received");
}

#[derive(Clone)]
struct AppState {
    pipeline: InventoryPipeline,
    catalogs: Arc<CatalogService>,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: IdempotencyStore,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "furniflip-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(PipelineError::unauthorized("docs", "unauthorized").into());
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>FurniFlip API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

fn body_limit_from_env() -> usize {
    http::env_usize("REQUEST_MAX_BYTES", 256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Enrich a batch of item photos synchronously.
///
/// - Method: `POST`
/// - Path: `/inventory/analyze`
/// - Auth: `Authorization: Bearer <token>`
/// - Body: `InventoryRequest`
/// - Response: `InventoryResponse`; repeated `Idempotency-Key` values replay
///   the first response.
async fn analyze_inventory(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(payload): Json<InventoryRequest>,
) -> Result<Json<InventoryResponse>, AppError> {
    metrics::inc_requests("/inventory/analyze");
    let image_urls = resolve_images(payload.image_urls)?;
    info!(
        target = "furniflip.api",
        seller_id = %context.seller_id,
        auth = ?context.method,
        images = image_urls.len(),
        "inventory analysis invoked",
    );

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(key) = &idempotency_key
        && let Some(existing) = state.idempotency.get(&context.seller_id, key).await
    {
        return Ok(Json(existing));
    }

    let items = state.pipeline.inventory_agent(&image_urls).await?;
    let response = InventoryResponse::new(image_urls.len(), items);
    if let Some(key) = &idempotency_key {
        state
            .idempotency
            .set(&context.seller_id, key, &response)
            .await;
    }
    Ok(Json(response))
}

/// Enrich photos and store them as a new catalog for the calling seller.
///
/// - Method: `POST`
/// - Path: `/inventory/create`
/// - Response: `CatalogResponse`; tier limit violations are `400 tier_limit`.
async fn create_catalog(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<InventoryRequest>,
) -> Result<Json<CatalogResponse>, AppError> {
    metrics::inc_requests("/inventory/create");
    let image_urls = resolve_images(payload.image_urls)?;
    let response = state
        .catalogs
        .create_catalog(&context.seller_id, &image_urls)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_inventory_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<InventoryRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    metrics::inc_requests("/jobs/inventory");
    let image_urls = resolve_images(payload.image_urls)?;
    let id = state
        .queue
        .enqueue_inventory(image_urls, context)
        .await
        .map_err(|err| PipelineError::internal("enqueue", err.error))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(PipelineError::invalid_input("jobs", "invalid_job_id").into());
    };
    state
        .queue
        .get(uuid, &context.seller_id)
        .await
        .map(Json)
        .ok_or_else(|| PipelineError::invalid_input("jobs", "not_found").into())
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (PipelineError::invalid_input("tier_limit", "x"), StatusCode::BAD_REQUEST),
            (PipelineError::unauthorized("docs", "x"), StatusCode::UNAUTHORIZED),
            (PipelineError::internal("vocabulary", "x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn bundled_openapi_parses() {
        let doc: serde_json::Value = serde_yaml::from_str(OPENAPI_YAML).expect("valid yaml");
        assert!(doc["paths"]["/inventory/analyze"].is_object());
    }
}
