mod engine;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod security;
mod sources;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use engine::types::{ConditionAssessment, ConditionGrade, Identification, PricingRecommendation};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{AnalysisRequest, AnalysisResponse, ApiError, MarketSummary};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "magpie.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let pipeline = Pipeline::new();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState {
        pipeline,
        queue: queue.clone(),
        openapi: Arc::new(openapi),
        idempotency: Arc::new(idempotency::IdempotencyStore::from_env()),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/analyses", post(create_analysis))
        .nest(
            "/stages",
            Router::new()
                .route("/identify", post(stage_identify))
                .route("/condition", post(stage_condition))
                .route("/market", post(stage_market))
                .route("/price", post(stage_price)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/analyses", post(enqueue_analysis_job))
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
    info!(target = "magpie.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            queue.shutdown();
        })
        .await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<idempotency::IdempotencyStore>,
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
        "service": "magpie-api",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Pipeline(PipelineError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Magpie API Docs</title>
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
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Run the photo → identification → pricing pipeline.
///
/// - Method: `POST`
/// - Path: `/analyses`
/// - Auth: `Authorization: Bearer <key>` or `X-Magpie-Key: <key>`
/// - Body: `AnalysisRequest`
/// - Response: `AnalysisResponse` (synthetic `analysis_id` + per-stage transcript)
async fn create_analysis(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>, AppError> {
    crate::metrics::inc_requests("/analyses");
    info!(
        target = "magpie.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        "analysis requested",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(existing) = state.idempotency.get(&key).await {
            return Ok(Json(existing));
        }
        let response = state.pipeline.run(payload, Some(context)).await?;
        state.idempotency.put(key, &response).await;
        return Ok(Json(response));
    }

    let response = state.pipeline.run(payload, Some(context)).await?;

    Ok(Json(response))
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
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                    PipelineErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
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

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_analysis_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/analyses");
    let id = state
        .queue
        .enqueue_analysis(payload, context)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "not_found",
        )))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

// -------- Stage endpoints (manual granular control) --------

#[derive(Debug, Deserialize)]
struct IdentifyStageRequest {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    text_snippets: Vec<String>,
    #[serde(default)]
    barcode: Option<String>,
    #[serde(default)]
    category_hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct IdentifyStageResponse {
    identification: Identification,
    signals: serde_json::Value,
}

async fn stage_identify(
    State(state): State<AppState>,
    Json(req): Json<IdentifyStageRequest>,
) -> Result<Json<IdentifyStageResponse>, AppError> {
    crate::metrics::inc_requests("/stages/identify");
    let request = AnalysisRequest {
        images_source: Some(models::ImagesSource::Multiple(req.images)),
        text_snippets: req.text_snippets,
        barcode: req.barcode,
        condition_notes: None,
        category_hint: req.category_hint.clone(),
        condition_override: None,
        dry_run: true,
    };
    let input = pipeline::stages::validate_input(&request)
        .map_err(AppError::from)?
        .value;
    let signals = pipeline::stages::classify_signals(&input).map_err(AppError::from)?;
    let out = pipeline::stages::identify_item(
        &state.pipeline.llm,
        &input,
        &signals.value,
        req.category_hint.as_deref(),
    )
    .await
    .map_err(AppError::from)?;
    Ok(Json(IdentifyStageResponse {
        identification: out.value,
        signals: signals.output,
    }))
}

#[derive(Debug, Deserialize)]
struct ConditionStageRequest {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    condition_notes: Option<String>,
    #[serde(default)]
    condition_override: Option<ConditionGrade>,
}

async fn stage_condition(
    State(state): State<AppState>,
    Json(req): Json<ConditionStageRequest>,
) -> Result<Json<ConditionAssessment>, AppError> {
    crate::metrics::inc_requests("/stages/condition");
    let input = pipeline::ValidatedInput {
        images: req.images,
        text: Vec::new(),
        barcode: None,
    };
    let out = pipeline::stages::assess_condition(
        &state.pipeline.llm,
        &input,
        req.condition_override,
        req.condition_notes.as_deref(),
    )
    .await
    .map_err(AppError::from)?;
    Ok(Json(out.value))
}

#[derive(Debug, Deserialize)]
struct MarketStageRequest {
    identification: Identification,
    #[serde(default)]
    grade: ConditionGrade,
}

async fn stage_market(
    State(state): State<AppState>,
    Json(req): Json<MarketStageRequest>,
) -> Result<Json<MarketSummary>, AppError> {
    crate::metrics::inc_requests("/stages/market");
    let out = pipeline::stages::fetch_market(
        &state.pipeline.aggregator,
        &req.identification,
        req.grade,
    )
    .await
    .map_err(AppError::from)?;
    Ok(Json(MarketSummary::from(&out.value)))
}

#[derive(Debug, Serialize)]
struct PriceStageResponse {
    pricing: PricingRecommendation,
    market: MarketSummary,
}

async fn stage_price(
    State(state): State<AppState>,
    Json(req): Json<MarketStageRequest>,
) -> Result<Json<PriceStageResponse>, AppError> {
    crate::metrics::inc_requests("/stages/price");
    let snapshot = pipeline::stages::fetch_market(
        &state.pipeline.aggregator,
        &req.identification,
        req.grade,
    )
    .await
    .map_err(AppError::from)?
    .value;
    let pricing = pipeline::stages::price_item(&snapshot, req.grade, &req.identification)
        .map_err(AppError::from)?
        .value;
    Ok(Json(PriceStageResponse {
        pricing,
        market: MarketSummary::from(&snapshot),
    }))
}
