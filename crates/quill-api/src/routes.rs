use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use futures::Stream;
use quill_core::db::{Database, SharedDatabase};
use quill_core::models::SyncChange;
use quill_core::{LogStatus, PushResult, SyncEngine};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, user_fingerprint, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};
use crate::realtime::{change_stream, BroadcastNotifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    engine: SyncEngine,
    jwt_verifier: Arc<JwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
    notifier: BroadcastNotifier,
}

impl AppState {
    /// Open the configured database and wire the sync engine to it
    pub async fn open(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let db = Database::open(&config.database_path).await.map_err(|error| {
            AppError::Config(format!(
                "Failed to open database {}: {error}",
                config.database_path
            ))
        })?;
        Ok(Self::with_database(config, db.into_shared()))
    }

    pub fn with_database(config: Arc<AppConfig>, db: SharedDatabase) -> Self {
        let notifier = BroadcastNotifier::new(config.realtime_channel_capacity);
        Self {
            engine: SyncEngine::with_database(
                db,
                Arc::new(notifier.clone()),
                config.engine_options(),
            ),
            jwt_verifier: Arc::new(JwtVerifier::new(config.as_ref())),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            notifier,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/sync/status", get(status))
        .route("/sync/events", get(events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushRequest {
    #[serde(default)]
    device_id: Option<String>,
    changes: Option<Vec<SyncChange>>,
    #[serde(default)]
    last_sync_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushResponse {
    success: bool,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    result: PushResult,
}

async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncPush, &user.user_id)
        .await?;

    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let device_id = required_device(request.device_id.as_deref())?;
    let changes = request
        .changes
        .ok_or_else(|| AppError::bad_request("changes is required"))?;
    if changes.len() > state.config.max_batch_size {
        return Err(AppError::bad_request(format!(
            "Batch of {} changes exceeds the limit of {}",
            changes.len(),
            state.config.max_batch_size
        )));
    }

    let result = state
        .engine
        .push(
            &user.user_id,
            device_id,
            changes,
            request.last_sync_timestamp,
        )
        .await?;
    tracing::info!(
        endpoint = "sync_push",
        user = user_fingerprint(&user.user_id),
        device = device_id,
        applied = result.applied,
        conflicts = result.conflicts.len(),
        failed = result.failed.len(),
        "Processed sync push"
    );

    Ok(Json(PushResponse {
        success: true,
        timestamp: Utc::now(),
        result,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    device_id: Option<String>,
    since: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    success: bool,
    timestamp: DateTime<Utc>,
    changes: Vec<SyncChange>,
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let device_id = required_device(query.device_id.as_deref())?;
    let since = query
        .since
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(parse_timestamp)
        .transpose()?;

    let changes = state.engine.pull(&user.user_id, device_id, since).await?;
    tracing::info!(
        endpoint = "sync_pull",
        user = user_fingerprint(&user.user_id),
        device = device_id,
        changes = changes.len(),
        "Served sync pull"
    );

    Ok(Json(PullResponse {
        success: true,
        timestamp: Utc::now(),
        changes,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    device_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    success: bool,
    #[serde(flatten)]
    status: LogStatus,
}

async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let status = state
        .engine
        .status(&user.user_id, query.device_id.as_deref())
        .await?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsQuery {
    device_id: Option<String>,
}

async fn events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let device_id = required_device(query.device_id.as_deref())?.to_string();
    tracing::info!(
        endpoint = "sync_events",
        user = user_fingerprint(&user.user_id),
        device = device_id.as_str(),
        "Opened realtime change stream"
    );

    let stream = change_stream(state.notifier.subscribe(), user.user_id, device_id);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn required_device(device_id: Option<&str>) -> Result<&str, AppError> {
    device_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("deviceId is required"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AppError> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|_| AppError::bad_request(format!("Invalid timestamp: {raw}")))
}
