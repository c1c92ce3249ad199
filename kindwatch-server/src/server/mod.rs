mod acl;
pub mod auth;
mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::pairing::{PairingCoordinator, PairingError};
use crate::realtime::RealtimeChannel;
use crate::server::auth::AuthCtx;
use crate::storage::models;
use crate::sync;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post, put},
};
use bcrypt::verify;
pub use config::{AppConfig, ConfigError, UserConfig};
use futures::StreamExt;
use kindwatch_shared::api::{self, RealtimeEvent};
use kindwatch_shared::auth::Role;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

// Serializes report application per device so concurrent batches from the
// same device cannot interleave on a package record.
type DeviceLockMap = Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    pub realtime: RealtimeChannel,
    pub pairing: PairingCoordinator,
    device_locks: DeviceLockMap,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store) -> Self {
        let realtime = RealtimeChannel::new();
        let ttl = config
            .pairing_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::pairing::DEFAULT_TTL);
        let grace = config
            .pairing_grace_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::pairing::DEFAULT_GRACE);
        let pairing = PairingCoordinator::new(realtime.clone(), ttl, grace);
        Self {
            config,
            store,
            realtime,
            pairing,
            device_locks: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn device_mutex(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.device_locks.lock().await;
        map.entry(device_id.to_string())
            .or_insert_with(Default::default)
            .clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/devices", get(api_list_devices))
        .route("/api/v1/devices/add", post(api_devices_add))
        .route("/api/v1/devices/cancel-pairing", post(api_devices_cancel))
        .route("/api/v1/devices/{id}", delete(api_delete_device))
        .route("/api/v1/apps", post(api_report_apps))
        .route("/api/v1/location", post(api_report_location))
        .route("/api/v1/web-history", post(api_report_web_history))
        .route(
            "/api/v1/settings",
            get(api_get_settings).post(api_update_settings),
        )
        .route("/api/v1/zones", get(api_list_zones).post(api_create_zone))
        .route("/api/v1/data/{device_id}/apps", get(api_data_apps))
        .route("/api/v1/data/{device_id}/location", get(api_data_location))
        .route(
            "/api/v1/data/{device_id}/web-history",
            get(api_data_web_history),
        )
        .route(
            "/api/v1/data/{device_id}/apps/{package}/rules",
            put(api_update_app_rules),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            sub = tracing::field::Empty,
            role = tracing::field::Empty,
            device_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/auth/login", post(api_auth_login))
        .route("/api/v1/devices/redeem", post(api_devices_redeem))
        .route("/api/v1/events/{topic}", get(api_events))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("sub", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(did) = &auth.claims.device_id {
            span.record("device_id", tracing::field::display(did));
        }
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state
        .config
        .users
        .iter()
        .find(|u| u.username == body.username)
        .ok_or_else(|| {
            tracing::warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_jwt(&state, &user.username, Role::Parent, None).await?;
    Ok(Json(api::AuthResp { token }))
}

// Pairing

async fn api_devices_add(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<api::PairRequestReq>,
) -> Result<Json<api::PairRequestResp>, AppError> {
    let session = state.pairing.request_code(body.name).await?;
    Ok(Json(api::PairRequestResp {
        code: session.code,
        expires_in_secs: state.pairing.ttl().as_secs(),
    }))
}

async fn api_devices_cancel(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<api::PairCancelReq>,
) -> Result<StatusCode, AppError> {
    match state.pairing.cancel(&body.code).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        // Idempotent from the caller's perspective: the session reached a
        // terminal state (or was collected) either way.
        Err(PairingError::AlreadyResolved) | Err(PairingError::CodeNotFound) => {
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err(e.into()),
    }
}

/// Device registration: a child device exchanges a short-lived code for a
/// durable identity and bearer token. Public by design; the code is the
/// credential.
async fn api_devices_redeem(
    State(state): State<AppState>,
    Json(body): Json<api::PairRedeemReq>,
) -> Result<Json<api::PairRedeemResp>, AppError> {
    let snapshot = state
        .pairing
        .snapshot(&body.code)
        .await
        .ok_or_else(|| AppError::from(PairingError::CodeNotFound))?;
    let device_name = body
        .device_name
        .or(snapshot.device_name)
        .unwrap_or_else(|| "Child device".to_string());

    let device_id = Uuid::new_v4().to_string();
    state
        .store
        .create_device(&device_id, &device_name)
        .await
        .map_err(AppError::internal)?;

    // The coordinator owns the WAITING -> PAIRED race; losing it means the
    // freshly inserted device must not survive.
    if let Err(e) = state.pairing.complete(&body.code, &device_id).await {
        let _ = state.store.delete_device_cascade(&device_id).await;
        return Err(e.into());
    }

    let token = auth::issue_jwt(&state, &device_id, Role::Device, Some(device_id.clone())).await?;
    Ok(Json(api::PairRedeemResp { token, device_id }))
}

async fn api_list_devices(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::DeviceDto>>, AppError> {
    let rows = state.store.list_devices().await.map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(device_to_dto).collect()))
}

#[derive(Deserialize)]
struct DeleteQuery {
    request_id: Option<String>,
}

async fn api_delete_device(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<StatusCode, AppError> {
    let publish_outcome = |event: RealtimeEvent| {
        if let Some(topic) = &q.request_id {
            state.realtime.publish(topic, event);
        }
    };
    match state.store.delete_device_cascade(&id).await {
        Ok(true) => {
            publish_outcome(RealtimeEvent::DeleteSuccess {
                device_id: id.clone(),
            });
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => {
            publish_outcome(RealtimeEvent::DeleteError {
                device_id: id.clone(),
                error: "device not found".to_string(),
            });
            Err(AppError::not_found(format!("device not found: {id}")))
        }
        Err(e) => {
            publish_outcome(RealtimeEvent::DeleteError {
                device_id: id.clone(),
                error: "storage failure".to_string(),
            });
            Err(AppError::internal(e))
        }
    }
}

// Device reports

async fn api_report_apps(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::AppReportReq>,
) -> Result<Json<api::AppReportResp>, AppError> {
    acl::ensure_own_device(&auth.claims, &body.device_id)?;
    let device = state
        .store
        .get_device(&body.device_id)
        .await
        .map_err(AppError::internal)?;
    if device.is_none() {
        return Err(AppError::not_found(format!(
            "device not found: {}",
            body.device_id
        )));
    }

    // Serialize per device so concurrent batches cannot interleave.
    let device_mutex = state.device_mutex(&body.device_id).await;
    let _guard = device_mutex.lock().await;

    let applied = sync::apply(&state.store, &body.device_id, &body.apps)
        .await
        .map_err(AppError::internal)?;
    state
        .store
        .touch_device_seen(&body.device_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::AppReportResp {
        success: true,
        count: applied.accepted as i32,
    }))
}

async fn api_report_location(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::LocationReportReq>,
) -> Result<StatusCode, AppError> {
    acl::ensure_own_device(&auth.claims, &body.device_id)?;
    state
        .store
        .insert_location(&body.device_id, body.latitude, body.longitude, body.accuracy)
        .await
        .map_err(AppError::internal)?;
    state
        .store
        .touch_device_seen(&body.device_id)
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_report_web_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::WebHistoryReportReq>,
) -> Result<StatusCode, AppError> {
    acl::ensure_own_device(&auth.claims, &body.device_id)?;
    let entries: Vec<(String, Option<String>)> = body
        .entries
        .into_iter()
        .filter(|e| !e.url.trim().is_empty())
        .map(|e| (e.url, e.title))
        .collect();
    state
        .store
        .insert_web_history(&body.device_id, &entries)
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// Settings

async fn api_get_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::SettingsPullResp>, AppError> {
    let row = state.store.get_settings().await.map_err(AppError::internal)?;
    // Device tokens get their own rule records in the same pull, so the
    // child learns blocks/limits without a second round trip. Parent tokens
    // read rules through the per-device data routes.
    let rules = match auth.claims.device_id.as_deref() {
        Some(device_id) => state
            .store
            .list_app_usage(device_id)
            .await
            .map_err(AppError::internal)?
            .into_iter()
            .map(|u| api::AppRuleDto {
                package_name: u.package_name,
                is_blocked: u.is_blocked,
                daily_limit_minutes: u.daily_limit_minutes,
            })
            .collect(),
        None => Vec::new(),
    };
    Ok(Json(api::SettingsPullResp {
        settings: settings_to_dto(row),
        rules,
    }))
}

async fn api_update_settings(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<api::SettingsUpdateReq>,
) -> Result<Json<api::SettingsDto>, AppError> {
    let row = state
        .store
        .update_settings(
            body.bedtime_weeknight,
            body.bedtime_weekend,
            body.uninstall_protection,
            body.location_tracking,
        )
        .await
        .map_err(AppError::internal)?;
    Ok(Json(settings_to_dto(row)))
}

// Zones

async fn api_list_zones(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::ZoneDto>>, AppError> {
    let rows = state.store.list_zones().await.map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(zone_to_dto).collect()))
}

async fn api_create_zone(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<api::ZoneCreateReq>,
) -> Result<Json<api::ZoneDto>, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::bad_request("zone name required"));
    }
    if body.radius_m <= 0.0 {
        return Err(AppError::bad_request("radius must be positive"));
    }
    let row = state
        .store
        .create_zone(body.name.trim(), body.latitude, body.longitude, body.radius_m)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(zone_to_dto(row)))
}

// Dashboard read paths

async fn api_data_apps(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<api::AppUsageDto>>, AppError> {
    let rows = state
        .store
        .list_app_usage(&device_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(usage_to_dto).collect()))
}

async fn api_data_location(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
) -> Result<Json<Option<api::LocationDto>>, AppError> {
    let row = state
        .store
        .latest_location(&device_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(row.map(|l| api::LocationDto {
        latitude: l.latitude,
        longitude: l.longitude,
        accuracy: l.accuracy,
        recorded_at: rfc3339(l.recorded_at),
    })))
}

async fn api_data_web_history(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<api::WebHistoryDto>>, AppError> {
    let rows = state
        .store
        .list_web_history(&device_id, 100)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(
        rows.into_iter()
            .map(|r| api::WebHistoryDto {
                url: r.url,
                title: r.title,
                visited_at: rfc3339(r.visited_at),
            })
            .collect(),
    ))
}

async fn api_update_app_rules(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path((device_id, package)): Path<(String, String)>,
    Json(body): Json<api::AppRuleReq>,
) -> Result<Json<api::AppUsageDto>, AppError> {
    if let Some(limit) = body.daily_limit_minutes {
        if limit < 0 {
            return Err(AppError::bad_request("daily limit must be non-negative"));
        }
    }
    let updated = state
        .store
        .update_app_rules(&device_id, &package, body.is_blocked, body.daily_limit_minutes)
        .await
        .map_err(AppError::internal)?;
    match updated {
        Some(row) => Ok(Json(usage_to_dto(row))),
        None => Err(AppError::not_found(format!(
            "no usage record for {package} on {device_id}"
        ))),
    }
}

// Realtime (SSE)

#[derive(Deserialize)]
struct EventsQuery {
    token: String,
}

async fn api_events(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    // Token arrives as a query parameter; EventSource cannot set headers.
    let _claims = auth::verify_token(&state, &q.token).await?;
    let rx = state.realtime.subscribe(&topic);
    let shutdown = state.shutdown_token();
    let stream = BroadcastStream::new(rx)
        .filter_map(|res| futures::future::ready(res.ok()))
        .map(|ev| Event::default().json_data(&ev))
        .take_until(shutdown.cancelled_owned());
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// DTO mapping

fn rfc3339(dt: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

fn device_to_dto(d: models::Device) -> api::DeviceDto {
    api::DeviceDto {
        id: d.id,
        name: d.name,
        is_paired: d.is_paired,
        last_seen_at: d.last_seen_at.map(rfc3339),
    }
}

fn usage_to_dto(u: models::AppUsage) -> api::AppUsageDto {
    api::AppUsageDto {
        package_name: u.package_name,
        app_name: u.app_name,
        used_today_minutes: u.used_today_minutes,
        is_blocked: u.is_blocked,
        daily_limit_minutes: u.daily_limit_minutes,
        last_reported_at: rfc3339(u.last_reported_at),
    }
}

fn zone_to_dto(z: models::Zone) -> api::ZoneDto {
    api::ZoneDto {
        id: z.id,
        name: z.name,
        latitude: z.latitude,
        longitude: z.longitude,
        radius_m: z.radius_m,
    }
}

fn settings_to_dto(s: models::SettingsRow) -> api::SettingsDto {
    api::SettingsDto {
        bedtime_weeknight: s.bedtime_weeknight,
        bedtime_weekend: s.bedtime_weekend,
        uninstall_protection: s.uninstall_protection,
        location_tracking: s.location_tracking,
        revision: s.revision,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    Gone(String),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<PairingError> for AppError {
    fn from(e: PairingError) -> Self {
        match e {
            PairingError::CodeNotFound => AppError::NotFound(e.to_string()),
            PairingError::CodeExpired => AppError::Gone(e.to_string()),
            PairingError::CodeAlreadyUsed | PairingError::AlreadyResolved => {
                AppError::Conflict(e.to_string())
            }
            PairingError::GenerationExhausted => AppError::Unavailable(e.to_string()),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            AppError::Gone(m) => (StatusCode::GONE, m, "gone", None),
            AppError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m, "unavailable", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
