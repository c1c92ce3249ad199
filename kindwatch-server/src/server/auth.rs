use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use kindwatch_shared::auth::Role;
use kindwatch_shared::jwt::{self, JwtClaims};
use tracing::error;

use super::{AppError, AppState};

/// How many days of inactivity before a parent session is considered expired.
const PARENT_SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login for parents.
const PARENT_TOKEN_TTL_DAYS: i64 = 30;
/// How many days of inactivity before a device session is considered expired.
const DEVICE_SESSION_IDLE_DAYS: i64 = 30;
/// How many days before mandatory re-login for devices.
const DEVICE_TOKEN_TTL_DAYS: i64 = 2 * DEVICE_SESSION_IDLE_DAYS;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return Err(AppError::unauthorized()),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return Err(AppError::unauthorized());
    }
    let token = &header_str[prefix.len()..];

    let claims = verify_token(&state, token).await?;
    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Decode, verify and liveness-check a bearer token. Shared between the
/// Authorization-header middleware and the SSE endpoint, which receives the
/// token as a query parameter instead.
pub async fn verify_token(state: &AppState, token: &str) -> Result<JwtClaims, AppError> {
    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return Err(AppError::unauthorized());
        }
    };

    validate_claims(state, &claims).map_err(|e| {
        tracing::warn!(error=?e, sub=%claims.sub, "auth: validate_claims failed");
        AppError::unauthorized()
    })?;

    let idle_days = match claims.role {
        Role::Device => DEVICE_SESSION_IDLE_DAYS,
        Role::Parent => PARENT_SESSION_IDLE_DAYS,
    };
    let cutoff = Utc::now() - Duration::days(idle_days);
    match state
        .store
        .touch_session_with_cutoff(&claims.jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                jti = %claims.jti,
                sub = %claims.sub,
                cutoff = %cutoff,
                idle_days = idle_days,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return Err(AppError::unauthorized());
        }
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    Ok(claims)
}

pub async fn issue_jwt(
    state: &AppState,
    sub: &str,
    role: Role,
    device_id: Option<String>,
) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let ttl_days = match role {
        Role::Device => DEVICE_TOKEN_TTL_DAYS,
        Role::Parent => PARENT_TOKEN_TTL_DAYS,
    };
    let exp = (Utc::now() + Duration::days(ttl_days)).timestamp();
    let claims = JwtClaims {
        sub: sub.to_string(),
        jti: jti.clone(),
        exp,
        role,
        device_id,
    };

    validate_claims(state, &claims)?;

    state.store.create_session(&jti, sub).await.map_err(|e| {
        error!(sub, error=%e, "issue_jwt: create_session failed");
        AppError::internal(e)
    })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(sub, error=%e, "issue_jwt: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}

fn validate_claims(state: &AppState, claims: &JwtClaims) -> Result<(), AppError> {
    match claims.role {
        Role::Parent => {
            if !state.config.users.iter().any(|u| u.username == claims.sub) {
                tracing::warn!(sub = %claims.sub, "auth: unknown parent user");
                return Err(AppError::forbidden());
            }
            if claims.device_id.is_some() {
                tracing::warn!(sub = %claims.sub, "auth: parent token must not carry a device binding");
                return Err(AppError::forbidden());
            }
        }
        Role::Device => {
            let device_id = claims.device_id.as_deref().ok_or_else(|| {
                tracing::warn!(sub = %claims.sub, "auth: device token missing device_id");
                AppError::forbidden()
            })?;
            if device_id.trim().is_empty() {
                return Err(AppError::bad_request("device_id cannot be empty"));
            }
        }
    }
    Ok(())
}
