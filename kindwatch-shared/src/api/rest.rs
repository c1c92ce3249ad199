//! Minimal REST client helpers for consumers (clients).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

impl RestError {
    /// A 401/403 means the credential is no longer good: fatal to the
    /// client session, as opposed to a transient per-request failure.
    pub fn is_auth_fatal(&self) -> bool {
        matches!(self, RestError::Status { status, .. } if *status == 401 || *status == 403)
    }
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(180)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
});

fn client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    let status = res.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let res = client()
        .post(ep::auth_login(base))
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn request_pair_code(
    base: &str,
    bearer: &str,
    name: Option<String>,
) -> Result<PairRequestResp, RestError> {
    let res = client()
        .post(ep::devices_add(base))
        .bearer_auth(bearer)
        .json(&PairRequestReq { name })
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn cancel_pairing(base: &str, bearer: &str, code: &str) -> Result<(), RestError> {
    let res = client()
        .post(ep::devices_cancel_pairing(base))
        .bearer_auth(bearer)
        .json(&PairCancelReq {
            code: code.to_string(),
        })
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

pub async fn redeem(base: &str, req: &PairRedeemReq) -> Result<PairRedeemResp, RestError> {
    let res = client()
        .post(ep::devices_redeem(base))
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn list_devices(base: &str, bearer: &str) -> Result<Vec<DeviceDto>, RestError> {
    let res = client()
        .get(ep::devices(base))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn delete_device(
    base: &str,
    bearer: &str,
    device_id: &str,
    request_id: &str,
) -> Result<(), RestError> {
    let res = client()
        .delete(ep::device(base, device_id))
        .query(&[("request_id", request_id)])
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

pub async fn report_apps(
    base: &str,
    bearer: &str,
    req: &AppReportReq,
) -> Result<AppReportResp, RestError> {
    let res = client()
        .post(ep::apps_report(base))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn report_location(
    base: &str,
    bearer: &str,
    req: &LocationReportReq,
) -> Result<(), RestError> {
    let res = client()
        .post(ep::location_report(base))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

pub async fn report_web_history(
    base: &str,
    bearer: &str,
    req: &WebHistoryReportReq,
) -> Result<(), RestError> {
    let res = client()
        .post(ep::web_history_report(base))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

pub async fn get_settings(base: &str, bearer: &str) -> Result<SettingsPullResp, RestError> {
    let res = client()
        .get(ep::settings(base))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn update_settings(
    base: &str,
    bearer: &str,
    req: &SettingsUpdateReq,
) -> Result<SettingsDto, RestError> {
    let res = client()
        .post(ep::settings(base))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn device_apps(
    base: &str,
    bearer: &str,
    device_id: &str,
) -> Result<Vec<AppUsageDto>, RestError> {
    let res = client()
        .get(ep::device_apps(base, device_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn device_location(
    base: &str,
    bearer: &str,
    device_id: &str,
) -> Result<Option<LocationDto>, RestError> {
    let res = client()
        .get(ep::device_location(base, device_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn device_web_history(
    base: &str,
    bearer: &str,
    device_id: &str,
) -> Result<Vec<WebHistoryDto>, RestError> {
    let res = client()
        .get(ep::device_web_history(base, device_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn list_zones(base: &str, bearer: &str) -> Result<Vec<ZoneDto>, RestError> {
    let res = client()
        .get(ep::zones(base))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn update_app_rules(
    base: &str,
    bearer: &str,
    device_id: &str,
    package: &str,
    req: &AppRuleReq,
) -> Result<AppUsageDto, RestError> {
    let res = client()
        .put(ep::app_rules(base, device_id, package))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}
