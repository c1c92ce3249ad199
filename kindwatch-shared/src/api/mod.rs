use serde::{Deserialize, Serialize};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

// Pairing
#[derive(Debug, Serialize, Deserialize)]
pub struct PairRequestReq {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairRequestResp {
    pub code: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairCancelReq {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairRedeemReq {
    pub code: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairRedeemResp {
    pub token: String,
    pub device_id: String,
}

// Devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    pub is_paired: bool,
    pub last_seen_at: Option<String>, // RFC3339 UTC
}

// App usage reports (child device -> server).
//
// Individual items are validated server-side; optional fields keep a single
// malformed item from failing deserialization of the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppReportItem {
    #[serde(default)]
    pub package_name: String,
    pub app_name: Option<String>,
    pub minutes: Option<i32>,
    pub last_time: Option<String>, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppReportReq {
    pub device_id: String,
    pub apps: Vec<AppReportItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppReportResp {
    pub success: bool,
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUsageDto {
    pub package_name: String,
    pub app_name: String,
    pub used_today_minutes: i32,
    pub is_blocked: bool,
    pub daily_limit_minutes: i32,
    pub last_reported_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppRuleReq {
    pub is_blocked: Option<bool>,
    pub daily_limit_minutes: Option<i32>,
}

// Location
#[derive(Debug, Serialize, Deserialize)]
pub struct LocationReportReq {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationDto {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: String, // RFC3339 UTC
}

// Web history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebHistoryEntry {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebHistoryReportReq {
    pub device_id: String,
    pub entries: Vec<WebHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebHistoryDto {
    pub url: String,
    pub title: Option<String>,
    pub visited_at: String, // RFC3339 UTC
}

// Zones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDto {
    pub id: i32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ZoneCreateReq {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

// Settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsDto {
    pub bedtime_weeknight: String,
    pub bedtime_weekend: String,
    pub uninstall_protection: bool,
    pub location_tracking: bool,
    pub revision: i32,
}

/// Per-package rule fields as seen by the owning device. This is the pull
/// path through which a child device learns which apps the parent has
/// blocked or limited; usage counters are not echoed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRuleDto {
    pub package_name: String,
    pub is_blocked: bool,
    pub daily_limit_minutes: i32,
}

/// Response of the settings pull. `rules` carries the calling device's own
/// rule records when the bearer is a device token; parent tokens read rules
/// through the per-device data routes instead, so the list is empty there.
#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsPullResp {
    pub settings: SettingsDto,
    pub rules: Vec<AppRuleDto>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SettingsUpdateReq {
    pub bedtime_weeknight: Option<String>,
    pub bedtime_weekend: Option<String>,
    pub uninstall_protection: Option<bool>,
    pub location_tracking: Option<bool>,
}

/// Events pushed to realtime subscribers, keyed by topic (pairing code or
/// deletion correlation id). A pairing session emits exactly one of the
/// pairing events over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    PairingSuccess { device_id: String },
    PairingTimeout { code: String },
    PairingCancelled { code: String },
    DeleteSuccess { device_id: String },
    DeleteError { device_id: String, error: String },
}
