use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn devices(base: &str) -> String {
    base_join(base, &format!("{}/devices", API_V1_PREFIX))
}
pub fn devices_add(base: &str) -> String {
    base_join(base, &format!("{}/devices/add", API_V1_PREFIX))
}
pub fn devices_cancel_pairing(base: &str) -> String {
    base_join(base, &format!("{}/devices/cancel-pairing", API_V1_PREFIX))
}
pub fn devices_redeem(base: &str) -> String {
    base_join(base, &format!("{}/devices/redeem", API_V1_PREFIX))
}
pub fn device(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/devices/{}", API_V1_PREFIX, enc(device_id)),
    )
}
pub fn apps_report(base: &str) -> String {
    base_join(base, &format!("{}/apps", API_V1_PREFIX))
}
pub fn location_report(base: &str) -> String {
    base_join(base, &format!("{}/location", API_V1_PREFIX))
}
pub fn web_history_report(base: &str) -> String {
    base_join(base, &format!("{}/web-history", API_V1_PREFIX))
}
pub fn settings(base: &str) -> String {
    base_join(base, &format!("{}/settings", API_V1_PREFIX))
}
pub fn zones(base: &str) -> String {
    base_join(base, &format!("{}/zones", API_V1_PREFIX))
}
pub fn device_apps(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/data/{}/apps", API_V1_PREFIX, enc(device_id)),
    )
}
pub fn device_location(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/data/{}/location", API_V1_PREFIX, enc(device_id)),
    )
}
pub fn device_web_history(base: &str, device_id: &str) -> String {
    base_join(
        base,
        &format!("{}/data/{}/web-history", API_V1_PREFIX, enc(device_id)),
    )
}
pub fn app_rules(base: &str, device_id: &str, package: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/data/{}/apps/{}/rules",
            API_V1_PREFIX,
            enc(device_id),
            enc(package)
        ),
    )
}
pub fn events(base: &str, topic: &str) -> String {
    base_join(
        base,
        &format!("{}/events/{}", API_V1_PREFIX, enc(topic)),
    )
}
