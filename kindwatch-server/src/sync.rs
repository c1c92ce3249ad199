use chrono::{DateTime, Utc};
use kindwatch_shared::api::AppReportItem;
use tracing::warn;

use crate::storage::{AppReportRecord, StorageError, Store};

/// Outcome of applying one device batch. A malformed item is counted and
/// skipped; it never aborts the rest of the batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Applied {
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("missing package name")]
    MissingPackage,
    #[error("missing or negative minutes")]
    BadMinutes,
}

/// Check one reported item and shape it into the usage-owned record the
/// store will upsert. Rule fields are intentionally absent from the output.
pub fn validate_report(
    item: &AppReportItem,
    now: DateTime<Utc>,
) -> Result<AppReportRecord, ReportError> {
    let package = item.package_name.trim();
    if package.is_empty() {
        return Err(ReportError::MissingPackage);
    }
    let minutes = item.minutes.ok_or(ReportError::BadMinutes)?;
    if minutes < 0 {
        return Err(ReportError::BadMinutes);
    }
    let last_reported_at = item
        .last_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
        .naive_utc();
    Ok(AppReportRecord {
        package_name: package.to_string(),
        app_name: item
            .app_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(package)
            .to_string(),
        used_minutes: minutes,
        last_reported_at,
    })
}

/// Reconcile a device batch into canonical per-package records.
///
/// Validation happens per item; everything valid is upserted in one storage
/// call where the conflict branch only touches usage-owned columns (see
/// `Store::upsert_app_reports`).
pub async fn apply(
    store: &Store,
    device_id: &str,
    items: &[AppReportItem],
) -> Result<Applied, StorageError> {
    let now = Utc::now();
    let mut valid = Vec::with_capacity(items.len());
    let mut rejected = 0usize;
    for item in items {
        match validate_report(item, now) {
            Ok(record) => valid.push(record),
            Err(e) => {
                warn!(device_id, package = %item.package_name, error = %e, "rejecting malformed report item");
                rejected += 1;
            }
        }
    }
    let accepted = store.upsert_app_reports(device_id, valid).await?;
    Ok(Applied { accepted, rejected })
}
