use std::time::Duration;

use kindwatch_shared::api::{
    AppUsageDto, LocationDto, SettingsDto, WebHistoryDto, ZoneDto,
    rest::{self, RestError},
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::AppError;
use crate::config::ClientConfig;

/// Per-resource result of one poll tick.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Fresh(T),
    /// Transient failure; the previous value stays on screen.
    Unavailable,
    /// 401/403: the token is dead, so every loop must stop.
    AuthExpired,
}

pub fn classify<T>(resource: &str, res: Result<T, RestError>) -> FetchOutcome<T> {
    match res {
        Ok(v) => FetchOutcome::Fresh(v),
        Err(e) if e.is_auth_fatal() => FetchOutcome::AuthExpired,
        Err(e) => {
            warn!(resource, error=%e, "fetch failed; keeping previous data");
            FetchOutcome::Unavailable
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DashboardView {
    pub apps: Vec<AppUsageDto>,
    pub location: Option<LocationDto>,
    pub web_history: Vec<WebHistoryDto>,
    pub settings: Option<SettingsDto>,
    pub zones: Vec<ZoneDto>,
}

#[derive(Debug)]
pub struct TickOutcomes {
    pub apps: FetchOutcome<Vec<AppUsageDto>>,
    pub location: FetchOutcome<Option<LocationDto>>,
    pub web_history: FetchOutcome<Vec<WebHistoryDto>>,
    pub settings: FetchOutcome<Option<SettingsDto>>,
    pub zones: FetchOutcome<Vec<ZoneDto>>,
}

#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum Applied {
    /// View updated; `stale_slices` resources kept their previous value.
    Ok { stale_slices: usize },
    AuthExpired,
}

impl DashboardView {
    pub fn apply(&mut self, tick: TickOutcomes) -> Applied {
        let mut stale = 0usize;
        let mut auth_expired = false;
        merge(&mut self.apps, tick.apps, &mut stale, &mut auth_expired);
        merge(&mut self.location, tick.location, &mut stale, &mut auth_expired);
        merge(
            &mut self.web_history,
            tick.web_history,
            &mut stale,
            &mut auth_expired,
        );
        merge(&mut self.settings, tick.settings, &mut stale, &mut auth_expired);
        merge(&mut self.zones, tick.zones, &mut stale, &mut auth_expired);
        if auth_expired {
            Applied::AuthExpired
        } else {
            Applied::Ok { stale_slices: stale }
        }
    }
}

fn merge<T>(slot: &mut T, outcome: FetchOutcome<T>, stale: &mut usize, auth_expired: &mut bool) {
    match outcome {
        FetchOutcome::Fresh(v) => *slot = v,
        FetchOutcome::Unavailable => *stale += 1,
        FetchOutcome::AuthExpired => *auth_expired = true,
    }
}

pub async fn run(
    cfg: &ClientConfig,
    token: &str,
    device: Option<String>,
    once: bool,
) -> Result<(), AppError> {
    let base = crate::config::normalize_server_url(&cfg.server_url);
    let device_id = match device {
        Some(d) => d,
        None => {
            let devices = rest::list_devices(&base, token).await?;
            match devices.first() {
                Some(d) => d.id.clone(),
                None => {
                    return Err(AppError::Config(
                        "no paired devices; run `kindwatch-client pair` first".into(),
                    ));
                }
            }
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            crate::shutdown_signal().await;
            cancel.cancel();
        });
    }

    let mut view = DashboardView::default();
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (apps, location, web_history, settings, zones) = tokio::join!(
                    rest::device_apps(&base, token, &device_id),
                    rest::device_location(&base, token, &device_id),
                    rest::device_web_history(&base, token, &device_id),
                    rest::get_settings(&base, token),
                    rest::list_zones(&base, token),
                );
                let tick = TickOutcomes {
                    apps: classify("apps", apps),
                    location: classify("location", location),
                    web_history: classify("web_history", web_history),
                    settings: classify("settings", settings.map(|pull| Some(pull.settings))),
                    zones: classify("zones", zones),
                };
                match view.apply(tick) {
                    Applied::AuthExpired => return Err(AppError::AuthExpired),
                    Applied::Ok { stale_slices } => render(&device_id, &view, stale_slices),
                }
                if once {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn render(device_id: &str, view: &DashboardView, stale_slices: usize) {
    println!("== Device {device_id} ==");
    if stale_slices > 0 {
        println!("({stale_slices} section(s) could not be refreshed; showing last known data)");
    }
    if let Some(s) = &view.settings {
        println!(
            "Settings rev {}: bedtime {}/{}, uninstall protection {}, location tracking {}",
            s.revision,
            s.bedtime_weeknight,
            s.bedtime_weekend,
            on_off(s.uninstall_protection),
            on_off(s.location_tracking),
        );
    }
    match &view.location {
        Some(l) => println!(
            "Location: {:.5}, {:.5} (at {})",
            l.latitude, l.longitude, l.recorded_at
        ),
        None => println!("Location: no reports yet"),
    }
    println!("Apps ({}):", view.apps.len());
    for a in &view.apps {
        println!(
            "  {:<40} {:>4} min / {:>4} min {}",
            a.app_name,
            a.used_today_minutes,
            a.daily_limit_minutes,
            if a.is_blocked { "[BLOCKED]" } else { "" },
        );
    }
    println!("Web history ({} recent):", view.web_history.len());
    for w in view.web_history.iter().take(10) {
        println!("  {}  {}", w.visited_at, w.url);
    }
    println!("Zones ({}):", view.zones.len());
    for z in &view.zones {
        println!("  {}: {:.5}, {:.5} r={:.0}m", z.name, z.latitude, z.longitude, z.radius_m);
    }
    println!();
}

fn on_off(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}
