use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use kindwatch_shared::api::RealtimeEvent;

use crate::AppError;

/// Subscribe to a server topic. The returned stream yields decoded events
/// and silently drops frames that fail to parse.
///
/// The stream is live once this function returns; events published after
/// that point will be delivered.
pub async fn subscribe(
    server_url: &str,
    topic: &str,
    token: &str,
) -> Result<impl Stream<Item = RealtimeEvent>, AppError> {
    let url = events_url(server_url, topic, token)?;
    let resp = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Http(format!("event subscribe failed: {e}")))?;
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(AppError::AuthExpired);
    }
    if !status.is_success() {
        return Err(AppError::Http(format!("event subscribe failed: {status}")));
    }
    Ok(resp.bytes_stream().eventsource().filter_map(|frame| {
        futures_util::future::ready(match frame {
            Ok(ev) => match serde_json::from_str::<RealtimeEvent>(&ev.data) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!(error=%e, data=%ev.data, "dropping unparseable event");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error=%e, "event stream read error");
                None
            }
        })
    }))
}

fn events_url(server_url: &str, topic: &str, token: &str) -> Result<url::Url, AppError> {
    let base = crate::config::normalize_server_url(server_url);
    let raw = kindwatch_shared::api::endpoints::events(&base, topic);
    let mut u = url::Url::parse(&raw)
        .map_err(|e| AppError::Config(format!("invalid server_url: {e}")))?;
    u.query_pairs_mut().append_pair("token", token);
    Ok(u)
}
