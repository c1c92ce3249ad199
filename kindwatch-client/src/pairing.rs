use std::time::Duration;

use futures_util::StreamExt;
use kindwatch_shared::api::{RealtimeEvent, rest};

use crate::AppError;
use crate::config::ClientConfig;

/// Request a pairing code and wait for a child device to redeem it.
///
/// The local countdown is display only; the server's expiry decides the
/// outcome and announces it as a `pairing_timeout` event. Ctrl+C cancels
/// the session server-side and drops the subscription, so a success
/// arriving after that is never acted upon.
pub async fn pair(
    cfg: &ClientConfig,
    token: &str,
    name: Option<String>,
) -> Result<(), AppError> {
    let base = crate::config::normalize_server_url(&cfg.server_url);
    let resp = rest::request_pair_code(&base, token, name).await?;
    println!("Pairing code: {}", resp.code);
    println!(
        "Enter it on the child device within {} seconds. Ctrl+C cancels.",
        resp.expires_in_secs
    );

    let mut events = Box::pin(crate::sse::subscribe(&base, &resp.code, token).await?);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(resp.expires_in_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(15));
    ticker.tick().await; // discard the immediate first tick

    loop {
        tokio::select! {
            ev = events.next() => match ev {
                Some(RealtimeEvent::PairingSuccess { device_id }) => {
                    println!("Device paired: {device_id}");
                    return Ok(());
                }
                Some(RealtimeEvent::PairingTimeout { .. }) => {
                    return Err(AppError::Http(
                        "pairing code expired before any device redeemed it".into(),
                    ));
                }
                Some(RealtimeEvent::PairingCancelled { .. }) => {
                    println!("Pairing was cancelled.");
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    return Err(AppError::Http(
                        "event stream closed before pairing finished".into(),
                    ));
                }
            },
            _ = ticker.tick() => {
                let left = deadline
                    .saturating_duration_since(tokio::time::Instant::now())
                    .as_secs();
                if left > 0 {
                    println!("Waiting for device... about {left}s left");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling pairing...");
                drop(events);
                rest::cancel_pairing(&base, token, &resp.code).await?;
                println!("Pairing cancelled.");
                return Ok(());
            }
        }
    }
}

/// Delete a device and wait briefly for the server's confirmation event on
/// the correlation topic. The HTTP status already decides success; the
/// event is a cross-console notification.
pub async fn unpair(cfg: &ClientConfig, token: &str, device_id: &str) -> Result<(), AppError> {
    let base = crate::config::normalize_server_url(&cfg.server_url);
    let request_id = uuid::Uuid::new_v4().to_string();

    let events = crate::sse::subscribe(&base, &request_id, token).await;
    if let Err(e) = &events {
        tracing::warn!(error=%e, "could not subscribe for deletion outcome; proceeding without it");
    }

    rest::delete_device(&base, token, device_id, &request_id).await?;

    if let Ok(stream) = events {
        let mut stream = Box::pin(stream);
        match tokio::time::timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(RealtimeEvent::DeleteSuccess { device_id })) => {
                println!("Removed device {device_id} and everything it reported.");
                return Ok(());
            }
            Ok(Some(RealtimeEvent::DeleteError { device_id, error })) => {
                return Err(AppError::Http(format!(
                    "deletion of {device_id} reported an error: {error}"
                )));
            }
            Ok(Some(_)) | Ok(None) | Err(_) => {}
        }
    }
    println!("Removed device {device_id}.");
    Ok(())
}
