use axum::http::StatusCode;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use kindwatch_server::{server, storage};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const LOGIN_PATH: &str = "/api/v1/auth/login";
const PARENT_PWD: &str = "secret123";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        Self::spawn_with_ttl(None).await
    }

    /// Spawn with a short pairing TTL (seconds) for expiry tests.
    async fn spawn_with_ttl(pairing_ttl_secs: Option<u64>) -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path, pairing_ttl_secs).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let body = self
            .request_expect(
                "POST",
                LOGIN_PATH,
                None,
                Some(json!({"username": username, "password": password})),
                StatusCode::OK,
            )
            .await;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from auth response")
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }

    /// Open an SSE subscription to a topic and return the stream. The
    /// subscription is live once the response headers arrive.
    async fn subscribe(
        &self,
        topic: &str,
        token: &str,
    ) -> impl futures_util::Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>>
    {
        let url = format!("{}/api/v1/events/{}?token={}", self.base, topic, token);
        let resp = self.client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp.bytes_stream().eventsource()
    }

    /// Pair a device end to end: parent requests a code, the device redeems
    /// it. Returns (device_token, device_id).
    async fn pair_device(&self, parent_token: &str, name: &str) -> (String, String) {
        let add = self
            .request_expect(
                "POST",
                "/api/v1/devices/add",
                Some(parent_token),
                Some(json!({"name": name})),
                StatusCode::OK,
            )
            .await;
        let code = add.get("code").and_then(|v| v.as_str()).unwrap().to_string();
        let redeem = self
            .request_expect(
                "POST",
                "/api/v1/devices/redeem",
                None,
                Some(json!({"code": code, "device_name": name})),
                StatusCode::OK,
            )
            .await;
        (
            redeem.get("token").and_then(|v| v.as_str()).unwrap().to_string(),
            redeem
                .get("device_id")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string(),
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(
    tmp_db: &Path,
    pairing_ttl_secs: Option<u64>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let parent_hash = bcrypt::hash(PARENT_PWD, bcrypt::DEFAULT_COST).unwrap();
    let config = server::AppConfig {
        jwt_secret: "testsecret".into(),
        users: vec![server::UserConfig {
            username: "parent".into(),
            password_hash: parent_hash,
        }],
        dev_cors_origin: None,
        listen_port: None,
        pairing_ttl_secs,
        pairing_grace_secs: None,
    };

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");

    let state = server::AppState::new(config, store);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

async fn next_event<S>(stream: &mut S) -> Value
where
    S: futures_util::Stream<
            Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>,
        > + Unpin,
{
    let ev = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for SSE event")
        .expect("SSE stream closed")
        .expect("SSE stream error");
    serde_json::from_str(&ev.data).expect("SSE event is not JSON")
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
    let token = server.login("parent", PARENT_PWD).await;
    assert!(!token.is_empty());
    server
        .request_expect(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": "parent", "password": "wrong"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let cases: Vec<(&str, &str, Option<Value>)> = vec![
        ("GET", "/api/v1/devices", None),
        ("POST", "/api/v1/devices/add", Some(json!({"name": "x"}))),
        (
            "POST",
            "/api/v1/devices/cancel-pairing",
            Some(json!({"code": "ABC234"})),
        ),
        ("DELETE", "/api/v1/devices/dev-1", None),
        (
            "POST",
            "/api/v1/apps",
            Some(json!({"device_id": "dev-1", "apps": []})),
        ),
        (
            "POST",
            "/api/v1/location",
            Some(json!({"device_id": "dev-1", "latitude": 0.0, "longitude": 0.0})),
        ),
        (
            "POST",
            "/api/v1/web-history",
            Some(json!({"device_id": "dev-1", "entries": []})),
        ),
        ("GET", "/api/v1/settings", None),
        ("POST", "/api/v1/settings", Some(json!({}))),
        ("GET", "/api/v1/zones", None),
        ("GET", "/api/v1/data/dev-1/apps", None),
        ("GET", "/api/v1/data/dev-1/location", None),
        ("GET", "/api/v1/data/dev-1/web-history", None),
        (
            "PUT",
            "/api/v1/data/dev-1/apps/com.a/rules",
            Some(json!({"is_blocked": true})),
        ),
    ];

    for (method, path, body) in cases.iter() {
        server
            .request_expect(method, path, None, body.clone(), StatusCode::UNAUTHORIZED)
            .await;
    }

    // SSE requires a valid token as a query parameter
    let resp = reqwest::get(format!("{}/api/v1/events/sometopic?token=bogus", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn pairing_handshake_notifies_and_registers() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;

    let add = server
        .request_expect(
            "POST",
            "/api/v1/devices/add",
            Some(&parent_token),
            Some(json!({"name": "Kid tablet"})),
            StatusCode::OK,
        )
        .await;
    let code = add.get("code").and_then(|v| v.as_str()).unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert_eq!(code, code.to_ascii_uppercase());
    assert_eq!(add.get("expires_in_secs").and_then(|v| v.as_u64()), Some(120));

    let mut events = server.subscribe(&code, &parent_token).await;

    // Redemption is public and case-insensitive
    let redeem = server
        .request_expect(
            "POST",
            "/api/v1/devices/redeem",
            None,
            Some(json!({"code": code.to_ascii_lowercase(), "device_name": "Kid tablet"})),
            StatusCode::OK,
        )
        .await;
    let device_id = redeem
        .get("device_id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    assert!(redeem.get("token").and_then(|v| v.as_str()).is_some());

    let ev = next_event(&mut events).await;
    assert_eq!(ev.get("type").and_then(|v| v.as_str()), Some("pairing_success"));
    assert_eq!(ev.get("device_id").and_then(|v| v.as_str()), Some(device_id.as_str()));

    // Second redemption of the same code loses
    server
        .request_expect(
            "POST",
            "/api/v1/devices/redeem",
            None,
            Some(json!({"code": code, "device_name": "Impostor"})),
            StatusCode::CONFLICT,
        )
        .await;

    // Unknown code
    server
        .request_expect(
            "POST",
            "/api/v1/devices/redeem",
            None,
            Some(json!({"code": "ZZZZ99", "device_name": "x"})),
            StatusCode::NOT_FOUND,
        )
        .await;

    let devices = server
        .request_expect("GET", "/api/v1/devices", Some(&parent_token), None, StatusCode::OK)
        .await;
    let listed = devices
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d.get("id").and_then(|v| v.as_str()) == Some(device_id.as_str()))
        .expect("paired device missing from list");
    assert_eq!(listed.get("name").and_then(|v| v.as_str()), Some("Kid tablet"));
    assert_eq!(listed.get("is_paired").and_then(|v| v.as_bool()), Some(true));
}

#[tokio::test]
async fn pairing_cancel_is_idempotent_and_blocks_redeem() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;

    let add = server
        .request_expect(
            "POST",
            "/api/v1/devices/add",
            Some(&parent_token),
            Some(json!({"name": "Phone"})),
            StatusCode::OK,
        )
        .await;
    let code = add.get("code").and_then(|v| v.as_str()).unwrap().to_string();

    let mut events = server.subscribe(&code, &parent_token).await;

    server
        .request_expect(
            "POST",
            "/api/v1/devices/cancel-pairing",
            Some(&parent_token),
            Some(json!({"code": code})),
            StatusCode::NO_CONTENT,
        )
        .await;
    let ev = next_event(&mut events).await;
    assert_eq!(ev.get("type").and_then(|v| v.as_str()), Some("pairing_cancelled"));

    // Cancelling again is a no-op success
    server
        .request_expect(
            "POST",
            "/api/v1/devices/cancel-pairing",
            Some(&parent_token),
            Some(json!({"code": code})),
            StatusCode::NO_CONTENT,
        )
        .await;

    // The cancelled code can no longer be redeemed
    server
        .request_expect(
            "POST",
            "/api/v1/devices/redeem",
            None,
            Some(json!({"code": code, "device_name": "x"})),
            StatusCode::CONFLICT,
        )
        .await;

    // No device row was created
    let devices = server
        .request_expect("GET", "/api/v1/devices", Some(&parent_token), None, StatusCode::OK)
        .await;
    assert!(devices.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn expired_code_is_gone() {
    let Some(server) = TestServer::spawn_with_ttl(Some(1)).await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;

    let add = server
        .request_expect(
            "POST",
            "/api/v1/devices/add",
            Some(&parent_token),
            Some(json!({"name": "Slowpoke"})),
            StatusCode::OK,
        )
        .await;
    let code = add.get("code").and_then(|v| v.as_str()).unwrap().to_string();
    assert_eq!(add.get("expires_in_secs").and_then(|v| v.as_u64()), Some(1));

    let mut events = server.subscribe(&code, &parent_token).await;

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let ev = next_event(&mut events).await;
    assert_eq!(ev.get("type").and_then(|v| v.as_str()), Some("pairing_timeout"));

    server
        .request_expect(
            "POST",
            "/api/v1/devices/redeem",
            None,
            Some(json!({"code": code, "device_name": "x"})),
            StatusCode::GONE,
        )
        .await;
}

#[tokio::test]
async fn app_reports_merge_without_clobbering_rules() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;
    let (device_token, device_id) = server.pair_device(&parent_token, "Tablet").await;

    // First report seeds two packages; malformed items are skipped, not fatal
    let resp = server
        .request_expect(
            "POST",
            "/api/v1/apps",
            Some(&device_token),
            Some(json!({
                "device_id": device_id,
                "apps": [
                    {"package_name": "com.example.game", "app_name": "Game", "minutes": 30},
                    {"package_name": "com.example.chat", "minutes": 5},
                    {"package_name": "", "minutes": 3},
                    {"package_name": "com.example.broken"}
                ]
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(resp.get("success").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(resp.get("count").and_then(|v| v.as_i64()), Some(2));

    let usage = server
        .request_expect(
            "GET",
            &format!("/api/v1/data/{device_id}/apps"),
            Some(&parent_token),
            None,
            StatusCode::OK,
        )
        .await;
    let rows = usage.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    let game = rows
        .iter()
        .find(|r| r.get("package_name").unwrap() == "com.example.game")
        .unwrap();
    assert_eq!(game.get("app_name").and_then(|v| v.as_str()), Some("Game"));
    assert_eq!(game.get("used_today_minutes").and_then(|v| v.as_i64()), Some(30));
    assert_eq!(game.get("is_blocked").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(game.get("daily_limit_minutes").and_then(|v| v.as_i64()), Some(60));
    // App name defaults to the package when the report omits it
    let chat = rows
        .iter()
        .find(|r| r.get("package_name").unwrap() == "com.example.chat")
        .unwrap();
    assert_eq!(
        chat.get("app_name").and_then(|v| v.as_str()),
        Some("com.example.chat")
    );

    // Parent blocks the game and tightens its limit
    let updated = server
        .request_expect(
            "PUT",
            &format!("/api/v1/data/{device_id}/apps/com.example.game/rules"),
            Some(&parent_token),
            Some(json!({"is_blocked": true, "daily_limit_minutes": 15})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(updated.get("is_blocked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(updated.get("daily_limit_minutes").and_then(|v| v.as_i64()), Some(15));
    // Rule edit must not disturb the usage counter
    assert_eq!(updated.get("used_today_minutes").and_then(|v| v.as_i64()), Some(30));

    // Device reports again; usage advances, parent rules survive
    server
        .request_expect(
            "POST",
            "/api/v1/apps",
            Some(&device_token),
            Some(json!({
                "device_id": device_id,
                "apps": [
                    {"package_name": "com.example.game", "app_name": "Game", "minutes": 45}
                ]
            })),
            StatusCode::OK,
        )
        .await;

    let usage = server
        .request_expect(
            "GET",
            &format!("/api/v1/data/{device_id}/apps"),
            Some(&parent_token),
            None,
            StatusCode::OK,
        )
        .await;
    let game = usage
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r.get("package_name").unwrap() == "com.example.game")
        .cloned()
        .unwrap();
    assert_eq!(game.get("used_today_minutes").and_then(|v| v.as_i64()), Some(45));
    assert_eq!(game.get("is_blocked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(game.get("daily_limit_minutes").and_then(|v| v.as_i64()), Some(15));

    // The device sees the parent's rule edit on its next settings pull
    let pull = server
        .request_expect("GET", "/api/v1/settings", Some(&device_token), None, StatusCode::OK)
        .await;
    let rule = pull
        .get("rules")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .find(|r| r.get("package_name").unwrap() == "com.example.game")
        .cloned()
        .unwrap();
    assert_eq!(rule.get("is_blocked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(rule.get("daily_limit_minutes").and_then(|v| v.as_i64()), Some(15));

    // Rules for a package never reported -> 404
    server
        .request_expect(
            "PUT",
            &format!("/api/v1/data/{device_id}/apps/com.example.unknown/rules"),
            Some(&parent_token),
            Some(json!({"is_blocked": true})),
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn settings_revision_is_monotonic() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;
    let (device_token, _device_id) = server.pair_device(&parent_token, "Tablet").await;

    let initial = server
        .request_expect("GET", "/api/v1/settings", Some(&parent_token), None, StatusCode::OK)
        .await;
    assert_eq!(
        initial.pointer("/settings/revision").and_then(|v| v.as_i64()),
        Some(0)
    );
    // Parent tokens carry no device identity, so the rules list is empty
    assert_eq!(
        initial.get("rules").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );

    let first = server
        .request_expect(
            "POST",
            "/api/v1/settings",
            Some(&parent_token),
            Some(json!({"bedtime_weeknight": "20:30"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(first.get("revision").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        first.get("bedtime_weeknight").and_then(|v| v.as_str()),
        Some("20:30")
    );

    // Partial update bumps the revision and leaves other fields alone
    let second = server
        .request_expect(
            "POST",
            "/api/v1/settings",
            Some(&parent_token),
            Some(json!({"location_tracking": false})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(second.get("revision").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        second.get("bedtime_weeknight").and_then(|v| v.as_str()),
        Some("20:30")
    );
    assert_eq!(second.get("location_tracking").and_then(|v| v.as_bool()), Some(false));

    // Devices poll settings read-only
    let seen = server
        .request_expect("GET", "/api/v1/settings", Some(&device_token), None, StatusCode::OK)
        .await;
    assert_eq!(
        seen.pointer("/settings/revision").and_then(|v| v.as_i64()),
        Some(2)
    );
    server
        .request_expect(
            "POST",
            "/api/v1/settings",
            Some(&device_token),
            Some(json!({"location_tracking": true})),
            StatusCode::FORBIDDEN,
        )
        .await;
}

#[tokio::test]
async fn location_web_history_and_zones() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;
    let (device_token, device_id) = server.pair_device(&parent_token, "Phone").await;

    // No location yet
    let empty = server
        .request_expect(
            "GET",
            &format!("/api/v1/data/{device_id}/location"),
            Some(&parent_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(empty.is_null());

    server
        .request_expect(
            "POST",
            "/api/v1/location",
            Some(&device_token),
            Some(json!({"device_id": device_id, "latitude": 52.1, "longitude": 21.0, "accuracy": 12.5})),
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/location",
            Some(&device_token),
            Some(json!({"device_id": device_id, "latitude": 52.2, "longitude": 21.1})),
            StatusCode::NO_CONTENT,
        )
        .await;

    let latest = server
        .request_expect(
            "GET",
            &format!("/api/v1/data/{device_id}/location"),
            Some(&parent_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(latest.get("latitude").and_then(|v| v.as_f64()), Some(52.2));
    assert!(latest.get("recorded_at").and_then(|v| v.as_str()).is_some());

    server
        .request_expect(
            "POST",
            "/api/v1/web-history",
            Some(&device_token),
            Some(json!({
                "device_id": device_id,
                "entries": [
                    {"url": "https://example.com", "title": "Example"},
                    {"url": "   ", "title": "blank url is dropped"}
                ]
            })),
            StatusCode::NO_CONTENT,
        )
        .await;
    let history = server
        .request_expect(
            "GET",
            &format!("/api/v1/data/{device_id}/web-history"),
            Some(&parent_token),
            None,
            StatusCode::OK,
        )
        .await;
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("url").and_then(|v| v.as_str()),
        Some("https://example.com")
    );

    let zone = server
        .request_expect(
            "POST",
            "/api/v1/zones",
            Some(&parent_token),
            Some(json!({"name": "School", "latitude": 52.0, "longitude": 21.0, "radius_m": 150.0})),
            StatusCode::OK,
        )
        .await;
    assert!(zone.get("id").and_then(|v| v.as_i64()).is_some());
    server
        .request_expect(
            "POST",
            "/api/v1/zones",
            Some(&parent_token),
            Some(json!({"name": "Bad", "latitude": 0.0, "longitude": 0.0, "radius_m": 0.0})),
            StatusCode::BAD_REQUEST,
        )
        .await;

    // Devices read zones for geofence evaluation
    let zones = server
        .request_expect("GET", "/api/v1/zones", Some(&device_token), None, StatusCode::OK)
        .await;
    assert_eq!(zones.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn device_deletion_cascades_and_notifies() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;
    let (device_token, device_id) = server.pair_device(&parent_token, "Tablet").await;

    server
        .request_expect(
            "POST",
            "/api/v1/apps",
            Some(&device_token),
            Some(json!({
                "device_id": device_id,
                "apps": [{"package_name": "com.a", "minutes": 10}]
            })),
            StatusCode::OK,
        )
        .await;

    let request_id = "del-req-1";
    let mut events = server.subscribe(request_id, &parent_token).await;

    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/devices/{device_id}?request_id={request_id}"),
            Some(&parent_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let ev = next_event(&mut events).await;
    assert_eq!(ev.get("type").and_then(|v| v.as_str()), Some("delete_success"));
    assert_eq!(
        ev.get("device_id").and_then(|v| v.as_str()),
        Some(device_id.as_str())
    );

    let devices = server
        .request_expect("GET", "/api/v1/devices", Some(&parent_token), None, StatusCode::OK)
        .await;
    assert!(devices.as_array().unwrap().is_empty());

    // Reported data went with the device
    server
        .request_expect(
            "POST",
            "/api/v1/apps",
            Some(&device_token),
            Some(json!({
                "device_id": device_id,
                "apps": [{"package_name": "com.a", "minutes": 11}]
            })),
            StatusCode::NOT_FOUND,
        )
        .await;

    // Deleting again reports the failure on the correlation topic
    let request_id2 = "del-req-2";
    let mut events2 = server.subscribe(request_id2, &parent_token).await;
    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/devices/{device_id}?request_id={request_id2}"),
            Some(&parent_token),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    let ev = next_event(&mut events2).await;
    assert_eq!(ev.get("type").and_then(|v| v.as_str()), Some("delete_error"));
}

#[tokio::test]
async fn device_tokens_are_scoped() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent_token = server.login("parent", PARENT_PWD).await;
    let (tablet_token, _tablet_id) = server.pair_device(&parent_token, "Tablet").await;
    let (_phone_token, phone_id) = server.pair_device(&parent_token, "Phone").await;

    // A device may not report on behalf of another device
    server
        .request_expect(
            "POST",
            "/api/v1/apps",
            Some(&tablet_token),
            Some(json!({"device_id": phone_id, "apps": []})),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/location",
            Some(&tablet_token),
            Some(json!({"device_id": phone_id, "latitude": 0.0, "longitude": 0.0})),
            StatusCode::FORBIDDEN,
        )
        .await;

    // Parent-only surfaces are off limits to device tokens
    let forbidden: Vec<(&str, String, Option<Value>)> = vec![
        ("GET", "/api/v1/devices".into(), None),
        ("POST", "/api/v1/devices/add".into(), Some(json!({"name": "x"}))),
        ("DELETE", format!("/api/v1/devices/{phone_id}"), None),
        ("GET", format!("/api/v1/data/{phone_id}/apps"), None),
        (
            "PUT",
            format!("/api/v1/data/{phone_id}/apps/com.a/rules"),
            Some(json!({"is_blocked": true})),
        ),
    ];
    for (method, path, body) in forbidden.iter() {
        server
            .request_expect(
                method,
                path,
                Some(&tablet_token),
                body.clone(),
                StatusCode::FORBIDDEN,
            )
            .await;
    }

    // And parents do not submit device reports
    server
        .request_expect(
            "POST",
            "/api/v1/apps",
            Some(&parent_token),
            Some(json!({"device_id": phone_id, "apps": []})),
            StatusCode::FORBIDDEN,
        )
        .await;
}
