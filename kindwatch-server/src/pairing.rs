use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kindwatch_shared::api::RealtimeEvent;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::realtime::RealtimeChannel;

pub const CODE_LEN: usize = 6;
/// 32 symbols, ambiguous glyphs (0/O, 1/I) excluded. Codes are entered by
/// hand on the child device, so legibility beats entropy density.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_GENERATION_ATTEMPTS: usize = 32;

pub const DEFAULT_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    Waiting,
    Paired,
    Expired,
    Cancelled,
}

impl PairingStatus {
    pub fn is_terminal(self) -> bool {
        self != PairingStatus::Waiting
    }
}

#[derive(Debug, Clone)]
pub struct PairingSession {
    pub code: String,
    pub status: PairingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("pairing code not found")]
    CodeNotFound,
    #[error("pairing code expired")]
    CodeExpired,
    #[error("pairing code already used")]
    CodeAlreadyUsed,
    #[error("pairing session already resolved")]
    AlreadyResolved,
    #[error("pairing code space exhausted")]
    GenerationExhausted,
}

type SessionHandle = Arc<Mutex<PairingSession>>;

/// Orchestrates code generation, the per-session expiry timer and the
/// realtime notifications into the observable pairing state machine.
///
/// The outer map lock is held only for insert/lookup/remove; every status
/// transition locks the individual session, so redeem and the expiry timer
/// serialize per session rather than across all of them.
#[derive(Clone)]
pub struct PairingCoordinator {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    channel: RealtimeChannel,
    ttl: Duration,
    grace: Duration,
}

impl PairingCoordinator {
    pub fn new(channel: RealtimeChannel, ttl: Duration, grace: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            channel,
            ttl,
            grace,
        }
    }

    /// Create a WAITING session with a code unique among live sessions and
    /// arm its expiry timer. Returns a snapshot of the new session.
    pub async fn request_code(
        &self,
        device_name: Option<String>,
    ) -> Result<PairingSession, PairingError> {
        let session = {
            let mut map = self.sessions.lock().await;
            let mut attempt = 0;
            let code = loop {
                let candidate = generate_code();
                if !map.contains_key(&candidate) {
                    break candidate;
                }
                attempt += 1;
                if attempt >= MAX_GENERATION_ATTEMPTS {
                    // Operator-level capacity problem, not a per-request fault.
                    warn!(attempts = attempt, "pairing code space saturated");
                    return Err(PairingError::GenerationExhausted);
                }
            };
            let now = Utc::now();
            let session = PairingSession {
                code: code.clone(),
                status: PairingStatus::Waiting,
                created_at: now,
                expires_at: now
                    + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
                device_id: None,
                device_name,
            };
            map.insert(code, Arc::new(Mutex::new(session.clone())));
            session
        };
        self.arm_expiry_timer(session.code.clone());
        info!(code = %session.code, expires_at = %session.expires_at, "pairing session created");
        Ok(session)
    }

    /// Redeem side of the handshake: flip WAITING -> PAIRED for `code` and
    /// announce the device on the code's topic.
    ///
    /// The check against `expires_at` here is authoritative; a redemption
    /// arriving after the deadline loses even if the timer has not fired
    /// yet, in which case this call performs the EXPIRED flip itself (and
    /// the timer's later effect is suppressed).
    pub async fn complete(&self, code: &str, device_id: &str) -> Result<(), PairingError> {
        let code = normalize_code(code);
        let handle = self.lookup(&code).await.ok_or(PairingError::CodeNotFound)?;
        let mut session = handle.lock().await;
        match session.status {
            PairingStatus::Waiting => {}
            PairingStatus::Expired => return Err(PairingError::CodeExpired),
            PairingStatus::Paired | PairingStatus::Cancelled => {
                return Err(PairingError::CodeAlreadyUsed);
            }
        }
        if Utc::now() > session.expires_at {
            session.status = PairingStatus::Expired;
            self.channel
                .publish(&code, RealtimeEvent::PairingTimeout { code: code.clone() });
            self.schedule_gc(code.clone());
            info!(%code, "late redemption; session expired");
            return Err(PairingError::CodeExpired);
        }
        session.status = PairingStatus::Paired;
        session.device_id = Some(device_id.to_string());
        self.channel.publish(
            &code,
            RealtimeEvent::PairingSuccess {
                device_id: device_id.to_string(),
            },
        );
        self.schedule_gc(code.clone());
        info!(%code, device_id, "pairing completed");
        Ok(())
    }

    /// Parent-initiated abort. Only meaningful while WAITING; callers treat
    /// `AlreadyResolved` as success since the session reached a terminal
    /// state either way.
    pub async fn cancel(&self, code: &str) -> Result<(), PairingError> {
        let code = normalize_code(code);
        let handle = self.lookup(&code).await.ok_or(PairingError::CodeNotFound)?;
        let mut session = handle.lock().await;
        if session.status != PairingStatus::Waiting {
            return Err(PairingError::AlreadyResolved);
        }
        session.status = PairingStatus::Cancelled;
        self.channel
            .publish(&code, RealtimeEvent::PairingCancelled { code: code.clone() });
        self.schedule_gc(code.clone());
        info!(%code, "pairing cancelled");
        Ok(())
    }

    pub async fn snapshot(&self, code: &str) -> Option<PairingSession> {
        let handle = self.lookup(&normalize_code(code)).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn lookup(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(code).cloned()
    }

    fn arm_expiry_timer(&self, code: String) {
        let coordinator = self.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(handle) = coordinator.lookup(&code).await else {
                return; // already garbage-collected
            };
            let mut session = handle.lock().await;
            if session.status != PairingStatus::Waiting {
                // Redeem or cancel won the race; suppress the timeout.
                debug!(%code, status = ?session.status, "expiry timer lost race");
                return;
            }
            session.status = PairingStatus::Expired;
            coordinator
                .channel
                .publish(&code, RealtimeEvent::PairingTimeout { code: code.clone() });
            coordinator.schedule_gc(code.clone());
            info!(%code, "pairing session expired");
        });
    }

    fn schedule_gc(&self, code: String) {
        let sessions = self.sessions.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut map = sessions.lock().await;
            if let Some(handle) = map.get(&code) {
                if handle.lock().await.status.is_terminal() {
                    map.remove(&code);
                }
            }
        });
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn generate_code() -> String {
    // uuid v4 gives 16 random bytes; 256 % 32 == 0, so indexing the
    // 32-symbol alphabet by byte is unbiased.
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    bytes[..CODE_LEN]
        .iter()
        .map(|b| CODE_ALPHABET[(*b as usize) % CODE_ALPHABET.len()] as char)
        .collect()
}
