//! Push Session
//!
//! One live client connection: identity claims, handshake parameters, the
//! outbound frame channel, and the cancellation signals for its read and
//! write loops. The session itself holds no socket; the connection handler
//! in [`handler`](super::handler) drives the loops and owns the socket
//! halves.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
struct SessionClaims {
    list: Vec<String>,
    map: HashMap<String, String>,
}

/// One live push connection.
///
/// A session is registered with at most one hub at a time and must never be
/// delivered to after unregistration. `close` is idempotent: it signals
/// shutdown without blocking, and exactly one stop sequence runs no matter
/// how many times the session is asked to close.
pub struct PushSession {
    id: String,
    claims: RwLock<SessionClaims>,
    parameters: HashMap<String, String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    started_at: DateTime<Utc>,
    frames: mpsc::Sender<String>,
    cancel: CancellationToken,
    read_cancel: CancellationToken,
    write_cancel: CancellationToken,
    stopped: AtomicBool,
}

impl PushSession {
    /// Create a session from a completed handshake.
    ///
    /// Returns the session and the receiving half of its outbound frame
    /// channel, which the connection's write loop drains into the socket.
    pub fn new(
        parameters: HashMap<String, String>,
        headers: HeaderMap,
        remote_addr: Option<SocketAddr>,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (frames, frames_rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let read_cancel = cancel.child_token();
        let write_cancel = cancel.child_token();

        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            claims: RwLock::new(SessionClaims::default()),
            parameters,
            headers,
            remote_addr,
            started_at: Utc::now(),
            frames,
            cancel,
            read_cancel,
            write_cancel,
            stopped: AtomicBool::new(false),
        });

        (session, frames_rx)
    }

    /// Stable unique identifier, generated at connect time
    pub fn identifier(&self) -> &str {
        &self.id
    }

    /// Store identity claims and derive the key/value map from `k=v` pairs
    pub fn set_claims(&self, claims: Vec<String>) {
        let map = claims_to_map(&claims);
        let mut guard = self
            .claims
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.list = claims;
        guard.map = map;
    }

    /// Identity claims as provided at handshake
    pub fn claims(&self) -> Vec<String> {
        self.claims
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .list
            .clone()
    }

    /// Identity claims as a key/value map
    pub fn claims_map(&self) -> HashMap<String, String> {
        self.claims
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map
            .clone()
    }

    /// Handshake query parameter by key
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// The `token` handshake parameter, when present
    pub fn token(&self) -> Option<&str> {
        self.parameter("token")
    }

    /// Handshake request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Request full shutdown. Idempotent; signals without blocking.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown has been requested
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown has been requested
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Enqueue one encoded frame for the write loop.
    ///
    /// Non-blocking: a session whose outbound buffer is full misses the
    /// frame rather than stalling the caller.
    pub(crate) fn enqueue_frame(
        &self,
        frame: String,
    ) -> Result<(), mpsc::error::TrySendError<String>> {
        self.frames.try_send(frame)
    }

    /// Begin the stop sequence: cancel both loops. Returns true for exactly
    /// one caller; later calls observe the guard and do nothing.
    pub(crate) fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.read_cancel.cancel();
        self.write_cancel.cancel();
        true
    }

    pub(crate) fn read_token(&self) -> CancellationToken {
        self.read_cancel.clone()
    }

    pub(crate) fn write_token(&self) -> CancellationToken {
        self.write_cancel.clone()
    }
}

impl std::fmt::Debug for PushSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSession")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

fn claims_to_map(claims: &[String]) -> HashMap<String, String> {
    claims
        .iter()
        .filter_map(|claim| {
            claim
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}
