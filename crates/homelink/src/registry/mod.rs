//! Registry of live hub connections.
//!
//! Maps a hub id to at most one live [`HubTransport`]. Connecting again under
//! the same id closes the old transport and installs the new one in a single
//! map operation, so there is never a window with two live sessions.

mod transport;

pub use transport::{HubTransport, TransportReceiver};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use homelink_protocol::ServerMessage;

/// Default per-send deadline.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default per-connection outbound queue size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Deadline for a single send before it counts as failed.
    pub send_timeout_ms: u64,
    /// Outbound messages queued per connection.
    pub channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Protocol state of a hub's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// The handle no longer refers to the live session for its hub.
    Closed,
}

/// Identifies one particular session of a hub.
///
/// A reconnect under the same hub id produces a new handle; operations keyed
/// by an old handle become no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub hub_id: String,
    pub session_id: u64,
}

struct HubSession {
    session_id: u64,
    transport: HubTransport,
    authenticated: bool,
    user_id: Option<String>,
    connected_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
}

/// Snapshot of a live session for read-only callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub hub_id: String,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Live hub sessions keyed by hub id.
pub struct SessionRegistry {
    sessions: DashMap<String, HubSession>,
    next_session_id: AtomicU64,
    send_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }

    /// Install `transport` as the live session for `hub_id`.
    ///
    /// An existing session for the same hub is closed and replaced. The new
    /// session starts unauthenticated.
    pub fn connect(&self, hub_id: &str, transport: HubTransport) -> SessionHandle {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let session = HubSession {
            session_id,
            transport,
            authenticated: false,
            user_id: None,
            connected_at: now,
            last_heartbeat: now,
        };

        match self.sessions.entry(hub_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let old = entry.insert(session);
                old.transport.close();
                info!(
                    "Hub {} reconnected, closed previous session {}",
                    hub_id, old.session_id
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(session);
                info!("Hub {} connected (session {})", hub_id, session_id);
            }
        }

        SessionHandle {
            hub_id: hub_id.to_string(),
            session_id,
        }
    }

    /// Remove and close the session for `hub_id`, if any.
    pub fn disconnect(&self, hub_id: &str) {
        if let Some((_, session)) = self.sessions.remove(hub_id) {
            session.transport.close();
            info!("Hub {} disconnected", hub_id);
        }
    }

    /// Remove the session only if `handle` is still the live one.
    ///
    /// Returns whether an entry was removed.
    pub fn release(&self, handle: &SessionHandle) -> bool {
        match self
            .sessions
            .remove_if(&handle.hub_id, |_, s| s.session_id == handle.session_id)
        {
            Some((_, session)) => {
                session.transport.close();
                info!("Hub {} session {} released", handle.hub_id, handle.session_id);
                true
            }
            None => {
                debug!(
                    "Hub {} session {} already superseded",
                    handle.hub_id, handle.session_id
                );
                false
            }
        }
    }

    /// Close every session, used at shutdown.
    pub fn close_all(&self) {
        let hub_ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for hub_id in hub_ids {
            self.disconnect(&hub_id);
        }
    }

    /// Mark the session behind `handle` authenticated.
    ///
    /// Returns false if the handle has been superseded.
    pub fn mark_authenticated(&self, handle: &SessionHandle, user_id: Option<String>) -> bool {
        match self.sessions.get_mut(&handle.hub_id) {
            Some(mut session) if session.session_id == handle.session_id => {
                session.authenticated = true;
                session.user_id = user_id;
                true
            }
            _ => false,
        }
    }

    /// Record a heartbeat on the session behind `handle`.
    pub fn touch(&self, handle: &SessionHandle, now: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.get_mut(&handle.hub_id)
            && session.session_id == handle.session_id
        {
            session.last_heartbeat = now;
        }
    }

    pub fn state(&self, handle: &SessionHandle) -> SessionState {
        match self.sessions.get(&handle.hub_id) {
            Some(session) if session.session_id == handle.session_id => {
                if session.authenticated {
                    SessionState::Authenticated
                } else {
                    SessionState::Unauthenticated
                }
            }
            _ => SessionState::Closed,
        }
    }

    pub fn is_authenticated(&self, hub_id: &str) -> bool {
        self.sessions
            .get(hub_id)
            .map(|s| s.authenticated)
            .unwrap_or(false)
    }

    pub fn is_connected(&self, hub_id: &str) -> bool {
        self.sessions.contains_key(hub_id)
    }

    /// Hub ids with a live session, sorted.
    pub fn connected_hubs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn session_info(&self, hub_id: &str) -> Option<SessionInfo> {
        self.sessions.get(hub_id).map(|s| SessionInfo {
            hub_id: hub_id.to_string(),
            authenticated: s.authenticated,
            user_id: s.user_id.clone(),
            connected_at: s.connected_at,
            last_heartbeat: s.last_heartbeat,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queue `message` on the live session for `hub_id`.
    ///
    /// True means the message entered the session's outbound queue, not that
    /// the hub received it. The socket writer drains the queue; if a socket
    /// write fails the writer stops and later sends to that session return
    /// false. Also false when no session exists or the queue stays full past
    /// the send timeout. Failures are logged and leave the session registered.
    pub async fn send(&self, hub_id: &str, message: ServerMessage) -> bool {
        // Clone the transport so no map guard is held across the await.
        let Some(transport) = self.sessions.get(hub_id).map(|s| s.transport.clone()) else {
            debug!("No session for hub {}, dropping {}", hub_id, message.kind());
            return false;
        };
        self.deliver(hub_id, &transport, message).await
    }

    /// Queue `message` only if `handle` is still the live session. Same
    /// return contract as [`Self::send`].
    pub async fn reply(&self, handle: &SessionHandle, message: ServerMessage) -> bool {
        let transport = self
            .sessions
            .get(&handle.hub_id)
            .filter(|s| s.session_id == handle.session_id)
            .map(|s| s.transport.clone());
        let Some(transport) = transport else {
            debug!(
                "Session {} of hub {} gone, dropping {}",
                handle.session_id,
                handle.hub_id,
                message.kind()
            );
            return false;
        };
        self.deliver(&handle.hub_id, &transport, message).await
    }

    /// Queue `message` on every live session. Returns how many queued it.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let targets: Vec<(String, HubTransport)> = self
            .sessions
            .iter()
            .map(|s| (s.key().clone(), s.transport.clone()))
            .collect();

        let sends = targets
            .iter()
            .map(|(hub_id, transport)| self.deliver(hub_id, transport, message.clone()));
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    async fn deliver(&self, hub_id: &str, transport: &HubTransport, message: ServerMessage) -> bool {
        let kind = message.kind();
        match tokio::time::timeout(self.send_timeout, transport.send(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("Failed to send {} to hub {}: connection closed", kind, hub_id);
                false
            }
            Err(_) => {
                warn!(
                    "Failed to send {} to hub {}: timed out after {:?}",
                    kind, hub_id, self.send_timeout
                );
                false
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}
