use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;

/// Unique identifier for one live WebSocket connection
///
/// Each connection gets its own ID when it registers, so cleanup and
/// eviction target exactly one socket even when a user has several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Routing target. A room is named by its chat ID, a personal channel by
/// its user ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Room(Uuid),
    User(Uuid),
}

/// What the transport writes to a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Text(String),
    /// Server-initiated close (stale session eviction)
    Close(Option<String>),
}

pub type FrameSender = UnboundedSender<ServerFrame>;

struct SessionEntry {
    user_id: Option<Uuid>,
    sender: FrameSender,
    channels: HashSet<Channel>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    // channel -> member sessions
    channels: HashMap<Channel, HashSet<SessionId>>,
}

impl RegistryState {
    fn detach(&mut self, session_id: SessionId, channel: Channel) {
        if let Some(members) = self.channels.get_mut(&channel) {
            members.remove(&session_id);
            if members.is_empty() {
                self.channels.remove(&channel);
            }
        }
    }
}

/// Connection registry for WebSocket sessions
///
/// Tracks every live connection and which channels (rooms and personal
/// channels) it has joined. Frames are pushed on each session's unbounded
/// channel; the session actor forwards them to the socket.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session
    ///
    /// Returns a tuple of (session_id, receiver) where:
    /// - session_id: Unique ID for this connection (used for routing and cleanup)
    /// - receiver: Channel carrying every frame addressed to this connection
    pub async fn register(
        &self,
        user_id: Option<Uuid>,
    ) -> (SessionId, UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = unbounded_channel();
        let session_id = SessionId::new();

        let mut guard = self.inner.write().await;
        guard.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                sender: tx,
                channels: HashSet::new(),
            },
        );

        tracing::debug!(
            session_id = %session_id,
            total_sessions = guard.sessions.len(),
            "registered websocket session"
        );

        (session_id, rx)
    }

    /// Remove a session and all of its channel memberships
    ///
    /// Must be called when a connection closes. Returns false when the
    /// session was already removed (for example by eviction).
    pub async fn remove_session(&self, session_id: SessionId) -> bool {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.sessions.remove(&session_id) else {
            return false;
        };
        for channel in &entry.channels {
            guard.detach(session_id, *channel);
        }

        tracing::debug!(
            session_id = %session_id,
            channels = entry.channels.len(),
            remaining = guard.sessions.len(),
            "removed websocket session"
        );
        true
    }

    /// Force-close a session: queue a close frame and stop routing to it.
    /// Delivery failures are ignored.
    pub async fn evict(&self, session_id: SessionId, reason: &str) {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.sessions.remove(&session_id) else {
            return;
        };
        for channel in &entry.channels {
            guard.detach(session_id, *channel);
        }
        let _ = entry
            .sender
            .send(ServerFrame::Close(Some(reason.to_string())));
    }

    /// Join a channel. Returns false when the session is no longer registered.
    pub async fn join(&self, session_id: SessionId, channel: Channel) -> bool {
        let mut guard = self.inner.write().await;
        match guard.sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.channels.insert(channel);
            }
            None => return false,
        }
        guard.channels.entry(channel).or_default().insert(session_id);
        true
    }

    pub async fn leave(&self, session_id: SessionId, channel: Channel) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.sessions.get_mut(&session_id) {
            entry.channels.remove(&channel);
        }
        guard.detach(session_id, channel);
    }

    /// Leave every channel except the session's own personal channel
    pub async fn leave_all_except_personal(&self, session_id: SessionId) {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.sessions.get_mut(&session_id) else {
            return;
        };
        let personal = entry.user_id.map(Channel::User);
        let dropped: Vec<Channel> = entry
            .channels
            .iter()
            .copied()
            .filter(|c| Some(*c) != personal)
            .collect();
        entry.channels.retain(|c| Some(*c) == personal);

        for channel in dropped {
            guard.detach(session_id, channel);
        }
    }

    /// Send a frame to one session. Returns false if it is gone.
    pub async fn send_to_session(&self, session_id: SessionId, frame: ServerFrame) -> bool {
        let guard = self.inner.read().await;
        guard
            .sessions
            .get(&session_id)
            .map(|entry| entry.sender.send(frame).is_ok())
            .unwrap_or(false)
    }

    /// Broadcast a frame to every session in a channel
    pub async fn broadcast(&self, channel: Channel, frame: ServerFrame) {
        self.fan_out(channel, None, frame).await;
    }

    /// Broadcast to every session in a channel except `excluded`
    pub async fn broadcast_except(
        &self,
        channel: Channel,
        excluded: SessionId,
        frame: ServerFrame,
    ) {
        self.fan_out(channel, Some(excluded), frame).await;
    }

    async fn fan_out(&self, channel: Channel, excluded: Option<SessionId>, frame: ServerFrame) {
        let guard = self.inner.read().await;
        let Some(members) = guard.channels.get(&channel) else {
            return;
        };

        let mut dead = 0usize;
        for session_id in members {
            if Some(*session_id) == excluded {
                continue;
            }
            if let Some(entry) = guard.sessions.get(session_id) {
                if entry.sender.send(frame.clone()).is_err() {
                    dead += 1;
                }
            }
        }

        // Dead senders belong to sessions whose disconnect is still in flight
        if dead > 0 {
            tracing::debug!(?channel, dead, "broadcast skipped closed sessions");
        }
    }

    /// User IDs with at least one session currently joined to the room
    pub async fn room_occupants(&self, room_id: Uuid) -> HashSet<Uuid> {
        let guard = self.inner.read().await;
        guard
            .channels
            .get(&Channel::Room(room_id))
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| guard.sessions.get(id).and_then(|e| e.user_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn session_user(&self, session_id: SessionId) -> Option<Uuid> {
        let guard = self.inner.read().await;
        guard.sessions.get(&session_id).and_then(|e| e.user_id)
    }

    /// Get subscriber count for a channel (for debugging/metrics)
    pub async fn subscriber_count(&self, channel: Channel) -> usize {
        let guard = self.inner.read().await;
        guard.channels.get(&channel).map(|s| s.len()).unwrap_or(0)
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> ServerFrame {
        ServerFrame::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_channel_members_only() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let (a, mut rx_a) = registry.register(Some(Uuid::new_v4())).await;
        let (_b, mut rx_b) = registry.register(Some(Uuid::new_v4())).await;

        assert!(registry.join(a, Channel::Room(room)).await);
        registry.broadcast(Channel::Room(room), text("hello")).await;

        assert_eq!(rx_a.try_recv().unwrap(), text("hello"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let (a, mut rx_a) = registry.register(Some(Uuid::new_v4())).await;
        let (b, mut rx_b) = registry.register(Some(Uuid::new_v4())).await;
        registry.join(a, Channel::Room(room)).await;
        registry.join(b, Channel::Room(room)).await;

        registry
            .broadcast_except(Channel::Room(room), a, text("draft"))
            .await;

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), text("draft"));
    }

    #[tokio::test]
    async fn test_leave_all_keeps_personal_channel() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (room_a, room_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (session, _rx) = registry.register(Some(user)).await;

        registry.join(session, Channel::User(user)).await;
        registry.join(session, Channel::Room(room_a)).await;
        registry.join(session, Channel::Room(room_b)).await;
        registry.leave_all_except_personal(session).await;

        assert_eq!(registry.subscriber_count(Channel::User(user)).await, 1);
        assert_eq!(registry.subscriber_count(Channel::Room(room_a)).await, 0);
        assert_eq!(registry.subscriber_count(Channel::Room(room_b)).await, 0);
    }

    #[tokio::test]
    async fn test_room_occupants_are_user_ids() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (s1, _rx1) = registry.register(Some(user)).await;
        let (s2, _rx2) = registry.register(Some(user)).await;
        let (anon, _rx3) = registry.register(None).await;
        for s in [s1, s2, anon] {
            registry.join(s, Channel::Room(room)).await;
        }

        let occupants = registry.room_occupants(room).await;
        assert_eq!(occupants.len(), 1);
        assert!(occupants.contains(&user));
    }

    #[tokio::test]
    async fn test_evict_sends_close_and_blocks_join() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (session, mut rx) = registry.register(Some(user)).await;
        registry.join(session, Channel::User(user)).await;

        registry.evict(session, "replaced").await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerFrame::Close(Some("replaced".into()))
        );
        assert!(!registry.join(session, Channel::Room(Uuid::new_v4())).await);
        assert!(!registry.remove_session(session).await);
        assert_eq!(registry.subscriber_count(Channel::User(user)).await, 0);
    }

    #[tokio::test]
    async fn test_remove_session_cleans_up_channels() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (session, _rx) = registry.register(Some(user)).await;
        registry.join(session, Channel::Room(room)).await;

        assert!(registry.remove_session(session).await);
        assert!(!registry.remove_session(session).await);
        assert_eq!(registry.subscriber_count(Channel::Room(room)).await, 0);
        assert_eq!(registry.active_sessions().await, 0);
    }
}
