//! Presence registry
//!
//! Process-wide map from user ID to the set of that user's live sessions.
//! A user is online iff the set is non-empty. Rebuilt empty on restart.

use crate::websocket::SessionId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of removing a session from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// That was the user's last live session
    WentOffline,
    /// Other sessions remain
    StillOnline,
    /// Session was not registered (already evicted or never connected)
    NotTracked,
}

#[derive(Default, Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<Uuid, HashSet<SessionId>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session_id` as the only live session of `user_id`.
    ///
    /// Any sessions previously registered for the user are dropped in the
    /// same critical section and returned so the caller can close them.
    /// Concurrent connects for one user therefore always leave exactly one
    /// registered session.
    pub async fn register_exclusive(&self, user_id: Uuid, session_id: SessionId) -> Vec<SessionId> {
        let mut guard = self.inner.write().await;
        let sessions = guard.entry(user_id).or_default();
        let evicted: Vec<SessionId> = sessions
            .iter()
            .copied()
            .filter(|s| *s != session_id)
            .collect();
        sessions.clear();
        sessions.insert(session_id);
        evicted
    }

    /// Register a session without evicting others
    pub async fn register(&self, user_id: Uuid, session_id: SessionId) {
        let mut guard = self.inner.write().await;
        guard.entry(user_id).or_default().insert(session_id);
    }

    pub async fn unregister(&self, user_id: Uuid, session_id: SessionId) -> Departure {
        let mut guard = self.inner.write().await;
        let Some(sessions) = guard.get_mut(&user_id) else {
            return Departure::NotTracked;
        };
        if !sessions.remove(&session_id) {
            return Departure::NotTracked;
        }
        if sessions.is_empty() {
            guard.remove(&user_id);
            Departure::WentOffline
        } else {
            Departure::StillOnline
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    /// Snapshot of every online user ID
    pub async fn online_users(&self) -> HashSet<Uuid> {
        self.inner.read().await.keys().copied().collect()
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn sessions_of(&self, user_id: Uuid) -> HashSet<SessionId> {
        self.inner
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_exclusive_evicts_prior_sessions() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (first, second) = (SessionId::new(), SessionId::new());

        assert!(presence.register_exclusive(user, first).await.is_empty());
        assert_eq!(presence.register_exclusive(user, second).await, vec![first]);
        assert_eq!(presence.sessions_of(user).await, HashSet::from([second]));
    }

    #[tokio::test]
    async fn test_unregister_tracks_last_session() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (a, b) = (SessionId::new(), SessionId::new());
        presence.register(user, a).await;
        presence.register(user, b).await;

        assert_eq!(presence.unregister(user, a).await, Departure::StillOnline);
        assert!(presence.is_online(user).await);
        assert_eq!(presence.unregister(user, b).await, Departure::WentOffline);
        assert!(!presence.is_online(user).await);
        assert_eq!(presence.unregister(user, b).await, Departure::NotTracked);
    }

    #[tokio::test]
    async fn test_evicted_session_departure_not_tracked() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (stale, fresh) = (SessionId::new(), SessionId::new());
        presence.register_exclusive(user, stale).await;
        presence.register_exclusive(user, fresh).await;

        assert_eq!(presence.unregister(user, stale).await, Departure::NotTracked);
        assert!(presence.is_online(user).await);
    }

    #[tokio::test]
    async fn test_concurrent_connects_leave_one_winner() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let presence = presence.clone();
            handles.push(tokio::spawn(async move {
                presence.register_exclusive(user, SessionId::new()).await
            }));
        }
        let mut evicted = 0;
        for handle in handles {
            evicted += handle.await.unwrap().len();
        }

        assert_eq!(presence.sessions_of(user).await.len(), 1);
        assert_eq!(evicted, 15);
        assert_eq!(presence.online_count().await, 1);
    }
}
