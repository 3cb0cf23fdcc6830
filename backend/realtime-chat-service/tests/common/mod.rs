#![allow(dead_code)]

use realtime_chat_service::services::ChatHub;
use realtime_chat_service::store::InMemoryStore;
use realtime_chat_service::websocket::events::ClientEvent;
use realtime_chat_service::websocket::{ServerFrame, SessionId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub fn hub() -> (ChatHub, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (ChatHub::new(store.clone()), store)
}

/// A connected session driven directly through the hub
pub struct TestClient {
    pub session_id: SessionId,
    pub user_id: Option<Uuid>,
    pub frames: UnboundedReceiver<ServerFrame>,
}

impl TestClient {
    pub async fn connect(hub: &ChatHub, user_id: Option<Uuid>) -> Self {
        let (session_id, frames) = hub.open_session(user_id).await;
        hub.connect(session_id, user_id).await;
        Self {
            session_id,
            user_id,
            frames,
        }
    }

    pub async fn send(&self, hub: &ChatHub, event: ClientEvent) {
        hub.dispatch(self.session_id, self.user_id, event).await;
    }

    pub async fn join(&mut self, hub: &ChatHub, room: Uuid) {
        self.send(hub, ClientEvent::JoinRoom(room)).await;
        self.drain();
    }

    pub async fn disconnect(&self, hub: &ChatHub) {
        hub.disconnect(self.session_id, self.user_id).await;
    }

    /// Every text frame queued so far, parsed
    pub fn drain(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let ServerFrame::Text(text) = frame {
                events.push(serde_json::from_str(&text).expect("server frame is json"));
            }
        }
        events
    }

    /// Queued events with the given name
    pub fn drain_named(&mut self, name: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|e| e["event"] == name)
            .collect()
    }

    /// Whether a close frame is waiting, skipping text frames
    pub fn received_close(&mut self) -> bool {
        while let Ok(frame) = self.frames.try_recv() {
            if matches!(frame, ServerFrame::Close(_)) {
                return true;
            }
        }
        false
    }
}

pub fn event_names(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["event"].as_str().unwrap_or_default().to_string())
        .collect()
}
