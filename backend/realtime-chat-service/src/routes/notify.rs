//! Internal notification endpoints
//!
//! Out-of-process REST handlers push realtime notifications through these
//! after committing their own writes.

use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::events::NotificationKind;
use crate::websocket::Channel;
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

// ============================================
// Request DTOs
// ============================================

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifyTarget {
    User { id: Uuid },
    Room { id: Uuid },
}

impl From<NotifyTarget> for Channel {
    fn from(target: NotifyTarget) -> Self {
        match target {
            NotifyTarget::User { id } => Channel::User(id),
            NotifyTarget::Room { id } => Channel::Room(id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub target: NotifyTarget,
    /// Unknown event names fail deserialization (400)
    pub event: NotificationKind,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMembersRequest {
    pub member_ids: Vec<Uuid>,
}

/// Emit one notification to a user or room channel
#[post("/internal/events")]
pub async fn emit_event(
    state: web::Data<AppState>,
    body: web::Json<NotifyRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let channel = Channel::from(request.target);

    let subscribers = state.hub.registry().subscriber_count(channel).await;
    state
        .hub
        .notifier()
        .emit(channel, request.event, request.payload)
        .await?;

    Ok(HttpResponse::Accepted().json(json!({
        "event": request.event.event_type(),
        "subscribers": subscribers,
    })))
}

/// Add members to a group chat, then notify the room and the new members
#[post("/internal/chats/{chat_id}/members")]
pub async fn add_members(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<AddMembersRequest>,
) -> Result<HttpResponse, AppError> {
    let chat_id = path.into_inner();
    if body.member_ids.is_empty() {
        return Err(AppError::BadRequest("memberIds must not be empty".into()));
    }

    let chat = state.hub.add_group_members(chat_id, &body.member_ids).await?;
    Ok(HttpResponse::Ok().json(chat))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(emit_event).service(add_members);
}
