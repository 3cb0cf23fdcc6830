use crate::config::WebSocketConfig;
use crate::services::SessionCommand;
use crate::state::AppState;
use crate::websocket::events::ClientEvent;
use crate::websocket::{ServerFrame, SessionId};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Connections without a user ID are accepted but stay anonymous
    pub user_id: Option<Uuid>,
}

// WebSocket Actor
//
// Owns the socket only. Client events are queued to the session worker in
// `ChatHub`, which processes them in order; frames addressed to this
// session arrive on `frames` and are written straight to the socket.
pub struct WsSession {
    session_id: SessionId,
    user_id: Option<Uuid>,
    commands: UnboundedSender<SessionCommand>,
    frames: Option<UnboundedReceiver<ServerFrame>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    pub fn new(
        session_id: SessionId,
        user_id: Option<Uuid>,
        commands: UnboundedSender<SessionCommand>,
        frames: UnboundedReceiver<ServerFrame>,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            session_id,
            user_id,
            commands,
            frames: Some(frames),
            hb: Instant::now(),
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > client_timeout {
                tracing::warn!(session_id = %act.session_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn enqueue(&self, event: ClientEvent) {
        if self.commands.send(SessionCommand::Client(event)).is_err() {
            tracing::warn!(session_id = %self.session_id, "session worker gone, event dropped");
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            session_id = %self.session_id,
            user_id = ?self.user_id,
            "WebSocket session started"
        );

        self.hb(ctx);

        if let Some(frames) = self.frames.take() {
            ctx.add_stream(UnboundedReceiverStream::new(frames));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            session_id = %self.session_id,
            user_id = ?self.user_id,
            "WebSocket session stopped"
        );
        let _ = self.commands.send(SessionCommand::Disconnect);
    }
}

// Frames routed to this session
impl StreamHandler<ServerFrame> for WsSession {
    fn handle(&mut self, frame: ServerFrame, ctx: &mut Self::Context) {
        match frame {
            ServerFrame::Text(text) => ctx.text(text),
            ServerFrame::Close(reason) => {
                tracing::info!(session_id = %self.session_id, ?reason, "closing replaced session");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: reason,
                }));
                ctx.stop();
            }
        }
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => self.enqueue(event),
                    Err(e) => {
                        tracing::warn!(session_id = %self.session_id, error = %e, "Failed to parse WS message");
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(session_id = %self.session_id, ?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

// HTTP handler
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    // Reject bad upgrades before the session touches presence
    ws::handshake(&req)?;

    let user_id = query.into_inner().user_id;
    let (session_id, frames, commands) = state.hub.spawn_session(user_id).await;

    let session = WsSession::new(
        session_id,
        user_id,
        commands,
        frames,
        &state.config.websocket,
    );
    ws::start(session, &req, stream)
}
