//! # WebSocket Streaming Endpoint
//!
//! `GET /api/v1/stream` upgrades to a WebSocket driven by one [`StreamSocket`]
//! actor per connection. The actor is only transport: text frames are queued
//! to a per-connection worker task that owns the [`StreamingSession`], and
//! whatever the session answers comes back to the actor as a [`Deliver`]
//! message to be written to the socket.
//!
//! ## Ordering:
//! One worker per connection drains the queue one frame at a time, so frames
//! of a connection are handled strictly in arrival order. A slow recognizer
//! or corrector call delays later frames of the same connection and nothing
//! else. The actor keeps reading the socket meanwhile, so a disconnect is
//! seen right away and cancels the session scope, which abandons any
//! correction still running.
//!
//! ## Liveness:
//! No pings are sent. A client that stays silent longer than the configured
//! read timeout is treated as gone and the session is torn down.

use crate::state::AppState;
use crate::streaming::{CancelScope, Outbound, ProtocolError, ServerMessage, StreamingSession};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Frames a connection may have waiting behind the one being processed.
const FRAME_QUEUE: usize = 64;

/// Session output for one inbound frame, in order.
#[derive(Message)]
#[rtype(result = "()")]
struct Deliver(Vec<Outbound>);

pub struct StreamSocket {
    id: String,
    /// Moved into the worker task once the actor starts
    session: Option<StreamingSession>,
    frames: Option<mpsc::Sender<String>>,
    /// Clone of the session's scope, so the actor can cancel it while the
    /// worker is busy
    scope: CancelScope,
    state: web::Data<AppState>,
    last_activity: Instant,
    read_timeout: Duration,
}

impl StreamSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let id = Uuid::new_v4().to_string();
        let session = StreamingSession::new(id.clone(), state.session_deps(), &state.root_scope);
        let scope = session.scope().clone();
        Self {
            id,
            session: Some(session),
            frames: None,
            scope,
            read_timeout: state.config.read_timeout(),
            state,
            last_activity: Instant::now(),
        }
    }

    fn handle_text(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(frames) = self.frames.as_ref() else {
            return;
        };
        match frames.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %self.id, "Frame queue full, dropping frame");
                self.send_error(ctx, &ProtocolError::Overloaded);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %self.id, "Frame arrived after the session ended");
            }
        }
    }

    fn deliver(&mut self, outbound: Vec<Outbound>, ctx: &mut ws::WebsocketContext<Self>) {
        for item in outbound {
            match item {
                Outbound::Frame(message) => ctx.text(message.to_json()),
                Outbound::Close => {
                    debug!(session_id = %self.id, "Closing stream after stop");
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Normal,
                        description: None,
                    }));
                    ctx.stop();
                    return;
                }
            }
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, err: &ProtocolError) {
        ctx.text(ServerMessage::error(err).to_json());
    }
}

/// Feed queued frames to the session until it stops, the queue closes or
/// its scope is cancelled. A cancel also abandons the frame in progress.
async fn run_session(
    mut session: StreamingSession,
    mut frames: mpsc::Receiver<String>,
    socket: Addr<StreamSocket>,
) {
    let cancelled = session.scope().cancelled();
    tokio::pin!(cancelled);

    loop {
        let text = tokio::select! {
            _ = &mut cancelled => break,
            text = frames.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };
        let outbound = tokio::select! {
            _ = &mut cancelled => {
                debug!("Session cancelled while handling a frame");
                break;
            }
            outbound = session.handle_text(&text) => outbound,
        };
        socket.do_send(Deliver(outbound));
        if session.is_stopped() {
            break;
        }
    }

    session.shutdown().await;
    info!("Stream connection closed");
}

impl Actor for StreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.state.increment_active_sessions();
        info!(session_id = %self.id, "Stream connection opened");

        if let Some(session) = self.session.take() {
            let (tx, rx) = mpsc::channel(FRAME_QUEUE);
            self.frames = Some(tx);
            let span = info_span!("stream", session_id = %session.id());
            actix::spawn(run_session(session, rx, ctx.address()).instrument(span));
        }

        ctx.run_interval(TIMEOUT_CHECK_INTERVAL, |act, ctx| {
            if act.state.root_scope.is_cancelled() {
                info!(session_id = %act.id, "Server shutting down, closing stream");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Away,
                    description: Some("server shutting down".to_string()),
                }));
                ctx.stop();
            } else if act.last_activity.elapsed() > act.read_timeout {
                warn!(session_id = %act.id, timeout = ?act.read_timeout, "Stream read timeout, closing");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("read timeout".to_string()),
                }));
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.scope.cancel();
        self.frames = None;
        self.state.decrement_active_sessions();
        debug!(session_id = %self.id, "Stream actor stopped");
    }
}

impl Handler<Deliver> for StreamSocket {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        self.last_activity = Instant::now();
        self.deliver(msg.0, ctx);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_activity = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => self.handle_text(text.to_string(), ctx),
            Ok(ws::Message::Binary(_)) => {
                self.send_error(
                    ctx,
                    &ProtocolError::InvalidMessage("binary frames are not supported".to_string()),
                );
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.id, reason = ?reason, "Client closed stream");
                self.scope.cancel();
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.id, error = %err, "WebSocket protocol error");
                self.scope.cancel();
                ctx.stop();
            }
        }
    }

    /// The client went away without a close frame.
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(session_id = %self.id, "Client stream ended");
        self.scope.cancel();
        ctx.stop();
    }
}

/// `GET /api/v1/stream`
pub async fn stream(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.peer_addr(), "Stream upgrade requested");
    ws::start(StreamSocket::new(state), &req, payload)
}
