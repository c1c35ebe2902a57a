//! # WebSocket Speech-to-Braille Endpoint
//!
//! Bridges a websocket connection at `/ws/speech-to-braille` to one streaming
//! session controller (`crate::streaming`).
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: the HTTP request is upgraded and a session slot is claimed
//! 2. **Controller**: a task running `serve_connection` is spawned with an
//!    inbound queue and an outbound channel
//! 3. **Frames**: text and binary frames are queued in arrival order; when the
//!    queue is full the actor stops reading the socket until it drains
//! 4. **Events**: controller events are written as JSON text frames; a close
//!    request from the controller closes the socket
//! 5. **Teardown**: dropping the inbound sender ends the controller loop and
//!    the session slot is released

use crate::state::AppState;
use crate::streaming::{
    serve_connection, Inbound, Outbound, ServerEvent, StreamingSettings, INBOUND_QUEUE_DEPTH,
};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Serialize an event as a text frame payload.
fn encode_event(event: &ServerEvent) -> Option<String> {
    match event.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            error!(error = %e, kind = event.kind(), "Failed to serialize server event");
            None
        }
    }
}

/// One websocket connection.
pub struct SpeechToBrailleSocket {
    id: Uuid,
    state: web::Data<AppState>,
    /// `false` when the session limit was reached at upgrade time.
    admitted: bool,
    inbound: mpsc::Sender<Inbound>,
    outbound: Option<mpsc::UnboundedReceiver<Outbound>>,
    last_heartbeat: Instant,
}

impl SpeechToBrailleSocket {
    fn new(
        id: Uuid,
        state: web::Data<AppState>,
        admitted: bool,
        inbound: mpsc::Sender<Inbound>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> Self {
        Self {
            id,
            state,
            admitted,
            inbound,
            outbound: Some(outbound),
            last_heartbeat: Instant::now(),
        }
    }

    /// Queue a frame for the controller, suspending the actor while the
    /// queue is full.
    fn forward(&mut self, frame: Inbound, ctx: &mut ws::WebsocketContext<Self>) {
        match self.inbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                debug!(connection_id = %self.id, "Inbound queue full, pausing reads");
                let tx = self.inbound.clone();
                ctx.wait(
                    async move { tx.send(frame).await.is_ok() }
                        .into_actor(self)
                        .map(|delivered, act, ctx| {
                            if !delivered {
                                debug!(connection_id = %act.id, "Controller gone, stopping socket");
                                ctx.stop();
                            }
                        }),
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "Controller gone, stopping socket");
                ctx.stop();
            }
        }
    }

    fn close(ctx: &mut ws::WebsocketContext<Self>) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: None,
        }));
        ctx.stop();
    }
}

impl Actor for SpeechToBrailleSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if !self.admitted {
            warn!(connection_id = %self.id, "Session limit reached, refusing connection");
            if let Some(json) = encode_event(&ServerEvent::error("Server is at its session limit")) {
                ctx.text(json);
            }
            Self::close(ctx);
            return;
        }

        info!(connection_id = %self.id, "WebSocket connection started");

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if self.admitted {
            self.state.close_session();
        }
        info!(connection_id = %self.id, "WebSocket connection stopped");
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SpeechToBrailleSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => self.forward(Inbound::Text(text.to_string()), ctx),
            Ok(ws::Message::Binary(data)) => self.forward(Inbound::Binary(data), ctx),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.id, reason = ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Instructions from the controller.
impl StreamHandler<Outbound> for SpeechToBrailleSocket {
    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Event(event) => {
                if let Some(json) = encode_event(&event) {
                    ctx.text(json);
                }
            }
            Outbound::Close => Self::close(ctx),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(connection_id = %self.id, "Controller finished");
        Self::close(ctx);
    }
}

/// `GET /ws/speech-to-braille`
pub async fn speech_to_braille_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    // Reject non-upgrade requests before a session slot is claimed.
    ws::handshake(&req)?;

    let id = Uuid::new_v4();
    let config = state.get_config();
    info!(
        connection_id = %id,
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket connection request"
    );

    let admitted = state.try_open_session(config.performance.max_concurrent_sessions);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    if admitted {
        actix_web::rt::spawn(serve_connection(
            id,
            state.recognizer.clone(),
            state.translator.clone(),
            StreamingSettings::from_config(&config),
            inbound_rx,
            outbound_tx,
        ));
    }

    let socket = SpeechToBrailleSocket::new(id, state, admitted, inbound_tx, outbound_rx);
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::loaded_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_events_encode_with_type_tag() {
        let json = encode_event(&ServerEvent::Processing { duration: 1.5 }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "processing");
        assert_eq!(value["duration"], 1.5);

        let json = encode_event(&ServerEvent::error("boom")).unwrap();
        assert!(json.contains("\"message\":\"boom\""));
    }

    #[actix_web::test]
    async fn test_plain_http_request_is_not_upgraded() {
        let state = web::Data::new(loaded_state(""));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws/speech-to-braille", web::get().to(speech_to_braille_ws)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws/speech-to-braille").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }
}
