use crate::handlers::SessionEvents;
use crate::state::AppState;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::SessionHandle;
use actix::{
    Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture,
};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// WebSocket Actor
struct WsSession {
    handle: SessionHandle,
    // Taken in `started` and attached as a stream
    outbound: Option<UnboundedReceiver<WsOutboundEvent>>,
    user_id: Option<i64>,
    events: SessionEvents,
    hb: Instant,
}

impl WsSession {
    fn new(events: SessionEvents) -> Self {
        let (handle, outbound) = SessionHandle::channel();
        Self {
            handle,
            outbound: Some(outbound),
            user_id: None,
            events,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(session = %act.handle.id(), "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(session = %self.handle.id(), "WebSocket session started");

        self.hb(ctx);

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }

        // Join the broadcast set before any frame is handled
        let events = self.events.clone();
        let handle = self.handle.clone();
        ctx.wait(async move { events.connect(&handle).await }.into_actor(self));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            session = %self.handle.id(),
            user_id = ?self.user_id,
            "WebSocket session stopped"
        );

        let events = self.events.clone();
        let session_id = self.handle.id();
        actix::spawn(async move {
            events.disconnect(session_id).await;
        });
    }
}

// Outbound events queued for this session
impl StreamHandler<WsOutboundEvent> for WsSession {
    fn handle(&mut self, event: WsOutboundEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(error = %e, "failed to encode outbound event"),
        }
    }

    // The session keeps its own sender, so the stream only ends on shutdown.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
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
                let events = self.events.clone();
                let handle = self.handle.clone();
                let user_id = self.user_id;

                // One frame at a time per session; later frames wait.
                ctx.wait(
                    async move { events.handle_frame(&handle, user_id, &text).await }
                        .into_actor(self)
                        .map(|user_id, act, _ctx| {
                            act.user_id = user_id;
                        }),
                );
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
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
) -> Result<HttpResponse, Error> {
    ws::start(WsSession::new(state.events.clone()), &req, stream)
}
