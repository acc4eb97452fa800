use crate::websocket::message_types::WsOutboundEvent;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

pub mod message_types;

/// Unique identifier for a live WebSocket session
///
/// Each connection gets its own id when it opens, so cleanup on close only
/// ever touches entries created by that connection.
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

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of a session's outbound event channel.
///
/// Sends never block; the WebSocket actor drains the receiving half and
/// writes frames to the socket.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    sender: UnboundedSender<WsOutboundEvent>,
}

impl SessionHandle {
    /// New handle plus the receiver its events arrive on
    pub fn channel() -> (Self, UnboundedReceiver<WsOutboundEvent>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                id: SessionId::new(),
                sender: tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns false when the session has already gone away
    pub fn send(&self, event: WsOutboundEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
