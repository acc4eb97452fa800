//! Handlers for events arriving on a client's WebSocket session.
//!
//! The transport actor in `routes::wsroute` only parses frames and forwards
//! them here; everything a session can do is reachable without a socket.

pub mod session_events;

pub use session_events::SessionEvents;
