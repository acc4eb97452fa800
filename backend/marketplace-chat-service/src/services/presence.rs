//! Presence registry: which user is online on which session.
//!
//! One lock guards both the user -> session map and the set of connected
//! sessions, so "is the receiver online, then deliver" and "register, then
//! drain the pending queue" each happen as a single step. Lock order is
//! presence first, then the pending queue.

use crate::metrics;
use crate::models::MessageNotification;
use crate::services::pending::PendingNotificationQueue;
use crate::websocket::message_types::{PresenceStatus, WsOutboundEvent};
use crate::websocket::{SessionHandle, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// How a notification reached its recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Queued => "queued",
        }
    }
}

#[derive(Default)]
struct PresenceState {
    // user_id -> authenticated session
    online: HashMap<i64, SessionHandle>,
    // every open session, authenticated or not
    connected: HashMap<SessionId, SessionHandle>,
}

impl PresenceState {
    /// Send to every connected session, pruning the ones that went away
    fn broadcast(&mut self, event: &WsOutboundEvent, except: Option<SessionId>) {
        self.connected.retain(|id, handle| {
            if Some(*id) == except {
                return true;
            }
            handle.send(event.clone())
        });
    }

    fn take_offline(&mut self, user_id: i64) {
        if self.online.remove(&user_id).is_some() {
            metrics::ONLINE_USERS.set(self.online.len() as i64);
            info!(user_id, "user offline");
            self.broadcast(
                &WsOutboundEvent::UserStatusChange {
                    user_id,
                    status: PresenceStatus::Offline,
                },
                None,
            );
        }
    }
}

#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<PresenceState>>,
    pending: PendingNotificationQueue,
}

impl PresenceRegistry {
    pub fn new(pending: PendingNotificationQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PresenceState::default())),
            pending,
        }
    }

    pub fn pending(&self) -> &PendingNotificationQueue {
        &self.pending
    }

    async fn state(&self) -> MutexGuard<'_, PresenceState> {
        self.inner.lock().await
    }

    /// Track a freshly opened session so it receives broadcasts
    pub async fn connect(&self, handle: SessionHandle) {
        let mut state = self.state().await;
        state.connected.insert(handle.id(), handle);
        metrics::WS_CONNECTIONS.set(state.connected.len() as i64);
    }

    /// Forget a closed session. Returns the user that went offline with it.
    pub async fn disconnect(&self, session_id: SessionId) -> Option<i64> {
        let mut state = self.state().await;
        state.connected.remove(&session_id);
        metrics::WS_CONNECTIONS.set(state.connected.len() as i64);
        Self::unregister_locked(&mut state, session_id)
    }

    /// Bind `user_id` to `handle`, replacing any previous session for that
    /// user. Announces the user as online and flushes their pending
    /// notifications to the new session, oldest first. Returns how many
    /// notifications were flushed.
    pub async fn register(&self, user_id: i64, handle: SessionHandle) -> usize {
        let mut state = self.state().await;

        // A user reconnecting first shows up as connected; replacing keeps a
        // stale session from holding the user after they moved on.
        state.connected.insert(handle.id(), handle.clone());

        // A session speaks for one user at a time; re-authenticating as
        // someone else drops the earlier binding.
        let displaced: Vec<i64> = state
            .online
            .iter()
            .filter(|(other, bound)| **other != user_id && bound.id() == handle.id())
            .map(|(other, _)| *other)
            .collect();
        for other in displaced {
            debug!(user_id = other, session = %handle.id(), "session re-authenticated as another user");
            state.take_offline(other);
        }

        if let Some(previous) = state.online.insert(user_id, handle.clone()) {
            if previous.id() != handle.id() {
                debug!(user_id, old_session = %previous.id(), new_session = %handle.id(), "replaced session");
            }
        }
        metrics::ONLINE_USERS.set(state.online.len() as i64);
        metrics::WS_CONNECTIONS.set(state.connected.len() as i64);

        state.broadcast(
            &WsOutboundEvent::UserStatusChange {
                user_id,
                status: PresenceStatus::Online,
            },
            None,
        );

        let pending = self.pending.drain(user_id).await;
        let flushed = pending.len();
        for notification in pending {
            if !handle.send(WsOutboundEvent::MessageNotification(notification.clone())) {
                // Session closed while flushing; keep the rest for next time.
                self.pending.enqueue(user_id, notification).await;
            }
        }

        info!(user_id, session = %handle.id(), flushed, "user online");
        flushed
    }

    /// Remove the presence entry owned by `session_id`, if any.
    ///
    /// Linear in the number of online users. A session that never
    /// authenticated, or was already replaced, leaves the registry unchanged.
    pub async fn unregister_by_session(&self, session_id: SessionId) -> Option<i64> {
        let mut state = self.state().await;
        Self::unregister_locked(&mut state, session_id)
    }

    fn unregister_locked(state: &mut PresenceState, session_id: SessionId) -> Option<i64> {
        let user_id = state
            .online
            .iter()
            .find_map(|(user_id, handle)| (handle.id() == session_id).then_some(*user_id))?;
        state.take_offline(user_id);
        Some(user_id)
    }

    pub async fn lookup(&self, user_id: i64) -> Option<SessionHandle> {
        self.state().await.online.get(&user_id).cloned()
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.state().await.online.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.state().await.online.len()
    }

    /// Best-effort send to an online user. Returns false if the user is
    /// offline or their session has gone away.
    pub async fn send_to_user(&self, user_id: i64, event: WsOutboundEvent) -> bool {
        let mut state = self.state().await;
        let delivered = match state.online.get(&user_id) {
            Some(handle) => handle.send(event),
            None => return false,
        };
        if !delivered {
            state.take_offline(user_id);
        }
        delivered
    }

    /// Deliver `live` events to the user's session if they are online,
    /// otherwise queue `notification` for their next authentication.
    ///
    /// The presence check and the send happen under one lock, so a
    /// concurrent register or disconnect cannot lose the notification. A
    /// session whose channel is already closed counts as offline.
    pub async fn deliver_or_queue(
        &self,
        user_id: i64,
        live: Vec<WsOutboundEvent>,
        notification: MessageNotification,
    ) -> DeliveryOutcome {
        let mut state = self.state().await;

        let delivered = match state.online.get(&user_id) {
            Some(handle) => !handle.is_closed() && live.into_iter().all(|event| handle.send(event)),
            None => false,
        };
        if delivered {
            return DeliveryOutcome::Delivered;
        }
        state.take_offline(user_id);

        self.pending.enqueue(user_id, notification).await;
        DeliveryOutcome::Queued
    }

    /// Send to every connected session
    pub async fn broadcast(&self, event: WsOutboundEvent) {
        self.state().await.broadcast(&event, None);
    }

    /// Send to every authenticated session except the given user and the
    /// originating session. Returns the number of sessions reached.
    pub async fn broadcast_to_online(
        &self,
        event: WsOutboundEvent,
        exclude_user: i64,
        exclude_session: Option<SessionId>,
    ) -> usize {
        let state = self.state().await;
        state
            .online
            .iter()
            .filter(|(user_id, handle)| {
                **user_id != exclude_user && Some(handle.id()) != exclude_session
            })
            .filter(|(_, handle)| handle.send(event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(PendingNotificationQueue::new(100))
    }

    fn notification(message_id: i64) -> MessageNotification {
        MessageNotification {
            kind: "message".into(),
            message_id,
            conversation_id: 1,
            sender_id: 2,
            sender_name: "Bob".into(),
            message_preview: "hi".into(),
            listing_id: None,
            listing_type: None,
            listing_title: None,
            title: "New message from Bob".into(),
            body: "hi".into(),
            timestamp: Utc::now(),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<WsOutboundEvent>) -> Vec<WsOutboundEvent> {
        let mut events = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            events.push(evt);
        }
        events
    }

    #[tokio::test]
    async fn test_register_replaces_previous_session() {
        let registry = registry();
        let (first, _rx1) = SessionHandle::channel();
        let (second, _rx2) = SessionHandle::channel();

        registry.register(5, first.clone()).await;
        registry.register(5, second.clone()).await;

        assert_eq!(registry.lookup(5).await.map(|h| h.id()), Some(second.id()));
        assert_eq!(registry.online_count().await, 1);

        // Closing the replaced session must not take the user offline.
        assert_eq!(registry.unregister_by_session(first.id()).await, None);
        assert!(registry.is_online(5).await);
    }

    #[tokio::test]
    async fn test_reauthenticating_session_as_another_user_releases_the_first() {
        let registry = registry();
        let (watcher, mut watcher_rx) = SessionHandle::channel();
        registry.connect(watcher).await;
        let (handle, _rx) = SessionHandle::channel();

        registry.register(1, handle.clone()).await;
        registry.register(2, handle.clone()).await;
        assert!(!registry.is_online(1).await);
        assert_eq!(registry.lookup(2).await.map(|h| h.id()), Some(handle.id()));
        assert_eq!(registry.online_count().await, 1);

        assert_eq!(registry.disconnect(handle.id()).await, Some(2));
        assert_eq!(registry.online_count().await, 0);

        let offline: Vec<i64> = drain(&mut watcher_rx)
            .into_iter()
            .filter_map(|evt| match evt {
                WsOutboundEvent::UserStatusChange {
                    user_id,
                    status: PresenceStatus::Offline,
                } => Some(user_id),
                _ => None,
            })
            .collect();
        assert_eq!(offline, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unregister_unknown_session_is_noop() {
        let registry = registry();
        let (handle, _rx) = SessionHandle::channel();
        registry.register(1, handle).await;

        assert_eq!(registry.unregister_by_session(SessionId::new()).await, None);
        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_changes_reach_connected_sessions() {
        let registry = registry();
        let (watcher, mut watcher_rx) = SessionHandle::channel();
        registry.connect(watcher).await;

        let (user, _user_rx) = SessionHandle::channel();
        registry.register(9, user.clone()).await;
        registry.disconnect(user.id()).await;

        let events = drain(&mut watcher_rx);
        assert_eq!(
            events,
            vec![
                WsOutboundEvent::UserStatusChange {
                    user_id: 9,
                    status: PresenceStatus::Online
                },
                WsOutboundEvent::UserStatusChange {
                    user_id: 9,
                    status: PresenceStatus::Offline
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_register_flushes_pending_in_order() {
        let registry = registry();
        for id in [3, 4, 5] {
            registry.pending().enqueue(2, notification(id)).await;
        }

        let (handle, mut rx) = SessionHandle::channel();
        assert_eq!(registry.register(2, handle).await, 3);

        let flushed: Vec<i64> = drain(&mut rx)
            .into_iter()
            .filter_map(|evt| match evt {
                WsOutboundEvent::MessageNotification(n) => Some(n.message_id),
                _ => None,
            })
            .collect();
        assert_eq!(flushed, vec![3, 4, 5]);
        assert!(registry.pending().is_empty(2).await);
    }

    #[tokio::test]
    async fn test_deliver_or_queue_falls_back_when_channel_closed() {
        let registry = registry();
        let (handle, rx) = SessionHandle::channel();
        registry.register(4, handle).await;
        drop(rx);

        let outcome = registry
            .deliver_or_queue(4, vec![WsOutboundEvent::UserTyping { sender_id: 1 }], notification(1))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Queued);
        assert!(!registry.is_online(4).await);
        assert_eq!(registry.pending().len(4).await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_online_skips_poster_and_origin() {
        let registry = registry();
        let (poster, mut poster_rx) = SessionHandle::channel();
        let (other, mut other_rx) = SessionHandle::channel();
        let (anonymous, mut anonymous_rx) = SessionHandle::channel();
        registry.register(1, poster.clone()).await;
        registry.register(2, other).await;
        registry.connect(anonymous).await;
        drain(&mut poster_rx);
        drain(&mut other_rx);
        drain(&mut anonymous_rx);

        let reached = registry
            .broadcast_to_online(WsOutboundEvent::UserTyping { sender_id: 0 }, 1, Some(poster.id()))
            .await;

        assert_eq!(reached, 1);
        assert!(drain(&mut poster_rx).is_empty());
        assert!(drain(&mut anonymous_rx).is_empty());
        assert_eq!(drain(&mut other_rx).len(), 1);
    }
}
