//! Per-user FIFO of message notifications for users who are offline.
//!
//! Notifications pile up here until the user authenticates again, at which
//! point the presence registry drains the queue into the new session.
//! Nothing here is persisted; a restart drops whatever is queued.

use crate::models::MessageNotification;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone)]
pub struct PendingNotificationQueue {
    capacity: usize,
    queues: Arc<Mutex<HashMap<i64, VecDeque<MessageNotification>>>>,
}

impl PendingNotificationQueue {
    /// `capacity` bounds each user's queue; the oldest entry is dropped
    /// once it is full.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Append to the user's queue. Returns the notification evicted to make
    /// room, if any.
    pub async fn enqueue(
        &self,
        user_id: i64,
        notification: MessageNotification,
    ) -> Option<MessageNotification> {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(user_id).or_default();

        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        if let Some(dropped) = &evicted {
            crate::metrics::PENDING_NOTIFICATIONS_DROPPED_TOTAL.inc();
            warn!(
                user_id,
                message_id = dropped.message_id,
                "pending notification queue full, dropping oldest"
            );
        }

        queue.push_back(notification);
        crate::metrics::PENDING_NOTIFICATIONS_TOTAL.inc();
        evicted
    }

    /// Remove and return everything queued for the user, oldest first
    pub async fn drain(&self, user_id: i64) -> Vec<MessageNotification> {
        let mut queues = self.queues.lock().await;
        queues
            .remove(&user_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub async fn len(&self, user_id: i64) -> usize {
        let queues = self.queues.lock().await;
        queues.get(&user_id).map_or(0, VecDeque::len)
    }

    pub async fn is_empty(&self, user_id: i64) -> bool {
        self.len(user_id).await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    #[tokio::test]
    async fn test_drain_returns_fifo_order_and_empties_queue() {
        let queue = PendingNotificationQueue::new(10);
        for id in 1..=3 {
            queue.enqueue(7, notification(id)).await;
        }

        let drained: Vec<i64> = queue.drain(7).await.iter().map(|n| n.message_id).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(queue.drain(7).await.is_empty());
        assert!(queue.is_empty(7).await);
    }

    #[tokio::test]
    async fn test_queues_are_per_user() {
        let queue = PendingNotificationQueue::new(10);
        queue.enqueue(1, notification(10)).await;
        queue.enqueue(2, notification(20)).await;

        assert_eq!(queue.len(1).await, 1);
        assert_eq!(queue.drain(2).await[0].message_id, 20);
        assert_eq!(queue.len(1).await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let queue = PendingNotificationQueue::new(2);
        assert!(queue.enqueue(1, notification(1)).await.is_none());
        assert!(queue.enqueue(1, notification(2)).await.is_none());

        let evicted = queue.enqueue(1, notification(3)).await;
        assert_eq!(evicted.map(|n| n.message_id), Some(1));

        let ids: Vec<i64> = queue.drain(1).await.iter().map(|n| n.message_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
