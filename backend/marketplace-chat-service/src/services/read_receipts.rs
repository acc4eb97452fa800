//! Marks messages read and tells the original senders.
//!
//! Each attempt is one storage transaction. Lock contention is retried with
//! exponential backoff plus jitter; anything else fails straight away.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::services::presence::PresenceRegistry;
use crate::services::retry::BackoffPolicy;
use crate::store::{ChatStore, ReadTarget};
use crate::websocket::message_types::WsOutboundEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a mark-read operation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiptState {
    /// Retries already spent
    Attempting(u32),
    /// Rows flipped from unread to read
    Committed(u64),
}

#[derive(Clone)]
pub struct ReadReceiptUpdater {
    store: Arc<dyn ChatStore>,
    presence: PresenceRegistry,
    policy: BackoffPolicy,
}

impl ReadReceiptUpdater {
    pub fn new(store: Arc<dyn ChatStore>, presence: PresenceRegistry, policy: BackoffPolicy) -> Self {
        Self {
            store,
            presence,
            policy,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Suggested client wait after a failed update: the next backoff step
    /// without jitter. `None` when the error is not worth retrying.
    pub fn retry_after(&self, err: &AppError) -> Option<Duration> {
        match err {
            AppError::TransientConflict { attempts } => Some(self.policy.step(*attempts)),
            _ => None,
        }
    }

    /// Mark the target read, then notify senders who are online.
    ///
    /// Returns the number of messages that changed state. Failing to notify
    /// does not undo the update.
    pub async fn mark_read(&self, target: ReadTarget) -> AppResult<u64> {
        let updated = self.commit(target).await?;
        if updated > 0 {
            self.fan_out(target).await;
        }
        Ok(updated)
    }

    /// [`Self::mark_read`] on behalf of `reader_id`, who may only mark
    /// messages addressed to them.
    pub async fn mark_read_as(&self, reader_id: i64, target: ReadTarget) -> AppResult<u64> {
        match target {
            ReadTarget::Conversation {
                reader_id: target_reader,
                ..
            } if target_reader != reader_id => return Err(AppError::Unauthorized),
            ReadTarget::Conversation { .. } => {}
            ReadTarget::Message { message_id } => {
                let message = self
                    .store
                    .get_message(message_id)
                    .await?
                    .ok_or(AppError::NotFound)?;
                if message.receiver_id != reader_id {
                    warn!(message_id, reader_id, "mark-read refused for another user's message");
                    return Err(AppError::Unauthorized);
                }
            }
        }
        self.mark_read(target).await
    }

    async fn commit(&self, target: ReadTarget) -> AppResult<u64> {
        let mut state = ReceiptState::Attempting(0);
        loop {
            match state {
                ReceiptState::Attempting(retries) => match self.store.mark_read(target).await {
                    Ok(updated) => state = ReceiptState::Committed(updated),
                    Err(e) if e.is_transient() && retries < self.policy.max_retries => {
                        let delay = self.policy.delay(retries);
                        warn!(
                            ?target,
                            attempt = retries + 1,
                            max_retries = self.policy.max_retries,
                            ?delay,
                            "read receipt conflict, retrying"
                        );
                        metrics::READ_RECEIPT_RETRIES_TOTAL.inc();
                        tokio::time::sleep(delay).await;
                        state = ReceiptState::Attempting(retries + 1);
                    }
                    Err(e) if e.is_transient() => {
                        warn!(?target, error = %e, "read receipt conflict persisted, giving up");
                        metrics::READ_RECEIPTS_TOTAL
                            .with_label_values(&["transient_exhausted"])
                            .inc();
                        return Err(AppError::TransientConflict {
                            attempts: retries + 1,
                        });
                    }
                    Err(e) => {
                        warn!(?target, error = %e, "read receipt update failed");
                        metrics::READ_RECEIPTS_TOTAL
                            .with_label_values(&["failed"])
                            .inc();
                        return Err(e.into());
                    }
                },
                ReceiptState::Committed(updated) => {
                    metrics::READ_RECEIPTS_TOTAL
                        .with_label_values(&["committed"])
                        .inc();
                    info!(?target, updated, "messages marked read");
                    return Ok(updated);
                }
            }
        }
    }

    /// Work out who to tell and send `messages_read` to each online sender
    async fn fan_out(&self, target: ReadTarget) {
        let (conversation_id, reader_id, senders) = match target {
            ReadTarget::Conversation {
                conversation_id,
                reader_id,
            } => match self.store.senders_to_reader(conversation_id, reader_id).await {
                Ok(senders) => (conversation_id, reader_id, senders),
                Err(e) => {
                    warn!(conversation_id, error = %e, "could not load senders for read fan-out");
                    return;
                }
            },
            ReadTarget::Message { message_id } => match self.store.get_message(message_id).await {
                Ok(Some(message)) => (
                    message.conversation_id,
                    message.receiver_id,
                    vec![message.sender_id],
                ),
                Ok(None) => return,
                Err(e) => {
                    warn!(message_id, error = %e, "could not load message for read fan-out");
                    return;
                }
            },
        };

        for sender_id in senders {
            let sent = self
                .presence
                .send_to_user(
                    sender_id,
                    WsOutboundEvent::MessagesRead {
                        conversation_id,
                        reader_id,
                    },
                )
                .await;
            debug!(sender_id, conversation_id, sent, "read receipt fan-out");
        }
    }
}
