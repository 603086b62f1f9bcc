//! In-memory message queue with visibility-timeout semantics
//!
//! `InMemoryQueue` behaves like a hosted queue as far as the consumer can
//! observe:
//!
//! - a received message is hidden for `visibility_timeout`, then becomes
//!   visible again unless it was deleted in the meantime
//! - every receive issues a fresh receipt handle; only the latest handle can
//!   delete or dead-letter the message
//! - with a redrive policy, a message received more than `max_receive_count`
//!   times is moved to the dead-letter list instead of being delivered
//! - `receive` long-polls: it returns as soon as a message is available, and
//!   wakes on `send` or when an in-flight message becomes visible again
//!
//! It backs replay runs and tests. `send` is the publisher contract.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::traits::MessageQueue;
use crate::types::{AggregatorError, QueueMessage, EVENT_TYPE_ATTRIBUTE};

/// Configuration for an in-memory queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a received message stays hidden
    pub visibility_timeout: Duration,
    /// Receives after which a message is dead-lettered; `None` disables redrive
    pub max_receive_count: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: Some(5),
        }
    }
}

impl QueueConfig {
    /// Create a QueueConfig; a zero visibility timeout or receive count falls
    /// back to the default
    pub fn new(visibility_timeout: Duration, max_receive_count: Option<u32>) -> Self {
        let default = Self::default();

        let visibility_timeout = if visibility_timeout.is_zero() {
            tracing::warn!(
                default_secs = default.visibility_timeout.as_secs(),
                "invalid visibility timeout, using default"
            );
            default.visibility_timeout
        } else {
            visibility_timeout
        };

        let max_receive_count = match max_receive_count {
            Some(0) => {
                tracing::warn!(
                    default = ?default.max_receive_count,
                    "invalid max receive count, using default"
                );
                default.max_receive_count
            }
            other => other,
        };

        Self {
            visibility_timeout,
            max_receive_count,
        }
    }
}

/// Why a message ended up in the dead-letter list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// Redrive policy: received too many times without being deleted
    MaxReceiveCountExceeded,
    /// The consumer moved it explicitly
    Rejected,
}

/// A message that left the queue without being processed
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub receive_count: u32,
    pub reason: DeadLetterReason,
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

impl StoredMessage {
    fn into_dead_letter(self, reason: DeadLetterReason) -> DeadLetter {
        DeadLetter {
            message_id: self.message_id,
            body: self.body,
            attributes: self.attributes,
            receive_count: self.receive_count,
            reason,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<DeadLetter>,
}

impl QueueState {
    /// Hand out up to `max` visible messages, applying the redrive policy
    fn take_visible(&mut self, now: Instant, max: usize, config: &QueueConfig) -> Vec<QueueMessage> {
        let mut batch = Vec::new();
        let mut index = 0;

        while index < self.messages.len() && batch.len() < max {
            if self.messages[index].visible_at > now {
                index += 1;
                continue;
            }

            let exhausted = config
                .max_receive_count
                .map(|max_receives| self.messages[index].receive_count >= max_receives)
                .unwrap_or(false);

            if exhausted {
                if let Some(stored) = self.messages.remove(index) {
                    tracing::warn!(
                        message_id = %stored.message_id,
                        receive_count = stored.receive_count,
                        "message exceeded max receive count, moved to dead letters"
                    );
                    self.dead_letters
                        .push(stored.into_dead_letter(DeadLetterReason::MaxReceiveCountExceeded));
                }
                continue;
            }

            let stored = &mut self.messages[index];
            let receipt_handle = Uuid::now_v7().to_string();
            stored.receive_count += 1;
            stored.visible_at = now + config.visibility_timeout;
            stored.receipt_handle = Some(receipt_handle.clone());

            batch.push(QueueMessage {
                message_id: stored.message_id.clone(),
                receipt_handle,
                body: stored.body.clone(),
                attributes: stored.attributes.clone(),
                receive_count: stored.receive_count,
            });
            index += 1;
        }

        batch
    }

    /// Earliest instant at which an in-flight message becomes visible
    fn next_visible_at(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .map(|stored| stored.visible_at)
            .filter(|at| *at > now)
            .min()
    }

    /// Remove the message currently delivered under `receipt_handle`
    fn remove_by_receipt(&mut self, receipt_handle: &str) -> Option<StoredMessage> {
        let position = self
            .messages
            .iter()
            .position(|stored| stored.receipt_handle.as_deref() == Some(receipt_handle))?;
        self.messages.remove(position)
    }
}

/// Process-local queue implementing [`MessageQueue`]
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Publish a message; returns its message id
    pub async fn send(
        &self,
        body: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> String {
        let message_id = Uuid::now_v7().to_string();

        {
            let mut state = self.state.lock().await;
            state.messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.into(),
                attributes,
                receive_count: 0,
                visible_at: Instant::now(),
                receipt_handle: None,
            });
        }

        self.notify.notify_waiters();
        message_id
    }

    /// Publish a message tagged with an `EventType` attribute
    pub async fn send_event(&self, event_type: &str, body: impl Into<String>) -> String {
        let attributes =
            HashMap::from([(EVENT_TYPE_ATTRIBUTE.to_string(), event_type.to_string())]);
        self.send(body, attributes).await
    }

    /// Messages not yet deleted, visible or in flight
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages currently hidden by an unexpired visibility timeout
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .messages
            .iter()
            .filter(|stored| stored.visible_at > now)
            .count()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, AggregatorError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let wake_at = {
                let mut state = self.state.lock().await;
                // Register for `send` wake-ups before releasing the lock
                notified.as_mut().enable();

                let now = Instant::now();
                let batch = state.take_visible(now, max_messages, &self.config);
                if !batch.is_empty() || now >= deadline {
                    return Ok(batch);
                }

                state
                    .next_visible_at(now)
                    .map(|at| at.min(deadline))
                    .unwrap_or(deadline)
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), AggregatorError> {
        let mut state = self.state.lock().await;

        match state.remove_by_receipt(receipt_handle) {
            Some(_) => Ok(()),
            None => Err(AggregatorError::acknowledge(
                receipt_handle,
                "receipt handle is unknown or stale",
            )),
        }
    }

    async fn dead_letter(&self, receipt_handle: &str) -> Result<(), AggregatorError> {
        let mut state = self.state.lock().await;

        match state.remove_by_receipt(receipt_handle) {
            Some(stored) => {
                state
                    .dead_letters
                    .push(stored.into_dead_letter(DeadLetterReason::Rejected));
                Ok(())
            }
            None => Err(AggregatorError::acknowledge(
                receipt_handle,
                "receipt handle is unknown or stale",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TRANSACTION_CREATED_EVENT;
    use std::sync::Arc;

    const VISIBILITY: Duration = Duration::from_secs(30);

    fn queue(max_receive_count: Option<u32>) -> InMemoryQueue {
        InMemoryQueue::new(QueueConfig::new(VISIBILITY, max_receive_count))
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_hides_message_until_visibility_expires() {
        let queue = queue(None);
        queue.send_event(TRANSACTION_CREATED_EVENT, "{}").await;

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);
        assert_eq!(first[0].event_type(), Some(TRANSACTION_CREATED_EVENT));

        let hidden = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(hidden.is_empty());
        assert_eq!(queue.in_flight().await, 1);

        tokio::time::advance(VISIBILITY).await;

        let again = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message_id, first[0].message_id);
        assert_eq!(again[0].receive_count, 2);
        assert_ne!(again[0].receipt_handle, first[0].receipt_handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_message() {
        let queue = queue(None);
        queue.send_event(TRANSACTION_CREATED_EVENT, "{}").await;

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        queue.delete(&batch[0].receipt_handle).await.unwrap();

        tokio::time::advance(VISIBILITY * 2).await;
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_receipt_cannot_delete() {
        let queue = queue(None);
        queue.send_event(TRANSACTION_CREATED_EVENT, "{}").await;

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        tokio::time::advance(VISIBILITY).await;
        let second = queue.receive(10, Duration::ZERO).await.unwrap();

        let stale = queue.delete(&first[0].receipt_handle).await;
        assert!(matches!(stale, Err(AggregatorError::Acknowledge { .. })));

        queue.delete(&second[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_respects_max_messages_in_send_order() {
        let queue = queue(None);
        for n in 0..5 {
            queue.send_event(TRANSACTION_CREATED_EVENT, n.to_string()).await;
        }

        let batch = queue.receive(3, Duration::ZERO).await.unwrap();
        let bodies: Vec<&str> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["0", "1", "2"]);

        let rest = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redrive_moves_message_after_max_receives() {
        let queue = queue(Some(2));
        queue.send_event(TRANSACTION_CREATED_EVENT, "poison").await;

        for _ in 0..2 {
            assert_eq!(queue.receive(10, Duration::ZERO).await.unwrap().len(), 1);
            tokio::time::advance(VISIBILITY).await;
        }

        let third = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(third.is_empty());

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, "poison");
        assert_eq!(dead[0].receive_count, 2);
        assert_eq!(dead[0].reason, DeadLetterReason::MaxReceiveCountExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_dead_letter() {
        let queue = queue(None);
        queue.send("unrouted", HashMap::new()).await;

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch[0].event_type(), None);
        queue.dead_letter(&batch[0].receipt_handle).await.unwrap();

        assert!(queue.is_empty().await);
        assert_eq!(queue.dead_letters().await[0].reason, DeadLetterReason::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_wakes_on_send() {
        let queue = Arc::new(queue(None));

        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive(10, Duration::from_secs(20)).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        queue.send_event(TRANSACTION_CREATED_EVENT, "late").await;

        let batch = receiver.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_wakes_when_message_becomes_visible() {
        let queue = queue(None);
        queue.send_event(TRANSACTION_CREATED_EVENT, "retry").await;
        queue.receive(10, Duration::ZERO).await.unwrap();

        let started = Instant::now();
        let batch = queue.receive(10, Duration::from_secs(60)).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(started.elapsed(), VISIBILITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_times_out_empty() {
        let queue = queue(None);

        let started = Instant::now();
        let batch = queue.receive(10, Duration::from_secs(20)).await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn test_zero_config_values_fall_back() {
        let config = QueueConfig::new(Duration::ZERO, Some(0));
        assert_eq!(config, QueueConfig::default());

        let disabled = QueueConfig::new(VISIBILITY, None);
        assert_eq!(disabled.max_receive_count, None);
    }
}
