//! Queue-polling consumer loop
//!
//! `EventConsumer` long-polls a [`MessageQueue`], routes each message by its
//! `EventType` attribute, decodes it, and runs the processing use case through
//! the circuit breaker. A message is deleted only after its effect was
//! persisted; every other outcome leaves it in the queue for redelivery.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──run()──▶ Running ──cancel──▶ Stopping ──▶ Stopped
//! ```
//!
//! The current state is published on a `watch` channel. Cancellation races the
//! poll and the poll back-off; a batch that was already received is finished
//! before the loop exits.
//!
//! # Failure Isolation
//!
//! Per-message failures are logged and counted in the [`BatchReport`], never
//! propagated. Only a failed poll changes the loop's control flow: it backs
//! off for `poll_retry_delay` and polls again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::circuit_breaker::CircuitBreaker;
use crate::core::processing::{ProcessOutcome, TransactionProcessingUseCase};
use crate::core::traits::MessageQueue;
use crate::io::event_format::decode_event;
use crate::types::{AggregatorError, QueueMessage, TRANSACTION_CREATED_EVENT};

/// What to do with messages whose event type is missing or not handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownEventPolicy {
    /// Leave the message in the queue; the redrive policy eventually moves it
    #[default]
    Retain,
    /// Move the message to the dead-letter queue right away
    DeadLetter,
}

/// Configuration for the consumer loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Maximum messages per poll
    pub batch_size: usize,
    /// Long-poll wait per receive
    pub wait_time: Duration,
    /// Back-off after a failed poll
    pub poll_retry_delay: Duration,
    /// `EventType` attribute value this consumer handles
    pub event_type: String,
    pub unknown_event_policy: UnknownEventPolicy,
    /// Stop after the first poll that returns no messages
    pub exit_when_idle: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_time: Duration::from_secs(20),
            poll_retry_delay: Duration::from_secs(5),
            event_type: TRANSACTION_CREATED_EVENT.to_string(),
            unknown_event_policy: UnknownEventPolicy::Retain,
            exit_when_idle: false,
        }
    }
}

impl ConsumerConfig {
    /// Create a ConsumerConfig with custom polling values
    ///
    /// A zero batch size falls back to the default. Zero wait time (short
    /// polling) and zero retry delay are accepted.
    pub fn new(batch_size: usize, wait_time: Duration, poll_retry_delay: Duration) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            tracing::warn!(
                batch_size,
                default = default.batch_size,
                "invalid batch size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        Self {
            batch_size,
            wait_time,
            poll_retry_delay,
            ..default
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_unknown_event_policy(mut self, policy: UnknownEventPolicy) -> Self {
        self.unknown_event_policy = policy;
        self
    }

    pub fn with_exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.exit_when_idle = exit_when_idle;
        self
    }
}

/// Lifecycle state of the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Result of handling one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Applied to its aggregate and deleted
    Processed,
    /// Already applied within the dedup window; deleted without effect
    Duplicate,
    /// Event type missing or not handled; not decoded
    UnknownEventType,
    /// Body could not be decoded; retained
    DecodeFailed,
    /// Breaker rejected the call; retained
    CircuitOpen,
    /// Processing failed downstream; retained
    ProcessingFailed,
}

impl MessageOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageOutcome::Processed => "processed",
            MessageOutcome::Duplicate => "duplicate",
            MessageOutcome::UnknownEventType => "unknown_event_type",
            MessageOutcome::DecodeFailed => "decode_failed",
            MessageOutcome::CircuitOpen => "circuit_open",
            MessageOutcome::ProcessingFailed => "processing_failed",
        }
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts for one batch, or summed over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub unknown_event_types: usize,
    pub decode_failures: usize,
    pub circuit_open: usize,
    pub processing_failures: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: MessageOutcome) {
        self.received += 1;
        match outcome {
            MessageOutcome::Processed => self.processed += 1,
            MessageOutcome::Duplicate => self.duplicates += 1,
            MessageOutcome::UnknownEventType => self.unknown_event_types += 1,
            MessageOutcome::DecodeFailed => self.decode_failures += 1,
            MessageOutcome::CircuitOpen => self.circuit_open += 1,
            MessageOutcome::ProcessingFailed => self.processing_failures += 1,
        }
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.received += other.received;
        self.processed += other.processed;
        self.duplicates += other.duplicates;
        self.unknown_event_types += other.unknown_event_types;
        self.decode_failures += other.decode_failures;
        self.circuit_open += other.circuit_open;
        self.processing_failures += other.processing_failures;
    }

    /// Messages deleted from the queue as a result of this batch
    pub fn acknowledged(&self) -> usize {
        self.processed + self.duplicates
    }
}

/// Long-running queue consumer
pub struct EventConsumer {
    queue: Arc<dyn MessageQueue>,
    use_case: TransactionProcessingUseCase,
    breaker: Arc<CircuitBreaker>,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl EventConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        use_case: TransactionProcessingUseCase,
        breaker: Arc<CircuitBreaker>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);

        Self {
            queue,
            use_case,
            breaker,
            config,
            state,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run the polling loop until `cancel` fires (or the queue runs idle, with
    /// `exit_when_idle`)
    ///
    /// # Returns
    ///
    /// Outcome counts summed over every batch handled.
    ///
    /// # Errors
    ///
    /// `Config` if the consumer was already started. Nothing that happens
    /// while polling or processing is returned as an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<BatchReport, AggregatorError> {
        let started = self.state.send_if_modified(|state| {
            if *state == ConsumerState::Idle {
                *state = ConsumerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(AggregatorError::config("consumer has already been started"));
        }

        tracing::info!(
            batch_size = self.config.batch_size,
            wait_secs = self.config.wait_time.as_secs_f64(),
            event_type = %self.config.event_type,
            "event consumer started"
        );

        let mut totals = BatchReport::default();

        while !cancel.is_cancelled() {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(self.config.batch_size, self.config.wait_time) => received,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    if self.config.exit_when_idle {
                        tracing::info!("queue is idle, stopping consumer");
                        break;
                    }
                }
                Ok(messages) => {
                    let report = self.process_batch(&messages).await;
                    totals.merge(&report);
                    self.use_case.prune_processed();
                }
                Err(error) => {
                    counter!("consumer.poll_failures").increment(1);
                    tracing::error!(
                        error = %error,
                        retry_in_ms = self.config.poll_retry_delay.as_millis() as u64,
                        "failed to poll queue"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_retry_delay) => {}
                    }
                }
            }
        }

        self.state.send_replace(ConsumerState::Stopping);
        tracing::info!(
            received = totals.received,
            processed = totals.processed,
            duplicates = totals.duplicates,
            unacknowledged = totals.received - totals.acknowledged(),
            "event consumer stopping"
        );
        self.state.send_replace(ConsumerState::Stopped);

        Ok(totals)
    }

    /// Poll once and handle whatever was received
    ///
    /// # Errors
    ///
    /// `PollFailure` if the receive itself failed.
    pub async fn poll_once(&self) -> Result<BatchReport, AggregatorError> {
        let messages = self
            .queue
            .receive(self.config.batch_size, self.config.wait_time)
            .await
            .map_err(|e| match e {
                AggregatorError::PollFailure { .. } => e,
                other => AggregatorError::poll_failure(other.to_string()),
            })?;

        Ok(self.process_batch(&messages).await)
    }

    /// Handle messages sequentially, in receipt order
    async fn process_batch(&self, messages: &[QueueMessage]) -> BatchReport {
        let mut report = BatchReport::default();

        for message in messages {
            let outcome = self.handle_message(message).await;
            counter!("consumer.messages", "outcome" => outcome.as_str()).increment(1);
            report.record(outcome);
        }

        tracing::debug!(
            received = report.received,
            acknowledged = report.acknowledged(),
            "batch handled"
        );

        report
    }

    /// Route, decode and process one message, acknowledging it on success
    pub async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome {
        let event_type = message.event_type();

        if event_type != Some(self.config.event_type.as_str()) {
            tracing::trace!(
                message_id = %message.message_id,
                event_type = event_type.unwrap_or("<missing>"),
                "skipping message with unhandled event type"
            );

            if self.config.unknown_event_policy == UnknownEventPolicy::DeadLetter {
                if let Err(error) = self.queue.dead_letter(&message.receipt_handle).await {
                    tracing::warn!(
                        message_id = %message.message_id,
                        error = %error,
                        "failed to dead-letter message"
                    );
                }
            }
            return MessageOutcome::UnknownEventType;
        }

        let event = match decode_event(Some(&message.message_id), &message.body) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %error,
                    "failed to decode message"
                );
                return MessageOutcome::DecodeFailed;
            }
        };

        let use_case = &self.use_case;
        let result = self
            .breaker
            .execute(|| use_case.process_event(&event))
            .await;

        match result {
            Ok(processed) => {
                self.acknowledge(message).await;

                match processed {
                    ProcessOutcome::Applied(aggregate) => {
                        tracing::debug!(
                            message_id = %message.message_id,
                            transaction_id = %event.transaction_id,
                            merchant_id = %event.merchant_id,
                            balance_date = %aggregate.balance_date(),
                            net_balance = %aggregate.net_balance(),
                            "transaction applied"
                        );
                        MessageOutcome::Processed
                    }
                    ProcessOutcome::Duplicate => MessageOutcome::Duplicate,
                }
            }
            Err(AggregatorError::CircuitOpen) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    transaction_id = %event.transaction_id,
                    "circuit open, leaving message for redelivery"
                );
                MessageOutcome::CircuitOpen
            }
            Err(error) => {
                tracing::error!(
                    message_id = %message.message_id,
                    transaction_id = %event.transaction_id,
                    merchant_id = %event.merchant_id,
                    error = %error,
                    "failed to process transaction"
                );
                MessageOutcome::ProcessingFailed
            }
        }
    }

    async fn acknowledge(&self, message: &QueueMessage) {
        // The effect is already persisted; a redelivery is absorbed by deduplication
        if let Err(error) = self.queue.delete(&message.receipt_handle).await {
            tracing::warn!(
                message_id = %message.message_id,
                error = %error,
                "failed to delete processed message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::queue::{InMemoryQueue, QueueConfig};
    use crate::core::circuit_breaker::{BreakerConfig, CircuitState};
    use crate::core::processed_transactions::ProcessedTransactions;
    use crate::core::testing::FlakyStore;
    use crate::core::traits::AggregateStore;
    use crate::io::event_format::encode_event;
    use crate::types::{InboundTransactionEvent, TransactionType};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rstest::rstest;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use uuid::Uuid;

    const RETRY_DELAY: Duration = Duration::from_secs(5);

    /// Queue whose first `failures` polls fail
    struct FailingQueue {
        inner: InMemoryQueue,
        failures_left: AtomicUsize,
        polls: AtomicUsize,
    }

    impl FailingQueue {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryQueue::new(QueueConfig::default()),
                failures_left: AtomicUsize::new(failures),
                polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageQueue for FailingQueue {
        async fn receive(
            &self,
            max_messages: usize,
            wait: Duration,
        ) -> Result<Vec<QueueMessage>, AggregatorError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(AggregatorError::poll_failure("endpoint unreachable"));
            }
            self.inner.receive(max_messages, wait).await
        }

        async fn delete(&self, receipt_handle: &str) -> Result<(), AggregatorError> {
            self.inner.delete(receipt_handle).await
        }

        async fn dead_letter(&self, receipt_handle: &str) -> Result<(), AggregatorError> {
            self.inner.dead_letter(receipt_handle).await
        }
    }

    struct Harness {
        queue: Arc<InMemoryQueue>,
        store: Arc<FlakyStore>,
        consumer: EventConsumer,
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig::new(10, Duration::ZERO, RETRY_DELAY).with_exit_when_idle(true)
    }

    fn harness_with(config: ConsumerConfig) -> Harness {
        let queue = Arc::new(InMemoryQueue::new(QueueConfig::new(
            Duration::from_secs(30),
            None,
        )));
        let store = Arc::new(FlakyStore::new());
        let use_case = TransactionProcessingUseCase::new(
            store.clone(),
            Arc::new(ProcessedTransactions::new(Duration::from_secs(900))),
        );
        let breaker = Arc::new(CircuitBreaker::new(
            "aggregate-store",
            BreakerConfig::new(2, Duration::from_secs(30)),
        ));
        let consumer = EventConsumer::new(queue.clone(), use_case, breaker, config);

        Harness {
            queue,
            store,
            consumer,
        }
    }

    fn harness() -> Harness {
        harness_with(config())
    }

    fn event(merchant_id: Uuid, kind: TransactionType, cents: i64) -> InboundTransactionEvent {
        let at = Utc.with_ymd_and_hms(2026, 1, 17, 10, 0, 0).unwrap();
        InboundTransactionEvent {
            transaction_id: Uuid::now_v7(),
            merchant_id,
            kind,
            amount: Decimal::new(cents, 2),
            transaction_date: at,
            occurred_at: at,
        }
    }

    async fn publish(queue: &InMemoryQueue, event: &InboundTransactionEvent) {
        queue
            .send_event(TRANSACTION_CREATED_EVENT, encode_event(event).unwrap())
            .await;
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 17).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_message_is_deleted() {
        let h = harness();
        let merchant = Uuid::now_v7();
        publish(&h.queue, &event(merchant, TransactionType::Credit, 10050)).await;
        publish(&h.queue, &event(merchant, TransactionType::Debit, 5025)).await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.processed, 2);
        assert!(h.queue.is_empty().await);
        let stored = h.store.find_by_key(merchant, day()).await.unwrap().unwrap();
        assert_eq!(stored.net_balance(), Decimal::new(5025, 2));
    }

    #[rstest]
    #[case::malformed_json("{not json")]
    #[case::null_body("null")]
    #[case::unknown_type_code(r#"{"transactionId":"0195f1a2-0000-7000-8000-0000000000aa","merchantId":"0195f1a2-0000-7000-8000-000000000001","type":7,"amount":1,"transactionDate":"2026-01-17T10:00:00Z"}"#)]
    #[tokio::test(start_paused = true)]
    async fn test_undecodable_message_is_retained(#[case] body: &str) {
        let h = harness();
        h.queue.send_event(TRANSACTION_CREATED_EVENT, body).await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.decode_failures, 1);
        assert_eq!(h.queue.len().await, 1);
        assert_eq!(h.store.calls(), 0);
    }

    #[rstest]
    #[case::other_event_type(Some("TransactionDeletedEvent"))]
    #[case::missing_event_type(None)]
    #[tokio::test(start_paused = true)]
    async fn test_unknown_event_type_is_not_decoded(#[case] event_type: Option<&str>) {
        let h = harness();
        let body = encode_event(&event(Uuid::now_v7(), TransactionType::Credit, 100)).unwrap();
        let attributes = event_type
            .map(|value| HashMap::from([("EventType".to_string(), value.to_string())]))
            .unwrap_or_default();
        h.queue.send(body, attributes).await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.unknown_event_types, 1);
        assert_eq!(h.queue.len().await, 1);
        assert!(h.queue.dead_letters().await.is_empty());
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_event_type_dead_letter_policy() {
        let h = harness_with(config().with_unknown_event_policy(UnknownEventPolicy::DeadLetter));
        h.queue.send_event("TransactionDeletedEvent", "{}").await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.unknown_event_types, 1);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.queue.dead_letters().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retains_message_and_opens_breaker() {
        let h = harness();
        h.store.set_unavailable(true);
        for _ in 0..3 {
            publish(&h.queue, &event(Uuid::now_v7(), TransactionType::Credit, 100)).await;
        }

        let report = h.consumer.poll_once().await.unwrap();

        // Threshold is 2: the third message never reaches the store
        assert_eq!(report.processing_failures, 2);
        assert_eq!(report.circuit_open, 1);
        assert_eq!(h.store.calls(), 2);
        assert_eq!(h.consumer.breaker().state(), CircuitState::Open);
        assert_eq!(h.queue.len().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_cooldown_processes_redelivery() {
        let h = harness();
        let merchant = Uuid::now_v7();
        h.store.set_unavailable(true);
        for _ in 0..2 {
            publish(&h.queue, &event(merchant, TransactionType::Credit, 100)).await;
        }
        h.consumer.poll_once().await.unwrap();
        assert_eq!(h.consumer.breaker().state(), CircuitState::Open);

        h.store.set_unavailable(false);
        tokio::time::advance(Duration::from_secs(31)).await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(h.consumer.breaker().state(), CircuitState::Closed);
        let stored = h.store.find_by_key(merchant, day()).await.unwrap().unwrap();
        assert_eq!(stored.total_credits(), Decimal::new(200, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_duplicate_is_acknowledged_once_applied() {
        let h = harness();
        let merchant = Uuid::now_v7();
        let credit = event(merchant, TransactionType::Credit, 10000);
        publish(&h.queue, &credit).await;
        publish(&h.queue, &credit).await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.duplicates, 1);
        assert!(h.queue.is_empty().await);
        let stored = h.store.find_by_key(merchant, day()).await.unwrap().unwrap();
        assert_eq!(stored.total_credits(), Decimal::new(10000, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_bad_message_does_not_abort_batch() {
        let h = harness();
        let merchant = Uuid::now_v7();
        h.queue.send_event(TRANSACTION_CREATED_EVENT, "{broken").await;
        publish(&h.queue, &event(merchant, TransactionType::Credit, 700)).await;

        let report = h.consumer.poll_once().await.unwrap();

        assert_eq!(report.decode_failures, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_and_reports_lifecycle() {
        let h = harness();
        let mut states = h.consumer.subscribe();
        publish(&h.queue, &event(Uuid::now_v7(), TransactionType::Credit, 100)).await;
        assert_eq!(h.consumer.state(), ConsumerState::Idle);

        let totals = h.consumer.run(CancellationToken::new()).await.unwrap();

        assert_eq!(totals.processed, 1);
        assert_eq!(h.consumer.state(), ConsumerState::Stopped);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConsumerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_twice_is_rejected() {
        let h = harness();
        h.consumer.run(CancellationToken::new()).await.unwrap();

        let second = h.consumer.run(CancellationToken::new()).await;

        assert!(matches!(second, Err(AggregatorError::Config { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_backs_off_then_retries() {
        let queue = Arc::new(FailingQueue::new(1));
        let store = Arc::new(FlakyStore::new());
        let consumer = EventConsumer::new(
            queue.clone(),
            TransactionProcessingUseCase::without_deduplication(store),
            Arc::new(CircuitBreaker::new("aggregate-store", BreakerConfig::default())),
            config(),
        );

        let started = Instant::now();
        consumer.run(CancellationToken::new()).await.unwrap();

        assert_eq!(queue.polls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_once_surfaces_poll_failure() {
        let queue = Arc::new(FailingQueue::new(1));
        let consumer = EventConsumer::new(
            queue,
            TransactionProcessingUseCase::without_deduplication(Arc::new(FlakyStore::new())),
            Arc::new(CircuitBreaker::new("aggregate-store", BreakerConfig::default())),
            config(),
        );

        let result = consumer.poll_once().await;

        assert!(matches!(result, Err(AggregatorError::PollFailure { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_back_off_exits_promptly() {
        let queue = Arc::new(FailingQueue::new(usize::MAX));
        let consumer = Arc::new(EventConsumer::new(
            queue,
            TransactionProcessingUseCase::without_deduplication(Arc::new(FlakyStore::new())),
            Arc::new(CircuitBreaker::new("aggregate-store", BreakerConfig::default())),
            config(),
        ));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let handle = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_long_poll_exits_promptly() {
        let h = harness_with(
            ConsumerConfig::new(10, Duration::from_secs(20), RETRY_DELAY),
        );
        let consumer = Arc::new(h.consumer);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let handle = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        let totals = handle.await.unwrap().unwrap();

        assert_eq!(totals, BatchReport::default());
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_batch_size_falls_back() {
        let config = ConsumerConfig::new(0, Duration::ZERO, Duration::ZERO);

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.wait_time, Duration::ZERO);
        assert_eq!(config.unknown_event_policy, UnknownEventPolicy::Retain);
    }
}
