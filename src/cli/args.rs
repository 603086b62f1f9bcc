use crate::consumer::{ConsumerConfig, QueueConfig, UnknownEventPolicy};
use crate::core::BreakerConfig;
use crate::service::ServiceConfig;
use crate::types::TRANSACTION_CREATED_EVENT;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Wait time used when replaying a file and no explicit wait is given
const REPLAY_WAIT_SECS: u64 = 0;

/// Consume transaction events and fold them into merchant daily balances
#[derive(Parser, Debug)]
#[command(name = "merchant-balance-consumer")]
#[command(about = "Consume transaction events into merchant daily balances", long_about = None)]
pub struct CliArgs {
    /// Replay file (JSON lines) used to seed the queue
    #[arg(
        long = "input",
        value_name = "FILE",
        env = "BALANCE_INPUT",
        help = "JSON-lines replay file; without it the consumer runs until Ctrl-C"
    )]
    pub input: Option<PathBuf>,

    #[arg(
        long = "batch-size",
        value_name = "COUNT",
        env = "BALANCE_BATCH_SIZE",
        default_value_t = 10,
        help = "Maximum messages per poll"
    )]
    pub batch_size: usize,

    #[arg(
        long = "wait-time-secs",
        value_name = "SECS",
        env = "BALANCE_WAIT_TIME_SECS",
        help = "Long-poll wait per receive (default: 20, or 0 when replaying)"
    )]
    pub wait_time_secs: Option<u64>,

    #[arg(
        long = "poll-retry-delay-ms",
        value_name = "MS",
        env = "BALANCE_POLL_RETRY_DELAY_MS",
        default_value_t = 5000,
        help = "Back-off after a failed poll"
    )]
    pub poll_retry_delay_ms: u64,

    #[arg(
        long = "failure-threshold",
        value_name = "COUNT",
        env = "BALANCE_FAILURE_THRESHOLD",
        default_value_t = 5,
        help = "Consecutive failures that open the circuit breaker"
    )]
    pub failure_threshold: u32,

    #[arg(
        long = "cooldown-secs",
        value_name = "SECS",
        env = "BALANCE_COOLDOWN_SECS",
        default_value_t = 30,
        help = "How long the circuit breaker stays open"
    )]
    pub cooldown_secs: u64,

    #[arg(
        long = "visibility-timeout-secs",
        value_name = "SECS",
        env = "BALANCE_VISIBILITY_TIMEOUT_SECS",
        default_value_t = 30,
        help = "How long a received message stays hidden"
    )]
    pub visibility_timeout_secs: u64,

    #[arg(
        long = "max-receive-count",
        value_name = "COUNT",
        env = "BALANCE_MAX_RECEIVE_COUNT",
        help = "Receives before a message is dead-lettered (default: 5)"
    )]
    pub max_receive_count: Option<u32>,

    #[arg(
        long = "no-redrive",
        conflicts_with = "max_receive_count",
        help = "Never dead-letter messages because of their receive count"
    )]
    pub no_redrive: bool,

    #[arg(
        long = "dedup-window-secs",
        value_name = "SECS",
        env = "BALANCE_DEDUP_WINDOW_SECS",
        default_value_t = 900,
        help = "How long applied transaction ids are remembered (0 disables)"
    )]
    pub dedup_window_secs: u64,

    #[arg(
        long = "event-type",
        value_name = "NAME",
        env = "BALANCE_EVENT_TYPE",
        default_value = TRANSACTION_CREATED_EVENT,
        help = "EventType attribute value to consume"
    )]
    pub event_type: String,

    #[arg(
        long = "dead-letter-unknown",
        help = "Dead-letter messages with a missing or unknown event type instead of retaining them"
    )]
    pub dead_letter_unknown: bool,

    #[arg(
        long = "worker-threads",
        value_name = "COUNT",
        env = "BALANCE_WORKER_THREADS",
        help = "Tokio worker threads (default: CPU cores)"
    )]
    pub worker_threads: Option<usize>,

    /// Postgres connection string; aggregates are kept in memory without it
    #[cfg(feature = "postgres")]
    #[arg(
        long = "database-url",
        value_name = "URL",
        env = "BALANCE_DATABASE_URL",
        help = "Store aggregates in Postgres instead of memory"
    )]
    pub database_url: Option<String>,

    #[arg(
        long = "exit-when-idle",
        help = "Stop after a poll returns no messages (implied by --input)"
    )]
    pub exit_when_idle: bool,

    #[arg(
        long = "log-level",
        value_name = "FILTER",
        env = "RUST_LOG",
        default_value = "info",
        help = "Log filter directive, e.g. 'info' or 'merchant_balance_consumer=debug'"
    )]
    pub log_level: String,
}

impl CliArgs {
    /// Whether this run replays a file rather than serving until Ctrl-C
    pub fn is_replay(&self) -> bool {
        self.input.is_some()
    }

    /// Create a ConsumerConfig from CLI arguments
    ///
    /// Replay runs default to short polling and always stop once idle.
    pub fn to_consumer_config(&self) -> ConsumerConfig {
        let default_wait = if self.is_replay() {
            REPLAY_WAIT_SECS
        } else {
            ConsumerConfig::default().wait_time.as_secs()
        };

        let policy = if self.dead_letter_unknown {
            UnknownEventPolicy::DeadLetter
        } else {
            UnknownEventPolicy::Retain
        };

        ConsumerConfig::new(
            self.batch_size,
            Duration::from_secs(self.wait_time_secs.unwrap_or(default_wait)),
            Duration::from_millis(self.poll_retry_delay_ms),
        )
        .with_event_type(self.event_type.clone())
        .with_unknown_event_policy(policy)
        .with_exit_when_idle(self.exit_when_idle || self.is_replay())
    }

    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig::new(
            self.failure_threshold,
            Duration::from_secs(self.cooldown_secs),
        )
    }

    pub fn to_queue_config(&self) -> QueueConfig {
        let max_receive_count = if self.no_redrive {
            None
        } else {
            self.max_receive_count
                .or(QueueConfig::default().max_receive_count)
        };

        QueueConfig::new(
            Duration::from_secs(self.visibility_timeout_secs),
            max_receive_count,
        )
    }

    /// Create the full ServiceConfig
    ///
    /// Zero values fall back to defaults with a warning.
    pub fn to_service_config(&self) -> ServiceConfig {
        let default = ServiceConfig::default();

        let worker_threads = match self.worker_threads {
            Some(0) => {
                tracing::warn!(
                    default = default.worker_threads,
                    "invalid worker thread count, using default"
                );
                default.worker_threads
            }
            Some(count) => count,
            None => default.worker_threads,
        };

        ServiceConfig {
            consumer: self.to_consumer_config(),
            breaker: self.to_breaker_config(),
            queue: self.to_queue_config(),
            dedup_window: Duration::from_secs(self.dedup_window_secs),
            worker_threads,
            #[cfg(feature = "postgres")]
            database_url: self.database_url.clone(),
        }
    }
}
