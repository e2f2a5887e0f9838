//! Client for submitting tagged, timestamped datapoints to a collection broker
//! over NATS.
//!
//! A [`Context`] is bound to one origin. Writes encode the datapoint on the
//! calling thread and enqueue it without waiting on the network; a background
//! flusher publishes queued frames every batch interval.
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! use datapoint_writer::{Config, Context};
//!
//! let context = Context::dial(Config::new(
//!     "nats://127.0.0.1:4222",
//!     Duration::from_millis(100),
//!     "ABCDEF",
//! ))?;
//!
//! let tags = BTreeMap::from_iter([("foo".to_string(), "bar".to_string())]);
//! let now = u64::try_from(UNIX_EPOCH.elapsed()?.as_nanos())?;
//! context.write_int(&tags, 42, now)?;
//!
//! context.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod context;
mod datapoint;
mod flusher;
mod hash;
mod tags;
mod transport;

use std::time::Duration;

pub use async_nats::{ServerAddr, Subject};
pub use context::Context;
pub use datapoint::{Frame, Payload, Value, NO_VALUE};
pub use flusher::FlushReport;
pub use hash::hash_identifier;
pub use tags::{TagFrame, TagFrameError};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
pub use transport::{NatsTransport, Transport, TransportError};

const DEFAULT_SUBJECT_PREFIX: &str = "datapoint";
const DEFAULT_QUEUE_CAPACITY: usize = 65_536;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`Context`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Broker address (e.g., `nats://localhost:4222`).
    pub endpoint: String,
    /// Queued datapoints are published this frequently.
    pub batch_interval: Duration,
    /// Namespace of every datapoint written through the context; must be
    /// unique per host and a single subject token.
    ///
    /// `.`, `*`, `>` and whitespace are rejected, so dotted host names such
    /// as `web01.example.com` must be mapped (e.g., to `web01-example-com`)
    /// before use.
    pub origin: String,
    /// Subject receiving a [`FlushReport`] after every flush.
    pub telemetry: Option<String>,
    /// Log every published frame.
    pub debug: bool,
    /// Datapoints are published on `{subject_prefix}.{origin}`.
    pub subject_prefix: String,
    /// Maximum number of datapoints waiting to be published.
    pub queue_capacity: usize,
    /// Bound on establishing the broker connection.
    pub connect_timeout: Duration,
    /// Bound on draining the queue during shutdown.
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Configuration with default subject prefix, queue capacity and timeouts.
    pub fn new(
        endpoint: impl Into<String>,
        batch_interval: Duration,
        origin: impl Into<String>,
    ) -> Self {
        Config {
            endpoint: endpoint.into(),
            batch_interval,
            origin: origin.into(),
            telemetry: None,
            debug: false,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// | Variable                   | Meaning                                 |
    /// |----------------------------|-----------------------------------------|
    /// | `DATAPOINT_ENDPOINT`       | broker address (required)               |
    /// | `DATAPOINT_ORIGIN`         | origin (required)                       |
    /// | `DATAPOINT_BATCH_INTERVAL` | batch interval in seconds (default 1.0) |
    /// | `DATAPOINT_DEBUG`          | `1` or `true` enables debug logging     |
    /// | `DATAPOINT_TELEMETRY`      | telemetry subject                       |
    ///
    /// # Errors
    ///
    /// Errors if a required variable is missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], resolving variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Errors if a required variable is missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |key| lookup(key).ok_or(ConfigError::Missing(key));

        let batch_interval = match lookup("DATAPOINT_BATCH_INTERVAL") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or(ConfigError::Invalid { key: "DATAPOINT_BATCH_INTERVAL", value: raw })?,
            None => DEFAULT_BATCH_INTERVAL,
        };
        let debug = match lookup("DATAPOINT_DEBUG") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "" | "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::Invalid { key: "DATAPOINT_DEBUG", value: raw }),
            },
            None => false,
        };

        let mut config = Config::new(
            required("DATAPOINT_ENDPOINT")?,
            batch_interval,
            required("DATAPOINT_ORIGIN")?,
        );
        config.debug = debug;
        config.telemetry = lookup("DATAPOINT_TELEMETRY").filter(|subject| !subject.is_empty());

        Ok(config)
    }

    pub(crate) fn subject(&self) -> Subject {
        format!("{}.{}", self.subject_prefix, self.origin).into()
    }

    pub(crate) fn validate(&self) -> Result<(), ConnectError> {
        if self.batch_interval.is_zero() {
            return Err(ConnectError::InvalidInterval {
                endpoint: self.endpoint.clone(),
                interval: self.batch_interval,
            });
        }

        let invalid_token = |token: &str| {
            token.is_empty()
                || token
                    .chars()
                    .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
        };
        if invalid_token(&self.origin) {
            return Err(ConnectError::InvalidOrigin(self.origin.clone()));
        }
        if self.subject_prefix.split('.').any(invalid_token) {
            return Err(ConnectError::InvalidSubjectPrefix(self.subject_prefix.clone()));
        }

        Ok(())
    }
}

/// Possible failure while reading a [`Config`] from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing variable; key={0}")]
    Missing(&'static str),
    #[error("Invalid variable; key={key}; value={value}")]
    Invalid { key: &'static str, value: String },
}

/// Possible failure while opening a [`Context`].
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The endpoint is not a valid broker address.
    #[error("Invalid endpoint; endpoint={endpoint}; interval={interval:?}; err={source}")]
    InvalidEndpoint {
        endpoint: String,
        interval: Duration,
        #[source]
        source: std::io::Error,
    },
    /// The batch interval is zero.
    #[error("Invalid batch interval; endpoint={endpoint}; interval={interval:?}")]
    InvalidInterval { endpoint: String, interval: Duration },
    #[error("Invalid origin; origin={0:?}")]
    InvalidOrigin(String),
    #[error("Invalid subject prefix; subject_prefix={0:?}")]
    InvalidSubjectPrefix(String),
    /// The broker could not be reached.
    #[error("Connect; endpoint={endpoint}; interval={interval:?}; err={source}")]
    Connect {
        endpoint: String,
        interval: Duration,
        #[source]
        source: async_nats::ConnectError,
    },
    #[error("Build runtime; err={0}")]
    Runtime(#[source] std::io::Error),
    #[error("Spawn thread; err={0}")]
    SpawnThread(#[source] std::io::Error),
}

/// Status reported by the outbound queue when it refuses a datapoint.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The flusher is not keeping up; the queue holds `capacity` datapoints.
    #[error("Queue full; capacity={capacity}")]
    Full { capacity: usize },
    /// The flusher has stopped.
    #[error("Queue closed")]
    Closed,
}

impl EnqueueError {
    /// Stable numeric status code.
    #[must_use]
    pub const fn status(&self) -> i32 {
        match self {
            EnqueueError::Full { .. } => 1,
            EnqueueError::Closed => 2,
        }
    }

    pub(crate) fn from_try_send<T>(err: &TrySendError<T>, capacity: usize) -> Self {
        match err {
            TrySendError::Full(_) => EnqueueError::Full { capacity },
            TrySendError::Closed(_) => EnqueueError::Closed,
        }
    }
}

/// Possible failure of a single write; the [`Context`] stays usable.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Enqueue datapoint; value={value}; status={}; err={source}", .source.status())]
    Enqueue {
        value: String,
        #[source]
        source: EnqueueError,
    },
    #[error("Encode datapoint; value={value}; err={source}")]
    Encode {
        value: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SubmissionError {
    /// The rejected datapoint's value, or [`NO_VALUE`] for counter writes.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            SubmissionError::Enqueue { value, .. } | SubmissionError::Encode { value, .. } => {
                value
            }
        }
    }

    /// Status reported by the outbound queue, if the failure came from it.
    #[must_use]
    pub const fn status(&self) -> Option<i32> {
        match self {
            SubmissionError::Enqueue { source, .. } => Some(source.status()),
            SubmissionError::Encode { .. } => None,
        }
    }
}
