use std::str::FromStr;
use std::thread::JoinHandle;

use async_nats::ServerAddr;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::datapoint::{FrameBorrowed, Value};
use crate::flusher::{Flusher, FlusherTokens};
use crate::tags::TagFrame;
use crate::transport::{NatsTransport, Transport};
use crate::{Config, ConnectError, EnqueueError, SubmissionError};

/// Open channel to a broker, bound to one origin.
///
/// Writes are safe to issue concurrently from any number of threads; each
/// write encodes its datapoint and enqueues it without waiting on the network.
/// Datapoints written sequentially from one thread are published in order.
///
/// The context owns a background flusher thread. [`Context::shutdown`]
/// publishes everything still queued before releasing it; dropping the
/// context does the same.
#[derive(Debug)]
pub struct Context {
    origin: String,
    capacity: usize,
    queue: mpsc::Sender<Bytes>,
    tokens: FlusherTokens,
    flusher: Option<JoinHandle<()>>,
}

impl Context {
    /// Connects to the broker at `config.endpoint` and starts the flusher.
    ///
    /// Blocks for at most `config.connect_timeout` while the connection is
    /// established.
    ///
    /// # Errors
    ///
    /// Errors if the configuration is invalid or the broker cannot be
    /// reached.
    pub fn dial(config: Config) -> Result<Self, ConnectError> {
        config.validate()?;
        let server = ServerAddr::from_str(&config.endpoint).map_err(|source| {
            ConnectError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                interval: config.batch_interval,
                source,
            }
        })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConnectError::Runtime)?;
        let transport = runtime
            .block_on(NatsTransport::connect(server, &config.origin, config.connect_timeout))
            .map_err(|source| ConnectError::Connect {
                endpoint: config.endpoint.clone(),
                interval: config.batch_interval,
                source,
            })?;

        Self::start(runtime, config, transport)
    }

    /// Opens a context publishing through an already established transport.
    ///
    /// # Errors
    ///
    /// Errors if the configuration is invalid or the flusher cannot be
    /// started.
    pub fn with_transport<T>(config: Config, transport: T) -> Result<Self, ConnectError>
    where
        T: Transport,
    {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConnectError::Runtime)?;

        Self::start(runtime, config, transport)
    }

    fn start<T>(
        runtime: tokio::runtime::Runtime,
        config: Config,
        transport: T,
    ) -> Result<Self, ConnectError>
    where
        T: Transport,
    {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let tokens = FlusherTokens::default();
        let flusher = Flusher::spawn(runtime, tokens.clone(), &config, rx, transport)?;

        info!(
            origin = %config.origin,
            endpoint = %config.endpoint,
            interval = ?config.batch_interval,
            "Datapoint context open"
        );

        Ok(Context {
            origin: config.origin,
            capacity,
            queue: tx,
            tokens,
            flusher: Some(flusher),
        })
    }

    /// Origin every datapoint written through this context is tagged with.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Writes a UTF-8 text datapoint.
    ///
    /// # Errors
    ///
    /// Errors if the datapoint cannot be enqueued.
    pub fn write_text<'a, I>(
        &self,
        tags: I,
        value: &str,
        timestamp: u64,
    ) -> Result<(), SubmissionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.write(tags, Value::Text(value), timestamp)
    }

    /// Writes a signed integer datapoint.
    ///
    /// # Errors
    ///
    /// Errors if the datapoint cannot be enqueued.
    pub fn write_int<'a, I>(
        &self,
        tags: I,
        value: i64,
        timestamp: u64,
    ) -> Result<(), SubmissionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.write(tags, Value::Int(value), timestamp)
    }

    /// Writes a floating point datapoint.
    ///
    /// # Errors
    ///
    /// Errors if the datapoint cannot be enqueued.
    pub fn write_real<'a, I>(
        &self,
        tags: I,
        value: f64,
        timestamp: u64,
    ) -> Result<(), SubmissionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.write(tags, Value::Real(value), timestamp)
    }

    /// Writes a binary datapoint.
    ///
    /// # Errors
    ///
    /// Errors if the datapoint cannot be enqueued.
    pub fn write_binary<'a, I>(
        &self,
        tags: I,
        value: &[u8],
        timestamp: u64,
    ) -> Result<(), SubmissionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.write(tags, Value::Binary(value), timestamp)
    }

    /// Writes an event carrying only its tags and timestamp.
    ///
    /// # Errors
    ///
    /// Errors if the datapoint cannot be enqueued; the error quotes
    /// [`NO_VALUE`](crate::NO_VALUE).
    pub fn write_counter<'a, I>(&self, tags: I, timestamp: u64) -> Result<(), SubmissionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.write(tags, Value::Counter, timestamp)
    }

    /// Encodes one datapoint and enqueues it for the flusher.
    ///
    /// Success means the datapoint was accepted into the queue, not that it
    /// reached the broker.
    ///
    /// # Errors
    ///
    /// Errors if the queue is full or the flusher has stopped.
    pub fn write<'a, I>(
        &self,
        tags: I,
        value: Value<'_>,
        timestamp: u64,
    ) -> Result<(), SubmissionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let tags = TagFrame::encode(tags);
        let frame =
            FrameBorrowed { origin: &self.origin, timestamp, tags: &tags, payload: value };
        let encoded = serde_json::to_vec(&frame)
            .map_err(|source| SubmissionError::Encode { value: value.quote(), source })?;

        self.queue
            .try_send(encoded.into())
            .map_err(|err| SubmissionError::Enqueue {
                value: value.quote(),
                source: EnqueueError::from_try_send(&err, self.capacity),
            })
    }

    /// Publishes every queued datapoint, then releases the broker channel.
    ///
    /// Blocks until the queue is drained, bounded by
    /// `Config::shutdown_timeout`.
    pub fn shutdown(mut self) {
        self.close();
    }

    /// Releases the broker channel without publishing queued datapoints.
    pub fn abandon(mut self) {
        self.tokens.cxl.cancel();
        self.close();
    }

    fn close(&mut self) {
        let Some(flusher) = self.flusher.take() else {
            return;
        };
        self.tokens.drain.cancel();
        if flusher.join().is_err() {
            warn!(origin = %self.origin, "Flusher thread panicked");
        }

        info!(origin = %self.origin, "Datapoint context closed");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}
