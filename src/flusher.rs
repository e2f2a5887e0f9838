use std::thread::JoinHandle;
use std::time::{Duration, UNIX_EPOCH};

use async_nats::Subject;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::Transport;
use crate::{Config, ConnectError};

/// Delivery report published on the telemetry subject after every flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub origin: String,
    pub timestamp_ms: u128,
    pub frames_sent: u64,
    pub frames_failed: u64,
}

/// Signals from a context to its flusher.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlusherTokens {
    /// Stop immediately, dropping queued frames.
    pub(crate) cxl: CancellationToken,
    /// Publish everything queued, then stop.
    pub(crate) drain: CancellationToken,
}

/// Sole consumer of a context's queue. Frames wait in the bounded queue until
/// the next batch tick, so the queue capacity bounds unpublished datapoints.
pub(crate) struct Flusher<T> {
    cxl: CancellationToken,
    drain: CancellationToken,
    queue: mpsc::Receiver<Bytes>,
    transport: T,

    origin: String,
    subject: Subject,
    telemetry: Option<Subject>,
    debug: bool,
    shutdown_timeout: Duration,

    interval: tokio::time::Interval,
    buffer: Vec<Bytes>,
}

impl<T> Flusher<T>
where
    T: Transport,
{
    pub(crate) fn spawn(
        runtime: Runtime,
        tokens: FlusherTokens,
        config: &Config,
        queue: mpsc::Receiver<Bytes>,
        transport: T,
    ) -> Result<JoinHandle<()>, ConnectError> {
        let flusher = {
            let _guard = runtime.enter();
            Flusher::setup(tokens, config, queue, transport)
        };

        std::thread::Builder::new()
            .name("DatapointFlush".to_string())
            .spawn(move || runtime.block_on(flusher.run()))
            .map_err(ConnectError::SpawnThread)
    }

    fn setup(
        FlusherTokens { cxl, drain }: FlusherTokens,
        config: &Config,
        queue: mpsc::Receiver<Bytes>,
        transport: T,
    ) -> Self {
        let mut interval = tokio::time::interval(config.batch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Flusher {
            cxl,
            drain,
            queue,
            transport,

            origin: config.origin.clone(),
            subject: config.subject(),
            telemetry: config.telemetry.clone().map(Subject::from),
            debug: config.debug,
            shutdown_timeout: config.shutdown_timeout,

            interval,
            buffer: Vec::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.cxl.cancelled() => {
                    self.queue.close();
                    let abandoned = self.queue.len();
                    if abandoned > 0 {
                        warn!(
                            origin = %self.origin,
                            abandoned,
                            "Flusher cancelled, dropping queued datapoints"
                        );
                    }

                    return;
                }
                () = self.drain.cancelled() => break,
                _ = self.interval.tick() => {
                    self.take_queued();
                    self.flush().await;
                }
            }
        }

        // Refuse further datapoints; everything already accepted is published.
        self.queue.close();
        let pending = self.queue.len();
        let timeout = self.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(frame) = self.queue.recv().await {
                self.buffer.push(frame);
            }
            self.flush().await;
        })
        .await;
        if drained.is_err() {
            warn!(origin = %self.origin, pending, ?timeout, "Final flush timed out");
        }
    }

    /// Moves every frame currently in the queue into the flush buffer.
    fn take_queued(&mut self) {
        while let Ok(frame) = self.queue.try_recv() {
            self.buffer.push(frame);
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut frames_sent = 0u64;
        let mut frames_failed = 0u64;
        for frame in std::mem::take(&mut self.buffer) {
            if self.debug {
                debug!(subject = %self.subject, len = frame.len(), "Publishing datapoint frame");
            }

            match self.transport.publish(self.subject.clone(), frame).await {
                Ok(()) => frames_sent = frames_sent.saturating_add(1),
                Err(err) => {
                    frames_failed = frames_failed.saturating_add(1);
                    warn!(subject = %self.subject, %err, "Failed to publish datapoint frame");
                }
            }
        }

        if let Some(subject) = &self.telemetry {
            let report = FlushReport {
                origin: self.origin.clone(),
                timestamp_ms: UNIX_EPOCH.elapsed().map_or(0, |elapsed| elapsed.as_millis()),
                frames_sent,
                frames_failed,
            };

            match serde_json::to_vec(&report) {
                Ok(body) => {
                    if let Err(err) = self.transport.publish(subject.clone(), body.into()).await {
                        warn!(%subject, %err, "Failed to publish flush report");
                    }
                }
                Err(err) => warn!(%err, "Failed to encode flush report"),
            }
        }

        if let Err(err) = self.transport.flush().await {
            warn!(origin = %self.origin, %err, "Transport flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn serialize_flush_report() {
        let report = FlushReport {
            origin: "ABCDEF".to_string(),
            timestamp_ms: 123,
            frames_sent: 10,
            frames_failed: 2,
        };

        expect![[r#"
            {
              "origin": "ABCDEF",
              "timestamp_ms": 123,
              "frames_sent": 10,
              "frames_failed": 2
            }"#]]
        .assert_eq(&serde_json::to_string_pretty(&report).unwrap());
    }
}
