use std::time::Duration;

use async_nats::{Client, ConnectOptions, ServerAddr, Subject};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Failure reported by a [`Transport`].
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound message-queue channel the flusher forwards frames to.
///
/// Implementations only ever see one caller: the context's flusher task.
pub trait Transport: Send + 'static {
    /// Hands one frame to the transport for delivery on `subject`.
    fn publish(&mut self, subject: Subject, payload: Bytes)
        -> BoxFuture<'_, Result<(), TransportError>>;

    /// Waits until every previously published frame has been written out.
    fn flush(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// [`Transport`] backed by a NATS connection.
#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    pub(crate) async fn connect(
        server: ServerAddr,
        name: &str,
        timeout: Duration,
    ) -> Result<Self, async_nats::ConnectError> {
        let client = ConnectOptions::new()
            .name(name)
            .connection_timeout(timeout)
            .connect(server)
            .await?;

        Ok(NatsTransport { client })
    }
}

impl From<Client> for NatsTransport {
    fn from(client: Client) -> Self {
        NatsTransport { client }
    }
}

impl Transport for NatsTransport {
    fn publish(
        &mut self,
        subject: Subject,
        payload: Bytes,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.client
                .publish(subject, payload)
                .await
                .map_err(TransportError::from)
        }
        .boxed()
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move { self.client.flush().await.map_err(TransportError::from) }.boxed()
    }
}
