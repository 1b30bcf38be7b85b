//! Bidirectional transport abstraction. The client only assumes a
//! reliable ordered message stream; concrete carriers are an in-memory
//! channel pair (tests, same-process architects) and framed TCP.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use rill_proto::{frame, Event, ProtoError};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::error::ClientError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Proto(#[from] ProtoError),
}

#[async_trait]
pub trait BidiTransport: Send + Sync {
    async fn send(&self, event: Event) -> Result<(), TransportError>;

    /// Next event in stream order; `None` once the peer is gone and the
    /// stream is drained.
    async fn recv(&self) -> Option<Event>;

    /// Closes the outbound direction. Idempotent.
    async fn shutdown(&self);
}

/// In-memory transport half. Create both halves with [`pair`].
pub struct ChannelTransport {
    tx: StdMutex<Option<mpsc::Sender<Event>>>,
    rx: Mutex<mpsc::Receiver<Event>>,
}

/// Connected pair of in-memory transports.
pub fn pair(depth: usize) -> (ChannelTransport, ChannelTransport) {
    let (a_tx, a_rx) = mpsc::channel(depth.max(1));
    let (b_tx, b_rx) = mpsc::channel(depth.max(1));
    (
        ChannelTransport {
            tx: StdMutex::new(Some(a_tx)),
            rx: Mutex::new(b_rx),
        },
        ChannelTransport {
            tx: StdMutex::new(Some(b_tx)),
            rx: Mutex::new(a_rx),
        },
    )
}

#[async_trait]
impl BidiTransport for ChannelTransport {
    async fn send(&self, event: Event) -> Result<(), TransportError> {
        let tx = self.tx.lock().expect("transport tx lock").clone();
        match tx {
            Some(tx) => tx.send(event).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    async fn shutdown(&self) {
        // Only the outbound direction closes here; the peer observes it
        // and drops its own sender, which ends our receive side. Taking
        // the rx lock instead would deadlock with a blocked `recv`.
        self.tx.lock().expect("transport tx lock").take();
    }
}

/// Length-prefixed postcard frames over a TCP stream.
pub struct TcpTransport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<OwnedReadHalf>,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        Ok(Self::from_stream(TcpStream::connect(addr).await?))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl BidiTransport for TcpTransport {
    async fn send(&self, event: Event) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => Ok(frame::write_frame(writer, &event).await?),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&self) -> Option<Event> {
        let mut reader = self.reader.lock().await;
        frame::read_frame(&mut *reader).await.ok()
    }

    async fn shutdown(&self) {
        self.writer.lock().await.take();
    }
}

/// How the client obtains its transport at start. Factored out so tests
/// and embedders can hand over a prepared stream.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BidiTransport>, ClientError>;
}

#[async_trait]
impl Connect for Box<dyn Connect> {
    async fn connect(&self) -> Result<Box<dyn BidiTransport>, ClientError> {
        (**self).connect().await
    }
}

pub struct TcpConnect {
    pub addr: String,
}

#[async_trait]
impl Connect for TcpConnect {
    async fn connect(&self) -> Result<Box<dyn BidiTransport>, ClientError> {
        TcpTransport::connect(&self.addr)
            .await
            .map(|transport| Box::new(transport) as Box<dyn BidiTransport>)
            .map_err(|error| ClientError::Connect(error.to_string()))
    }
}

/// Hands out a transport constructed ahead of time; a second connect
/// attempt fails.
pub struct PreparedConnect {
    slot: StdMutex<Option<Box<dyn BidiTransport>>>,
}

impl PreparedConnect {
    pub fn new(transport: impl BidiTransport + 'static) -> Self {
        Self {
            slot: StdMutex::new(Some(Box::new(transport))),
        }
    }
}

#[async_trait]
impl Connect for PreparedConnect {
    async fn connect(&self) -> Result<Box<dyn BidiTransport>, ClientError> {
        self.slot
            .lock()
            .expect("prepared transport lock")
            .take()
            .ok_or_else(|| ClientError::Connect("prepared transport already consumed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rill_proto::{AnyPayload, Event, EventType};

    use super::{pair, BidiTransport};

    #[tokio::test]
    async fn channel_pair_delivers_in_order_and_ends_on_shutdown() {
        let (client, server) = pair(8);
        for tag in 1..=3 {
            client
                .send(Event::tagged(
                    EventType::ClientEventRequestStateUpdate,
                    tag,
                    AnyPayload::empty(),
                ))
                .await
                .expect("send event");
        }
        for tag in 1..=3 {
            let event = server.recv().await.expect("receive event");
            assert_eq!(event.tag, tag);
        }
        client.shutdown().await;
        assert!(server.recv().await.is_none());
    }
}
