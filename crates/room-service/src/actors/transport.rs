//! Transport seam between a `ConnectionActor` and its socket.
//!
//! Production uses the axum WebSocket adapter in `http::ws`; unit tests use
//! an in-memory channel pair.

use async_trait::async_trait;
use room_protocol::CloseCode;
use thiserror::Error;

/// The socket is gone or refused a write.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// What the client sent, as far as the room cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Liveness acknowledgment (WebSocket pong).
    Ack,
    /// The client closed the socket or the read side failed.
    Closed,
}

/// Bidirectional real-time channel to one client.
#[async_trait]
pub trait EventTransport: Send {
    /// Write one serialized event.
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Write a liveness probe (WebSocket ping).
    async fn send_probe(&mut self) -> Result<(), TransportError>;

    /// Send a close frame with an application code.
    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError>;

    /// Wait for the next inbound signal. Must be cancel safe.
    async fn recv(&mut self) -> Inbound;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing {
    use super::*;
    use room_protocol::ServerEvent;
    use tokio::sync::mpsc;

    /// Frame written by the server side.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Frame {
        Text(String),
        Probe,
        Close(CloseCode),
    }

    /// In-memory transport. Writes go to `Peer::frames`; `Peer::inbound`
    /// feeds `recv`. Dropping the peer breaks both directions.
    pub struct ChannelTransport {
        frames: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
        /// Event and probe writes never complete; close frames still go through.
        stall_writes: bool,
    }

    /// Test-side end of a `ChannelTransport`.
    pub struct Peer {
        pub frames: mpsc::UnboundedReceiver<Frame>,
        pub inbound: mpsc::UnboundedSender<Inbound>,
    }

    pub fn channel_transport() -> (Box<dyn EventTransport>, Peer) {
        build(false)
    }

    /// A client that stopped reading: writes hang forever.
    pub fn stalled_transport() -> (Box<dyn EventTransport>, Peer) {
        build(true)
    }

    fn build(stall_writes: bool) -> (Box<dyn EventTransport>, Peer) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Box::new(ChannelTransport {
                frames: frame_tx,
                inbound: inbound_rx,
                stall_writes,
            }),
            Peer {
                frames: frame_rx,
                inbound: inbound_tx,
            },
        )
    }

    impl ChannelTransport {
        async fn write(&self, frame: Frame) -> Result<(), TransportError> {
            if self.stall_writes {
                std::future::pending::<()>().await;
            }
            self.push(frame)
        }

        fn push(&self, frame: Frame) -> Result<(), TransportError> {
            self.frames
                .send(frame)
                .map_err(|_| TransportError("peer dropped".to_string()))
        }
    }

    #[async_trait]
    impl EventTransport for ChannelTransport {
        async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            self.write(Frame::Text(text.to_string())).await
        }

        async fn send_probe(&mut self) -> Result<(), TransportError> {
            self.write(Frame::Probe).await
        }

        async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
            self.push(Frame::Close(code))
        }

        async fn recv(&mut self) -> Inbound {
            self.inbound.recv().await.unwrap_or(Inbound::Closed)
        }
    }

    impl Peer {
        /// Next event, skipping probes. `None` once the server closed or vanished.
        pub async fn next_event(&mut self) -> Option<ServerEvent> {
            loop {
                match self.frames.recv().await? {
                    Frame::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                    Frame::Probe => {}
                    Frame::Close(_) => return None,
                }
            }
        }

        /// Next close code, skipping everything else.
        pub async fn next_close(&mut self) -> Option<CloseCode> {
            loop {
                if let Frame::Close(code) = self.frames.recv().await? {
                    return Some(code);
                }
            }
        }

        /// Acknowledge a probe.
        pub fn ack(&self) {
            let _ = self.inbound.send(Inbound::Ack);
        }

        /// Simulate the client closing the socket.
        pub fn hang_up(&self) {
            let _ = self.inbound.send(Inbound::Closed);
        }
    }
}
