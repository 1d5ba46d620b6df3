//! `ConnectionActor` - one per registered socket.
//!
//! Each `ConnectionActor`:
//! - Owns exactly one client transport
//! - Writes room events to the socket in mailbox order
//! - Sends a probe per heartbeat and reports acknowledgments to its room
//! - Reports its own exit to the room so the registry entry is dropped
//!
//! The room never awaits a socket: it enqueues with `try_send`, so a slow
//! client only delays its own deliveries.
//!
//! # Lifecycle
//!
//! 1. Spawned by `RoomActor` on a successful `register`
//! 2. Runs until the client hangs up, a write fails, the room sends `Close`,
//!    or the room's token is cancelled
//! 3. On exit, sends `ConnectionClosed` to the room (best effort)

use super::messages::{ConnectionMessage, RoomMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::transport::{EventTransport, Inbound};
use crate::room::RoomKey;

use room_protocol::CloseCode;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the connection mailbox.
///
/// A client that falls this far behind is treated as a failed send.
pub const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Upper bound on writing the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Error returned when a message cannot be enqueued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Mailbox at capacity; the client is too slow.
    Full,
    /// The actor has exited.
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    name: String,
    mailbox: Arc<MailboxMonitor>,
    close_code: Arc<OnceLock<CloseCode>>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a serialized event without waiting.
    pub fn try_send_event(
        &self,
        kind: &'static str,
        payload: Arc<str>,
    ) -> Result<(), EnqueueError> {
        self.try_send(ConnectionMessage::Event { kind, payload })
    }

    /// Enqueue a liveness probe without waiting.
    pub fn try_probe(&self) -> Result<(), EnqueueError> {
        self.try_send(ConnectionMessage::Probe)
    }

    /// Ask the actor to close the socket with `code`.
    ///
    /// Queued events are written first. If the mailbox cannot take the
    /// request, the actor is cancelled instead. Either way `code` is the one
    /// the client sees, unless an earlier close already chose one.
    pub fn close(&self, code: CloseCode) {
        let _ = self.close_code.set(code);
        if self.try_send(ConnectionMessage::Close { code }).is_err() {
            self.cancel();
        }
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    fn try_send(&self, message: ConnectionMessage) -> Result<(), EnqueueError> {
        match self.sender.try_send(message) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: String,
    name: String,
    room_key: RoomKey,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the room's token).
    cancel_token: CancellationToken,
    transport: Box<dyn EventTransport>,
    /// Back-channel to the owning room. Weak so it does not keep the room mailbox open.
    room: mpsc::WeakSender<RoomMessage>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    /// Code requested through the handle; cancellation falls back to `ServerShutdown`.
    close_code: Arc<OnceLock<CloseCode>>,
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        name: String,
        room_key: RoomKey,
        transport: Box<dyn EventTransport>,
        room: mpsc::WeakSender<RoomMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let connection_id = uuid::Uuid::new_v4().to_string();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));
        let close_code = Arc::new(OnceLock::new());

        let actor = Self {
            connection_id: connection_id.clone(),
            name: name.clone(),
            room_key,
            receiver,
            cancel_token: cancel_token.clone(),
            transport,
            room,
            metrics,
            mailbox: Arc::clone(&mailbox),
            close_code: Arc::clone(&close_code),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            name,
            mailbox,
            close_code,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "room.actor.connection",
        fields(
            connection_id = %self.connection_id,
            name = %self.name,
            room_key = %self.room_key
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "room.actor.connection",
            connection_id = %self.connection_id,
            name = %self.name,
            room_key = %self.room_key,
            "ConnectionActor started"
        );

        let mut client_closed = false;

        loop {
            // Mailbox first: events and a close queued before cancellation
            // still reach the client in order.
            tokio::select! {
                biased;

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            let should_exit = self.handle_message(message).await;
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "room.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                inbound = self.transport.recv() => {
                    match inbound {
                        Inbound::Ack => self.notify_room(RoomMessage::Pong {
                            name: self.name.clone(),
                            connection_id: self.connection_id.clone(),
                        }),
                        Inbound::Closed => {
                            debug!(
                                target: "room.actor.connection",
                                connection_id = %self.connection_id,
                                "Client closed connection"
                            );
                            client_closed = true;
                            break;
                        }
                    }
                }

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "room.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close(self.cancel_close_code()).await;
                    break;
                }
            }
        }

        self.notify_room(RoomMessage::ConnectionClosed {
            name: self.name.clone(),
            connection_id: self.connection_id.clone(),
        });

        info!(
            target: "room.actor.connection",
            connection_id = %self.connection_id,
            name = %self.name,
            room_key = %self.room_key,
            client_closed = client_closed,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Event { kind, payload } => {
                if self.is_closing {
                    return true;
                }
                // A stalled socket must not outlive the room's cancellation.
                let written = tokio::select! {
                    biased;
                    result = self.transport.send_text(&payload) => result,
                    () = self.cancel_token.cancelled() => {
                        self.abandon_write(kind).await;
                        return true;
                    }
                };
                if let Err(e) = written {
                    debug!(
                        target: "room.actor.connection",
                        connection_id = %self.connection_id,
                        event = kind,
                        error = %e,
                        "Event write failed"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Probe => {
                self.mailbox.publish();
                let written = tokio::select! {
                    biased;
                    result = self.transport.send_probe() => result,
                    () = self.cancel_token.cancelled() => {
                        self.abandon_write("probe").await;
                        return true;
                    }
                };
                if let Err(e) = written {
                    debug!(
                        target: "room.actor.connection",
                        connection_id = %self.connection_id,
                        error = %e,
                        "Probe write failed"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Close { code } => {
                self.graceful_close(code).await;
                true
            }
        }
    }

    fn cancel_close_code(&self) -> CloseCode {
        self.close_code
            .get()
            .copied()
            .unwrap_or(CloseCode::ServerShutdown)
    }

    async fn abandon_write(&mut self, what: &'static str) {
        debug!(
            target: "room.actor.connection",
            connection_id = %self.connection_id,
            event = what,
            "Write abandoned on cancellation"
        );
        self.graceful_close(self.cancel_close_code()).await;
    }

    /// Best-effort notice to the room. Never blocks.
    fn notify_room(&self, message: RoomMessage) {
        if let Some(room) = self.room.upgrade() {
            let _ = room.try_send(message);
        }
    }

    /// Send the close frame once.
    async fn graceful_close(&mut self, code: CloseCode) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "room.actor.connection",
            connection_id = %self.connection_id,
            close_code = code.code(),
            reason = code.reason(),
            "Closing connection"
        );

        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close(code)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actors::transport::testing::{channel_transport, stalled_transport, Frame, Peer};
    use room_protocol::ServerEvent;

    fn spawn_actor(
        room_tx: &mpsc::Sender<RoomMessage>,
    ) -> (ConnectionActorHandle, JoinHandle<()>, Peer, CancellationToken) {
        spawn_with(room_tx, channel_transport())
    }

    fn spawn_with(
        room_tx: &mpsc::Sender<RoomMessage>,
        (transport, peer): (Box<dyn EventTransport>, Peer),
    ) -> (ConnectionActorHandle, JoinHandle<()>, Peer, CancellationToken) {
        let token = CancellationToken::new();
        let (handle, task) = ConnectionActor::spawn(
            "Bob".to_string(),
            RoomKey::parse("ABC123").unwrap(),
            transport,
            room_tx.downgrade(),
            token.clone(),
            ActorMetrics::new(),
        );
        (handle, task, peer, token)
    }

    fn payload(event: &ServerEvent) -> Arc<str> {
        Arc::from(serde_json::to_string(event).unwrap())
    }

    #[tokio::test]
    async fn test_events_written_in_order() {
        let (room_tx, _room_rx) = mpsc::channel(16);
        let (handle, _task, mut peer, token) = spawn_actor(&room_tx);

        for i in 0..5 {
            let event = ServerEvent::MembershipChanged {
                members: vec![format!("m{i}")],
            };
            handle.try_send_event(event.kind(), payload(&event)).unwrap();
        }

        for i in 0..5 {
            let event = peer.next_event().await.unwrap();
            assert_eq!(
                event,
                ServerEvent::MembershipChanged {
                    members: vec![format!("m{i}")]
                }
            );
        }

        token.cancel();
    }

    #[tokio::test]
    async fn test_probe_and_ack_reach_room() {
        let (room_tx, mut room_rx) = mpsc::channel(16);
        let (handle, _task, mut peer, token) = spawn_actor(&room_tx);

        handle.try_probe().unwrap();
        assert_eq!(peer.frames.recv().await, Some(Frame::Probe));

        peer.ack();
        match room_rx.recv().await {
            Some(RoomMessage::Pong {
                name,
                connection_id,
            }) => {
                assert_eq!(name, "Bob");
                assert_eq!(connection_id, handle.connection_id());
            }
            _ => panic!("expected Pong"),
        }

        token.cancel();
    }

    #[tokio::test]
    async fn test_close_flushes_queued_events_first() {
        let (room_tx, _room_rx) = mpsc::channel(16);
        let (handle, task, mut peer, _token) = spawn_actor(&room_tx);

        let event = ServerEvent::RoomExpired {};
        handle.try_send_event(event.kind(), payload(&event)).unwrap();
        handle.close(CloseCode::RoomExpired);

        assert!(matches!(peer.frames.recv().await, Some(Frame::Text(_))));
        assert_eq!(
            peer.frames.recv().await,
            Some(Frame::Close(CloseCode::RoomExpired))
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_hang_up_notifies_room() {
        let (room_tx, mut room_rx) = mpsc::channel(16);
        let (handle, task, peer, _token) = spawn_actor(&room_tx);

        peer.hang_up();
        task.await.unwrap();

        match room_rx.recv().await {
            Some(RoomMessage::ConnectionClosed { connection_id, .. }) => {
                assert_eq!(connection_id, handle.connection_id());
            }
            _ => panic!("expected ConnectionClosed"),
        }
        assert_eq!(
            handle.try_probe(),
            Err(EnqueueError::Closed),
            "exited actor must refuse new messages"
        );
    }

    #[tokio::test]
    async fn test_write_failure_ends_actor() {
        let (room_tx, mut room_rx) = mpsc::channel(16);
        let (handle, task, peer, _token) = spawn_actor(&room_tx);

        // Keep the inbound side open but stop reading frames.
        let Peer { frames, inbound } = peer;
        drop(frames);

        let event = ServerEvent::RoomExpired {};
        handle.try_send_event(event.kind(), payload(&event)).unwrap();
        task.await.unwrap();

        assert!(matches!(
            room_rx.recv().await,
            Some(RoomMessage::ConnectionClosed { .. })
        ));
        drop(inbound);
    }

    #[tokio::test]
    async fn test_cancellation_sends_shutdown_close() {
        let (room_tx, _room_rx) = mpsc::channel(16);
        let (handle, task, mut peer, token) = spawn_actor(&room_tx);

        token.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(peer.next_close().await, Some(CloseCode::ServerShutdown));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_stalled_write() {
        let (room_tx, _room_rx) = mpsc::channel(16);
        let (handle, task, mut peer, token) = spawn_with(&room_tx, stalled_transport());

        let event = ServerEvent::RoomExpired {};
        handle.try_send_event(event.kind(), payload(&event)).unwrap();
        tokio::task::yield_now().await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stalled write held the actor past cancellation")
            .unwrap();
        assert_eq!(peer.next_close().await, Some(CloseCode::ServerShutdown));
    }

    #[tokio::test]
    async fn test_close_on_full_mailbox_keeps_requested_code() {
        let (room_tx, _room_rx) = mpsc::channel(16);
        let (handle, task, mut peer, _token) = spawn_with(&room_tx, stalled_transport());

        let event = ServerEvent::RoomExpired {};
        let mut filled = false;
        for _ in 0..=CONNECTION_CHANNEL_BUFFER + 1 {
            if handle.try_send_event(event.kind(), payload(&event)) == Err(EnqueueError::Full) {
                filled = true;
                break;
            }
        }
        assert!(filled);

        handle.close(CloseCode::RoomExpired);
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor did not stop")
            .unwrap();
        assert_eq!(peer.next_close().await, Some(CloseCode::RoomExpired));
    }
}
