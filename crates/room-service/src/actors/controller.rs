//! `RoomControllerActor` - singleton routing table for room actors.
//!
//! The `RoomControllerActor` is the top-level actor in the hierarchy:
//!
//! - Singleton per service instance
//! - Maps each room key to exactly one live `RoomActor`
//! - Creates rooms on first use and forgets them once they exit
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! Room operations never run inside the controller loop. The handle looks
//! the room up, then talks to the room actor directly, so one busy room
//! cannot stall lookups for the others.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the controller:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all rooms)
//! 3. Waits (bounded) for room actors to close their connections

use super::messages::{ControllerMessage, ControllerStatus, RoomStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};
use super::transport::EventTransport;
use crate::config::RoomLimits;
use crate::errors::RoomError;
use crate::room::{normalize_name, RoomKey, SettingsValidator};

use room_protocol::{RoomSnapshot, Settings};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Period of the sweep that drops finished room actors from the table.
const ROOM_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for each room task during shutdown.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the `RoomControllerActor`.
///
/// This is the public interface used by the HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct RoomControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomControllerActorHandle {
    /// Create a new `RoomControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        service_id: String,
        limits: RoomLimits,
        validator: Arc<dyn SettingsValidator>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Controller, &service_id));

        let actor = RoomControllerActor {
            service_id,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            accepting_new: true,
            limits,
            validator,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    /// Return the live room for `key`, spawning one if needed.
    pub async fn get_or_create_room(&self, key: RoomKey) -> Result<RoomActorHandle, RoomError> {
        self.request(|respond_to| ControllerMessage::GetOrCreateRoom { key, respond_to })
            .await?
    }

    /// Return the live room for a raw key.
    ///
    /// Unparseable keys, unknown keys and finished rooms are all `RoomNotFound`.
    pub async fn get_room(&self, key: &str) -> Result<RoomActorHandle, RoomError> {
        let key = RoomKey::parse(key)?;
        self.request(|respond_to| ControllerMessage::GetRoom { key, respond_to })
            .await?
    }

    /// Create (if needed) and activate the room for `key`.
    ///
    /// The moderator name is checked before any actor is spawned, so a
    /// rejected create leaves nothing in the routing table.
    pub async fn initialize(
        &self,
        key: RoomKey,
        moderator: String,
    ) -> Result<RoomSnapshot, RoomError> {
        let moderator = normalize_name(&moderator)?;
        self.get_or_create_room(key).await?.initialize(moderator).await
    }

    /// Admit `name` to the room.
    pub async fn join(&self, key: &str, name: String) -> Result<RoomSnapshot, RoomError> {
        self.get_room(key).await?.join(name).await
    }

    /// Read the room snapshot.
    pub async fn get_settings(&self, key: &str) -> Result<RoomSnapshot, RoomError> {
        self.get_room(key).await?.get_settings().await
    }

    /// Replace the room settings on behalf of `caller`.
    pub async fn update_settings(
        &self,
        key: &str,
        caller: String,
        settings: serde_json::Value,
    ) -> Result<Settings, RoomError> {
        self.get_room(key)
            .await?
            .update_settings(caller, settings)
            .await
    }

    /// Pre-upgrade check that `register` would accept `name`.
    pub async fn check_member(&self, key: &str, name: String) -> Result<(), RoomError> {
        self.get_room(key).await?.check_member(name).await
    }

    /// Register a connection for `name`. Returns the connection ID.
    pub async fn connect(
        &self,
        key: &str,
        name: String,
        transport: Box<dyn EventTransport>,
    ) -> Result<String, RoomError> {
        self.get_room(key).await?.register(name, transport).await
    }

    /// Status of a single room.
    pub async fn get_room_status(&self, key: &str) -> Result<RoomStatus, RoomError> {
        self.get_room(key).await?.get_status().await
    }

    /// Get the current controller status.
    pub async fn get_status(&self) -> Result<ControllerStatus, RoomError> {
        self.request(|respond_to| ControllerMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting rooms, close every room, and wait for them to finish.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.request(|respond_to| ControllerMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();

        // The controller only stops during shutdown.
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RoomError::Draining)?;
        self.mailbox.record_enqueue();

        rx.await.map_err(|_| RoomError::Draining)
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// Room creation timestamp.
    created_at: i64,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    /// Service instance ID.
    service_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Routing table by normalized key.
    rooms: HashMap<RoomKey, ManagedRoom>,
    /// Whether the controller is accepting new rooms.
    accepting_new: bool,
    limits: RoomLimits,
    validator: Arc<dyn SettingsValidator>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomControllerActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "room.actor.controller", fields(service_id = %self.service_id))]
    async fn run(mut self) {
        info!(
            target: "room.actor.controller",
            service_id = %self.service_id,
            "RoomControllerActor started"
        );

        let mut sweep = tokio::time::interval(ROOM_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "room.actor.controller",
                        service_id = %self.service_id,
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = sweep.tick() => {
                    self.check_room_health().await;
                    self.mailbox.publish();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            let stop = self.handle_message(message).await;
                            self.metrics.record_message_processed();

                            if stop {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "room.actor.controller",
                                service_id = %self.service_id,
                                "RoomControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "room.actor.controller",
            service_id = %self.service_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    /// Handle a single message. Returns true once the controller has shut down.
    async fn handle_message(&mut self, message: ControllerMessage) -> bool {
        match message {
            ControllerMessage::GetOrCreateRoom { key, respond_to } => {
                let result = self.get_or_create_room(key);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetRoom { key, respond_to } => {
                let result = self.get_room(&key);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown { respond_to } => {
                info!(
                    target: "room.actor.controller",
                    service_id = %self.service_id,
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.cancel_token.cancel();
                self.graceful_shutdown().await;
                let _ = respond_to.send(Ok(()));
                return true;
            }
        }

        false
    }

    fn get_or_create_room(&mut self, key: RoomKey) -> Result<RoomActorHandle, RoomError> {
        if let Some(managed) = self.rooms.get(&key) {
            if managed.handle.is_alive() {
                return Ok(managed.handle.clone());
            }
        }

        if !self.accepting_new {
            warn!(
                target: "room.actor.controller",
                service_id = %self.service_id,
                room_key = %key,
                "Rejecting room creation - draining"
            );
            return Err(RoomError::Draining);
        }

        if let Some(stale) = self.rooms.remove(&key) {
            debug!(
                target: "room.actor.controller",
                service_id = %self.service_id,
                room_key = %key,
                created_at = stale.created_at,
                "Replacing finished room actor"
            );
        }

        let (handle, task_handle) = RoomActor::spawn(
            key.clone(),
            self.limits,
            Arc::clone(&self.validator),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            key.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.room_created();

        debug!(
            target: "room.actor.controller",
            service_id = %self.service_id,
            room_key = %key,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    fn get_room(&self, key: &RoomKey) -> Result<RoomActorHandle, RoomError> {
        self.rooms
            .get(key)
            .filter(|managed| managed.handle.is_alive())
            .map(|managed| managed.handle.clone())
            .ok_or(RoomError::RoomNotFound)
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            actor_panics: self.metrics.panic_count(),
        }
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "room.actor.controller",
            service_id = %self.service_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (key, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "room.actor.controller",
                        service_id = %self.service_id,
                        room_key = %key,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "room.actor.controller",
                        service_id = %self.service_id,
                        room_key = %key,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "room.actor.controller",
                        service_id = %self.service_id,
                        room_key = %key,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "room.actor.controller",
            service_id = %self.service_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop finished room actors from the routing table.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomKey> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for key in finished {
            if let Some(managed) = self.rooms.remove(&key) {
                match managed.task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "room.actor.controller",
                            service_id = %self.service_id,
                            room_key = %key,
                            "Room actor exited"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "room.actor.controller",
                                service_id = %self.service_id,
                                room_key = %key,
                                error = ?join_error,
                                "Room actor panicked"
                            );
                            self.metrics.record_panic(ActorType::Room);
                            // A panicked actor never reached its exit bookkeeping.
                            self.metrics.room_removed();
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::transport::testing::channel_transport;
    use crate::errors::RejectReason;
    use crate::room::JsonObjectValidator;
    use room_protocol::{CloseCode, ServerEvent};
    use serde_json::json;

    fn controller(limits: RoomLimits) -> RoomControllerActorHandle {
        RoomControllerActorHandle::new(
            "room-test".to_string(),
            limits,
            Arc::new(JsonObjectValidator),
            ActorMetrics::new(),
        )
    }

    fn key(raw: &str) -> RoomKey {
        RoomKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_then_join() {
        let handle = controller(RoomLimits::default());

        let snapshot = handle
            .initialize(key("ABC123"), "Alice".to_string())
            .await
            .unwrap();
        assert_eq!(snapshot.room_key, "ABC123");

        let snapshot = handle.join("abc123", "Bob".to_string()).await.unwrap();
        assert_eq!(snapshot.members, vec!["Alice", "Bob"]);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_initialize() {
        let handle = controller(RoomLimits::default());

        handle
            .initialize(key("ABC123"), "Alice".to_string())
            .await
            .unwrap();
        let result = handle.initialize(key("abc123"), "Bob".to_string()).await;

        assert_eq!(result, Err(RoomError::AlreadyInitialized));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_keys() {
        let handle = controller(RoomLimits::default());

        assert_eq!(
            handle.join("ZZZ999", "Bob".to_string()).await,
            Err(RoomError::RoomNotFound)
        );
        assert_eq!(
            handle.get_settings("not a key!").await,
            Err(RoomError::RoomNotFound)
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_rejected_initialize_leaves_no_room() {
        let handle = controller(RoomLimits::default());

        for i in 0..20 {
            let result = handle
                .initialize(key(&format!("BLANK{i}")), "   ".to_string())
                .await;
            assert!(matches!(result, Err(RoomError::InvalidName(_))));
        }

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.room_count, 0);
        assert_eq!(
            handle.join("BLANK0", "Bob".to_string()).await,
            Err(RoomError::RoomNotFound)
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_get_or_create_is_exactly_once() {
        let handle = controller(RoomLimits::default());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.initialize(key("RACE01"), format!("user{i}")).await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert_eq!(e, RoomError::AlreadyInitialized),
            }
        }
        assert_eq!(successes, 1);

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.room_count, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_update_settings_and_connect() {
        let handle = controller(RoomLimits::default());
        handle
            .initialize(key("ABC123"), "Alice".to_string())
            .await
            .unwrap();

        let (transport, mut peer) = channel_transport();
        handle
            .connect("ABC123", "Alice".to_string(), transport)
            .await
            .unwrap();
        assert!(matches!(
            peer.next_event().await,
            Some(ServerEvent::Snapshot { .. })
        ));

        handle
            .update_settings("ABC123", "Alice".to_string(), json!({"k": "v"}))
            .await
            .unwrap();
        assert!(matches!(
            peer.next_event().await,
            Some(ServerEvent::SettingsChanged { .. })
        ));

        let status = handle.get_room_status("ABC123").await.unwrap();
        assert_eq!(status.online, vec!["Alice"]);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_check_member_before_upgrade() {
        let handle = controller(RoomLimits::default());
        handle
            .initialize(key("ABC123"), "Alice".to_string())
            .await
            .unwrap();

        assert!(handle
            .check_member("ABC123", "Alice".to_string())
            .await
            .is_ok());
        assert_eq!(
            handle.check_member("ABC123", "Eve".to_string()).await,
            Err(RoomError::ConnectionRejected(RejectReason::NotMember))
        );

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_room_is_not_found_then_recreatable() {
        let limits = RoomLimits {
            room_timeout: Duration::from_secs(10),
            idle_check_interval: Duration::from_secs(1),
            ..RoomLimits::default()
        };
        let handle = controller(limits);
        handle
            .initialize(key("ABC123"), "Alice".to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(
            handle.join("ABC123", "Bob".to_string()).await,
            Err(RoomError::RoomNotFound)
        );

        let snapshot = handle
            .initialize(key("ABC123"), "Carol".to_string())
            .await
            .unwrap();
        assert_eq!(snapshot.members, vec!["Carol"]);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_and_drains() {
        let handle = controller(RoomLimits::default());
        handle
            .initialize(key("ABC123"), "Alice".to_string())
            .await
            .unwrap();
        let (transport, mut peer) = channel_transport();
        handle
            .connect("ABC123", "Alice".to_string(), transport)
            .await
            .unwrap();

        handle.shutdown().await.unwrap();

        assert!(handle.is_cancelled());
        assert_eq!(peer.next_close().await, Some(CloseCode::ServerShutdown));
        assert_eq!(
            handle.initialize(key("NEW001"), "Bob".to_string()).await,
            Err(RoomError::Draining)
        );
    }

    #[tokio::test]
    async fn test_controller_cancellation_token() {
        let handle = controller(RoomLimits::default());

        assert!(!handle.is_cancelled());

        let child = handle.child_token();
        assert!(!child.is_cancelled());

        handle.cancel();

        // Give time for cancellation to propagate
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_cancelled());
        assert!(child.is_cancelled());
    }
}
