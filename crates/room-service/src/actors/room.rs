//! `RoomActor` - per-room actor that owns room state and its connections.
//!
//! Each `RoomActor`:
//! - Owns the `RoomState` for one room key (members, moderator, settings)
//! - Owns the connection registry and supervises N `ConnectionActor`s
//! - Broadcasts state changes to every registered connection
//! - Runs the heartbeat and idle-expiry timers
//!
//! All operations on one room go through this actor's mailbox and run one at
//! a time, so mutations are totally ordered and every connection observes
//! events in acceptance order.
//!
//! # Presence
//!
//! A connection dropping (client close, heartbeat timeout, send failure)
//! changes presence only. The name stays in `members`, so a reconnect is a
//! `register`, never a second `join`.
//!
//! # Expiry
//!
//! When no mutation has been accepted for `room_timeout`:
//! 1. `RoomExpired` is broadcast and every connection is closed
//! 2. The room enters `Expired` and cancels its own token
//! 3. The actor exits; later calls for the key see `RoomNotFound`

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{DisconnectReason, RoomMessage, RoomStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::transport::EventTransport;
use crate::config::RoomLimits;
use crate::errors::{RejectReason, RoomError};
use crate::observability::metrics as prom;
use crate::room::{normalize_name, RoomKey, RoomPhase, RoomState, SettingsValidator};

use room_protocol::{CloseCode, RoomSnapshot, ServerEvent, Settings};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How long to wait for each connection task when the room winds down.
const CONNECTION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on closing a rejected transport.
const REJECT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    key: RoomKey,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    /// Get the room key.
    #[must_use]
    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    /// Activate the room with `moderator` as its first member.
    pub async fn initialize(&self, moderator: String) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::Initialize {
            moderator,
            respond_to,
        })
        .await?
    }

    /// Admit `name` (idempotent).
    pub async fn join(&self, name: String) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::Join { name, respond_to })
            .await?
    }

    /// Read the current snapshot.
    pub async fn get_settings(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::GetSettings { respond_to })
            .await?
    }

    /// Replace the settings. Only the moderator may call this.
    pub async fn update_settings(
        &self,
        caller: String,
        settings: serde_json::Value,
    ) -> Result<Settings, RoomError> {
        self.request(|respond_to| RoomMessage::UpdateSettings {
            caller,
            settings,
            respond_to,
        })
        .await?
    }

    /// Check whether a connection for `name` would be accepted.
    pub async fn check_member(&self, name: String) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::CheckMember { name, respond_to })
            .await?
    }

    /// Attach a transport for `name`. Returns the new connection ID.
    ///
    /// On rejection the transport is closed with `CloseCode::Rejected`.
    pub async fn register(
        &self,
        name: String,
        transport: Box<dyn EventTransport>,
    ) -> Result<String, RoomError> {
        self.request(|respond_to| RoomMessage::Register {
            name,
            transport,
            respond_to,
        })
        .await?
    }

    /// Get room status.
    pub async fn get_status(&self) -> Result<RoomStatus, RoomError> {
        self.request(|respond_to| RoomMessage::GetStatus { respond_to })
            .await
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the room actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the actor is still running and accepting messages.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed() && !self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RoomError::RoomNotFound)?;
        self.mailbox.record_enqueue();

        rx.await.map_err(|_| RoomError::RoomNotFound)
    }
}

/// A registered connection.
struct ManagedConnection {
    handle: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
    /// Last liveness acknowledgment (or registration time).
    last_pong_at: Instant,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    key: RoomKey,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Downgraded sender handed to connection actors for pongs and exit notices.
    self_sender: mpsc::WeakSender<RoomMessage>,
    /// Cancellation token (child of the controller's token).
    cancel_token: CancellationToken,
    state: RoomState,
    /// Connection registry: display name -> live connection.
    connections: HashMap<String, ManagedConnection>,
    limits: RoomLimits,
    validator: Arc<dyn SettingsValidator>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a new room actor in the `Uninitialized` phase.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        key: RoomKey,
        limits: RoomLimits,
        validator: Arc<dyn SettingsValidator>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, key.as_str()));

        let actor = Self {
            key: key.clone(),
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            state: RoomState::new(key.clone(), limits.max_users_per_room, Instant::now()),
            connections: HashMap::new(),
            limits,
            validator,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            key,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "room.actor.room", fields(room_key = %self.key))]
    async fn run(mut self) {
        debug!(
            target: "room.actor.room",
            room_key = %self.key,
            "RoomActor started"
        );

        let start = Instant::now();
        let mut heartbeat = tokio::time::interval_at(
            start + self.limits.heartbeat_interval,
            self.limits.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut idle_check = tokio::time::interval_at(
            start + self.limits.idle_check_interval,
            self.limits.idle_check_interval,
        );
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "room.actor.room",
                        room_key = %self.key,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = heartbeat.tick() => {
                    self.check_connection_health().await;
                    self.mailbox.publish();
                }

                _ = idle_check.tick() => {
                    if self.check_idle().await {
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "room.actor.room",
                                room_key = %self.key,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.room_removed();

        info!(
            target: "room.actor.room",
            room_key = %self.key,
            phase = self.state.phase().as_str(),
            members = self.state.members().len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Initialize {
                moderator,
                respond_to,
            } => {
                let started = Instant::now();
                let result = self.state.initialize(&moderator, started);
                if let Ok(snapshot) = &result {
                    info!(
                        target: "room.actor.room",
                        room_key = %self.key,
                        moderator = %snapshot.moderator,
                        "Room initialized"
                    );
                }
                record_outcome("initialize", &result, started);
                let _ = respond_to.send(result);
            }

            RoomMessage::Join { name, respond_to } => {
                let started = Instant::now();
                let result = self.state.join(&name, started);
                let reply = match result {
                    Ok(outcome) => {
                        if outcome.added {
                            debug!(
                                target: "room.actor.room",
                                room_key = %self.key,
                                members = outcome.snapshot.members.len(),
                                "Member joined"
                            );
                            self.broadcast(
                                ServerEvent::MembershipChanged {
                                    members: outcome.snapshot.members.clone(),
                                },
                                None,
                            );
                        }
                        Ok(outcome.snapshot)
                    }
                    Err(e) => Err(e),
                };
                record_outcome("join", &reply, started);
                let _ = respond_to.send(reply);
            }

            RoomMessage::GetSettings { respond_to } => {
                let started = Instant::now();
                let result = self.state.snapshot();
                record_outcome("get_settings", &result, started);
                let _ = respond_to.send(result);
            }

            RoomMessage::UpdateSettings {
                caller,
                settings,
                respond_to,
            } => {
                let started = Instant::now();
                let result =
                    self.state
                        .update_settings(&caller, settings, self.validator.as_ref(), started);
                if let Ok(settings) = &result {
                    self.broadcast(
                        ServerEvent::SettingsChanged {
                            settings: settings.clone(),
                        },
                        None,
                    );
                }
                record_outcome("update_settings", &result, started);
                let _ = respond_to.send(result);
            }

            RoomMessage::CheckMember { name, respond_to } => {
                let result = self.admit_connection(&name).map(|_| ());
                let _ = respond_to.send(result);
            }

            RoomMessage::Register {
                name,
                transport,
                respond_to,
            } => {
                let started = Instant::now();
                let result = self.handle_register(&name, transport);
                record_outcome("register", &result, started);
                let _ = respond_to.send(result);
            }

            RoomMessage::Pong {
                name,
                connection_id,
            } => {
                self.handle_pong(&name, &connection_id);
            }

            RoomMessage::ConnectionClosed {
                name,
                connection_id,
            } => {
                self.handle_connection_closed(&name, &connection_id);
            }

            RoomMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    /// Validate a connection attempt. Returns the normalized name and
    /// whether it supersedes an existing entry.
    fn admit_connection(&self, name: &str) -> Result<(String, bool), RoomError> {
        if self.state.phase() != RoomPhase::Active {
            return Err(RoomError::RoomNotFound);
        }

        let name = normalize_name(name)?;
        if !self.state.is_member(&name) {
            return Err(RoomError::ConnectionRejected(RejectReason::NotMember));
        }

        let supersedes = self.connections.contains_key(&name);
        if !supersedes && self.connections.len() >= self.limits.max_connections_per_room {
            return Err(RoomError::ConnectionRejected(RejectReason::RegistryFull));
        }

        Ok((name, supersedes))
    }

    /// Register a connection, superseding any prior one for the same name.
    fn handle_register(
        &mut self,
        name: &str,
        transport: Box<dyn EventTransport>,
    ) -> Result<String, RoomError> {
        let (name, supersedes) = match self.admit_connection(name) {
            Ok(admitted) => admitted,
            Err(e) => {
                debug!(
                    target: "room.actor.room",
                    room_key = %self.key,
                    error = %e,
                    "Connection rejected"
                );
                reject_transport(transport);
                return Err(e);
            }
        };

        if supersedes {
            self.remove_connection(&name, DisconnectReason::Superseded);
        }

        let (handle, task_handle) = ConnectionActor::spawn(
            name.clone(),
            self.key.clone(),
            transport,
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        let connection_id = handle.connection_id().to_string();

        self.connections.insert(
            name.clone(),
            ManagedConnection {
                handle,
                task_handle,
                last_pong_at: Instant::now(),
            },
        );
        self.metrics.connection_opened();

        info!(
            target: "room.actor.room",
            room_key = %self.key,
            connection_id = %connection_id,
            supersedes = supersedes,
            connections = self.connections.len(),
            "Connection registered"
        );

        // Initial snapshot so the client can resynchronize after a reconnect.
        let snapshot = self.snapshot_event();
        self.send_to(&name, snapshot);

        if !supersedes {
            self.broadcast(
                ServerEvent::PresenceChanged {
                    name: name.clone(),
                    online: true,
                },
                Some(&name),
            );
        }

        Ok(connection_id)
    }

    fn handle_pong(&mut self, name: &str, connection_id: &str) {
        let now = Instant::now();
        match self.connections.get_mut(name) {
            Some(managed) if managed.handle.connection_id() == connection_id => {
                managed.last_pong_at = now;
                if self.limits.heartbeat_keeps_alive {
                    self.state.touch(now);
                }
            }
            _ => {
                debug!(
                    target: "room.actor.room",
                    room_key = %self.key,
                    connection_id = %connection_id,
                    "Ignoring pong from stale connection"
                );
            }
        }
    }

    fn handle_connection_closed(&mut self, name: &str, connection_id: &str) {
        let current = self
            .connections
            .get(name)
            .is_some_and(|managed| managed.handle.connection_id() == connection_id);

        if !current {
            debug!(
                target: "room.actor.room",
                room_key = %self.key,
                connection_id = %connection_id,
                "Ignoring close notice from stale connection"
            );
            return;
        }

        if self
            .remove_connection(name, DisconnectReason::ClientClosed)
            .is_some()
        {
            self.broadcast(
                ServerEvent::PresenceChanged {
                    name: name.to_string(),
                    online: false,
                },
                None,
            );
        }
    }

    /// Drop `name` from the registry and close its socket when the server
    /// initiates the disconnect. Membership is untouched.
    fn remove_connection(
        &mut self,
        name: &str,
        reason: DisconnectReason,
    ) -> Option<ManagedConnection> {
        let managed = self.connections.remove(name)?;

        if let Some(code) = reason.close_code() {
            managed.handle.close(code);
        }
        self.metrics.connection_closed();
        prom::record_connection_closed(reason.as_str());

        debug!(
            target: "room.actor.room",
            room_key = %self.key,
            connection_id = %managed.handle.connection_id(),
            reason = reason.as_str(),
            connections = self.connections.len(),
            "Connection unregistered"
        );

        Some(managed)
    }

    /// Deliver `event` to every registered connection except `except`.
    ///
    /// Never waits on a socket. A connection whose mailbox is full or closed
    /// is unregistered, and its `PresenceChanged{online: false}` is delivered
    /// to the remaining connections after the current event.
    fn broadcast(&mut self, event: ServerEvent, except: Option<&str>) {
        let mut pending = VecDeque::from([(event, except.map(str::to_string))]);

        while let Some((event, except)) = pending.pop_front() {
            let Some(payload) = self.serialize(&event) else {
                continue;
            };
            let kind = event.kind();
            prom::record_broadcast(kind);

            let mut failed = Vec::new();
            for (name, managed) in &self.connections {
                if except.as_deref() == Some(name.as_str()) {
                    continue;
                }
                if managed
                    .handle
                    .try_send_event(kind, Arc::clone(&payload))
                    .is_err()
                {
                    failed.push(name.clone());
                }
            }

            for name in failed {
                prom::record_broadcast_failure();
                warn!(
                    target: "room.actor.room",
                    room_key = %self.key,
                    event = kind,
                    "Broadcast delivery failed, dropping connection"
                );
                if self
                    .remove_connection(&name, DisconnectReason::SendFailed)
                    .is_some()
                {
                    pending.push_back((ServerEvent::PresenceChanged { name, online: false }, None));
                }
            }
        }
    }

    /// Deliver `event` to a single connection.
    fn send_to(&mut self, name: &str, event: ServerEvent) {
        let Some(payload) = self.serialize(&event) else {
            return;
        };
        let failed = self
            .connections
            .get(name)
            .is_some_and(|managed| managed.handle.try_send_event(event.kind(), payload).is_err());

        if failed {
            prom::record_broadcast_failure();
            self.remove_connection(name, DisconnectReason::SendFailed);
        }
    }

    fn serialize(&self, event: &ServerEvent) -> Option<Arc<str>> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Arc::from(json)),
            Err(e) => {
                error!(
                    target: "room.actor.room",
                    room_key = %self.key,
                    event = event.kind(),
                    error = %e,
                    "Failed to serialize event"
                );
                None
            }
        }
    }

    fn snapshot_event(&self) -> ServerEvent {
        let snapshot = self.state.snapshot().unwrap_or_else(|_| RoomSnapshot {
            room_key: self.key.to_string(),
            moderator: String::new(),
            members: Vec::new(),
            settings: Settings::new(),
        });

        ServerEvent::Snapshot {
            room_key: snapshot.room_key,
            moderator: snapshot.moderator,
            members: snapshot.members,
            settings: snapshot.settings,
            online: self.online(),
        }
    }

    /// Names with a registered connection, sorted.
    fn online(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    fn status(&self) -> RoomStatus {
        RoomStatus {
            room_key: self.key.to_string(),
            phase: self.state.phase(),
            member_count: self.state.members().len(),
            online: self.online(),
            created_at: self.state.created_at().timestamp(),
        }
    }

    /// Heartbeat tick: reap exited connection tasks, drop connections that
    /// missed the acknowledgment deadline, probe the rest.
    async fn check_connection_health(&mut self) {
        let mut gone: Vec<(String, DisconnectReason)> = Vec::new();

        let finished: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for name in finished {
            if let Some(managed) = self.remove_connection(&name, DisconnectReason::ClientClosed) {
                if let Err(join_error) = managed.task_handle.await {
                    if join_error.is_panic() {
                        error!(
                            target: "room.actor.room",
                            room_key = %self.key,
                            connection_id = %managed.handle.connection_id(),
                            error = ?join_error,
                            "Connection actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Connection);
                    }
                }
                self.broadcast(ServerEvent::PresenceChanged { name, online: false }, None);
            }
        }

        let now = Instant::now();
        for (name, managed) in &self.connections {
            if now.saturating_duration_since(managed.last_pong_at) > self.limits.connection_timeout
            {
                gone.push((name.clone(), DisconnectReason::HeartbeatTimeout));
            } else if managed.handle.try_probe().is_err() {
                gone.push((name.clone(), DisconnectReason::SendFailed));
            }
        }

        for (name, reason) in gone {
            if reason == DisconnectReason::HeartbeatTimeout {
                info!(
                    target: "room.actor.room",
                    room_key = %self.key,
                    "Connection missed heartbeat deadline"
                );
            }
            if self.remove_connection(&name, reason).is_some() {
                self.broadcast(ServerEvent::PresenceChanged { name, online: false }, None);
            }
        }
    }

    /// Idle tick. Returns true if the room is finished and the actor should exit.
    async fn check_idle(&mut self) -> bool {
        if !self.state.is_idle(Instant::now(), self.limits.room_timeout) {
            return false;
        }

        match self.state.phase() {
            RoomPhase::Active => {
                self.expire().await;
            }
            RoomPhase::Uninitialized => {
                self.state.expire();
                self.cancel_token.cancel();
                debug!(
                    target: "room.actor.room",
                    room_key = %self.key,
                    "Reclaimed room that was never initialized"
                );
            }
            RoomPhase::Expired => {}
        }

        true
    }

    /// `Active -> Expired`: notify and close every connection, then stop.
    async fn expire(&mut self) {
        info!(
            target: "room.actor.room",
            room_key = %self.key,
            members = self.state.members().len(),
            connections = self.connections.len(),
            "Room idle timeout elapsed, expiring"
        );

        // No presence cascade here: a connection that cannot take the event
        // still gets the expiry close code.
        let event = ServerEvent::RoomExpired {};
        if let Some(payload) = self.serialize(&event) {
            prom::record_broadcast(event.kind());
            for managed in self.connections.values() {
                if managed
                    .handle
                    .try_send_event(event.kind(), Arc::clone(&payload))
                    .is_err()
                {
                    prom::record_broadcast_failure();
                }
            }
        }
        for managed in self.connections.values() {
            managed.handle.close(CloseCode::RoomExpired);
        }

        self.state.expire();
        prom::record_room_expired();

        // Stops both timers with the loop and marks the handle dead before
        // the connection tasks finish draining.
        self.cancel_token.cancel();
        self.drain_connections(DisconnectReason::RoomExpired).await;
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "room.actor.room",
            room_key = %self.key,
            connections = self.connections.len(),
            "Performing graceful shutdown"
        );

        // Connection tokens are children of ours and are already cancelled;
        // each actor sends ServerShutdown on its way out.
        self.drain_connections(DisconnectReason::Shutdown).await;
    }

    /// Wait (bounded) for every connection task and clear the registry.
    async fn drain_connections(&mut self, reason: DisconnectReason) {
        for (_, managed) in self.connections.drain() {
            self.metrics.connection_closed();
            prom::record_connection_closed(reason.as_str());

            let connection_id = managed.handle.connection_id().to_string();
            match tokio::time::timeout(CONNECTION_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "room.actor.room",
                        room_key = %self.key,
                        connection_id = %connection_id,
                        "Connection completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "room.actor.room",
                        room_key = %self.key,
                        connection_id = %connection_id,
                        error = ?e,
                        "Connection task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "room.actor.room",
                        room_key = %self.key,
                        connection_id = %connection_id,
                        "Connection shutdown timed out"
                    );
                    managed.handle.cancel();
                }
            }
        }
    }
}

/// Close a transport that was refused registration, off the room's loop.
fn reject_transport(mut transport: Box<dyn EventTransport>) {
    tokio::spawn(async move {
        let _ = tokio::time::timeout(REJECT_CLOSE_TIMEOUT, transport.close(CloseCode::Rejected))
            .await;
    });
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, RoomError>, started: Instant) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.error_code(),
    };
    prom::record_operation(operation, status, started.elapsed());
}
