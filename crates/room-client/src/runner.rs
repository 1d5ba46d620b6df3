//! Reconnecting session runner.

use room_protocol::ServerEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use crate::error::ClientError;
use crate::policy::ReconnectPolicy;
use crate::session::{run_session, SessionOutcome};

/// Why a client stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The room expired (event or close code).
    RoomExpired,
    /// Another connection for the same name took over.
    Superseded,
    /// The caller cancelled, or dropped the event receiver.
    Cancelled,
}

/// Connects to one room as one member and keeps reconnecting until a
/// terminal condition.
#[derive(Debug, Clone)]
pub struct RoomClient {
    url: Url,
    policy: ReconnectPolicy,
    cancel_token: CancellationToken,
}

impl RoomClient {
    /// Build a client for `ws_base` (e.g. `ws://host:8787/ws`).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidUrl` if `ws_base` does not parse or is
    /// not a `ws`/`wss` URL.
    pub fn new(ws_base: &str, room_key: &str, name: &str) -> Result<Self, ClientError> {
        let mut url = Url::parse(ws_base).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        url.query_pairs_mut()
            .append_pair("room", room_key)
            .append_pair("name", name);

        Ok(Self {
            url,
            policy: ReconnectPolicy::default(),
            cancel_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Full connection URL, including the query string.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Token that stops [`RoomClient::run`] with `SessionEnd::Cancelled`.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Run sessions until a terminal condition, forwarding every event to
    /// `sink`.
    ///
    /// The attempt counter resets whenever a session delivered its
    /// `Snapshot`, so a long-lived client that drops now and then never runs
    /// out of attempts.
    ///
    /// # Errors
    ///
    /// - `ClientError::Rejected` - the server refused the connection
    /// - `ClientError::RetriesExhausted` - `max_attempts` consecutive
    ///   reconnects failed
    #[instrument(skip_all, name = "room.client.run")]
    pub async fn run(&self, sink: mpsc::Sender<ServerEvent>) -> Result<SessionEnd, ClientError> {
        let mut attempt: u32 = 0;

        loop {
            match run_session(&self.url, &sink, &self.cancel_token).await {
                SessionOutcome::Finished(end) => {
                    info!(target: "room.client", end = ?end, "Session finished");
                    return Ok(end);
                }
                SessionOutcome::Rejected(reason) => {
                    warn!(target: "room.client", reason = %reason, "Connection rejected");
                    return Err(ClientError::Rejected(reason));
                }
                SessionOutcome::Lost { synced, reason } => {
                    if synced {
                        attempt = 0;
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            target: "room.client",
                            attempts = attempt,
                            reason = %reason,
                            "Giving up on reconnecting"
                        );
                        return Err(ClientError::RetriesExhausted {
                            attempts: attempt,
                            last_error: reason,
                        });
                    }

                    let delay = self.policy.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        target: "room.client",
                        reason = %reason,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Connection lost, reconnecting"
                    );

                    tokio::select! {
                        biased;
                        () = self.cancel_token.cancelled() => return Ok(SessionEnd::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
