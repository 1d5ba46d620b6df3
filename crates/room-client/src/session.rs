//! A single WebSocket session: connect, forward events, classify the end.

use std::time::Duration;

use futures_util::StreamExt;
use room_protocol::{CloseCode, ServerEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::runner::SessionEnd;

/// Bound on finishing the close handshake after the server's close frame.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How one session ended.
#[derive(Debug)]
pub(crate) enum SessionOutcome {
    /// Stop reconnecting and report success to the caller.
    Finished(SessionEnd),
    /// Stop reconnecting and report a rejection.
    Rejected(String),
    /// Reconnect. `synced` is true if a `Snapshot` was delivered.
    Lost { synced: bool, reason: String },
}

pub(crate) async fn run_session(
    url: &Url,
    sink: &mpsc::Sender<ServerEvent>,
    cancel_token: &CancellationToken,
) -> SessionOutcome {
    let connect = tokio::select! {
        biased;
        () = cancel_token.cancelled() => return SessionOutcome::Finished(SessionEnd::Cancelled),
        result = connect_async(url.as_str()) => result,
    };

    let mut socket = match connect {
        Ok((socket, _response)) => socket,
        Err(tungstenite::Error::Http(response)) if response.status().is_client_error() => {
            return SessionOutcome::Rejected(format!(
                "upgrade refused with HTTP {}",
                response.status()
            ));
        }
        Err(e) => {
            return SessionOutcome::Lost {
                synced: false,
                reason: e.to_string(),
            };
        }
    };

    debug!(target: "room.client", "WebSocket connected");

    let mut synced = false;
    loop {
        let message = tokio::select! {
            biased;
            () = cancel_token.cancelled() => {
                close_quietly(&mut socket).await;
                return SessionOutcome::Finished(SessionEnd::Cancelled);
            }
            message = socket.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let event = match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(target: "room.client", error = %e, "Ignoring unparseable event");
                        continue;
                    }
                };

                let expired = matches!(event, ServerEvent::RoomExpired {});
                if matches!(event, ServerEvent::Snapshot { .. }) {
                    synced = true;
                }

                if sink.send(event).await.is_err() {
                    debug!(target: "room.client", "Event receiver dropped, closing");
                    close_quietly(&mut socket).await;
                    return SessionOutcome::Finished(SessionEnd::Cancelled);
                }

                if expired {
                    info!(target: "room.client", "Room expired");
                    close_quietly(&mut socket).await;
                    return SessionOutcome::Finished(SessionEnd::RoomExpired);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|f| u16::from(f.code));
                drain(&mut socket).await;
                return classify_close(code, synced);
            }
            // Pings are answered by tungstenite on the next read.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return SessionOutcome::Lost {
                    synced,
                    reason: e.to_string(),
                };
            }
            None => {
                return SessionOutcome::Lost {
                    synced,
                    reason: "connection closed without a close frame".to_string(),
                };
            }
        }
    }
}

fn classify_close(code: Option<u16>, synced: bool) -> SessionOutcome {
    match code.and_then(CloseCode::from_code) {
        Some(code) if code.is_terminal() => match code {
            CloseCode::RoomExpired => SessionOutcome::Finished(SessionEnd::RoomExpired),
            CloseCode::Superseded => SessionOutcome::Finished(SessionEnd::Superseded),
            other => SessionOutcome::Rejected(other.reason().to_string()),
        },
        Some(other) => SessionOutcome::Lost {
            synced,
            reason: other.reason().to_string(),
        },
        None => SessionOutcome::Lost {
            synced,
            reason: code.map_or_else(
                || "closed without a code".to_string(),
                |code| format!("closed with code {code}"),
            ),
        },
    }
}

async fn close_quietly(socket: &mut Socket) {
    if let Err(e) = socket.close(None).await {
        debug!(target: "room.client", error = %e, "Close handshake failed");
    }
}

/// Read until the stream ends so tungstenite can answer the close frame.
async fn drain(socket: &mut Socket) {
    let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while socket.next().await.is_some() {}
    })
    .await;
}
