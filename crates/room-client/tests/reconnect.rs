//! Reconnect behavior against a scripted WebSocket server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use room_client::{ClientError, ReconnectPolicy, RoomClient, SessionEnd};
use room_protocol::{ServerEvent, Settings};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts,
    }
}

fn snapshot() -> ServerEvent {
    ServerEvent::Snapshot {
        room_key: "ABC123".to_string(),
        moderator: "Ann".to_string(),
        members: vec!["Ann".to_string()],
        settings: Settings::new(),
        online: vec!["Ann".to_string()],
    }
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, base)
}

/// Accept one WebSocket and report the request URI it was opened with.
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let _ = uri_tx.send(request.uri().to_string());
        Ok(response)
    };
    let socket = accept_hdr_async(stream, callback).await.unwrap();
    (socket, uri_rx.await.unwrap())
}

async fn send_event(socket: &mut WebSocketStream<TcpStream>, event: &ServerEvent) {
    let text = serde_json::to_string(event).unwrap();
    socket.send(Message::Text(text)).await.unwrap();
}

async fn close_with(socket: &mut WebSocketStream<TcpStream>, code: u16) {
    socket
        .close(Some(CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        }))
        .await
        .unwrap();
    while socket.next().await.is_some() {}
}

#[tokio::test]
async fn test_events_forwarded_until_room_expired() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Ann").unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut socket, uri) = accept(&listener).await;
    assert_eq!(uri, "/ws?room=ABC123&name=Ann");
    send_event(&mut socket, &snapshot()).await;
    send_event(&mut socket, &ServerEvent::RoomExpired {}).await;

    assert_eq!(run.await.unwrap().unwrap(), SessionEnd::RoomExpired);
    assert_eq!(rx.recv().await, Some(snapshot()));
    assert_eq!(rx.recv().await, Some(ServerEvent::RoomExpired {}));
}

#[tokio::test]
async fn test_room_expired_close_code_is_terminal() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Ann")
        .unwrap()
        .with_policy(fast_policy(3));
    let (tx, _rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut socket, _) = accept(&listener).await;
    close_with(&mut socket, 4001).await;

    assert_eq!(run.await.unwrap().unwrap(), SessionEnd::RoomExpired);
}

#[tokio::test]
async fn test_superseded_close_stops_client() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Ann")
        .unwrap()
        .with_policy(fast_policy(3));
    let (tx, _rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut socket, _) = accept(&listener).await;
    send_event(&mut socket, &snapshot()).await;
    close_with(&mut socket, 4000).await;

    assert_eq!(run.await.unwrap().unwrap(), SessionEnd::Superseded);
}

#[tokio::test]
async fn test_reconnects_after_server_shutdown_close() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Ann")
        .unwrap()
        .with_policy(fast_policy(3));
    let (tx, mut rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut first, _) = accept(&listener).await;
    send_event(&mut first, &snapshot()).await;
    close_with(&mut first, 4004).await;

    // Same room and name on the second connection; the snapshot resyncs.
    let (mut second, uri) = accept(&listener).await;
    assert_eq!(uri, "/ws?room=ABC123&name=Ann");
    send_event(&mut second, &snapshot()).await;
    send_event(&mut second, &ServerEvent::RoomExpired {}).await;

    assert_eq!(run.await.unwrap().unwrap(), SessionEnd::RoomExpired);
    assert_eq!(rx.recv().await, Some(snapshot()));
    assert_eq!(rx.recv().await, Some(snapshot()));
    assert_eq!(rx.recv().await, Some(ServerEvent::RoomExpired {}));
}

#[tokio::test]
async fn test_http_rejection_is_terminal() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Mallory")
        .unwrap()
        .with_policy(fast_policy(3));
    let (tx, _rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut stream, _) = listener.accept().await.unwrap();
    stream
        .write_all(b"HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)), "got {err:?}");
}

#[tokio::test]
async fn test_rejected_close_code_is_terminal() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Ann")
        .unwrap()
        .with_policy(fast_policy(3));
    let (tx, _rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut socket, _) = accept(&listener).await;
    close_with(&mut socket, 4003).await;

    assert!(matches!(run.await.unwrap(), Err(ClientError::Rejected(_))));
}

#[tokio::test]
async fn test_retries_exhausted_when_nothing_listens() {
    let (listener, base) = listen().await;
    drop(listener);

    let client = RoomClient::new(&base, "ABC123", "Ann")
        .unwrap()
        .with_policy(fast_policy(2));
    let (tx, _rx) = mpsc::channel(16);

    match client.run(tx).await {
        Err(ClientError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_closes_open_session() {
    let (listener, base) = listen().await;
    let client = RoomClient::new(&base, "ABC123", "Ann").unwrap();
    let cancel = client.cancel_token();
    let (tx, mut rx) = mpsc::channel(16);
    let run = tokio::spawn(async move { client.run(tx).await });

    let (mut socket, _) = accept(&listener).await;
    send_event(&mut socket, &snapshot()).await;
    assert_eq!(rx.recv().await, Some(snapshot()));

    cancel.cancel();
    assert_eq!(run.await.unwrap().unwrap(), SessionEnd::Cancelled);

    // The client sent a close frame rather than dropping the socket.
    let next = tokio::time::timeout(Duration::from_secs(1), socket.next())
        .await
        .unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_)))));
}
