//! End-to-end handshake tests against an in-process WebSocket server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use sendspin_core::protocol::BinaryMessage;
use sendspin_core::{
    ClientConfig, ClientError, ClientEvent, SendspinClient, SessionState, TransportError,
};

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

async fn accept(listener: TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.expect("accept");
    tokio_tungstenite::accept_async(stream).await.expect("ws upgrade")
}

/// Receives the next text frame, asserting nothing else sneaks in before it.
async fn recv_text(ws: &mut ServerWs) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            WsMessage::Text(text) => return serde_json::from_str(&text).expect("valid json"),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Receives text frames until one with the given type arrives, skipping
/// clock probes and other interleaved traffic.
async fn recv_type(ws: &mut ServerWs, expect: &str) -> Value {
    loop {
        let value = recv_text(ws).await;
        if value["type"] == expect {
            return value;
        }
    }
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("server send");
}

fn server_hello() -> Value {
    json!({
        "type": "server/hello",
        "payload": {
            "server_id": "srv-1",
            "name": "Test Server",
            "version": 1,
            "active_roles": ["player@v1"],
            "connection_reason": "playback"
        }
    })
}

async fn expect_event<F>(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn handshake_with_token_follows_the_message_order() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(listener).await;

        // auth must be the first frame on the wire.
        let auth = recv_text(&mut ws).await;
        assert_eq!(auth["type"], "auth");
        assert_eq!(auth["payload"]["token"], "secret");
        assert_eq!(auth["payload"]["client_id"], "test-client");
        send_json(&mut ws, json!({"type": "auth/ok", "payload": {}})).await;

        // client/hello follows auth/ok.
        let hello = recv_text(&mut ws).await;
        assert_eq!(hello["type"], "client/hello");
        assert_eq!(hello["payload"]["version"], 1);
        assert_eq!(hello["payload"]["name"], "Test Player");
        let roles = hello["payload"]["supported_roles"].as_array().unwrap();
        assert!(roles.iter().any(|r| r == "player@v1"));
        let formats = hello["payload"]["player@v1_support"]["supported_formats"]
            .as_array()
            .unwrap();
        assert!(!formats.is_empty(), "formats must be advertised");
        send_json(&mut ws, server_hello()).await;

        // The initial client/state report follows the hello exchange.
        let state = recv_type(&mut ws, "client/state").await;
        assert_eq!(state["payload"]["player"]["state"], "synchronized");
        assert_eq!(state["payload"]["player"]["volume"], 100);
        ws
    });

    let config = ClientConfig {
        client_id: "test-client".into(),
        display_name: "Test Player".into(),
        auth_token: Some("secret".into()),
        ..ClientConfig::default()
    };
    let client = SendspinClient::new(config).unwrap();
    let mut events = client.subscribe();

    client.connect(&url).await.expect("connect");
    expect_event(&mut events, |e| matches!(e, ClientEvent::ServerConnected)).await;
    assert!(client.is_connected().await);
    assert_eq!(client.state(), SessionState::Connected);

    let _ws = server.await.unwrap();
    client.disconnect().await;
    assert!(!client.is_connected().await);
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn handshake_without_token_skips_auth() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(listener).await;
        let hello = recv_text(&mut ws).await;
        assert_eq!(hello["type"], "client/hello", "no auth expected without a token");
        send_json(&mut ws, server_hello()).await;
        let state = recv_type(&mut ws, "client/state").await;
        assert_eq!(state["payload"]["player"]["muted"], false);
        ws
    });

    let client = SendspinClient::new(ClientConfig::default()).unwrap();
    let mut events = client.subscribe();
    client.connect(&url).await.expect("connect");
    expect_event(&mut events, |e| matches!(e, ClientEvent::ServerConnected)).await;

    let _ws = server.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn metadata_and_artwork_are_routed_to_events() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(listener).await;
        let _hello = recv_text(&mut ws).await;
        send_json(&mut ws, server_hello()).await;

        send_json(
            &mut ws,
            json!({
                "type": "stream/metadata",
                "payload": {"title": "Blue Monday", "artist": "New Order"}
            }),
        )
        .await;

        let artwork = BinaryMessage {
            message_type: 9,
            server_timestamp_us: 1_000,
            payload: bytes::Bytes::from_static(&[0xFF, 0xD8, 0xFF]),
        };
        ws.send(WsMessage::Binary(artwork.encode().into()))
            .await
            .expect("send artwork");
        ws
    });

    let client = SendspinClient::new(ClientConfig::default()).unwrap();
    let mut events = client.subscribe();
    client.connect(&url).await.expect("connect");

    let metadata = expect_event(&mut events, |e| {
        matches!(e, ClientEvent::MetadataReceived(_))
    })
    .await;
    let ClientEvent::MetadataReceived(track) = metadata else {
        unreachable!();
    };
    assert_eq!(track.title.as_deref(), Some("Blue Monday"));
    assert_eq!(track.artist.as_deref(), Some("New Order"));

    let artwork = expect_event(&mut events, |e| {
        matches!(e, ClientEvent::ArtworkReceived { .. })
    })
    .await;
    let ClientEvent::ArtworkReceived { channel, data } = artwork else {
        unreachable!();
    };
    assert_eq!(channel, 1);
    assert_eq!(data.as_ref(), &[0xFF, 0xD8, 0xFF]);

    let _ws = server.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn unsupported_codec_reports_error_but_keeps_the_connection() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(listener).await;
        let _hello = recv_text(&mut ws).await;
        send_json(&mut ws, server_hello()).await;

        // A codec the client never advertised.
        send_json(
            &mut ws,
            json!({
                "type": "stream/start",
                "payload": {
                    "player": {
                        "codec": "mp3",
                        "sample_rate": 44100,
                        "channels": 2,
                        "bit_depth": 16
                    }
                }
            }),
        )
        .await;

        // The player must report the error state without disconnecting.
        loop {
            let state = recv_type(&mut ws, "client/state").await;
            if state["payload"]["player"]["state"] == "error" {
                break;
            }
        }
        ws
    });

    let client = SendspinClient::new(ClientConfig::default()).unwrap();
    let mut events = client.subscribe();
    client.connect(&url).await.expect("connect");
    expect_event(&mut events, |e| matches!(e, ClientEvent::ServerConnected)).await;

    let _ws = server.await.unwrap();
    assert!(
        client.is_connected().await,
        "an unsupported codec must not drop the session"
    );
    client.disconnect().await;
}

#[tokio::test]
async fn server_closing_during_handshake_fails_the_connect() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let ws = accept(listener).await;
        // Close immediately without speaking the protocol.
        drop(ws);
    });

    let client = SendspinClient::new(ClientConfig::default()).unwrap();
    let result = client.connect(&url).await;
    assert!(result.is_err(), "connect must fail when the server bails out");
    assert_eq!(client.state(), SessionState::Disconnected);
    server.await.unwrap();
}

#[tokio::test]
async fn handshake_budget_covers_the_connect_phase() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        // Stall the upgrade so the connect phase consumes part of the
        // handshake budget, then never speak the protocol.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, WsMessage::Close(_)) {
                break;
            }
        }
    });

    let client = SendspinClient::new(ClientConfig::default()).unwrap();
    let started = std::time::Instant::now();
    let result = client.connect(&url).await;
    let elapsed = started.elapsed();

    assert!(
        matches!(
            &result,
            Err(ClientError::Transport(TransportError::ConnectionTimeout))
        ),
        "a silent server must time the handshake out, got {result:?}"
    );
    // connect + auth + server/hello share one 10s budget: the 2s spent
    // connecting must not be stacked on top of the hello wait.
    assert!(
        elapsed < Duration::from_secs(11),
        "handshake deadline must cover the connect phase, took {elapsed:?}"
    );
    assert_eq!(client.state(), SessionState::Disconnected);
    server.abort();
}

#[tokio::test]
async fn client_reconnects_with_a_fresh_session() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            let hello = recv_text(&mut ws).await;
            assert_eq!(hello["type"], "client/hello");
            send_json(&mut ws, server_hello()).await;
            let _state = recv_type(&mut ws, "client/state").await;
            // Keep the socket open until the client hangs up.
            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, WsMessage::Close(_)) {
                    break;
                }
            }
        }
    });

    let client = SendspinClient::new(ClientConfig::default()).unwrap();
    client.connect(&url).await.expect("first connect");

    // A second connect while live is refused.
    assert!(client.connect(&url).await.is_err());

    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Disconnected);

    client.connect(&url).await.expect("reconnect");
    assert!(client.is_connected().await);
    client.disconnect().await;
    server.await.unwrap();
}
