//! End-to-end session against a local WebSocket server standing in for a TV.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::StreamExt;
use serde_json::json;
use serde_json::Value;
use telly::store::KeyStore;
use telly::store::MemoryKeyStore;
use telly::webos::ClientError;
use telly::webos::ClientEvent;
use telly::webos::ClientOptions;
use telly::webos::ConnectionState;
use telly::webos::TransportKind;
use telly::webos::TvClient;
use telly::webos::TvCommand;
use telly::webos::WebSocketConnector;
use telly::TvConfiguration;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type Socket = WebSocketStream<TcpStream>;

async fn next_json(ws: &mut Socket) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended: {:?}", other),
        }
    }
}

async fn send_json(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

fn localhost_tv() -> TvConfiguration {
    TvConfiguration::new(
        "Test TV",
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        "AA:BB:CC:DD:EE:FF",
    )
}

fn options(secure_port: u16, plain_port: u16) -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        secure_port,
        plain_port,
    }
}

#[tokio::test]
async fn test_pairs_over_plain_websocket_and_round_trips_a_request() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let plain_port = listener.local_addr().unwrap().port();
    let secure_port = closed_port().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let register = next_json(&mut ws).await;
        send_json(
            &mut ws,
            json!({ "type": "response", "id": register["id"], "payload": { "pairingType": "PROMPT" } }),
        )
        .await;
        send_json(
            &mut ws,
            json!({ "type": "registered", "id": register["id"], "payload": { "client-key": "issued-key" } }),
        )
        .await;

        let mut bootstrap = Vec::new();
        for _ in 0..4 {
            let frame = next_json(&mut ws).await;
            bootstrap.push(format!(
                "{} {}",
                frame["type"].as_str().unwrap(),
                frame["uri"].as_str().unwrap()
            ));
        }

        send_json(
            &mut ws,
            json!({ "type": "response", "id": "99", "payload": { "volumeStatus": { "volume": 30, "muteStatus": true } } }),
        )
        .await;

        let request = next_json(&mut ws).await;
        send_json(
            &mut ws,
            json!({ "type": "response", "id": request["id"], "payload": { "returnValue": true } }),
        )
        .await;

        // Drain until the client goes away.
        while let Some(Ok(_)) = ws.next().await {}
        (register, bootstrap, request)
    });

    let keys = Arc::new(MemoryKeyStore::new());
    let (client, mut events) = TvClient::new(
        Arc::new(WebSocketConnector::new()),
        keys.clone(),
        options(secure_port, plain_port),
    );

    client.connect(&localhost_tv()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(
        client.snapshot().capabilities.transport,
        Some(TransportKind::Plain)
    );
    assert_eq!(
        keys.load_key("127.0.0.1").unwrap().as_deref(),
        Some("issued-key")
    );

    loop {
        if let Some(ClientEvent::VolumeChanged { volume, muted }) = events.recv().await {
            assert_eq!(volume, 30);
            assert_eq!(muted, Some(true));
            break;
        }
    }

    client.request(TvCommand::SetVolume(12)).await.unwrap();
    client.disconnect();

    let (register, bootstrap, request) = server.await.unwrap();
    assert_eq!(register["type"], "register");
    assert!(register["payload"].get("client-key").is_none());
    assert_eq!(
        bootstrap,
        vec![
            "subscribe ssap://com.webos.applicationManager/getForegroundAppInfo",
            "request ssap://com.webos.applicationManager/getForegroundAppInfo",
            "request ssap://tv/getInputList",
            "subscribe ssap://audio/getVolume",
        ]
    );
    assert_eq!(request["uri"], "ssap://audio/setVolume");
    assert_eq!(request["payload"]["volume"], 12);
}

#[tokio::test]
async fn test_reports_plain_failure_when_nothing_listens() {
    let secure_port = closed_port().await;
    let plain_port = closed_port().await;

    let (client, _events) = TvClient::new(
        Arc::new(WebSocketConnector::new()),
        Arc::new(MemoryKeyStore::new()),
        options(secure_port, plain_port),
    );

    let err = client.connect(&localhost_tv()).await.unwrap_err();
    match err {
        ClientError::TransportFailure { endpoint, .. } => {
            assert_eq!(endpoint, format!("ws://127.0.0.1:{}", plain_port));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
