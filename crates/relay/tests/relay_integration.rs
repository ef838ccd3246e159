// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay integration tests using real WebSocket clients against an
//! in-process listener.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use tiltrelay::codec::{self, encode_masked, Decoded, OpCode};
use tiltrelay::event::{Direction, RelayEvent};
use tiltrelay::state::ClientRole;
use tiltrelay::test_support::{spawn_relay, spawn_relay_with};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn ws_connect(addr: &SocketAddr) -> anyhow::Result<(WsTx, WsRx)> {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

async fn ws_send(tx: &mut WsTx, text: &str) -> anyhow::Result<()> {
    tx.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))
}

/// Receive the next text message with timeout.
async fn ws_recv_text(rx: &mut WsRx) -> anyhow::Result<String> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
            .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
            .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
        match msg {
            WsMessage::Text(text) => return Ok(text.to_string()),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => anyhow::bail!("expected Text message, got {other:?}"),
        }
    }
}

async fn ws_recv_json(rx: &mut WsRx) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::from_str(&ws_recv_text(rx).await?)?)
}

/// Assert nothing arrives within a short window.
async fn ws_expect_silence(rx: &mut WsRx) -> anyhow::Result<()> {
    match tokio::time::timeout(Duration::from_millis(150), rx.next()).await {
        Err(_) => Ok(()),
        Ok(msg) => anyhow::bail!("unexpected message: {msg:?}"),
    }
}

/// Connect a game client and register it as primary.
async fn connect_game(addr: &SocketAddr) -> anyhow::Result<(WsTx, WsRx)> {
    let (mut tx, mut rx) = ws_connect(addr).await?;
    ws_send(&mut tx, "UNITY_INIT").await?;
    let reply = ws_recv_json(&mut rx).await?;
    anyhow::ensure!(reply["type"] == "connected", "unexpected reply: {reply}");
    Ok((tx, rx))
}

async fn wait_for<F, Fut>(mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !check().await {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn direction_is_acknowledged() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let (mut tx, mut rx) = ws_connect(&server.local_addr()).await?;

    ws_send(&mut tx, r#"{"Direction":"up","Timestamp":"2025-01-01T00:00:00Z"}"#).await?;
    let ack = ws_recv_json(&mut rx).await?;
    assert_eq!(ack, serde_json::json!({"type": "ack", "direction": "up"}));

    let last = server.state().last_direction();
    assert_eq!(last.as_ref().map(|d| d.direction), Some(Direction::Up));
    assert_eq!(last.and_then(|d| d.timestamp).as_deref(), Some("2025-01-01T00:00:00Z"));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn invalid_direction_gets_no_ack_and_stays_open() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let (mut tx, mut rx) = ws_connect(&server.local_addr()).await?;

    ws_send(&mut tx, r#"{"Direction":"sideways"}"#).await?;
    ws_send(&mut tx, "just some text").await?;
    ws_expect_silence(&mut rx).await?;
    assert!(server.state().last_direction().is_none());

    ws_send(&mut tx, r#"{"Direction":"left"}"#).await?;
    assert_eq!(ws_recv_json(&mut rx).await?["direction"], "left");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn gyro_is_relayed_to_game_verbatim() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let addr = server.local_addr();
    let (_game_tx, mut game_rx) = connect_game(&addr).await?;
    let (mut phone_tx, mut phone_rx) = ws_connect(&addr).await?;

    let payload = r#"{"alpha":12.345678901234,"beta":-0.5,"gamma":90,"timestamp":1700000000000}"#;
    ws_send(&mut phone_tx, payload).await?;

    assert_eq!(ws_recv_text(&mut game_rx).await?, payload);
    ws_expect_silence(&mut phone_rx).await?;

    let gyro = server.state().last_gyro();
    assert_eq!(gyro.map(|g| g.gamma), Some(90.0));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn game_disconnect_stops_forwarding() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let addr = server.local_addr();
    let (mut game_tx, game_rx) = connect_game(&addr).await?;
    let (mut phone_tx, mut phone_rx) = ws_connect(&addr).await?;

    game_tx.close().await.map_err(|e| anyhow::anyhow!("ws close: {e}"))?;
    drop(game_rx);
    let state = server.state().clone();
    wait_for(|| {
        let state = state.clone();
        async move { state.primary().await.is_none() }
    })
    .await?;

    // Gyro goes nowhere, without error; the phone stays usable.
    ws_send(&mut phone_tx, r#"{"alpha":1,"beta":2,"gamma":3}"#).await?;
    ws_send(&mut phone_tx, r#"{"Direction":"stop"}"#).await?;
    assert_eq!(ws_recv_json(&mut phone_rx).await?["direction"], "stop");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn gyro_frames_split_across_reads_arrive_once_in_order() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let addr = server.local_addr();
    let (_game_tx, mut game_rx) = connect_game(&addr).await?;

    // Raw phone client so the split point is under test control.
    let mut phone = TcpStream::connect(addr).await?;
    phone.set_nodelay(true)?;
    phone
        .write_all(
            b"GET / HTTP/1.1\r\nHost: relay\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .await?;
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        tokio::time::timeout(RECV_TIMEOUT, phone.read_exact(&mut byte)).await??;
        head.push(byte[0]);
    }
    let head = String::from_utf8(head)?;
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), "{head}");

    let first = r#"{"alpha":1,"beta":2,"gamma":3}"#;
    let second = r#"{"alpha":4,"beta":5,"gamma":6}"#;
    let mut bytes = encode_masked(OpCode::Text, first.as_bytes(), [0xde, 0xad, 0xbe, 0xef]);
    bytes.extend(encode_masked(OpCode::Text, second.as_bytes(), [0x01, 0x02, 0x03, 0x04]));
    let split = bytes.len() / 2 + 3;

    phone.write_all(&bytes[..split]).await?;
    phone.flush().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    phone.write_all(&bytes[split..]).await?;

    assert_eq!(ws_recv_text(&mut game_rx).await?, first);
    assert_eq!(ws_recv_text(&mut game_rx).await?, second);
    ws_expect_silence(&mut game_rx).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn large_direction_message_with_extended_length() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let (mut tx, mut rx) = ws_connect(&server.local_addr()).await?;

    // Padding pushes the frame into the 64-bit length class.
    let padded = format!(r#"{{"Direction":"down","pad":"{}"}}"#, "p".repeat(70_000));
    ws_send(&mut tx, &padded).await?;
    assert_eq!(ws_recv_json(&mut rx).await?["direction"], "down");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn oversized_message_closes_connection() -> anyhow::Result<()> {
    let server = spawn_relay_with(|c| c.max_frame_bytes = 512).await?;
    let (mut tx, mut rx) = ws_connect(&server.local_addr()).await?;

    ws_send(&mut tx, &"z".repeat(4096)).await?;
    let next = tokio::time::timeout(RECV_TIMEOUT, rx.next()).await?;
    assert!(
        matches!(next, Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None),
        "expected close, got {next:?}"
    );

    let state = server.state().clone();
    wait_for(|| {
        let state = state.clone();
        async move { state.client_count().await == 0 }
    })
    .await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn subscribers_see_relay_events() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let mut events = server.state().subscribe();
    let (mut tx, mut rx) = ws_connect(&server.local_addr()).await?;

    ws_send(&mut tx, r#"{"Direction":"right"}"#).await?;
    ws_recv_json(&mut rx).await?;

    let mut saw_connect = false;
    loop {
        let event = tokio::time::timeout(RECV_TIMEOUT, events.recv()).await??;
        match event {
            RelayEvent::ClientConnected { .. } => saw_connect = true,
            RelayEvent::Direction { event, .. } => {
                assert_eq!(event.direction, Direction::Right);
                break;
            }
            other => anyhow::bail!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_connect);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn game_side_can_push_to_phones() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let (mut tx, mut rx) = ws_connect(&server.local_addr()).await?;
    ws_send(&mut tx, r#"{"Direction":"up"}"#).await?;
    ws_recv_json(&mut rx).await?;

    let sent = server.state().send_to_role(ClientRole::Secondary, r#"{"type":"vibrate"}"#).await;
    assert_eq!(sent, 1);
    assert_eq!(ws_recv_json(&mut rx).await?["type"], "vibrate");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_twice_closes_clients_once() -> anyhow::Result<()> {
    let server = spawn_relay().await?;
    let (_tx, mut rx) = ws_connect(&server.local_addr()).await?;

    server.stop().await;
    server.stop().await;
    assert_eq!(server.state().client_count().await, 0);

    let next = tokio::time::timeout(RECV_TIMEOUT, rx.next()).await?;
    assert!(
        matches!(next, Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None),
        "expected close, got {next:?}"
    );
    Ok(())
}

#[tokio::test]
async fn decoder_reads_server_frames() -> anyhow::Result<()> {
    // Sanity check that server-side encoding is what a raw reader expects.
    let frame = codec::encode_text("ok");
    assert_eq!(
        codec::decode_text(&frame)?,
        Decoded::Complete { value: "ok".to_owned(), consumed: 4 }
    );
    Ok(())
}
