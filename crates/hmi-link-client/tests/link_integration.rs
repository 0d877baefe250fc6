//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "tests"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Loopback tests for the reconnecting telemetry client."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use hmi_link_client::{
    ChannelSubscriber, CloseKind, DeviceControl, DeviceRegistry, FanSpeed, LinkConfig, LinkHandle,
    LinkMetrics, LinkStatus, MessageKind, Notification, ReconnectSupervisor, SendStatus,
};
use hmi_link_msg::{decode, encode, TERMINATOR};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn listener() -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

async fn accept(listener: &TcpListener) -> Result<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .context("client never connected")??;
    Ok(stream)
}

fn notify(body: serde_json::Value) -> Result<Vec<u8>> {
    Ok(encode(&MessageKind::NotifyToFrontend, &body)?.to_vec())
}

fn start(config: LinkConfig, registry: DeviceRegistry) -> LinkHandle {
    ReconnectSupervisor::new(config, registry, LinkMetrics::default())
        .expect("valid link config")
        .spawn()
}

fn channel_for(registry: &DeviceRegistry, device_id: &str) -> mpsc::Receiver<Notification> {
    let (subscriber, rx) = ChannelSubscriber::bounded(16);
    registry.subscribe(device_id, subscriber).expect("subscribe");
    rx
}

async fn next(rx: &mut mpsc::Receiver<Notification>) -> Result<Notification> {
    timeout(WAIT, rx.recv())
        .await
        .context("no notification arrived")?
        .context("subscriber queue closed")
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut received = Vec::new();
    let mut chunk = [0u8; 256];
    while !received.contains(&TERMINATOR) {
        let n = timeout(WAIT, stream.read(&mut chunk)).await??;
        anyhow::ensure!(n > 0, "client closed before a full frame arrived");
        received.extend_from_slice(&chunk[..n]);
    }
    Ok(received)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_frames_are_routed_and_garbage_is_isolated() -> Result<()> {
    let (listener, addr) = listener().await?;
    let registry = DeviceRegistry::new();
    let mut tank = channel_for(&registry, "tank-1");
    let mut gas = channel_for(&registry, "gas-1");
    let link = start(LinkConfig::with_server(addr), registry);

    let mut server = accept(&listener).await?;
    let mut wire = notify(json!({"device-sn": "tank-1", "water-amount": 70}))?;
    wire.extend_from_slice(b"not a frame at all\x04");
    wire.extend_from_slice(&notify(json!({"device-sn": "gas-1", "CO": 3, "HCl": 1, "SO2": 0}))?);
    let (head, tail) = wire.split_at(wire.len() / 2 + 3);
    server.write_all(head).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.write_all(tail).await?;

    let water = next(&mut tank).await?;
    assert_eq!(water.body["water-amount"], json!(70));
    let reading = next(&mut gas).await?;
    assert_eq!(reading.body["CO"], json!(3));

    let counters = link.metrics().snapshot();
    assert_eq!(counters.frames_received, 3);
    assert_eq!(counters.frames_discarded, 1);
    assert_eq!(counters.sessions, 1);
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_server_closes() -> Result<()> {
    let (listener, addr) = listener().await?;
    let registry = DeviceRegistry::new();
    let mut tank = channel_for(&registry, "tank-1");
    let link = start(LinkConfig::with_server(addr), registry);

    let mut first = accept(&listener).await?;
    first
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 1}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(1));
    drop(first);

    let mut second = accept(&listener).await?;
    assert!(link.wait_connected(WAIT).await);
    second
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 2}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(2));
    assert!(link.metrics().snapshot().sessions >= 2);
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_connection_reset() -> Result<()> {
    let (listener, addr) = listener().await?;
    let registry = DeviceRegistry::new();
    let mut tank = channel_for(&registry, "tank-1");
    // Long enough for the closed status to be observed before the next attempt.
    let config = LinkConfig {
        retry_delay: Duration::from_millis(300),
        ..LinkConfig::with_server(addr)
    };
    let link = start(config, registry);

    let first = accept(&listener).await?;
    assert!(link.wait_connected(WAIT).await);
    first.set_linger(Some(Duration::ZERO))?;
    drop(first);

    assert!(
        link.wait_for(WAIT, |s| *s == LinkStatus::Closed(CloseKind::Io))
            .await
    );
    let mut second = accept(&listener).await?;
    second
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 0.5}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(0.5));
    assert_eq!(link.metrics().snapshot().sessions, 2);
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_command_reaches_server() -> Result<()> {
    let (listener, addr) = listener().await?;
    let link = start(LinkConfig::with_server(addr), DeviceRegistry::new());
    let mut server = accept(&listener).await?;
    assert!(link.wait_connected(WAIT).await);

    let command = DeviceControl::set_fan_speed("fan-2", FanSpeed::High);
    assert_eq!(link.sender().send_control(&command)?, SendStatus::Queued);

    let wire = read_frame(&mut server).await?;
    assert_eq!(wire.last(), Some(&TERMINATOR));
    let frame = decode(&wire[..wire.len() - 1])?;
    assert_eq!(frame.kind, MessageKind::DeviceControl);
    assert_eq!(frame.body["device-sn"], json!("fan-2"));
    assert_eq!(frame.body["fan-speed"], json!(3));

    let deadline = tokio::time::Instant::now() + WAIT;
    while link.metrics().snapshot().messages_sent == 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_while_disconnected_is_dropped() -> Result<()> {
    let (listener, addr) = listener().await?;
    drop(listener);
    let config = LinkConfig {
        retry_delay: Duration::from_millis(10),
        ..LinkConfig::with_server(addr)
    };
    let link = start(config, DeviceRegistry::new());

    let status = link
        .sender()
        .send(&MessageKind::DeviceControl, &json!({"device-sn": "fan-1"}))?;
    assert_eq!(status, SendStatus::Disconnected);
    assert_eq!(link.metrics().snapshot().messages_dropped, 1);
    assert!(
        link.wait_for(WAIT, |s| *s == LinkStatus::Closed(CloseKind::ConnectRefused))
            .await
    );
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_coming_up_late_is_reached() -> Result<()> {
    let (listener, addr) = listener().await?;
    drop(listener);
    let registry = DeviceRegistry::new();
    let mut tank = channel_for(&registry, "tank-1");
    let config = LinkConfig {
        retry_delay: Duration::from_millis(10),
        ..LinkConfig::with_server(addr)
    };
    let link = start(config, registry);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let listener = TcpListener::bind(addr).await?;
    let mut server = accept(&listener).await?;
    server
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 9}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(9));
    assert!(link.metrics().snapshot().sessions >= 2);
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_subscriber_forces_reconnect() -> Result<()> {
    let (listener, addr) = listener().await?;
    let registry = DeviceRegistry::new();
    registry.subscribe("faulty", |_: Notification| panic!("subscriber bug"))?;
    let mut tank = channel_for(&registry, "tank-1");
    let link = start(LinkConfig::with_server(addr), registry);

    let mut first = accept(&listener).await?;
    first
        .write_all(&notify(json!({"device-sn": "faulty"}))?)
        .await?;

    let mut second = accept(&listener).await?;
    second
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 4}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(4));
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_timeout_is_not_fatal() -> Result<()> {
    let (listener, addr) = listener().await?;
    let registry = DeviceRegistry::new();
    let mut tank = channel_for(&registry, "tank-1");
    let config = LinkConfig {
        read_timeout: Some(Duration::from_millis(10)),
        ..LinkConfig::with_server(addr)
    };
    let link = start(config, registry);

    let mut server = accept(&listener).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    server
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 5}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(5));
    assert_eq!(link.metrics().snapshot().sessions, 1);
    assert!(link.is_connected());
    link.abort().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_frame_is_skipped() -> Result<()> {
    let (listener, addr) = listener().await?;
    let registry = DeviceRegistry::new();
    let mut tank = channel_for(&registry, "tank-1");
    let config = LinkConfig {
        max_frame_len: 256,
        ..LinkConfig::with_server(addr)
    };
    let link = start(config, registry);

    let mut server = accept(&listener).await?;
    let filler = "x".repeat(1024);
    server
        .write_all(&notify(json!({"device-sn": "tank-1", "blob": filler}))?)
        .await?;
    server
        .write_all(&notify(json!({"device-sn": "tank-1", "water-amount": 6}))?)
        .await?;
    assert_eq!(next(&mut tank).await?.body["water-amount"], json!(6));
    assert_eq!(link.metrics().snapshot().frames_discarded, 1);
    link.abort().await;
    Ok(())
}
