
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use harness::{
    exchange, send_and_close, wait_until, FixedReplyBackend, RelayHandle, TcpEchoBackend,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use vhost_relay::RoutingTable;

const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: a.example\r\n\r\n";
const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nhi";

#[tokio::test]
async fn routed_request_receives_downstream_reply() {
    let backend = FixedReplyBackend::spawn(REPLY).await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let response = exchange(relay.listen_addr, REQUEST).await.unwrap();

    assert_eq!(response, REPLY);
    assert!(wait_until(|| backend.received().len() == 1).await);
    assert_eq!(backend.received()[0], REQUEST);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.relays_completed.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn unknown_host_closes_without_dialing() {
    let backend = FixedReplyBackend::spawn(REPLY).await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let response = exchange(
        relay.listen_addr,
        b"GET / HTTP/1.1\r\nHost: unknown.example\r\n\r\n",
    )
    .await
    .unwrap();

    assert!(response.is_empty());
    assert_eq!(backend.connection_count(), 0);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.host_unknown.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn reload_between_connections_switches_downstream() {
    let x = FixedReplyBackend::spawn(b"from-x").await.unwrap();
    let y = FixedReplyBackend::spawn(b"from-y").await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();

    relay.route("a.example", x.addr);
    assert_eq!(exchange(relay.listen_addr, REQUEST).await.unwrap(), b"from-x");

    relay.route("a.example", y.addr);
    assert_eq!(exchange(relay.listen_addr, REQUEST).await.unwrap(), b"from-y");

    assert_eq!(x.connection_count(), 1);
    assert_eq!(y.connection_count(), 1);
}

#[tokio::test]
async fn reload_does_not_move_established_session() {
    let x = TcpEchoBackend::spawn().await.unwrap();
    let y = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", x.addr);

    let mut stream = TcpStream::connect(relay.listen_addr).await.unwrap();
    stream.write_all(REQUEST).await.unwrap();
    let mut echoed = vec![0u8; REQUEST.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, REQUEST);

    relay.route("a.example", y.addr);

    stream.write_all(b"more").await.unwrap();
    let mut more = [0u8; 4];
    stream.read_exact(&mut more).await.unwrap();
    assert_eq!(&more, b"more");

    assert_eq!(x.connection_count(), 1);
    assert_eq!(y.connection_count(), 0);
}

#[tokio::test]
async fn body_after_header_is_forwarded_in_order() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let mut payload =
        b"POST /upload HTTP/1.1\r\nHost: a.example\r\nContent-Length: 11\r\n\r\n".to_vec();
    payload.extend_from_slice(b"hello world");

    let response = send_and_close(relay.listen_addr, &payload).await.unwrap();

    assert_eq!(response, payload);
    assert!(relay.wait_idle().await);
    let expected_bytes = payload.len() as u64;
    assert!(
        wait_until(|| relay.stats.bytes_to_downstream.load(Ordering::Relaxed) == expected_bytes)
            .await
    );
}

#[tokio::test]
async fn large_body_streams_both_directions_concurrently() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let body: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let mut payload = REQUEST.to_vec();
    payload.extend_from_slice(&body);
    let expected = payload.clone();

    let stream = TcpStream::connect(relay.listen_addr).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();

    // The echo only drains while we read, so writing and reading must overlap.
    let write_task = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), reader.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    write_task.await.unwrap();

    assert_eq!(response.len(), expected.len());
    assert!(response == expected);
}

#[tokio::test]
async fn missing_host_header_closes_connection() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let response = exchange(relay.listen_addr, b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n")
        .await
        .unwrap();

    assert!(response.is_empty());
    assert_eq!(backend.connection_count(), 0);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.host_missing.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn host_match_is_case_sensitive() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let response = exchange(relay.listen_addr, b"GET / HTTP/1.1\r\nhost: a.example\r\n\r\n")
        .await
        .unwrap();

    assert!(response.is_empty());
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn truncated_header_closes_connection() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let response = send_and_close(relay.listen_addr, b"GET / HTTP/1.1\r\nHost: a.example\r\n")
        .await
        .unwrap();

    assert!(response.is_empty());
    assert_eq!(backend.connection_count(), 0);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.header_failed.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn oversized_header_closes_connection() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let table = Arc::new(RoutingTable::new());
    let relay = RelayHandle::spawn_with_table(table, 64).await.unwrap();
    relay.route("a.example", backend.addr);

    let mut payload = b"GET / HTTP/1.1\r\nHost: a.example\r\nX-Padding: ".to_vec();
    payload.extend(std::iter::repeat(b'p').take(100));

    // The relay may close with our bytes unread, which can surface as a reset.
    if let Ok(response) = exchange(relay.listen_addr, &payload).await {
        assert!(response.is_empty());
    }

    assert_eq!(backend.connection_count(), 0);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.header_failed.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn unreachable_downstream_closes_connection() {
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", dead_addr);

    let response = exchange(relay.listen_addr, REQUEST).await.unwrap();

    assert!(response.is_empty());
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.downstream_dial_failed.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn idle_connect_and_close_is_harmless() {
    let relay = RelayHandle::spawn().await.unwrap();

    let stream = TcpStream::connect(relay.listen_addr).await.unwrap();
    drop(stream);

    assert!(wait_until(|| relay.stats.connections_closed.load(Ordering::Relaxed) == 1).await);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.header_failed.load(Ordering::Relaxed) == 1).await);
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let mut handles = Vec::new();
    for i in 0..20 {
        let addr = relay.listen_addr;
        handles.push(tokio::spawn(async move {
            let mut payload = REQUEST.to_vec();
            payload.extend_from_slice(format!("client-{i}").as_bytes());
            let response = send_and_close(addr, &payload).await.unwrap();
            assert_eq!(response, payload);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(backend.connection_count(), 20);
    assert!(relay.wait_idle().await);
    assert!(wait_until(|| relay.stats.connections_accepted.load(Ordering::Relaxed) == 20).await);
}

#[tokio::test]
async fn registry_tracks_live_session() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn().await.unwrap();
    relay.route("a.example", backend.addr);

    let mut stream = TcpStream::connect(relay.listen_addr).await.unwrap();
    stream.write_all(REQUEST).await.unwrap();
    let mut echoed = vec![0u8; REQUEST.len()];
    stream.read_exact(&mut echoed).await.unwrap();

    let sessions = relay.registry.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].peer_addr, stream.local_addr().unwrap());
    assert!(sessions[0].id.to_string().starts_with("sess_"));

    drop(stream);
    assert!(relay.wait_idle().await);
}

#[test]
fn runtime_shutdown_releases_live_sessions() {
    use std::io::{Read, Write};

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let relay = runtime.block_on(RelayHandle::spawn()).unwrap();

    // Half a header: the session stays parked in the scanner.
    let mut client = std::net::TcpStream::connect(relay.listen_addr).unwrap();
    client.write_all(b"GET / HTTP/1.1\r\nHost: a.ex").unwrap();

    let registry = Arc::clone(&relay.registry);
    assert!(runtime.block_on(wait_until(|| registry.len() == 1)));

    drop(runtime);

    assert!(relay.registry.is_empty());
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 16];
    // Either a clean close or a reset; never a timeout.
    match client.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0),
        Err(e) => assert!(
            !matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            "connection still open: {e}"
        ),
    }
}
