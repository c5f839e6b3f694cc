use super::mock::{MockDiscovery, MockGateway};
use crate::aio;
use crate::types::Error;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// Poll until the gateway saw `count` clears or two seconds pass
async fn wait_for_clears(gateway: &MockGateway, count: usize) -> Vec<u16> {
    for _ in 0..200 {
        let clears = gateway.clears();
        if clears.len() >= count {
            return clears;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    gateway.clears()
}

#[tokio::test]
async fn test_aio_listen_forwards_and_closes() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway::new());

    let listener = aio::listen_with(discovery.clone(), "tcp", "127.0.0.1:0")
        .await
        .unwrap();
    let bound = listener.get_ref().local_addr().unwrap();

    assert_eq!(listener.local_addr().network(), "tcp");
    assert_eq!(listener.local_addr().to_string(), format!("203.0.113.5:{}", bound.port()));
    assert_eq!(discovery.count(), 1);

    listener.close().await;
    assert_eq!(gateway.clears(), vec![bound.port()]);
}

#[tokio::test]
async fn test_aio_accept_passthrough() {
    let (discovery, _gateway) = MockDiscovery::new(MockGateway::new());
    let listener = aio::listen_with(discovery, "tcp4", "127.0.0.1:0").await.unwrap();
    let bound = listener.get_ref().local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(bound).await.unwrap();
        stream.write_all(b"hello").await.unwrap();
    });

    let (mut stream, _peer) = listener.accept().await.unwrap();
    assert_eq!(stream.local_addr().unwrap(), bound);

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
    client.await.unwrap();
}

#[tokio::test]
async fn test_aio_packet_roundtrip() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway::new());
    let socket = aio::listen_packet_with(discovery, "udp", "127.0.0.1:0").await.unwrap();
    let bound = socket.get_ref().local_addr().unwrap();

    assert_eq!(socket.local_addr().network(), "udp");
    assert_eq!(socket.local_addr().port(), bound.port());

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"ping", bound).await.unwrap();

    let mut buf = [0u8; 16];
    let (n, from) = socket.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");
    socket.send_to(b"pong", from).await.unwrap();

    let (n, _) = peer.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"pong");

    socket.close().await;
    assert_eq!(gateway.clears(), vec![bound.port()]);
}

#[tokio::test]
async fn test_aio_forwarding_failure() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway::refusing());

    let result = aio::listen_with(discovery, "tcp", "127.0.0.1:0").await;
    assert!(matches!(result, Err(Error::Forwarding(_))));
    assert_eq!(gateway.active_count(), 0);
}

#[tokio::test]
async fn test_aio_discovery_failure() {
    let result = aio::listen_packet_with(MockDiscovery::none(), "udp", "127.0.0.1:0").await;
    assert!(matches!(result, Err(Error::Discovery(_))));
}

#[tokio::test]
async fn test_aio_drop_tears_down() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway::new());
    let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = raw.local_addr().unwrap().port();

    let listener = aio::wrap_listener_with(discovery, raw).await.unwrap();
    drop(listener);

    assert_eq!(wait_for_clears(&gateway, 1).await, vec![port]);
}

#[tokio::test]
async fn test_aio_udp_drop_tears_down() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway::new());
    let socket = aio::listen_packet_with(discovery, "udp", "127.0.0.1:0").await.unwrap();
    let port = socket.get_ref().local_addr().unwrap().port();

    drop(socket);

    assert_eq!(wait_for_clears(&gateway, 1).await, vec![port]);
}

#[tokio::test]
async fn test_aio_drop_does_not_block_runtime() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway {
        clear_delay: Some(Duration::from_millis(800)),
        ..MockGateway::new()
    });
    let listener = aio::listen_with(discovery, "tcp", "127.0.0.1:0").await.unwrap();
    let port = listener.get_ref().local_addr().unwrap().port();

    let timer = tokio::spawn(async {
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        start.elapsed()
    });
    tokio::task::yield_now().await;

    let start = Instant::now();
    drop(listener);
    let drop_elapsed = start.elapsed();

    assert!(
        drop_elapsed < Duration::from_millis(400),
        "drop blocked for {:?}",
        drop_elapsed
    );

    let timer_elapsed = timer.await.unwrap();
    assert!(
        timer_elapsed < Duration::from_millis(400),
        "timer fired after {:?}",
        timer_elapsed
    );

    assert_eq!(wait_for_clears(&gateway, 1).await, vec![port]);
}

#[test]
fn test_aio_drop_outside_runtime_clears_inline() {
    let (discovery, gateway) = MockDiscovery::new(MockGateway::new());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let listener = runtime
        .block_on(aio::listen_with(discovery, "tcp", "127.0.0.1:0"))
        .unwrap();
    let port = listener.get_ref().local_addr().unwrap().port();

    drop(listener);
    assert_eq!(gateway.clears(), vec![port]);
}
