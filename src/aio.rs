//! Async entry points for tokio sockets
//!
//! Gateway discovery and mapping use blocking I/O, so the exchange runs on
//! tokio's blocking pool while the socket itself stays a tokio socket.

use crate::forward::{Teardown, establish};
use crate::gateway::Discovery;
use crate::listen::bind_addr;
use crate::types::{Error, ExternalAddr, Transport};
use crate::upnp::IgdDiscovery;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, warn};

/// Run the coordinator on the blocking pool
async fn establish_blocking<D>(
    discovery: D,
    transport: Transport,
    local: SocketAddr,
) -> Result<(Teardown, ExternalAddr), Error>
where
    D: Discovery + Send + 'static,
{
    tokio::task::spawn_blocking(move || establish(&discovery, transport, local))
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
}

/// Clear a mapping without blocking the runtime
async fn run_teardown(teardown: Teardown) {
    if let Err(e) = tokio::task::spawn_blocking(move || teardown.run()).await {
        warn!("Teardown task failed: {}", e);
    }
}

/// Clear a mapping from `Drop`
///
/// Inside a runtime the clear is handed to the blocking pool and not awaited;
/// outside one it runs on the current thread.
fn release_teardown(teardown: Option<Teardown>) {
    let Some(teardown) = teardown else {
        return;
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            debug!("Clearing mapping for port {} in the background", teardown.port());
            handle.spawn_blocking(move || teardown.run());
        }
        Err(_) => teardown.run(),
    }
}

/// A tokio TCP listener whose port is forwarded on the gateway
#[derive(Debug)]
pub struct ForwardedTcpListener {
    inner: TcpListener,
    external: ExternalAddr,
    teardown: Option<Teardown>,
}

impl ForwardedTcpListener {
    /// Accept the next connection
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    /// External address of the listener
    pub fn local_addr(&self) -> ExternalAddr {
        self.external
    }

    /// Alias of [`local_addr`](Self::local_addr)
    pub fn external_addr(&self) -> ExternalAddr {
        self.external
    }

    /// The raw listener
    pub fn get_ref(&self) -> &TcpListener {
        &self.inner
    }

    /// Close the listener, then remove the port mapping
    pub async fn close(mut self) {
        let teardown = self.teardown.take();
        drop(self);

        if let Some(teardown) = teardown {
            run_teardown(teardown).await;
        }
    }
}

impl Drop for ForwardedTcpListener {
    fn drop(&mut self) {
        release_teardown(self.teardown.take());
    }
}

/// A tokio UDP socket whose port is forwarded on the gateway
#[derive(Debug)]
pub struct ForwardedUdpSocket {
    inner: UdpSocket,
    external: ExternalAddr,
    teardown: Option<Teardown>,
}

impl ForwardedUdpSocket {
    /// Receive a datagram
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    /// Send a datagram to `addr`
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr).await
    }

    /// External address of the socket
    pub fn local_addr(&self) -> ExternalAddr {
        self.external
    }

    /// Alias of [`local_addr`](Self::local_addr)
    pub fn external_addr(&self) -> ExternalAddr {
        self.external
    }

    /// The raw socket
    pub fn get_ref(&self) -> &UdpSocket {
        &self.inner
    }

    /// Close the socket, then remove the port mapping
    pub async fn close(mut self) {
        let teardown = self.teardown.take();
        drop(self);

        if let Some(teardown) = teardown {
            run_teardown(teardown).await;
        }
    }
}

impl Drop for ForwardedUdpSocket {
    fn drop(&mut self) {
        release_teardown(self.teardown.take());
    }
}

/// Forward the port of `listener` through a discovered UPnP gateway
pub async fn wrap_listener(listener: TcpListener) -> Result<ForwardedTcpListener, Error> {
    wrap_listener_with(IgdDiscovery::default(), listener).await
}

/// Forward the port of `listener` through the gateway `discovery` finds
///
/// The listener is dropped, and thereby closed, if forwarding fails.
pub async fn wrap_listener_with<D>(
    discovery: D,
    listener: TcpListener,
) -> Result<ForwardedTcpListener, Error>
where
    D: Discovery + Send + 'static,
{
    let local = listener.local_addr()?;
    let (teardown, external) = establish_blocking(discovery, Transport::Tcp, local)
        .await
        .inspect_err(|e| debug!("Closing listener after failed forwarding: {}", e))?;

    Ok(ForwardedTcpListener {
        inner: listener,
        external,
        teardown: Some(teardown),
    })
}

/// Forward the port of `socket` through a discovered UPnP gateway
pub async fn wrap_packet(socket: UdpSocket) -> Result<ForwardedUdpSocket, Error> {
    wrap_packet_with(IgdDiscovery::default(), socket).await
}

/// Forward the port of `socket` through the gateway `discovery` finds
pub async fn wrap_packet_with<D>(discovery: D, socket: UdpSocket) -> Result<ForwardedUdpSocket, Error>
where
    D: Discovery + Send + 'static,
{
    let local = socket.local_addr()?;
    let (teardown, external) = establish_blocking(discovery, Transport::Udp, local)
        .await
        .inspect_err(|e| debug!("Closing socket after failed forwarding: {}", e))?;

    Ok(ForwardedUdpSocket {
        inner: socket,
        external,
        teardown: Some(teardown),
    })
}

/// Bind a tokio TCP listener on `address` and forward its port
///
/// Network names and empty hosts behave as in [`crate::listen()`].
pub async fn listen(network: &str, address: &str) -> Result<ForwardedTcpListener, Error> {
    listen_with(IgdDiscovery::default(), network, address).await
}

/// Like [`listen`] with an explicit discovery
pub async fn listen_with<D>(
    discovery: D,
    network: &str,
    address: &str,
) -> Result<ForwardedTcpListener, Error>
where
    D: Discovery + Send + 'static,
{
    let addr = bind_addr(network, address, Transport::Tcp)?;
    let listener = TcpListener::bind(addr).await?;
    wrap_listener_with(discovery, listener).await
}

/// Bind a tokio UDP socket on `address` and forward its port
///
/// Network names and empty hosts behave as in [`crate::listen_packet()`].
pub async fn listen_packet(network: &str, address: &str) -> Result<ForwardedUdpSocket, Error> {
    listen_packet_with(IgdDiscovery::default(), network, address).await
}

/// Like [`listen_packet`] with an explicit discovery
pub async fn listen_packet_with<D>(
    discovery: D,
    network: &str,
    address: &str,
) -> Result<ForwardedUdpSocket, Error>
where
    D: Discovery + Send + 'static,
{
    let addr = bind_addr(network, address, Transport::Udp)?;
    let socket = UdpSocket::bind(addr).await?;
    wrap_packet_with(discovery, socket).await
}
