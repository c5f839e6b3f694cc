//! Blocking entry points
//!
//! `wrap_*` forward an already bound socket; `listen*` bind one first. The
//! plain variants discover a UPnP gateway with default settings, the `_with`
//! variants take any [`Discovery`], including an `Arc<dyn Gateway>` to reuse
//! an already discovered gateway.
//!
//! On failure the socket is closed before the error is returned, so no
//! unforwarded socket leaks out of these functions.

use crate::forward::establish;
use crate::gateway::Discovery;
use crate::listener::{ForwardedListener, ForwardedPacket, Listener, PacketEndpoint};
use crate::types::{Error, Network, Transport};
use crate::upnp::IgdDiscovery;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use tracing::debug;

/// Forward the port of `listener` through a discovered UPnP gateway
pub fn wrap_listener<L: Listener>(listener: L) -> Result<ForwardedListener<L>, Error> {
    wrap_listener_with(&IgdDiscovery::default(), listener)
}

/// Forward the port of `listener` through the gateway `discovery` finds
pub fn wrap_listener_with<D, L>(discovery: &D, listener: L) -> Result<ForwardedListener<L>, Error>
where
    D: Discovery + ?Sized,
    L: Listener,
{
    let forwarded = listener
        .local_addr()
        .map_err(Error::from)
        .and_then(|local| establish(discovery, Transport::Tcp, local));

    match forwarded {
        Ok((teardown, external)) => Ok(ForwardedListener::new(listener, external, teardown)),
        Err(e) => {
            debug!("Closing listener after failed forwarding: {}", e);
            let _ = listener.close();
            Err(e)
        }
    }
}

/// Forward the port of `endpoint` through a discovered UPnP gateway
pub fn wrap_packet<P: PacketEndpoint>(endpoint: P) -> Result<ForwardedPacket<P>, Error> {
    wrap_packet_with(&IgdDiscovery::default(), endpoint)
}

/// Forward the port of `endpoint` through the gateway `discovery` finds
pub fn wrap_packet_with<D, P>(discovery: &D, endpoint: P) -> Result<ForwardedPacket<P>, Error>
where
    D: Discovery + ?Sized,
    P: PacketEndpoint,
{
    let forwarded = endpoint
        .local_addr()
        .map_err(Error::from)
        .and_then(|local| establish(discovery, Transport::Udp, local));

    match forwarded {
        Ok((teardown, external)) => Ok(ForwardedPacket::new(endpoint, external, teardown)),
        Err(e) => {
            debug!("Closing packet endpoint after failed forwarding: {}", e);
            let _ = endpoint.close();
            Err(e)
        }
    }
}

/// Bind a TCP listener on `address` and forward its port
///
/// `network` is one of `tcp`, `tcp4`, `tcp6`. An empty host (`":4000"`)
/// binds all IPv4 interfaces for `tcp` and `tcp4`, and all IPv6 interfaces
/// for `tcp6`. No dual-stack socket is created; pass `"[::]:4000"` to get
/// whatever the OS gives an IPv6 wildcard bind.
pub fn listen(network: &str, address: &str) -> Result<ForwardedListener<TcpListener>, Error> {
    listen_with(&IgdDiscovery::default(), network, address)
}

/// Like [`listen`] with an explicit discovery
pub fn listen_with<D: Discovery + ?Sized>(
    discovery: &D,
    network: &str,
    address: &str,
) -> Result<ForwardedListener<TcpListener>, Error> {
    let bind_addr = bind_addr(network, address, Transport::Tcp)?;
    let listener = TcpListener::bind(bind_addr)?;
    wrap_listener_with(discovery, listener)
}

/// Bind a UDP socket on `address` and forward its port
///
/// `network` is one of `udp`, `udp4`, `udp6`. Empty hosts bind a single
/// family wildcard, as for [`listen`].
pub fn listen_packet(network: &str, address: &str) -> Result<ForwardedPacket<UdpSocket>, Error> {
    listen_packet_with(&IgdDiscovery::default(), network, address)
}

/// Like [`listen_packet`] with an explicit discovery
pub fn listen_packet_with<D: Discovery + ?Sized>(
    discovery: &D,
    network: &str,
    address: &str,
) -> Result<ForwardedPacket<UdpSocket>, Error> {
    let bind_addr = bind_addr(network, address, Transport::Udp)?;
    let socket = UdpSocket::bind(bind_addr)?;
    wrap_packet_with(discovery, socket)
}

/// Parse `network`, check it speaks `expected` and resolve `address`
pub(crate) fn bind_addr(
    network: &str,
    address: &str,
    expected: Transport,
) -> Result<SocketAddr, Error> {
    let network: Network = network.parse()?;
    if network.transport() != expected {
        return Err(Error::Configuration(format!(
            "network {} is not a {} network",
            network, expected
        )));
    }
    network.resolve(address)
}
