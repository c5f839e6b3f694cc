//! Address substitution wrappers
//!
//! [`ForwardedListener`] and [`ForwardedPacket`] own a raw socket and the
//! teardown of its port mapping. Address queries answer with the external
//! address; everything else goes straight to the raw socket.
//!
//! A wrapper is released by [`close`](ForwardedListener::close), which closes
//! the raw socket first and then clears the mapping, or by dropping it, which
//! does the same without reporting the close result.

use crate::forward::Teardown;
use crate::types::ExternalAddr;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};

/// A stream listener that can be forwarded
pub trait Listener {
    /// Connection type produced by `accept`
    type Stream;

    /// Accept the next connection
    fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Locally bound address
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release the listener
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn close(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

/// A connectionless packet endpoint that can be forwarded
pub trait PacketEndpoint {
    /// Receive a datagram, returning its length and sender
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send a datagram to `addr`
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Locally bound address
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release the endpoint
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

impl PacketEndpoint for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn close(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

/// A listener whose port is forwarded on the gateway
///
/// Callers must serialize `close`; taking `self` by value makes a second
/// close impossible.
#[derive(Debug)]
pub struct ForwardedListener<L = TcpListener> {
    inner: L,
    external: ExternalAddr,
    teardown: Teardown,
}

impl<L: Listener> ForwardedListener<L> {
    pub(crate) fn new(inner: L, external: ExternalAddr, teardown: Teardown) -> Self {
        Self {
            inner,
            external,
            teardown,
        }
    }

    /// Accept the next connection from the raw listener
    ///
    /// Accepted streams are returned as-is; only the listener's own address
    /// is substituted.
    pub fn accept(&self) -> io::Result<(L::Stream, SocketAddr)> {
        self.inner.accept()
    }

    /// Iterate over incoming connections
    pub fn incoming(&self) -> impl Iterator<Item = io::Result<L::Stream>> + '_ {
        std::iter::repeat_with(move || self.accept().map(|(stream, _)| stream))
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
    pub fn get_ref(&self) -> &L {
        &self.inner
    }

    /// Close the listener, then remove the port mapping
    ///
    /// The mapping is removed even when closing the listener fails; the
    /// listener's close result is returned.
    pub fn close(self) -> io::Result<()> {
        let Self {
            inner, teardown, ..
        } = self;

        let result = inner.close();
        teardown.run();
        result
    }
}

impl<L: Listener> Listener for ForwardedListener<L> {
    type Stream = L::Stream;

    fn accept(&self) -> io::Result<(L::Stream, SocketAddr)> {
        self.inner.accept()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.external.addr)
    }

    fn close(self) -> io::Result<()> {
        ForwardedListener::close(self)
    }
}

/// A packet endpoint whose port is forwarded on the gateway
#[derive(Debug)]
pub struct ForwardedPacket<P = UdpSocket> {
    inner: P,
    external: ExternalAddr,
    teardown: Teardown,
}

impl<P: PacketEndpoint> ForwardedPacket<P> {
    pub(crate) fn new(inner: P, external: ExternalAddr, teardown: Teardown) -> Self {
        Self {
            inner,
            external,
            teardown,
        }
    }

    /// Receive a datagram
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf)
    }

    /// Send a datagram to `addr`
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr)
    }

    /// External address of the endpoint
    pub fn local_addr(&self) -> ExternalAddr {
        self.external
    }

    /// Alias of [`local_addr`](Self::local_addr)
    pub fn external_addr(&self) -> ExternalAddr {
        self.external
    }

    /// The raw endpoint
    pub fn get_ref(&self) -> &P {
        &self.inner
    }

    /// Close the endpoint, then remove the port mapping
    pub fn close(self) -> io::Result<()> {
        let Self {
            inner, teardown, ..
        } = self;

        let result = inner.close();
        teardown.run();
        result
    }
}

impl<P: PacketEndpoint> PacketEndpoint for ForwardedPacket<P> {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf)
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.external.addr)
    }

    fn close(self) -> io::Result<()> {
        ForwardedPacket::close(self)
    }
}
