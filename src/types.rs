//! Common types for forwarded listeners

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while forwarding a listener
#[derive(Debug, Error)]
pub enum Error {
    /// No compatible gateway found, or the control exchange failed
    #[error("Gateway discovery failed: {0}")]
    Discovery(String),

    /// Gateway could not report its external IP address
    #[error("External address lookup failed: {0}")]
    AddressLookup(String),

    /// Gateway rejected or failed to register the port mapping
    #[error("Port forwarding failed: {0}")]
    Forwarding(String),

    /// Malformed network name, address or port
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// IO error from the underlying socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport a forwarded socket speaks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Connection-oriented stream transport
    Tcp,
    /// Connectionless datagram transport
    Udp,
}

impl Transport {
    /// Network tag as reported by address queries ("tcp" / "udp")
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family restriction carried by a network name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Either family; empty hosts bind IPv4
    Any,
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
}

/// A network name as accepted by the `listen` entry points
///
/// Mirrors the conventional names: `tcp`, `tcp4`, `tcp6`, `udp`, `udp4`, `udp6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    transport: Transport,
    family: Family,
}

impl Network {
    /// Transport of this network
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Address family restriction of this network
    pub fn family(&self) -> Family {
        self.family
    }

    /// Resolve a `host:port` string into a bindable socket address
    ///
    /// An empty host binds the unspecified address of the network's family.
    /// Bracketed IPv6 literals and hostnames are accepted; resolved addresses
    /// are filtered by family and the first match wins.
    pub fn resolve(&self, address: &str) -> Result<SocketAddr, Error> {
        let (host, port) = split_host_port(address)?;

        if host.is_empty() {
            let ip = match self.family {
                Family::Any | Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            };
            return Ok(SocketAddr::new(ip, port));
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            let addr = SocketAddr::new(ip, port);
            return if self.accepts(&addr) {
                Ok(addr)
            } else {
                Err(Error::Configuration(format!(
                    "address {} does not match network {}",
                    address, self
                )))
            };
        }

        (host, port)
            .to_socket_addrs()?
            .find(|addr| self.accepts(addr))
            .ok_or_else(|| {
                Error::Configuration(format!("no {} address found for {}", self, address))
            })
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self.family {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, family) = match s {
            "tcp" => (Transport::Tcp, Family::Any),
            "tcp4" => (Transport::Tcp, Family::V4),
            "tcp6" => (Transport::Tcp, Family::V6),
            "udp" => (Transport::Udp, Family::Any),
            "udp4" => (Transport::Udp, Family::V4),
            "udp6" => (Transport::Udp, Family::V6),
            other => {
                return Err(Error::Configuration(format!("unknown network {:?}", other)));
            }
        };
        Ok(Self { transport, family })
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::Any => write!(f, "{}", self.transport),
            Family::V4 => write!(f, "{}4", self.transport),
            Family::V6 => write!(f, "{}6", self.transport),
        }
    }
}

/// Split `host:port`, stripping brackets from IPv6 hosts
pub(crate) fn split_host_port(address: &str) -> Result<(&str, u16), Error> {
    let missing_port = || Error::Configuration(format!("missing port in address {:?}", address));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::Configuration(format!("missing ']' in address {:?}", address)))?;
        let port = tail.strip_prefix(':').ok_or_else(missing_port)?;
        (host, port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(missing_port)?;
        if host.contains(':') {
            return Err(Error::Configuration(format!(
                "too many colons in address {:?}",
                address
            )));
        }
        (host, port)
    };

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Configuration(format!("invalid port in address {:?}", address)))?;

    Ok((host, port))
}

/// The address a remote peer must use to reach a forwarded socket
///
/// Pairs the transport with the gateway's external IP and the locally bound
/// port. Displays as `host:port`, bracketing IPv6 hosts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExternalAddr {
    /// Transport of the forwarded socket
    pub transport: Transport,
    /// External IP and port
    pub addr: SocketAddr,
}

impl ExternalAddr {
    /// Create a new external address
    pub fn new(transport: Transport, ip: IpAddr, port: u16) -> Self {
        Self {
            transport,
            addr: SocketAddr::new(ip, port),
        }
    }

    /// Network tag ("tcp" or "udp")
    pub fn network(&self) -> &'static str {
        self.transport.as_str()
    }

    /// External IP reported by the gateway
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Forwarded port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for ExternalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

impl From<ExternalAddr> for SocketAddr {
    fn from(addr: ExternalAddr) -> Self {
        addr.addr
    }
}
