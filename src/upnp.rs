//! UPnP IGD (Internet Gateway Device) gateway implementation
//!
//! Discovery uses SSDP (Simple Service Discovery Protocol) to find an IGD on
//! the local network; mapping requests then go to the gateway over SOAP. Both
//! exchanges are handled by `igd-next` and block the calling thread.
//!
//! Mappings are registered for TCP and UDP together, so a forwarded port is
//! reachable regardless of which transport the wrapped socket uses.

use crate::gateway::{Discovery, Gateway};
use crate::types::Error;
use igd_next::PortMappingProtocol;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for gateway search
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 5;

/// Protocols every mapping is registered for
const MAPPED_PROTOCOLS: [PortMappingProtocol; 2] =
    [PortMappingProtocol::TCP, PortMappingProtocol::UDP];

/// Settings for UPnP gateway discovery and mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long to wait for SSDP responses
    pub search_timeout_secs: u64,
    /// Requested mapping lifetime in seconds (0 = permanent until cleared)
    pub lease_duration_secs: u32,
    /// Local address to send SSDP searches from (None = any)
    pub bind_addr: Option<SocketAddr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
            lease_duration_secs: 0,
            bind_addr: None,
        }
    }
}

impl DiscoveryConfig {
    /// Search timeout as a `Duration`
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

/// Discovers UPnP gateways with `igd-next`
#[derive(Debug, Clone, Default)]
pub struct IgdDiscovery {
    config: DiscoveryConfig,
}

impl IgdDiscovery {
    /// Create a discovery with the given settings
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Settings in use
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Search for a gateway and return the concrete handle
    pub fn search(&self) -> Result<IgdGateway, Error> {
        debug!(
            "Searching for UPnP IGD gateway (timeout: {}s)...",
            self.config.search_timeout_secs
        );

        let mut options = igd_next::SearchOptions {
            timeout: Some(self.config.search_timeout()),
            ..Default::default()
        };
        if let Some(bind_addr) = self.config.bind_addr {
            options.bind_addr = bind_addr;
        }

        let gateway = igd_next::search_gateway(options).map_err(|e| {
            debug!("UPnP gateway search failed: {}", e);
            Error::Discovery(format!("UPnP gateway search failed: {}", e))
        })?;

        let local_ip = local_ip_for_gateway(gateway.addr)?;
        info!("Found UPnP gateway at {} (local IP {})", gateway.addr, local_ip);

        Ok(IgdGateway {
            gateway,
            local_ip,
            lease_duration_secs: self.config.lease_duration_secs,
        })
    }
}

impl Discovery for IgdDiscovery {
    fn discover(&self) -> Result<Arc<dyn Gateway>, Error> {
        Ok(Arc::new(self.search()?))
    }
}

/// Determine which local IP the gateway sees us on
///
/// Connecting a UDP socket sends nothing; it only asks the OS to pick the
/// route, and with it the source address.
fn local_ip_for_gateway(gateway: SocketAddr) -> Result<IpAddr, Error> {
    let unspecified = match gateway {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };

    let socket = UdpSocket::bind(unspecified)
        .map_err(|e| Error::Discovery(format!("Failed to create socket: {}", e)))?;
    socket
        .connect(gateway)
        .map_err(|e| Error::Discovery(format!("Failed to route to gateway: {}", e)))?;
    let local_addr = socket
        .local_addr()
        .map_err(|e| Error::Discovery(format!("Failed to get local address: {}", e)))?;

    Ok(local_addr.ip())
}

/// A UPnP gateway found by [`IgdDiscovery`]
#[derive(Debug)]
pub struct IgdGateway {
    gateway: igd_next::Gateway,
    local_ip: IpAddr,
    lease_duration_secs: u32,
}

impl IgdGateway {
    /// Control address of the gateway
    pub fn addr(&self) -> SocketAddr {
        self.gateway.addr
    }

    /// Local IP mappings point at
    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }
}

impl Gateway for IgdGateway {
    fn external_ip(&self) -> Result<IpAddr, Error> {
        self.gateway
            .get_external_ip()
            .map_err(|e| Error::AddressLookup(format!("GetExternalIPAddress failed: {}", e)))
    }

    fn forward(&self, port: u16, description: &str) -> Result<(), Error> {
        let local_addr = SocketAddr::new(self.local_ip, port);

        for (i, protocol) in MAPPED_PROTOCOLS.iter().enumerate() {
            debug!(
                "Adding port mapping: {:?} {} -> {} ({}s)",
                protocol, port, local_addr, self.lease_duration_secs
            );

            if let Err(e) = self.gateway.add_port(
                *protocol,
                port,
                local_addr,
                self.lease_duration_secs,
                description,
            ) {
                warn!("UPnP AddPortMapping {:?} {} failed: {}", protocol, port, e);
                // Roll back what was already mapped
                for mapped in &MAPPED_PROTOCOLS[..i] {
                    let _ = self.gateway.remove_port(*mapped, port);
                }
                return Err(Error::Forwarding(format!(
                    "AddPortMapping {:?} {} failed: {}",
                    protocol, port, e
                )));
            }
        }

        info!("UPnP mapping added for port {} ({})", port, description);
        Ok(())
    }

    fn clear(&self, port: u16) -> Result<(), Error> {
        let mut first_error = None;

        for protocol in MAPPED_PROTOCOLS {
            if let Err(e) = self.gateway.remove_port(protocol, port) {
                debug!("UPnP DeletePortMapping {:?} {} failed: {}", protocol, port, e);
                first_error.get_or_insert_with(|| {
                    Error::Forwarding(format!("DeletePortMapping {:?} {} failed: {}", protocol, port, e))
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("UPnP mapping deleted for port {}", port);
                Ok(())
            }
        }
    }
}
