//! Forwarding coordinator
//!
//! Ties a gateway to a locally bound address: discovers the gateway, asks it
//! for the external IP, registers a mapping for the local port and hands back
//! the resulting [`ExternalAddr`] together with the [`Teardown`] that removes
//! the mapping again.

use crate::gateway::{Discovery, Gateway};
use crate::types::{Error, ExternalAddr, Transport};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tag prefixed to every mapping description
pub const DESCRIPTION_TAG: &str = "fwd-listener";

/// Description shown in the gateway's mapping table for `local`
pub fn description(local: SocketAddr) -> String {
    format!("{}: {}", DESCRIPTION_TAG, local)
}

/// Discover a gateway and fetch its external IP
pub fn initialize<D: Discovery + ?Sized>(
    discovery: &D,
) -> Result<(Arc<dyn Gateway>, IpAddr), Error> {
    let gateway = discovery.discover().map_err(|e| match e {
        Error::Discovery(_) => e,
        other => Error::Discovery(other.to_string()),
    })?;

    let external_ip = gateway.external_ip().map_err(|e| match e {
        Error::AddressLookup(_) => e,
        other => Error::AddressLookup(other.to_string()),
    })?;

    debug!("Gateway reports external IP {}", external_ip);
    Ok((gateway, external_ip))
}

/// Register a mapping for the port of `local`
///
/// Port 0 is rejected: a socket reporting it has no port a gateway could map.
pub fn setup(
    gateway: Arc<dyn Gateway>,
    external_ip: IpAddr,
    transport: Transport,
    local: SocketAddr,
) -> Result<(Teardown, ExternalAddr), Error> {
    let port = local.port();
    if port == 0 {
        return Err(Error::Configuration(format!(
            "local address {} has no port to forward",
            local
        )));
    }

    let description = description(local);
    gateway.forward(port, &description).map_err(|e| {
        warn!("Gateway refused mapping for port {}: {}", port, e);
        match e {
            Error::Forwarding(_) => e,
            other => Error::Forwarding(other.to_string()),
        }
    })?;

    let external = ExternalAddr::new(transport, external_ip, port);
    info!("Forwarded {} {} -> {}", transport, local, external);

    Ok((Teardown::new(gateway, port), external))
}

/// Discover, look up the external IP and register the mapping in one go
pub fn establish<D: Discovery + ?Sized>(
    discovery: &D,
    transport: Transport,
    local: SocketAddr,
) -> Result<(Teardown, ExternalAddr), Error> {
    let (gateway, external_ip) = initialize(discovery)?;
    setup(gateway, external_ip, transport, local)
}

/// One-shot removal of a registered mapping
///
/// Holds the gateway and the mapped port. [`Teardown::run`] clears the
/// mapping; dropping a teardown that never ran clears it as well, so the
/// mapping is removed exactly once either way. Failures to clear are logged
/// and otherwise ignored.
pub struct Teardown {
    gateway: Option<Arc<dyn Gateway>>,
    port: u16,
}

impl Teardown {
    /// Bind a teardown to `gateway` and `port`
    pub fn new(gateway: Arc<dyn Gateway>, port: u16) -> Self {
        Self {
            gateway: Some(gateway),
            port,
        }
    }

    /// Port whose mapping this teardown removes
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Remove the mapping
    pub fn run(mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        let Some(gateway) = self.gateway.take() else {
            return;
        };

        match gateway.clear(self.port) {
            Ok(()) => debug!("Cleared mapping for port {}", self.port),
            Err(e) => warn!("Failed to clear mapping for port {}: {}", self.port, e),
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("port", &self.port)
            .field("pending", &self.gateway.is_some())
            .finish()
    }
}
