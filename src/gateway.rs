//! Gateway collaborator contract
//!
//! A [`Gateway`] is a discovered device that can report its external IP and
//! register or clear port mappings. A [`Discovery`] finds one. The UPnP
//! implementation lives in [`crate::upnp`]; tests substitute in-memory mocks.

use crate::types::Error;
use std::net::IpAddr;
use std::sync::Arc;

/// A discovered gateway device
///
/// Methods block for the duration of the network round-trip.
pub trait Gateway: Send + Sync {
    /// External IP address of the gateway
    fn external_ip(&self) -> Result<IpAddr, Error>;

    /// Register a port mapping routing `port` on the gateway to this host
    fn forward(&self, port: u16, description: &str) -> Result<(), Error>;

    /// Remove the mapping for `port`
    fn clear(&self, port: u16) -> Result<(), Error>;
}

/// Finds a gateway on the local network
pub trait Discovery {
    /// Discover a gateway
    fn discover(&self) -> Result<Arc<dyn Gateway>, Error>;
}

/// An already discovered gateway shared across several wraps
///
/// Passing an `Arc<dyn Gateway>` as the discovery argument skips discovery and
/// reuses the same gateway for every wrap.
impl Discovery for Arc<dyn Gateway> {
    fn discover(&self) -> Result<Arc<dyn Gateway>, Error> {
        Ok(Arc::clone(self))
    }
}

impl<D: Discovery + ?Sized> Discovery for &D {
    fn discover(&self) -> Result<Arc<dyn Gateway>, Error> {
        (**self).discover()
    }
}
