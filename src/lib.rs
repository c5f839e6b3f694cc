//! fwd-listener - forwarded listeners behind NAT gateways
//!
//! This library makes a locally bound TCP listener or UDP socket reachable from
//! outside a NAT. It registers a port mapping on a UPnP gateway, wraps the
//! socket so its address queries return the external address, and removes the
//! mapping again when the socket is closed or dropped.
//!
//! # Example
//!
//! ```no_run
//! # fn example() -> fwd_listener::Result<()> {
//! let listener = fwd_listener::listen("tcp", ":4000")?;
//! println!("Reachable at {}", listener.local_addr());
//!
//! for stream in listener.incoming().take(1) {
//!     let _stream = stream?;
//! }
//!
//! listener.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aio;
pub mod forward;
pub mod gateway;
pub mod listen;
pub mod listener;
pub mod types;
pub mod upnp;

pub use forward::Teardown;
pub use gateway::{Discovery, Gateway};
pub use listen::{
    listen, listen_packet, listen_packet_with, listen_with, wrap_listener, wrap_listener_with,
    wrap_packet, wrap_packet_with,
};
pub use listener::{ForwardedListener, ForwardedPacket, Listener, PacketEndpoint};
pub use types::{Error, ExternalAddr, Family, Network, Transport};
pub use upnp::{DiscoveryConfig, IgdDiscovery, IgdGateway};

/// Result type alias for forwarding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Install a `tracing` subscriber honouring `RUST_LOG`
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests;
