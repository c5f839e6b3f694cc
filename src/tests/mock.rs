// In-memory gateway, discovery and sockets shared by the test modules

use crate::gateway::{Discovery, Gateway};
use crate::listener::{Listener, PacketEndpoint};
use crate::types::Error;
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const EXTERNAL_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));

#[derive(Default)]
pub struct MockGateway {
    pub external_ip: Option<IpAddr>,
    pub refuse_forward: bool,
    pub fail_clear: bool,
    pub clear_delay: Option<Duration>,
    pub forwards: Mutex<Vec<(u16, String)>>,
    pub clears: Mutex<Vec<u16>>,
    pub active: Mutex<HashSet<u16>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            external_ip: Some(EXTERNAL_IP),
            ..Default::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_forward: true,
            ..Self::new()
        }
    }

    pub fn forwards(&self) -> Vec<(u16, String)> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn clears(&self) -> Vec<u16> {
        self.clears.lock().unwrap().clone()
    }

    pub fn is_active(&self, port: u16) -> bool {
        self.active.lock().unwrap().contains(&port)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

impl Gateway for MockGateway {
    fn external_ip(&self) -> Result<IpAddr, Error> {
        self.external_ip
            .ok_or_else(|| Error::AddressLookup("gateway unreachable".to_string()))
    }

    fn forward(&self, port: u16, description: &str) -> Result<(), Error> {
        if self.refuse_forward {
            return Err(Error::Forwarding("ConflictInMappingEntry".to_string()));
        }
        if !self.active.lock().unwrap().insert(port) {
            return Err(Error::Forwarding(format!("port {} already mapped", port)));
        }
        self.forwards
            .lock()
            .unwrap()
            .push((port, description.to_string()));
        Ok(())
    }

    fn clear(&self, port: u16) -> Result<(), Error> {
        if let Some(delay) = self.clear_delay {
            std::thread::sleep(delay);
        }
        self.clears.lock().unwrap().push(port);
        self.active.lock().unwrap().remove(&port);
        if self.fail_clear {
            return Err(Error::Forwarding("NoSuchEntryInArray".to_string()));
        }
        Ok(())
    }
}

/// Discovery handing out one mock gateway, or failing when it has none
#[derive(Clone)]
pub struct MockDiscovery {
    pub gateway: Option<Arc<MockGateway>>,
    pub discoveries: Arc<AtomicUsize>,
}

impl MockDiscovery {
    pub fn new(gateway: MockGateway) -> (Self, Arc<MockGateway>) {
        let gateway = Arc::new(gateway);
        let discovery = Self {
            gateway: Some(gateway.clone()),
            discoveries: Arc::new(AtomicUsize::new(0)),
        };
        (discovery, gateway)
    }

    pub fn none() -> Self {
        Self {
            gateway: None,
            discoveries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn count(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

impl Discovery for MockDiscovery {
    fn discover(&self) -> Result<Arc<dyn Gateway>, Error> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        match &self.gateway {
            Some(gateway) => Ok(gateway.clone()),
            None => Err(Error::Discovery("no IGD found".to_string())),
        }
    }
}

/// Counters observed by tests after the socket has been moved into a wrapper
#[derive(Clone, Default)]
pub struct SocketCounters {
    pub addr_queries: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl SocketCounters {
    pub fn addr_queries(&self) -> usize {
        self.addr_queries.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockListener {
    pub addr: SocketAddr,
    pub fail_close: bool,
    pub counters: SocketCounters,
}

impl MockListener {
    pub fn new(addr: &str) -> (Self, SocketCounters) {
        let counters = SocketCounters::default();
        let listener = Self {
            addr: addr.parse().unwrap(),
            fail_close: false,
            counters: counters.clone(),
        };
        (listener, counters)
    }
}

impl Listener for MockListener {
    type Stream = SocketAddr;

    fn accept(&self) -> io::Result<(SocketAddr, SocketAddr)> {
        let peer: SocketAddr = "192.168.1.20:51000".parse().unwrap();
        Ok((self.addr, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.counters.addr_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.addr)
    }

    fn close(self) -> io::Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}

pub struct MockPacket {
    pub addr: SocketAddr,
    pub fail_close: bool,
    pub counters: SocketCounters,
}

impl MockPacket {
    pub fn new(addr: &str) -> (Self, SocketCounters) {
        let counters = SocketCounters::default();
        let endpoint = Self {
            addr: addr.parse().unwrap(),
            fail_close: false,
            counters: counters.clone(),
        };
        (endpoint, counters)
    }
}

impl PacketEndpoint for MockPacket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let payload = b"ping";
        buf[..payload.len()].copy_from_slice(payload);
        Ok((payload.len(), "192.168.1.20:51000".parse().unwrap()))
    }

    fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.counters.addr_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.addr)
    }

    fn close(self) -> io::Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}
