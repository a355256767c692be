//! System DNS resolver using getaddrinfo.
//!
//! Lookups run on tokio's blocking pool so the execution context driving
//! request jobs is never blocked. This honours `/etc/hosts` and the system
//! resolver configuration.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs},
};

/// System DNS resolver using `getaddrinfo` in a thread pool.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.collect::<Vec<_>>())
            })
            .await;

            let addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    NetError::NameResolutionFailed
                })?
                .dns_context(&domain)?;

            if addrs.is_empty() {
                return Err(NetError::dns_failed(
                    &domain,
                    io::Error::new(io::ErrorKind::NotFound, "No addresses returned by getaddrinfo"),
                ));
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Endpoint list for hosts that are already IP addresses.
#[derive(Debug)]
pub struct SocketAddrs {
    addrs: std::vec::IntoIter<SocketAddr>,
}

impl SocketAddrs {
    /// Attempts to parse a host string as an IP address.
    ///
    /// Returns `None` if it's a hostname that requires DNS resolution.
    pub fn try_parse(host: &str, port: u16) -> Option<Self> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Some(Self::single(SocketAddr::V4(SocketAddrV4::new(addr, port))));
        }

        if let Ok(addr) = host.parse::<Ipv6Addr>() {
            return Some(Self::single(SocketAddr::V6(SocketAddrV6::new(addr, port, 0, 0))));
        }

        None
    }

    fn single(addr: SocketAddr) -> Self {
        Self {
            addrs: vec![addr].into_iter(),
        }
    }

    /// Returns the number of addresses left.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Returns true if no addresses are left.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for SocketAddrs {
    type Item = SocketAddr;

    fn next(&mut self) -> Option<Self::Item> {
        self.addrs.next()
    }
}
