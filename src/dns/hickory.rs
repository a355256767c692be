//! Fully async resolver backed by hickory-dns.
//!
//! Chosen with [`DnsBackend::Hickory`](crate::urlrequest::DnsBackend). Lookups
//! never touch the blocking pool, so abandoning a cancelled job drops the
//! query outright.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::neterror::NetError;
use hickory_resolver::{
    config::{LookupIpStrategy, ResolverConfig},
    name_server::TokioConnectionProvider,
    TokioResolver,
};
use std::{io, net::SocketAddr, sync::Arc};

/// Dual-stack resolver; clones share one hickory resolver and its cache.
#[derive(Debug, Clone)]
pub struct HickoryResolver {
    inner: Arc<TokioResolver>,
}

impl HickoryResolver {
    /// Uses the system name servers, or hickory's defaults if the system
    /// configuration cannot be read.
    pub fn new() -> Self {
        let mut builder = TokioResolver::builder_tokio().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "system DNS configuration unreadable, using defaults");
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
        });
        builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        Self {
            inner: Arc::new(builder.build()),
        }
    }

    /// Queries only the name servers in `config`.
    pub fn with_config(config: ResolverConfig) -> Self {
        let mut builder =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default());
        builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        Self {
            inner: Arc::new(builder.build()),
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_failed(domain: &str, reason: impl ToString) -> NetError {
    NetError::dns_failed(
        domain,
        io::Error::new(io::ErrorKind::NotFound, reason.to_string()),
    )
}

impl Resolve for HickoryResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let domain = name.as_str();
            let lookup = inner.lookup_ip(domain).await.map_err(|e| {
                tracing::debug!(domain = %domain, error = %e, "hickory lookup failed");
                lookup_failed(domain, e)
            })?;

            let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, 0)).collect();
            if addrs.is_empty() {
                return Err(lookup_failed(domain, "no addresses returned"));
            }
            tracing::debug!(domain = %domain, count = addrs.len(), "hickory lookup complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
