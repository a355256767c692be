//! URL Fetcher Context - the factory and shared configuration for request jobs.
//!
//! Holds the execution context (a tokio runtime handle), the resolver and
//! connector every job uses, and the tuning knobs applied to each job.

use crate::dns::{DnsResolverWithOverrides, GaiResolver, HickoryResolver, Resolve};
use crate::http::request::HttpRequestInfo;
use crate::socket::connectjob::{Connect, TcpConnector};
use crate::urlrequest::delegate::Delegate;
use crate::urlrequest::job::{JobParams, RequestJob};
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// Resolver a context builds when no custom `dns_resolver` is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DnsBackend {
    /// getaddrinfo on the blocking pool; honours the hosts file and NSS.
    #[default]
    System,
    /// hickory-dns against the system name servers, fully async.
    Hickory,
}

impl DnsBackend {
    fn build(self) -> Arc<dyn Resolve> {
        match self {
            DnsBackend::System => Arc::new(GaiResolver::new()),
            DnsBackend::Hickory => Arc::new(HickoryResolver::new()),
        }
    }
}

/// Configuration options for URLFetcherContext.
#[derive(Clone)]
pub struct URLFetcherContextConfig {
    /// User-Agent string, sent unless a request sets its own.
    pub user_agent: String,

    /// Upper bound on the bytes handed to one content notification.
    pub read_buffer_size: usize,

    /// Maximum size of a response header block, terminator included.
    pub max_header_bytes: usize,

    /// Per-endpoint connect timeout (None = wait for the OS).
    pub connect_timeout: Option<Duration>,

    /// Redirects a URLFetcher follows before failing with TooManyRedirects.
    pub redirect_limit: u8,

    /// Resolver built when `dns_resolver` is None.
    pub dns_backend: DnsBackend,

    /// Custom DNS resolver (None = build one from `dns_backend`).
    pub dns_resolver: Option<Arc<dyn Resolve>>,

    /// DNS hostname overrides (hostname -> addresses).
    pub dns_overrides: HashMap<Cow<'static, str>, Vec<SocketAddr>>,

    /// Custom connector (None = plain TCP).
    pub connector: Option<Arc<dyn Connect>>,

    /// Runtime jobs are spawned on (None = the runtime `start` is called from).
    pub runtime: Option<Handle>,
}

impl Default for URLFetcherContextConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("urlfetcher/", env!("CARGO_PKG_VERSION")).to_string(),
            read_buffer_size: 16 * 1024,
            max_header_bytes: 256 * 1024,
            connect_timeout: None,
            redirect_limit: 20,
            dns_backend: DnsBackend::default(),
            dns_resolver: None,
            dns_overrides: HashMap::new(),
            connector: None,
            runtime: None,
        }
    }
}

impl std::fmt::Debug for URLFetcherContextConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("URLFetcherContextConfig")
            .field("user_agent", &self.user_agent)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("connect_timeout", &self.connect_timeout)
            .field("redirect_limit", &self.redirect_limit)
            .field("dns_backend", &self.dns_backend)
            .field("dns_resolver", &self.dns_resolver.is_some())
            .field("dns_overrides_count", &self.dns_overrides.len())
            .field("connector", &self.connector.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Creates request jobs that share one resolver, connector and runtime.
pub struct URLFetcherContext {
    params: JobParams,
    redirect_limit: u8,
}

impl URLFetcherContext {
    /// Create a new URLFetcherContext with default configuration.
    pub fn new() -> Self {
        Self::with_config(URLFetcherContextConfig::default())
    }

    pub fn with_config(config: URLFetcherContextConfig) -> Self {
        let backend = config.dns_backend;
        let base_resolver: Arc<dyn Resolve> =
            config.dns_resolver.unwrap_or_else(|| backend.build());

        let resolver: Arc<dyn Resolve> = if config.dns_overrides.is_empty() {
            base_resolver
        } else {
            Arc::new(DnsResolverWithOverrides::new(
                base_resolver,
                config.dns_overrides,
            ))
        };

        let connector: Arc<dyn Connect> = config
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector));

        Self {
            params: JobParams {
                resolver,
                connector,
                runtime: config.runtime,
                user_agent: config.user_agent,
                // A zero-sized read would be indistinguishable from end of stream.
                read_buffer_size: config.read_buffer_size.max(1),
                max_header_bytes: config.max_header_bytes,
                connect_timeout: config.connect_timeout,
            },
            redirect_limit: config.redirect_limit,
        }
    }

    /// Creates an idle job for `request` that reports to `delegate`.
    ///
    /// The job holds only a weak reference to the delegate; keep the `Arc`
    /// alive for as long as notifications are wanted.
    pub fn create_request_job<D>(&self, request: HttpRequestInfo, delegate: &Arc<D>) -> RequestJob
    where
        D: Delegate + 'static,
    {
        let delegate: Arc<dyn Delegate> = delegate.clone();
        let delegate: Weak<dyn Delegate> = Arc::downgrade(&delegate);
        RequestJob::new(request, delegate, self.params.clone())
    }

    pub fn resolver(&self) -> &Arc<dyn Resolve> {
        &self.params.resolver
    }

    pub fn user_agent(&self) -> &str {
        &self.params.user_agent
    }

    pub fn redirect_limit(&self) -> u8 {
        self.redirect_limit
    }
}

impl Default for URLFetcherContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for URLFetcherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("URLFetcherContext")
            .field("user_agent", &self.params.user_agent)
            .field("read_buffer_size", &self.params.read_buffer_size)
            .field("max_header_bytes", &self.params.max_header_bytes)
            .field("redirect_limit", &self.redirect_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = URLFetcherContextConfig::default();
        assert_eq!(config.read_buffer_size, 16 * 1024);
        assert_eq!(config.max_header_bytes, 256 * 1024);
        assert_eq!(config.redirect_limit, 20);
        assert!(config.user_agent.starts_with("urlfetcher/"));
        assert!(config.dns_resolver.is_none());
        assert_eq!(config.dns_backend, DnsBackend::System);
    }

    #[test]
    fn test_context_keeps_config() {
        let ctx = URLFetcherContext::with_config(URLFetcherContextConfig {
            user_agent: "ctx-test/1.0".to_string(),
            redirect_limit: 3,
            ..Default::default()
        });
        assert_eq!(ctx.user_agent(), "ctx-test/1.0");
        assert_eq!(ctx.redirect_limit(), 3);
    }

    #[tokio::test]
    async fn test_overrides_wrap_resolver() {
        let mut overrides = HashMap::new();
        overrides.insert(
            Cow::Borrowed("api.local"),
            vec!["127.0.0.1:0".parse().unwrap()],
        );
        let ctx = URLFetcherContext::with_config(URLFetcherContextConfig {
            dns_overrides: overrides,
            ..Default::default()
        });
        let addrs = crate::dns::resolve_endpoints(ctx.resolver().as_ref(), "api.local", 8080)
            .await
            .unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_hickory_backend_resolves_through_context() {
        let ctx = URLFetcherContext::with_config(URLFetcherContextConfig {
            dns_backend: DnsBackend::Hickory,
            ..Default::default()
        });
        // IP literals never reach the backend.
        let addrs = crate::dns::resolve_endpoints(ctx.resolver().as_ref(), "127.0.0.1", 81)
            .await
            .unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:81".parse::<SocketAddr>().unwrap()]);

        match crate::dns::resolve_endpoints(ctx.resolver().as_ref(), "localhost", 81).await {
            Ok(addrs) => assert!(addrs.iter().all(|addr| addr.port() == 81)),
            Err(err) => assert!(err.is_resolution_error(), "unexpected error: {err}"),
        }
    }
}
