use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::stream::BoxedSocket;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Alias for the `Future` type returned by a [`Connect`] implementation.
pub type Connecting = Pin<Box<dyn Future<Output = io::Result<BoxedSocket>> + Send>>;

/// Opens a transport connection to a single endpoint.
///
/// [`TcpConnector`] is the production implementation; tests substitute
/// in-memory transports.
pub trait Connect: Send + Sync {
    fn connect(&self, addr: SocketAddr) -> Connecting;
}

impl<C: Connect + ?Sized> Connect for Arc<C> {
    fn connect(&self, addr: SocketAddr) -> Connecting {
        (**self).connect(addr)
    }
}

/// Plain TCP connector.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> Connecting {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(BoxedSocket::new(stream))
        })
    }
}

/// Manages the connection process over a resolved endpoint list.
/// Roughly equivalent to net::TransportConnectJob.
pub struct ConnectJob<'a> {
    connector: &'a dyn Connect,
    host: &'a str,
    timeout: Option<Duration>,
}

impl<'a> ConnectJob<'a> {
    pub fn new(connector: &'a dyn Connect, host: &'a str, timeout: Option<Duration>) -> Self {
        Self {
            connector,
            host,
            timeout,
        }
    }

    /// Attempts each endpoint in order and returns the first connected socket.
    ///
    /// Individual failures fall through to the next candidate. When every
    /// candidate fails, the error of the last attempt is returned.
    pub async fn connect(&self, endpoints: &[SocketAddr]) -> Result<BoxedSocket, NetError> {
        let mut last_error = NetError::AddressUnreachable;

        for (index, addr) in endpoints.iter().enumerate() {
            tracing::debug!(host = %self.host, %addr, attempt = index + 1, "connecting");
            match self.attempt(*addr).await {
                Ok(socket) => {
                    tracing::debug!(host = %self.host, %addr, "connected");
                    return Ok(socket);
                }
                Err(e) => {
                    tracing::debug!(host = %self.host, %addr, error = %e, "connect attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(&self, addr: SocketAddr) -> Result<BoxedSocket, NetError> {
        let connecting = self.connector.connect(addr);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| NetError::ConnectionTimedOut)?
                .io_context(),
            None => connecting.await.io_context(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;

    struct NeverConnector;

    impl Connect for NeverConnector {
        fn connect(&self, _addr: SocketAddr) -> Connecting {
            Box::pin(std::future::pending())
        }
    }

    async fn refused_addr() -> SocketAddr {
        // Bind then drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_falls_through_to_next_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = listener.local_addr().unwrap();
        let bad = refused_addr().await;

        let connector = TcpConnector;
        let job = ConnectJob::new(&connector, "localhost", None);
        let socket = job.connect(&[bad, good]).await;
        assert!(socket.is_ok());
    }

    #[tokio::test]
    async fn test_all_endpoints_fail_reports_last_error() {
        let bad = refused_addr().await;

        let connector = TcpConnector;
        let job = ConnectJob::new(&connector, "localhost", None);
        let err = job.connect(&[bad]).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionRefused), "got {err:?}");
    }

    #[tokio::test]
    async fn test_empty_endpoint_list() {
        let connector = TcpConnector;
        let job = ConnectJob::new(&connector, "localhost", None);
        let err = job.connect(&[]).await.unwrap_err();
        assert!(matches!(err, NetError::AddressUnreachable));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 80);
        let job = ConnectJob::new(&NeverConnector, "example.test", Some(Duration::from_millis(20)));
        let err = job.connect(&[addr]).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionTimedOut));
    }
}
