//! Shared fixtures: loopback servers, scripted resolvers and a recording delegate.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;
use urlfetcher::base::neterror::NetError;
use urlfetcher::dns::{Addrs, Name, Resolve, Resolving};
use urlfetcher::http::ResponseHeaders;
use urlfetcher::urlrequest::{
    Delegate, ErrorKind, JobError, JobState, RequestJob, URLFetcherContext,
    URLFetcherContextConfig,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Redirect(Url),
    Error(ErrorKind, i32),
    Headers(u16),
    Contents(Vec<u8>),
    Complete,
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Error(..) | Event::Complete)
    }
}

/// Forwards every notification into a channel, optionally reacting to it.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
    pub redirect_on_headers: Mutex<Option<Url>>,
    pub redirect_on_complete: Mutex<Option<Url>>,
    pub cancel_on_headers: AtomicBool,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            tx,
            redirect_on_headers: Mutex::new(None),
            redirect_on_complete: Mutex::new(None),
            cancel_on_headers: AtomicBool::new(false),
        });
        (recorder, rx)
    }
}

impl Delegate for Recorder {
    fn on_redirect_url(&self, _job: &RequestJob, new_url: &Url) {
        let _ = self.tx.send(Event::Redirect(new_url.clone()));
    }

    fn on_error(&self, _job: &RequestJob, error: &JobError) {
        let _ = self.tx.send(Event::Error(error.kind, error.code()));
    }

    fn on_received_headers(&self, job: &RequestJob, headers: &ResponseHeaders) {
        let _ = self.tx.send(Event::Headers(headers.response_code()));
        if let Some(url) = self.redirect_on_headers.lock().unwrap().take() {
            job.redirect(url);
        }
        if self.cancel_on_headers.load(Ordering::SeqCst) {
            job.cancel();
        }
    }

    fn on_receive_contents(&self, _job: &RequestJob, data: &[u8]) {
        let _ = self.tx.send(Event::Contents(data.to_vec()));
    }

    fn on_receive_complete(&self, job: &RequestJob) {
        let _ = self.tx.send(Event::Complete);
        if let Some(url) = self.redirect_on_complete.lock().unwrap().take() {
            job.redirect(url);
        }
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a delegate event")
        .expect("event channel closed")
}

/// Collects events up to and including the first terminal one.
pub async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Concatenates the payload of every `Contents` event.
pub fn body_of(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Contents(data) => Some(data.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

/// Asserts that no further notification arrives.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Event>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "unexpected delegate event");
}

pub async fn wait_for_state(job: &RequestJob, state: JobState) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while job.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach the expected state");
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<String>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub async fn next_request(&mut self) -> String {
        tokio::time::timeout(EVENT_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("server stopped")
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serves every connection with the chunks `respond` returns for its request,
/// pausing between chunks, then closes the connection.
pub async fn serve<F>(respond: F) -> TestServer
where
    F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let chunks = respond(&request);
                let _ = tx.send(request);
                for (i, chunk) in chunks.iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    if socket.write_all(chunk).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    TestServer { addr, requests }
}

/// Answers every request with `head`, then holds the connection open silently.
pub async fn serve_and_stall(head: &'static [u8]) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let _ = tx.send(request);
                if socket.write_all(head).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    TestServer { addr, requests }
}

pub async fn serve_static(response: &'static [u8]) -> TestServer {
    serve(move |_| vec![response.to_vec()]).await
}

/// Returns the same address list for every name.
pub struct StaticResolver(pub Vec<SocketAddr>);

impl Resolve for StaticResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        let addrs = self.0.clone();
        Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) })
    }
}

pub struct FailingResolver;

impl Resolve for FailingResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        Box::pin(async { Err(NetError::NameNotResolved) })
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never answers; records when the pending lookup is abandoned.
#[derive(Default)]
pub struct PendingResolver {
    pub dropped: Arc<AtomicBool>,
}

impl Resolve for PendingResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        let guard = DropFlag(Arc::clone(&self.dropped));
        Box::pin(async move {
            let _guard = guard;
            std::future::pending::<Result<Addrs, NetError>>().await
        })
    }
}

pub fn context_with_resolver<R: Resolve + 'static>(resolver: R) -> URLFetcherContext {
    URLFetcherContext::with_config(URLFetcherContextConfig {
        dns_resolver: Some(Arc::new(resolver)),
        ..Default::default()
    })
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
