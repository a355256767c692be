//! The per-exchange request job.
//!
//! A [`RequestJob`] drives one HTTP/1.1 exchange over one TCP connection
//! through five stages: resolve, connect, write, read headers, stream content.
//! The stages run on a single driver task spawned by [`RequestJob::start`];
//! that task owns the socket and buffers and holds a strong handle to the
//! shared job record for as long as any I/O is outstanding.
//!
//! Every suspension point is raced against the job's cancellation token and
//! its redirect queue, so a cancelled job drops its pending resolver or socket
//! operation immediately and a redirect restarts the stage sequence from the
//! driver's own turn, never from inside the delegate callback that asked for it.

use crate::base::context::IoResultExt;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::dns::{resolve_endpoints, Resolve};
use crate::http::request::HttpRequestInfo;
use crate::http::response::ResponseHeaders;
use crate::socket::connectjob::{Connect, ConnectJob};
use crate::socket::stream::BoxedSocket;
use crate::urlrequest::delegate::{Delegate, ErrorKind, JobError};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use url::Url;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Stage of a request job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Resolving = 1,
    Connecting = 2,
    Writing = 3,
    ReadingHeaders = 4,
    ReadingContent = 5,
    Terminated = 6,
}

impl JobState {
    /// Map job state to public LoadState.
    pub fn to_load_state(self) -> LoadState {
        match self {
            JobState::Idle | JobState::Terminated => LoadState::Idle,
            JobState::Resolving => LoadState::ResolvingHost,
            JobState::Connecting => LoadState::Connecting,
            JobState::Writing => LoadState::SendingRequest,
            JobState::ReadingHeaders => LoadState::WaitingForResponse,
            JobState::ReadingContent => LoadState::ReadingResponse,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Idle,
            1 => JobState::Resolving,
            2 => JobState::Connecting,
            3 => JobState::Writing,
            4 => JobState::ReadingHeaders,
            5 => JobState::ReadingContent,
            _ => JobState::Terminated,
        }
    }
}

/// Collaborators and limits a job is created with.
#[derive(Clone)]
pub(crate) struct JobParams {
    pub(crate) resolver: Arc<dyn Resolve>,
    pub(crate) connector: Arc<dyn Connect>,
    pub(crate) runtime: Option<Handle>,
    pub(crate) user_agent: String,
    pub(crate) read_buffer_size: usize,
    pub(crate) max_header_bytes: usize,
    pub(crate) connect_timeout: Option<Duration>,
}

enum Command {
    Redirect(Url),
}

/// State shared between the job handles and the driver task.
struct JobShared {
    id: u64,
    params: JobParams,
    request: Mutex<HttpRequestInfo>,
    state: AtomicU8,
    started: AtomicBool,
    cancelled: AtomicBool,
    cancel_tx: watch::Sender<bool>,
    delegate: Mutex<Option<Weak<dyn Delegate>>>,
    // Held for the duration of every delegate notification.
    dispatch: Mutex<()>,
    dispatching_thread: Mutex<Option<ThreadId>>,
    // Swapped for a fresh queue when a terminal redirect restarts the job.
    commands: Mutex<mpsc::UnboundedSender<Command>>,
    pending_commands: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a request job. Cloning yields another handle to the same job.
///
/// Created by [`URLFetcherContext::create_request_job`](crate::urlrequest::context::URLFetcherContext::create_request_job).
/// The job keeps only a weak reference to its delegate.
#[derive(Clone)]
pub struct RequestJob {
    shared: Arc<JobShared>,
}

impl RequestJob {
    pub(crate) fn new(
        request: HttpRequestInfo,
        delegate: Weak<dyn Delegate>,
        params: JobParams,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let (commands, pending) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(JobShared {
                id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
                params,
                request: Mutex::new(request),
                state: AtomicU8::new(JobState::Idle as u8),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                cancel_tx,
                delegate: Mutex::new(Some(delegate)),
                dispatch: Mutex::new(()),
                dispatching_thread: Mutex::new(None),
                commands: Mutex::new(commands),
                pending_commands: Mutex::new(Some(pending)),
            }),
        }
    }

    /// Process-unique job id, used in log events.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn load_state(&self) -> LoadState {
        self.state().to_load_state()
    }

    /// The current target; changes when a redirect is applied.
    pub fn url(&self) -> Url {
        lock(&self.shared.request).url().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Begins the exchange. All outcomes are reported through the delegate.
    ///
    /// Only the first call has an effect. Without a configured runtime handle
    /// this must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            tracing::warn!(job = self.shared.id, "start called on a job that was already started");
            return;
        }
        let Some(commands) = lock(&self.shared.pending_commands).take() else {
            return;
        };
        if self.is_cancelled() {
            self.shared
                .state
                .store(JobState::Terminated as u8, Ordering::Release);
            return;
        }

        self.shared
            .state
            .store(JobState::Resolving as u8, Ordering::Release);
        let driver = JobDriver::new(Arc::clone(&self.shared), commands);
        match &self.shared.params.runtime {
            Some(handle) => {
                handle.spawn(driver.run());
            }
            None => {
                tokio::spawn(driver.run());
            }
        }
    }

    /// Stops the job. Idempotent and callable from any thread.
    ///
    /// Once this returns no delegate method is invoked again: a notification
    /// already running on another thread is waited for, and none starts
    /// afterwards. Calling it from inside a delegate callback is allowed.
    /// Pending resolver and socket operations are abandoned.
    pub fn cancel(&self) {
        let shared = &self.shared;
        let first = !shared.cancelled.swap(true, Ordering::SeqCst);
        shared.cancel_tx.send_replace(true);

        let reentrant = *lock(&shared.dispatching_thread) == Some(thread::current().id());
        let _gate = if reentrant {
            None
        } else {
            Some(lock(&shared.dispatch))
        };
        *lock(&shared.delegate) = None;

        if first {
            tracing::debug!(job = shared.id, state = ?self.state(), "request job cancelled");
        }
    }

    /// Restarts the exchange against `new_url`.
    ///
    /// The restart happens on the driver's next turn, after the calling
    /// callback (if any) has returned: buffers and the connection are
    /// discarded, the descriptor's target is replaced, `on_redirect_url` is
    /// sent and the job resolves the new host. Ignored once the job has
    /// terminated or been cancelled.
    pub fn redirect(&self, new_url: Url) {
        if self.is_cancelled() {
            return;
        }
        if !self.shared.started.load(Ordering::Acquire) || self.state() == JobState::Terminated {
            tracing::warn!(job = self.shared.id, url = %new_url, "redirect ignored: job is not running");
            return;
        }
        if lock(&self.shared.commands)
            .send(Command::Redirect(new_url))
            .is_err()
        {
            tracing::warn!(job = self.shared.id, "redirect ignored: job driver has exited");
        }
    }
}

impl fmt::Debug for RequestJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestJob")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("url", &self.url().as_str())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Why a stage stopped before producing its next state.
enum Interrupt {
    Cancelled,
    Redirect(Url),
    Failed(JobError),
}

fn fail(kind: ErrorKind, error: NetError) -> Interrupt {
    Interrupt::Failed(JobError::new(kind, error))
}

/// How one pass through the stage sequence ended.
enum Exit {
    Done,
    Cancelled,
    Redirect(Url),
}

/// The driver's view of the cancellation token and the redirect queue.
struct Interrupts {
    cancel: watch::Receiver<bool>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Interrupts {
    /// Non-blocking check made before every stage.
    fn poll(&mut self) -> Result<(), Interrupt> {
        if *self.cancel.borrow() {
            return Err(Interrupt::Cancelled);
        }
        match self.commands.try_recv() {
            Ok(Command::Redirect(url)) => Err(Interrupt::Redirect(url)),
            Err(_) => Ok(()),
        }
    }

    /// Awaits `io` unless the job is cancelled or redirected first.
    async fn guard<F: Future>(&mut self, io: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => Err(Interrupt::Cancelled),
            Some(Command::Redirect(url)) = self.commands.recv() => Err(Interrupt::Redirect(url)),
            output = io => Ok(output),
        }
    }
}

async fn cancelled(token: &mut watch::Receiver<bool>) {
    loop {
        if *token.borrow_and_update() {
            return;
        }
        if token.changed().await.is_err() {
            // The sender lives as long as the job record; never reached.
            std::future::pending::<()>().await;
        }
    }
}

fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + from)
}

/// Owns everything one run of the stage sequence touches.
struct JobDriver {
    shared: Arc<JobShared>,
    interrupts: Interrupts,
    state: JobState,
    host: String,
    endpoints: Vec<SocketAddr>,
    socket: Option<BoxedSocket>,
    read_buf: BytesMut,
    request_buf: BytesMut,
    // Where the next terminator scan starts; avoids rescanning header bytes.
    scan_from: usize,
    content_bytes: u64,
}

impl JobDriver {
    fn new(shared: Arc<JobShared>, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let cancel = shared.cancel_tx.subscribe();
        let read_buffer_size = shared.params.read_buffer_size;
        Self {
            shared,
            interrupts: Interrupts { cancel, commands },
            state: JobState::Resolving,
            host: String::new(),
            endpoints: Vec::new(),
            socket: None,
            read_buf: BytesMut::with_capacity(read_buffer_size),
            request_buf: BytesMut::new(),
            scan_from: 0,
            content_bytes: 0,
        }
    }

    async fn run(mut self) {
        let id = self.shared.id;
        tracing::debug!(job = id, url = %self.current_url(), "request job started");

        loop {
            match self.do_loop().await {
                Exit::Cancelled => {
                    tracing::debug!(job = id, state = ?self.state, "discarding cancelled job");
                    break;
                }
                Exit::Redirect(url) => {
                    if !self.restart(url) {
                        break;
                    }
                }
                Exit::Done => {
                    self.set_state(JobState::Terminated);
                    match self.take_final_redirect() {
                        Some(url) => {
                            if !self.restart(url) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.socket = None;
        self.set_state(JobState::Terminated);
        tracing::debug!(job = id, "request job finished");
    }

    async fn do_loop(&mut self) -> Exit {
        loop {
            if let Err(interrupt) = self.interrupts.poll() {
                return match interrupt {
                    Interrupt::Redirect(url) => Exit::Redirect(url),
                    _ => Exit::Cancelled,
                };
            }

            let result = match self.state {
                JobState::Resolving => self.do_resolve().await,
                JobState::Connecting => self.do_connect().await,
                JobState::Writing => self.do_write().await,
                JobState::ReadingHeaders => self.do_read_headers().await,
                JobState::ReadingContent => self.do_read_content().await,
                JobState::Idle | JobState::Terminated => return Exit::Done,
            };

            match result {
                Ok(JobState::Terminated) => return Exit::Done,
                Ok(next) => self.set_state(next),
                Err(Interrupt::Cancelled) => return Exit::Cancelled,
                Err(Interrupt::Redirect(url)) => return Exit::Redirect(url),
                Err(Interrupt::Failed(error)) => {
                    self.notify_error(error);
                    return Exit::Done;
                }
            }
        }
    }

    async fn do_resolve(&mut self) -> Result<JobState, Interrupt> {
        let url = self.current_url();
        if url.scheme() != "http" {
            return Err(fail(ErrorKind::Resolution, NetError::DisallowedUrlScheme));
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(fail(ErrorKind::Resolution, NetError::InvalidUrl)),
        };
        let port = url.port_or_known_default().unwrap_or(80);

        tracing::debug!(job = self.shared.id, host = %host, port, "resolving host");
        let resolver = Arc::clone(&self.shared.params.resolver);
        let endpoints = self
            .interrupts
            .guard(resolve_endpoints(resolver.as_ref(), &host, port))
            .await?
            .map_err(|e| fail(ErrorKind::Resolution, e))?;

        tracing::debug!(job = self.shared.id, host = %host, count = endpoints.len(), "host resolved");
        self.host = host;
        self.endpoints = endpoints;
        Ok(JobState::Connecting)
    }

    async fn do_connect(&mut self) -> Result<JobState, Interrupt> {
        let connect_job = ConnectJob::new(
            self.shared.params.connector.as_ref(),
            &self.host,
            self.shared.params.connect_timeout,
        );
        let socket = self
            .interrupts
            .guard(connect_job.connect(&self.endpoints))
            .await?
            .map_err(|e| fail(ErrorKind::Connection, e))?;

        self.socket = Some(socket);
        Ok(JobState::Writing)
    }

    async fn do_write(&mut self) -> Result<JobState, Interrupt> {
        self.request_buf.clear();
        {
            let request = lock(&self.shared.request);
            request
                .write_to(&mut self.request_buf, &self.shared.params.user_agent)
                .map_err(|e| fail(ErrorKind::Write, e))?;
        }

        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| fail(ErrorKind::Write, NetError::SocketNotConnected))?;
        let bytes = &self.request_buf;
        self.interrupts
            .guard(async move {
                socket.write_all(bytes).await?;
                socket.flush().await
            })
            .await?
            .io_context()
            .map_err(|e| fail(ErrorKind::Write, e))?;

        tracing::debug!(job = self.shared.id, bytes = self.request_buf.len(), "request sent");
        Ok(JobState::ReadingHeaders)
    }

    async fn do_read_headers(&mut self) -> Result<JobState, Interrupt> {
        let max_header_bytes = self.shared.params.max_header_bytes;
        loop {
            if let Some(pos) = find_terminator(&self.read_buf, self.scan_from) {
                let header_len = pos + HEADER_TERMINATOR.len();
                if header_len > max_header_bytes {
                    return Err(fail(ErrorKind::HeaderRead, NetError::ResponseHeadersTooBig));
                }
                // Bytes past the terminator stay in read_buf as the first content.
                let block = self.read_buf.split_to(header_len);
                self.scan_from = 0;
                let headers = ResponseHeaders::parse(&block)
                    .map_err(|e| fail(ErrorKind::HeaderRead, e))?;

                tracing::debug!(
                    job = self.shared.id,
                    status = headers.response_code(),
                    header_bytes = header_len,
                    leftover = self.read_buf.len(),
                    "received headers"
                );
                self.notify(|delegate, job| delegate.on_received_headers(job, &headers));
                return Ok(JobState::ReadingContent);
            }

            if self.read_buf.len() > max_header_bytes {
                return Err(fail(ErrorKind::HeaderRead, NetError::ResponseHeadersTooBig));
            }
            self.scan_from = self
                .read_buf
                .len()
                .saturating_sub(HEADER_TERMINATOR.len() - 1);

            let read = self
                .read_some()
                .await?
                .map_err(|e| fail(ErrorKind::HeaderRead, e))?;
            if read == 0 {
                let error = if self.read_buf.is_empty() {
                    NetError::EmptyResponse
                } else {
                    NetError::ResponseHeadersTruncated
                };
                return Err(fail(ErrorKind::HeaderRead, error));
            }
        }
    }

    async fn do_read_content(&mut self) -> Result<JobState, Interrupt> {
        if self.read_buf.is_empty() {
            let read = self
                .read_some()
                .await?
                .map_err(|e| fail(ErrorKind::ContentRead, e))?;
            if read == 0 {
                tracing::debug!(job = self.shared.id, content_bytes = self.content_bytes, "end of stream");
                self.notify(|delegate, job| delegate.on_receive_complete(job));
                return Ok(JobState::Terminated);
            }
        }

        let chunk = self.read_buf.split().freeze();
        self.content_bytes += chunk.len() as u64;
        tracing::trace!(job = self.shared.id, bytes = chunk.len(), "received content");
        self.notify(|delegate, job| delegate.on_receive_contents(job, &chunk));
        Ok(JobState::ReadingContent)
    }

    /// Reads at most one buffer's worth of bytes, appending to `read_buf`.
    async fn read_some(&mut self) -> Result<Result<usize, NetError>, Interrupt> {
        let size = self.shared.params.read_buffer_size;
        let Some(socket) = self.socket.as_mut() else {
            return Ok(Err(NetError::SocketNotConnected));
        };
        self.read_buf.reserve(size);
        let mut window = (&mut self.read_buf).limit(size);
        let read = self.interrupts.guard(socket.read_buf(&mut window)).await?;
        Ok(read.io_context())
    }

    /// Closes the redirect queue, so later requests are refused with a
    /// warning, then takes a redirect asked for by the terminal notification.
    /// Taking one reopens the queue for the restarted exchange.
    fn take_final_redirect(&mut self) -> Option<Url> {
        self.interrupts.commands.close();
        if *self.interrupts.cancel.borrow() {
            return None;
        }
        let url = match self.interrupts.commands.try_recv() {
            Ok(Command::Redirect(url)) => url,
            Err(_) => return None,
        };
        let (commands, pending) = mpsc::unbounded_channel();
        *lock(&self.shared.commands) = commands;
        self.interrupts.commands = pending;
        Some(url)
    }

    /// Resets per-exchange state and re-targets the descriptor.
    /// Returns false if the job was cancelled meanwhile.
    fn restart(&mut self, url: Url) -> bool {
        tracing::debug!(
            job = self.shared.id,
            from = %self.current_url(),
            to = %url,
            "restarting request job for redirect"
        );
        self.socket = None;
        self.endpoints.clear();
        self.read_buf.clear();
        self.request_buf.clear();
        self.scan_from = 0;
        self.content_bytes = 0;
        lock(&self.shared.request).set_url(url.clone());

        if !self.notify(|delegate, job| delegate.on_redirect_url(job, &url)) {
            return false;
        }
        self.set_state(JobState::Resolving);
        true
    }

    fn notify_error(&self, error: JobError) {
        tracing::debug!(
            job = self.shared.id,
            kind = %error.kind,
            code = error.code(),
            error = %error.error,
            "request job failed"
        );
        self.notify(|delegate, job| delegate.on_error(job, &error));
    }

    /// Runs `f` against the delegate unless the job has been cancelled.
    /// Returns false if cancelled.
    fn notify(&self, f: impl FnOnce(&dyn Delegate, &RequestJob)) -> bool {
        let shared = &self.shared;
        let _gate = lock(&shared.dispatch);
        if shared.cancelled.load(Ordering::SeqCst) {
            return false;
        }

        let delegate = lock(&shared.delegate).as_ref().and_then(Weak::upgrade);
        if let Some(delegate) = delegate {
            *lock(&shared.dispatching_thread) = Some(thread::current().id());
            let job = RequestJob {
                shared: Arc::clone(shared),
            };
            f(delegate.as_ref(), &job);
            *lock(&shared.dispatching_thread) = None;
        }
        true
    }

    fn set_state(&mut self, state: JobState) {
        tracing::trace!(job = self.shared.id, from = ?self.state, to = ?state, "state transition");
        self.state = state;
        self.shared.state.store(state as u8, Ordering::Release);
    }

    fn current_url(&self) -> Url {
        lock(&self.shared.request).url().clone()
    }
}
