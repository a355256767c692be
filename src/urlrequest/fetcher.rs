//! URLFetcher - a one-shot fetch that collects a whole response.
//!
//! Wraps a [`RequestJob`] with a delegate that accumulates the body, records
//! the status and response code, and follows redirects up to the context's
//! limit unless told to stop on them.

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::http::request::HttpRequestInfo;
use crate::http::response::ResponseHeaders;
use crate::urlrequest::context::URLFetcherContext;
use crate::urlrequest::delegate::{Delegate, JobError};
use crate::urlrequest::job::RequestJob;
use bytes::{Bytes, BytesMut};
use http::Method;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use url::Url;

/// Response code reported before any headers have been received.
pub const RESPONSE_CODE_INVALID: i32 = -1;

/// HTTP method of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    #[default]
    Get,
    Post,
    Head,
    Delete,
    Put,
}

impl RequestType {
    pub fn method(self) -> Method {
        match self {
            RequestType::Get => Method::GET,
            RequestType::Post => Method::POST,
            RequestType::Head => Method::HEAD,
            RequestType::Delete => Method::DELETE,
            RequestType::Put => Method::PUT,
        }
    }
}

/// Outcome of a fetch.
#[derive(Debug, Clone, Default)]
pub enum URLRequestStatus {
    /// Not finished (or not started).
    #[default]
    IoPending,
    Success,
    Canceled,
    Failed(NetError),
}

impl URLRequestStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, URLRequestStatus::Success)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, URLRequestStatus::IoPending)
    }

    /// The failure, if the fetch failed.
    pub fn error(&self) -> Option<&NetError> {
        match self {
            URLRequestStatus::Failed(error) => Some(error),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FetchState {
    url: Url,
    request: HttpRequestInfo,
    job: Option<RequestJob>,
    status: URLRequestStatus,
    response_code: i32,
    headers: Option<ResponseHeaders>,
    body: BytesMut,
    current_response_bytes: u64,
    total_response_bytes: i64,
    redirects_remaining: u8,
}

impl FetchState {
    fn reset_response(&mut self) {
        self.response_code = RESPONSE_CODE_INVALID;
        self.headers = None;
        self.body.clear();
        self.current_response_bytes = 0;
        self.total_response_bytes = -1;
    }
}

/// The delegate side of a fetcher; the job holds it weakly.
struct FetcherCore {
    original_url: Url,
    state: Mutex<FetchState>,
    stop_on_redirect: AtomicBool,
    done: watch::Sender<bool>,
}

impl FetcherCore {
    fn finish(&self, status: URLRequestStatus) {
        {
            let mut state = lock(&self.state);
            if !state.status.is_pending() {
                return;
            }
            state.status = status;
        }
        self.done.send_replace(true);
    }

    /// Ends the fetch from inside a callback.
    fn abort(&self, job: &RequestJob, error: NetError) {
        tracing::debug!(job = job.id(), error = %error, "fetch aborted");
        job.cancel();
        self.finish(URLRequestStatus::Failed(error));
    }

    fn follow_redirect(&self, job: &RequestJob, location: &str) {
        let target = {
            let mut state = lock(&self.state);
            let target = match state.url.join(location) {
                Ok(target) => target,
                Err(_) => {
                    drop(state);
                    return self.abort(job, NetError::InvalidRedirect);
                }
            };
            if target.scheme() != "http" {
                drop(state);
                return self.abort(job, NetError::UnsafeRedirect);
            }
            if state.redirects_remaining == 0 {
                drop(state);
                return self.abort(job, NetError::TooManyRedirects);
            }
            state.redirects_remaining -= 1;
            target
        };
        tracing::debug!(job = job.id(), location = %target, "following redirect");
        job.redirect(target);
    }
}

impl Delegate for FetcherCore {
    fn on_redirect_url(&self, _job: &RequestJob, new_url: &Url) {
        let mut state = lock(&self.state);
        state.url = new_url.clone();
        state.reset_response();
    }

    fn on_error(&self, _job: &RequestJob, error: &JobError) {
        self.finish(URLRequestStatus::Failed(error.error.clone()));
    }

    fn on_received_headers(&self, job: &RequestJob, headers: &ResponseHeaders) {
        if headers.is_redirect() && !self.stop_on_redirect.load(Ordering::Acquire) {
            if let Some(location) = headers.location() {
                return self.follow_redirect(job, location);
            }
        }

        let mut state = lock(&self.state);
        state.response_code = i32::from(headers.response_code());
        state.total_response_bytes = headers
            .content_length()
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);
        state.headers = Some(headers.clone());
    }

    fn on_receive_contents(&self, _job: &RequestJob, data: &[u8]) {
        let mut state = lock(&self.state);
        state.body.extend_from_slice(data);
        state.current_response_bytes += data.len() as u64;
    }

    fn on_receive_complete(&self, _job: &RequestJob) {
        self.finish(URLRequestStatus::Success);
    }
}

/// Fetches one URL and keeps the response in memory.
///
/// ```rust,ignore
/// let context = Arc::new(URLFetcherContext::new());
/// let fetcher = URLFetcher::new(context, "http://example.com/", RequestType::Get)?;
/// fetcher.start().await?;
/// println!("{} {:?}", fetcher.response_code(), fetcher.response_as_string());
/// ```
pub struct URLFetcher {
    context: Arc<URLFetcherContext>,
    request_type: RequestType,
    core: Arc<FetcherCore>,
}

impl URLFetcher {
    pub fn new(
        context: Arc<URLFetcherContext>,
        url: &str,
        request_type: RequestType,
    ) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        let redirects_remaining = context.redirect_limit();
        let (done, _) = watch::channel(false);
        let core = Arc::new(FetcherCore {
            original_url: url.clone(),
            state: Mutex::new(FetchState {
                request: HttpRequestInfo::new(url.clone()),
                url,
                job: None,
                status: URLRequestStatus::IoPending,
                response_code: RESPONSE_CODE_INVALID,
                headers: None,
                body: BytesMut::new(),
                current_response_bytes: 0,
                total_response_bytes: -1,
                redirects_remaining,
            }),
            stop_on_redirect: AtomicBool::new(false),
            done,
        });
        Ok(Self {
            context,
            request_type,
            core,
        })
    }

    /// Replaces the extra request headers with a CRLF-separated block.
    pub fn set_extra_request_headers(&self, headers: &str) -> Result<(), NetError> {
        lock(&self.core.state).request.set_extra_headers(headers)
    }

    /// Adds one `Name: value` request header line.
    pub fn add_extra_request_header(&self, header_line: &str) -> Result<(), NetError> {
        lock(&self.core.state).request.add_extra_header(header_line)
    }

    pub fn set_referrer(&self, referrer: &str) -> Result<(), NetError> {
        lock(&self.core.state).request.set_header("Referer", referrer)
    }

    /// When set, a 3xx response is the final result instead of being followed.
    pub fn set_stop_on_redirect(&self, stop_on_redirect: bool) {
        self.core
            .stop_on_redirect
            .store(stop_on_redirect, Ordering::Release);
    }

    /// Runs the fetch to a terminal outcome.
    ///
    /// A second call only waits for the first fetch's outcome. After
    /// [`cancel`](Self::cancel) no job is created and this returns `Aborted`.
    pub async fn start(&self) -> Result<(), NetError> {
        let mut done = self.core.done.subscribe();
        let job = {
            let mut state = lock(&self.core.state);
            // Already running, finished or cancelled: only report the outcome.
            if state.job.is_some() || !state.status.is_pending() {
                None
            } else {
                let method = self.request_type.method();
                state.request.set_method(method);
                let job = self
                    .context
                    .create_request_job(state.request.clone(), &self.core);
                state.job = Some(job.clone());
                Some(job)
            }
        };
        if let Some(job) = job {
            tracing::debug!(job = job.id(), url = %self.core.original_url, "starting fetch");
            job.start();
        }

        loop {
            if *done.borrow_and_update() {
                break;
            }
            if done.changed().await.is_err() {
                break;
            }
        }

        match self.status() {
            URLRequestStatus::Success => Ok(()),
            URLRequestStatus::Failed(error) => Err(error),
            URLRequestStatus::Canceled | URLRequestStatus::IoPending => Err(NetError::Aborted),
        }
    }

    /// Stops the fetch. No delegate work happens after this returns.
    pub fn cancel(&self) {
        let job = lock(&self.core.state).job.clone();
        if let Some(job) = job {
            job.cancel();
        }
        self.core.finish(URLRequestStatus::Canceled);
    }

    pub fn original_url(&self) -> &Url {
        &self.core.original_url
    }

    /// The URL of the last request sent, after any redirects.
    pub fn url(&self) -> Url {
        lock(&self.core.state).url.clone()
    }

    pub fn status(&self) -> URLRequestStatus {
        lock(&self.core.state).status.clone()
    }

    /// The HTTP status code, or [`RESPONSE_CODE_INVALID`] before headers arrive.
    pub fn response_code(&self) -> i32 {
        lock(&self.core.state).response_code
    }

    pub fn response_headers(&self) -> Option<ResponseHeaders> {
        lock(&self.core.state).headers.clone()
    }

    /// The body as text, once the fetch has succeeded.
    pub fn response_as_string(&self) -> Option<String> {
        let state = lock(&self.core.state);
        if !state.status.is_success() {
            return None;
        }
        Some(String::from_utf8_lossy(&state.body).into_owned())
    }

    /// The body bytes received so far.
    pub fn response_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&lock(&self.core.state).body)
    }

    pub fn current_response_bytes(&self) -> u64 {
        lock(&self.core.state).current_response_bytes
    }

    /// The declared Content-Length, or -1 when unknown.
    pub fn total_response_bytes(&self) -> i64 {
        lock(&self.core.state).total_response_bytes
    }

    pub fn load_state(&self) -> LoadState {
        lock(&self.core.state)
            .job
            .as_ref()
            .map(RequestJob::load_state)
            .unwrap_or_default()
    }
}

impl Drop for URLFetcher {
    fn drop(&mut self) {
        let job = lock(&self.core.state).job.take();
        if let Some(job) = job {
            job.cancel();
        }
    }
}

impl std::fmt::Debug for URLFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.core.state);
        f.debug_struct("URLFetcher")
            .field("original_url", &self.core.original_url.as_str())
            .field("url", &state.url.as_str())
            .field("request_type", &self.request_type)
            .field("status", &state.status)
            .field("response_code", &state.response_code)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_methods() {
        assert_eq!(RequestType::Get.method(), Method::GET);
        assert_eq!(RequestType::Post.method(), Method::POST);
        assert_eq!(RequestType::Head.method(), Method::HEAD);
        assert_eq!(RequestType::Delete.method(), Method::DELETE);
        assert_eq!(RequestType::Put.method(), Method::PUT);
    }

    #[test]
    fn test_new_fetcher_is_pending() {
        let ctx = Arc::new(URLFetcherContext::new());
        let fetcher = URLFetcher::new(ctx, "http://example.com/a", RequestType::Get).unwrap();
        assert!(fetcher.status().is_pending());
        assert_eq!(fetcher.response_code(), RESPONSE_CODE_INVALID);
        assert_eq!(fetcher.total_response_bytes(), -1);
        assert_eq!(fetcher.url(), *fetcher.original_url());
        assert_eq!(fetcher.response_as_string(), None);
        assert_eq!(fetcher.load_state(), LoadState::Idle);
    }

    #[test]
    fn test_invalid_url() {
        let ctx = Arc::new(URLFetcherContext::new());
        let err = URLFetcher::new(ctx, "not a url", RequestType::Get).unwrap_err();
        assert!(matches!(err, NetError::InvalidUrl));
    }

    #[test]
    fn test_cancel_before_start() {
        let ctx = Arc::new(URLFetcherContext::new());
        let fetcher = URLFetcher::new(ctx, "http://example.com/", RequestType::Get).unwrap();
        fetcher.cancel();
        assert!(matches!(fetcher.status(), URLRequestStatus::Canceled));
    }
}
