//! The observer side of a request job.

use crate::base::neterror::NetError;
use crate::http::response::ResponseHeaders;
use crate::urlrequest::job::RequestJob;
use std::fmt;
use thiserror::Error;
use url::Url;

/// The stage at which a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Resolution,
    Connection,
    Write,
    HeaderRead,
    ContentRead,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Resolution => "resolution",
            ErrorKind::Connection => "connection",
            ErrorKind::Write => "write",
            ErrorKind::HeaderRead => "header read",
            ErrorKind::ContentRead => "content read",
        };
        f.write_str(name)
    }
}

/// A terminal job failure: the failing stage plus the underlying network error.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {error}")]
pub struct JobError {
    pub kind: ErrorKind,
    #[source]
    pub error: NetError,
}

impl JobError {
    pub fn new(kind: ErrorKind, error: NetError) -> Self {
        Self { kind, error }
    }

    /// The underlying network error code, e.g. `-105` for an unresolved name.
    pub fn code(&self) -> i32 {
        self.error.as_i32()
    }
}

/// Receives the lifecycle notifications of a [`RequestJob`].
///
/// For one exchange the job calls, in order: `on_received_headers` once,
/// `on_receive_contents` zero or more times, then exactly one of
/// `on_receive_complete` or `on_error`. A failure before the headers arrive
/// produces `on_error` alone. A redirect starts a new exchange and is
/// announced with `on_redirect_url`.
///
/// Callbacks run on the job's execution context and must not block. They may
/// call [`RequestJob::cancel`] or [`RequestJob::redirect`] on the job they are
/// given; a redirect takes effect after the callback returns.
pub trait Delegate: Send + Sync {
    fn on_redirect_url(&self, job: &RequestJob, new_url: &Url) {
        let _ = (job, new_url);
    }

    fn on_error(&self, job: &RequestJob, error: &JobError);

    fn on_received_headers(&self, job: &RequestJob, headers: &ResponseHeaders);

    fn on_receive_contents(&self, job: &RequestJob, data: &[u8]);

    fn on_receive_complete(&self, job: &RequestJob);
}
