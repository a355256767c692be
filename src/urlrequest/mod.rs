//! Request jobs and the fetcher built on them.
//!
//! - [`job`]: the resolve/connect/write/read state machine
//! - [`delegate`]: the observer a job reports to
//! - [`context`]: the job factory and its configuration
//! - [`fetcher`]: a one-shot fetch that collects the whole response

pub mod context;
pub mod delegate;
pub mod fetcher;
pub mod job;

pub use context::{DnsBackend, URLFetcherContext, URLFetcherContextConfig};
pub use delegate::{Delegate, ErrorKind, JobError};
pub use fetcher::{RequestType, URLFetcher, URLRequestStatus, RESPONSE_CODE_INVALID};
pub use job::{JobState, RequestJob};
