//! # urlfetcher
//!
//! An asynchronous, cancellable HTTP/1.1 request job with a delegate-based
//! observer, plus a small fetcher on top of it.
//!
//! A [`RequestJob`](urlrequest::RequestJob) performs one exchange over one
//! TCP connection: it resolves the host, connects to the first reachable
//! endpoint, writes the request, reads the header block and then streams the
//! body until the server closes the connection. Progress and the outcome are
//! reported through a [`Delegate`](urlrequest::Delegate).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use urlfetcher::urlrequest::{RequestType, URLFetcher, URLFetcherContext};
//!
//! #[tokio::main]
//! async fn main() {
//!     let context = Arc::new(URLFetcherContext::new());
//!     let fetcher = URLFetcher::new(context, "http://example.com/", RequestType::Get).unwrap();
//!     fetcher.start().await.unwrap();
//!     println!("Status: {}", fetcher.response_code());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and load states
//! - [`dns`] - Host resolution
//! - [`socket`] - Endpoint connection and the socket abstraction
//! - [`http`] - Request serialization and response header parsing
//! - [`urlrequest`] - Request jobs, delegates and the fetcher
//!
//! Only plain `http` URLs are supported; connections are never reused.

pub mod base;
pub mod dns;
pub mod http;
pub mod socket;
pub mod urlrequest;
