//! HTTP/1.1 wire collaborators of the request job.
//!
//! - [`request`]: the request descriptor and its serialization
//! - [`response`]: the parsed status line and header block
//! - [`orderedheaders`]: insertion-ordered request headers

pub mod orderedheaders;
pub mod request;
pub mod response;

pub use orderedheaders::OrderedHeaderMap;
pub use request::HttpRequestInfo;
pub use response::ResponseHeaders;
