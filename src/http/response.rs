//! Structured view of a received HTTP/1.x status line and header block.

use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, LOCATION};
use http::{HeaderMap, StatusCode, Version};

/// The maximum number of response headers accepted in one header block.
const MAX_HEADERS: usize = 128;

/// Parsed response headers.
///
/// Built once per exchange from the raw block that ends with the
/// CRLFCRLF terminator. Equivalent to Chromium's `HttpResponseHeaders`.
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    status: StatusCode,
    version: Version,
    reason: String,
    headers: HeaderMap,
}

impl ResponseHeaders {
    /// Parses a complete header block, terminator included.
    pub fn parse(raw: &[u8]) -> Result<Self, NetError> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut storage);

        match response.parse(raw) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => return Err(NetError::ResponseHeadersTruncated),
            Err(httparse::Error::TooManyHeaders) => return Err(NetError::ResponseHeadersTooBig),
            Err(e) => {
                tracing::debug!(error = %e, "malformed response header block");
                return Err(NetError::InvalidHttpResponse);
            }
        }

        let code = response.code.ok_or(NetError::InvalidHttpResponse)?;
        let status = StatusCode::from_u16(code).map_err(|_| NetError::InvalidHttpResponse)?;
        let version = match response.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let mut headers = HeaderMap::with_capacity(response.headers.len());
        for header in response.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| NetError::InvalidHttpResponse)?;
            let value =
                HeaderValue::from_bytes(header.value).map_err(|_| NetError::InvalidHttpResponse)?;
            headers.append(name, value);
        }

        Ok(Self {
            status,
            version,
            reason: response.reason.unwrap_or_default().to_string(),
            headers,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The numeric status code, e.g. `200`.
    pub fn response_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name` as a string, if present and valid UTF-8.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// The declared body length, or `None` if absent or malformed.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION)?.to_str().ok()
    }

    /// True for 301/302/303/307/308 responses that carry a `Location`.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308) && self.location().is_some()
    }
}
