//! The outgoing request descriptor and its HTTP/1.1 serialization.

use crate::base::neterror::NetError;
use crate::http::orderedheaders::OrderedHeaderMap;
use bytes::{BufMut, BytesMut};
use http::Method;
use url::Url;

/// Describes the request a job sends: target, method and extra header lines.
///
/// The target changes across redirects; everything else is carried over.
/// Equivalent to Chromium's `HttpRequestInfo`.
#[derive(Debug, Clone)]
pub struct HttpRequestInfo {
    url: Url,
    method: Method,
    extra_headers: OrderedHeaderMap,
}

impl HttpRequestInfo {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            extra_headers: OrderedHeaderMap::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn extra_headers(&self) -> &OrderedHeaderMap {
        &self.extra_headers
    }

    /// Replaces all extra headers with a CRLF-separated block of header lines.
    pub fn set_extra_headers(&mut self, block: &str) -> Result<(), NetError> {
        let mut headers = OrderedHeaderMap::new();
        for line in block.split("\r\n").filter(|l| !l.trim().is_empty()) {
            headers.insert_line(line)?;
        }
        self.extra_headers = headers;
        Ok(())
    }

    /// Adds a single `Name: value` header line.
    pub fn add_extra_header(&mut self, line: &str) -> Result<(), NetError> {
        self.extra_headers.insert_line(line)
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        self.extra_headers.insert(name, value)
    }

    /// Value for the `Host` header: the host plus any non-default port.
    fn host_header(&self) -> Result<String, NetError> {
        let host = self.url.host_str().ok_or(NetError::InvalidUrl)?;
        Ok(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Origin-form request target: path plus query, never the fragment.
    fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Serializes the request line, headers and terminating blank line.
    ///
    /// `Host` and `Connection: close` are always written by the job; a caller
    /// supplied `User-Agent` wins over `user_agent`.
    pub fn write_to(&self, out: &mut BytesMut, user_agent: &str) -> Result<(), NetError> {
        let host = self.host_header()?;

        out.put_slice(self.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.request_target().as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");

        put_header(out, "Host", host.as_bytes());
        if !self.extra_headers.contains("user-agent") && !user_agent.is_empty() {
            put_header(out, "User-Agent", user_agent.as_bytes());
        }
        for (name, value) in self.extra_headers.iter() {
            if matches!(name.as_str(), "host" | "connection") {
                continue;
            }
            put_header(out, name.as_str(), value.as_bytes());
        }
        if (self.method == Method::POST || self.method == Method::PUT)
            && !self.extra_headers.contains("content-length")
        {
            put_header(out, "Content-Length", b"0");
        }
        put_header(out, "Connection", b"close");
        out.put_slice(b"\r\n");
        Ok(())
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}
