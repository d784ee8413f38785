//! Response delivered to a request's callback or `SyncChannel` caller.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// The outcome of one request, delivered to the caller exactly once.
///
/// A `status` of `0` is the pool's synthesized sentinel for "no HTTP
/// response received" -- an exhausted-retry transport failure, never a real
/// status code. All other responses, including 5xx, are delivered verbatim.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The sentinel response for an exhausted-retry transport failure.
    pub(crate) fn transport_failure() -> Self {
        Self::new(0, HeaderMap::new(), Bytes::new())
    }

    /// Raw status code. `0` means "no HTTP response was received".
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The status as an [`http::StatusCode`], if it is a real HTTP status.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    /// Whether a real HTTP response was received at all.
    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    /// 2xx check. `false` for the transport-failure sentinel.
    pub fn is_success(&self) -> bool {
        self.status_code().is_some_and(|s| s.is_success())
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body bytes.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Response body decoded as UTF-8 text, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// `Content-Length`, if advertised.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}
