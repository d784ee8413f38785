//! The bounded, single-slot blocking path used for bootstrap/flush calls.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use tokio::sync::{oneshot, Mutex};

use crate::priority::Priority;
use crate::request::{RequestLifecycle, Responder};
use crate::response::Response;
use crate::server::Inner;

/// Serializes the blocking-style calls ([`crate::Server::get`] /
/// [`crate::Server::send_sync`]) the way a single dedicated request slot
/// would, while still suspending the calling task rather than blocking an OS
/// thread -- the async translation the specification's design notes endorse.
///
/// Internally this reuses the same `PriorityQueue`/`EndpointRing`/retry
/// machinery as the async path (enqueued at [`Priority::High`], which
/// bypasses admission) rather than duplicating the retry loop, since in this
/// crate's model the dispatcher already serves both paths identically.
pub(crate) struct SyncChannel {
    lock: Mutex<()>,
}

impl SyncChannel {
    pub(crate) fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    pub(crate) async fn call(
        &self,
        inner: &Inner,
        method: Method,
        key: String,
        body: Bytes,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Response {
        let _guard = self.lock.lock().await;

        let (tx, rx) = oneshot::channel();
        let request = RequestLifecycle::new(
            method,
            key,
            body,
            headers,
            Priority::High,
            inner.config.max_retries(),
            Responder::Oneshot(tx),
        );
        inner.enqueue(request);

        // A dropped sender would mean the dispatcher task itself died; treat
        // that the same as an exhausted-retry transport failure.
        rx.await.unwrap_or_else(|_| Response::transport_failure())
    }
}
