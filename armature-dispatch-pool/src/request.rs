//! Per-request state and the caller-facing response plumbing.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use tokio::sync::oneshot;

use crate::priority::Priority;
use crate::response::Response;

/// Maximum length, in bytes, of a request's URL tail (`keyTail`).
///
/// Enforced at submission time. Exceeding it is a programmer error, not a
/// runtime failure -- see [`validate_key_tail`].
pub const MAX_KEY_TAIL_LEN: usize = 1000;

/// Panics with a diagnostic if `key_tail` exceeds [`MAX_KEY_TAIL_LEN`] bytes.
///
/// Mirrors the source's fatal-abort contract for oversized URLs: this is a
/// caller precondition, not something the pool can recover from.
pub fn validate_key_tail(key_tail: &str) {
    if key_tail.len() > MAX_KEY_TAIL_LEN {
        panic!(
            "armature-dispatch-pool: key_tail of {} bytes exceeds the {}-byte limit",
            key_tail.len(),
            MAX_KEY_TAIL_LEN
        );
    }
}

/// Where a completed [`Response`] should be delivered.
pub(crate) enum Responder {
    /// The `Send`/`Schedule` path: a boxed user callback fired exactly once.
    Callback(Box<dyn FnOnce(Response) + Send>),
    /// The `SyncChannel` path: a oneshot completion awaited by the caller.
    Oneshot(oneshot::Sender<Response>),
}

impl Responder {
    /// Fire the responder with the final outcome. Catches panics from user
    /// callbacks so one misbehaving callback cannot poison the dispatcher.
    pub(crate) fn fire(self, response: Response) {
        match self {
            Responder::Callback(cb) => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                    cb(response)
                }));
                if let Err(panic) = result {
                    armature_log::error!(
                        target: "armature_dispatch_pool::request",
                        "user response callback panicked: {}",
                        panic_message(&panic)
                    );
                }
            }
            Responder::Oneshot(tx) => {
                // A dropped receiver (caller gave up) is not an error for us.
                let _ = tx.send(response);
            }
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Per-request state tracked from submission through completion.
pub(crate) struct RequestLifecycle {
    pub method: Method,
    pub key_tail: String,
    pub body: Bytes,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub priority: Priority,
    pub retries_left: u32,
    pub endpoint_idx: Option<usize>,
    pub responder: Responder,
}

impl RequestLifecycle {
    pub(crate) fn new(
        method: Method,
        key_tail: String,
        body: Bytes,
        headers: Vec<(HeaderName, HeaderValue)>,
        priority: Priority,
        max_retries: u32,
        responder: Responder,
    ) -> Self {
        validate_key_tail(&key_tail);
        Self {
            retries_left: priority.initial_retries(max_retries),
            method,
            key_tail,
            body,
            headers,
            priority,
            endpoint_idx: None,
            responder,
        }
    }
}
