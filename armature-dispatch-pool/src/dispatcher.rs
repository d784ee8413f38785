//! Cooperative dispatch loop: drains the priority queue and drives one
//! transport attempt per popped request.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};

use crate::endpoint::now_epoch_seconds;
use crate::request::RequestLifecycle;
use crate::response::Response;
use crate::server::{Inner, REQUEST_TIMEOUT};

const VERSION_CONFLICT_HINT: &str = "version conflict, current version";
const LOGGED_BODY_PREFIX_BYTES: usize = 4000;

/// Spawn the background dispatcher task. One task per `Server`; it outlives
/// the `Server` handle as long as the `Inner` it was given stays alive
/// (`tokio::spawn` takes its own `Arc` clone).
pub(crate) fn spawn(inner: Arc<Inner>) {
    tokio::spawn(async move {
        loop {
            while let Some(mut request) = inner.queue.pop() {
                // Endpoint selection happens here, synchronously with the pop,
                // not inside the spawned attempt -- so the assignment order
                // seen across endpoints matches the strict dispatch order
                // even though the attempts themselves run concurrently.
                let endpoint_idx = inner.endpoints.pick(now_epoch_seconds());
                request.endpoint_idx = Some(endpoint_idx);

                let inner = inner.clone();
                tokio::spawn(async move {
                    execute_attempt(inner, request, endpoint_idx).await;
                });
            }
            inner.dispatch_notify.notified().await;
        }
    });
}

async fn execute_attempt(inner: Arc<Inner>, mut request: RequestLifecycle, endpoint_idx: usize) {
    let endpoint_name = inner.endpoints.endpoint_name(endpoint_idx);

    let outcome = attempt_once(&inner, &endpoint_name, &request).await;

    match outcome {
        Ok(response) => {
            log_if_needed(&inner, &response);
            inner.complete();
            request.responder.fire(response);
        }
        Err(()) => {
            if request.retries_left > 0 {
                inner.endpoints.cool_down(endpoint_idx, now_epoch_seconds());
                request.retries_left -= 1;
                armature_log::warn!(
                    target: "armature_dispatch_pool::dispatcher",
                    "transport failure against {}, {} retries left",
                    endpoint_name,
                    request.retries_left
                );
                inner.complete();
                inner.enqueue(request);
            } else {
                armature_log::warn!(
                    target: "armature_dispatch_pool::dispatcher",
                    "transport failure against {}, retries exhausted",
                    endpoint_name
                );
                inner.complete();
                request.responder.fire(Response::transport_failure());
            }
        }
    }
}

/// Run exactly one dispatch attempt. `Err(())` means "transport-level
/// failure, synthesize the `responseCode == 0` sentinel" -- the only
/// retryable condition. Any real HTTP response, including 5xx, is `Ok`.
async fn attempt_once(
    inner: &Arc<Inner>,
    endpoint_name: &str,
    request: &RequestLifecycle,
) -> Result<Response, ()> {
    let url = format!("{endpoint_name}{}", request.key_tail);
    let uri: http::Uri = url.parse().map_err(|_| ())?;

    let mut builder = http::Request::builder().method(request.method.clone()).uri(uri);

    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    for (name, value) in inner.config.default_headers() {
        builder = builder.header(name, value);
    }
    builder = builder.header(http::header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    builder = builder.header(
        http::header::USER_AGENT,
        HeaderValue::from_static(concat!("armature-dispatch-pool/", env!("CARGO_PKG_VERSION"))),
    );

    let body = if request.method == http::Method::GET {
        Bytes::new()
    } else {
        request.body.clone()
    };

    let hyper_request = builder
        .body(Full::new(body))
        .map_err(|_| ())?;

    let sent = tokio::time::timeout(REQUEST_TIMEOUT, inner.client.request(hyper_request)).await;

    let response = match sent {
        Ok(Ok(response)) => response,
        Ok(Err(_)) | Err(_) => return Err(()),
    };

    let status = response.status();
    let headers = response.headers().clone();
    let content_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let is_gzipped = headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    if let Some(cb) = inner.config.header_callback() {
        for (name, value) in headers.iter() {
            if let Ok(value) = value.to_str() {
                cb(&url, name.as_str(), value);
            }
        }
    }

    let collected = collect_body(response.into_body(), content_length).await.map_err(|_| ())?;
    let body = if is_gzipped {
        decompress(&collected).unwrap_or(collected)
    } else {
        collected
    };

    Ok(Response::new(status.as_u16(), headers, body))
}

/// Upper bound on the `Content-Length`-seeded capacity `collect_body`
/// preallocates. The source trusts `CURLINFO_CONTENT_LENGTH_DOWNLOAD`
/// unconditionally for its `malloc` (`http.c`'s
/// `arkime_http_curl_write_callback`); a `malloc` that size would just fail,
/// but `Vec::with_capacity` aborts the whole process on an allocator
/// failure, so a bogus or hostile advertised length must not reach it
/// directly.
const MAX_PREALLOCATED_BODY_BYTES: usize = 64 * 1024 * 1024;

async fn collect_body(
    body: hyper::body::Incoming,
    content_length_hint: usize,
) -> Result<Bytes, hyper::Error> {
    let mut buf = Vec::with_capacity(content_length_hint.min(MAX_PREALLOCATED_BODY_BYTES));
    let mut body = body;
    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(data) = frame.data_ref() {
            buf.extend_from_slice(data);
        }
    }
    Ok(Bytes::from(buf))
}

fn decompress(input: &[u8]) -> Option<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(input);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(Bytes::from(out))
}

fn log_if_needed(inner: &Arc<Inner>, response: &Response) {
    if !inner.config.print_errors() {
        return;
    }
    let is_success = StatusCode::from_u16(response.status())
        .map(|s| s.is_success())
        .unwrap_or(false);
    if is_success {
        return;
    }

    let body = response.body();
    let prefix_len = body.len().min(LOGGED_BODY_PREFIX_BYTES);
    armature_log::warn!(
        target: "armature_dispatch_pool::dispatcher",
        "non-2xx response: status={} body_len={} body_prefix={:?}",
        response.status(),
        body.len(),
        String::from_utf8_lossy(&body[..prefix_len])
    );

    let scan_len = body.len().min(1000);
    if String::from_utf8_lossy(&body[..scan_len]).contains(VERSION_CONFLICT_HINT) {
        armature_log::info!(
            target: "armature_dispatch_pool::dispatcher",
            "hint: this looks like an Elasticsearch version-conflict response; see the cluster's FAQ on optimistic concurrency control"
        );
    }
}
