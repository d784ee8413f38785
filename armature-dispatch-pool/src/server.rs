//! The pool itself: construction, submission, introspection, and
//! post-construction configuration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::Notify;

use crate::config::{ClientCert, GlobalSettings, HeaderCallback, PoolConfig};
use crate::connector::TrackingConnector;
use crate::dispatcher;
use crate::endpoint::{Endpoint, EndpointRing};
use crate::error::PoolError;
use crate::gzip;
use crate::priority::Priority;
use crate::queue::PriorityQueue;
use crate::request::{RequestLifecycle, Responder};
use crate::response::Response;
use crate::session::{DefaultSessionIdBuilder, SessionIdBuilder};
use crate::sync_channel::SyncChannel;

pub(crate) type PoolClient = Client<TrackingConnector, http_body_util::Full<Bytes>>;

/// Connect timeout applied to every dispatch attempt.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Overall per-attempt timeout (connect + send + receive).
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) struct Inner {
    pub(crate) config: PoolConfig,
    pub(crate) global: Arc<GlobalSettings>,
    pub(crate) endpoints: EndpointRing,
    pub(crate) queue: PriorityQueue,
    pub(crate) dispatch_notify: Notify,
    pub(crate) client: PoolClient,
    pub(crate) outstanding: AtomicU64,
    pub(crate) dropped_total: AtomicU64,
    /// Count of currently-open sockets for *this* `Server` instance, distinct
    /// from the process-wide `ConnectionRegistry` -- shared with the
    /// `TrackingConnector`/`TrackedIo` pair that increments/decrements it
    /// around each connection's lifetime.
    pub(crate) connections: Arc<AtomicU64>,
}

impl Inner {
    fn admit(&self, priority: Priority) -> bool {
        if self.global.is_quitting() {
            return true;
        }
        let outstanding = self.outstanding.load(Ordering::Relaxed);
        match priority {
            Priority::Dropable => outstanding <= self.config.max_outstanding_requests,
            Priority::Normal => outstanding <= 2 * self.config.max_outstanding_requests,
            Priority::High => true,
        }
    }

    pub(crate) fn enqueue(&self, request: RequestLifecycle) {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.queue.push(request);
        self.dispatch_notify.notify_one();
    }

    pub(crate) fn complete(&self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A priority-aware async HTTP client pool multiplexing requests across a
/// fleet of configured endpoints.
///
/// Cloning a `Server` is cheap (it is an `Arc` handle to shared state) and
/// every clone dispatches against the same endpoints, queues, and counters.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
    sync_channel: Arc<SyncChannel>,
}

impl Server {
    /// Parse `hostnames` (a comma-separated list of endpoint base URLs,
    /// skipping blank entries) and spawn the background dispatcher.
    ///
    /// Panics if no valid endpoint remains after parsing, or if one of them
    /// fails to parse as a base URL -- a configuration error at construction
    /// is fatal, matching the source's behavior. Callers that would rather
    /// handle a bad endpoint list themselves can use [`Server::try_create`].
    pub fn create(
        hostnames: &str,
        max_conns: usize,
        max_outstanding_requests: u64,
        compress: bool,
    ) -> Self {
        Self::try_create(
            hostnames,
            max_conns,
            max_outstanding_requests,
            compress,
            Arc::new(GlobalSettings::default()),
            Arc::new(DefaultSessionIdBuilder),
        )
        .expect("armature-dispatch-pool: invalid Server configuration")
    }

    /// Like [`Server::create`], but with an explicit [`GlobalSettings`] and
    /// [`SessionIdBuilder`] rather than the defaults.
    pub fn create_with(
        hostnames: &str,
        max_conns: usize,
        max_outstanding_requests: u64,
        compress: bool,
        global: Arc<GlobalSettings>,
        session_builder: Arc<dyn SessionIdBuilder>,
    ) -> Self {
        Self::try_create(
            hostnames,
            max_conns,
            max_outstanding_requests,
            compress,
            global,
            session_builder,
        )
        .expect("armature-dispatch-pool: invalid Server configuration")
    }

    /// Fallible form of [`Server::create_with`].
    ///
    /// Returns [`PoolError::NoEndpoints`] if `hostnames` contains no
    /// non-blank entries, or [`PoolError::InvalidEndpoint`] if one of them
    /// does not parse as a base URL. `Server::create`/`create_with` wrap this
    /// in an `expect`, matching the source's fatal-abort-on-bad-config
    /// contract; this fallible entry point exists for callers that would
    /// rather surface the error themselves.
    pub fn try_create(
        hostnames: &str,
        max_conns: usize,
        max_outstanding_requests: u64,
        compress: bool,
        global: Arc<GlobalSettings>,
        session_builder: Arc<dyn SessionIdBuilder>,
    ) -> crate::error::Result<Self> {
        let endpoints = hostnames
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<http::Uri>()
                    .map_err(|e| PoolError::InvalidEndpoint(s.to_string(), e))?;
                Ok(Endpoint::new(s.to_string()))
            })
            .collect::<crate::error::Result<Vec<Endpoint>>>()?;

        if endpoints.is_empty() {
            return Err(PoolError::NoEndpoints);
        }

        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
        http_connector.enforce_http(true);
        http_connector.set_keepalive(Some(Duration::from_secs(60)));

        let connections = Arc::new(AtomicU64::new(0));
        let tracking_connector =
            TrackingConnector::new(http_connector, session_builder, connections.clone());
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_conns)
            .build(tracking_connector);

        let inner = Arc::new(Inner {
            config: PoolConfig::new(max_outstanding_requests, compress),
            global,
            endpoints: EndpointRing::new(endpoints),
            queue: PriorityQueue::new(),
            dispatch_notify: Notify::new(),
            client,
            outstanding: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            connections,
        });

        dispatcher::spawn(inner.clone());

        Ok(Self {
            inner,
            sync_channel: Arc::new(SyncChannel::new()),
        })
    }

    /// Thin wrapper mapping `dropable` onto a priority and calling
    /// [`Server::schedule`].
    pub fn send(
        &self,
        method: Method,
        key: impl Into<String>,
        body: impl Into<Bytes>,
        headers: Vec<(HeaderName, HeaderValue)>,
        dropable: bool,
        cb: impl FnOnce(Response) + Send + 'static,
    ) -> bool {
        let priority = if dropable {
            Priority::Dropable
        } else {
            Priority::Normal
        };
        self.schedule(method, key, body, headers, priority, cb)
    }

    /// Submit a request at an explicit priority. Returns `false` if the
    /// request was admission-dropped (the callback is never invoked in that
    /// case); `true` otherwise.
    pub fn schedule(
        &self,
        method: Method,
        key: impl Into<String>,
        body: impl Into<Bytes>,
        headers: Vec<(HeaderName, HeaderValue)>,
        priority: Priority,
        cb: impl FnOnce(Response) + Send + 'static,
    ) -> bool {
        if !self.inner.admit(priority) {
            self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let key = key.into();
        let body = body.into();
        let (body, headers) = self.maybe_compress(body, headers);

        let request = RequestLifecycle::new(
            method,
            key,
            body,
            headers,
            priority,
            self.inner.config.max_retries(),
            Responder::Callback(Box::new(cb)),
        );
        self.inner.enqueue(request);
        true
    }

    /// GET via the synchronous sidecar.
    pub async fn get(&self, key: impl Into<String>) -> Response {
        self.send_sync(Method::GET, key, Bytes::new(), Vec::new())
            .await
    }

    /// Arbitrary method via the synchronous sidecar: enqueues at
    /// [`Priority::High`] (bypassing admission) and awaits completion rather
    /// than returning immediately.
    pub async fn send_sync(
        &self,
        method: Method,
        key: impl Into<String>,
        body: impl Into<Bytes>,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Response {
        let key = key.into();
        let body = body.into();
        let (body, headers) = self.maybe_compress(body, headers);
        self.sync_channel
            .call(&self.inner, method, key, body, headers)
            .await
    }

    fn maybe_compress(
        &self,
        body: Bytes,
        mut headers: Vec<(HeaderName, HeaderValue)>,
    ) -> (Bytes, Vec<(HeaderName, HeaderValue)>) {
        if !self.inner.config.compress {
            return (body, headers);
        }
        match gzip::compress(&body) {
            Some(compressed) => {
                headers.push((http::header::CONTENT_ENCODING, HeaderValue::from_static("gzip")));
                (Bytes::from(compressed), headers)
            }
            None => (body, headers),
        }
    }

    /// Number of requests handed to the transport but not yet completed.
    pub fn queue_length(&self) -> u64 {
        self.inner.outstanding.load(Ordering::Relaxed)
    }

    /// Monotonic count of admission-time drops.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    /// Number of sockets this `Server` currently has open. Distinct from the
    /// process-wide [`crate::open_connection_count`]: this one only counts
    /// connections opened by this particular instance.
    pub fn connection_count(&self) -> u64 {
        self.inner.connections.load(Ordering::Relaxed)
    }

    /// Replace the default headers merged onto every outgoing request.
    pub fn set_headers(&self, headers: Vec<(HeaderName, HeaderValue)>) {
        self.inner.config.set_default_headers(headers);
    }

    /// Set the number of retries attempted for `Normal`-priority requests.
    pub fn set_retries(&self, n: u32) {
        self.inner.config.set_max_retries(n);
    }

    /// Configure a client certificate bundle for mutual-TLS endpoints.
    ///
    /// This pool never performs a TLS handshake itself -- the bundle is
    /// threaded through as inert configuration. A host that wraps this
    /// pool's connector in its own TLS layer reads it back via
    /// [`Server::client_cert`]. Rejected if `cert_path` or `key_path` is
    /// blank, since a cert bundle missing either half can never be used by
    /// whatever connector wrapper reads it back.
    pub fn set_client_cert(&self, cert: ClientCert) -> crate::error::Result<()> {
        if cert.cert_path.trim().is_empty() || cert.key_path.trim().is_empty() {
            return Err(PoolError::InvalidClientCert(
                "cert_path and key_path must both be non-empty".to_string(),
            ));
        }
        self.inner.config.set_client_auth(cert);
        Ok(())
    }

    /// The client certificate bundle previously configured via
    /// [`Server::set_client_cert`], if any.
    pub fn client_cert(&self) -> Option<ClientCert> {
        self.inner.config.client_auth()
    }

    /// Enable logging of non-2xx responses (and a FAQ hint on version
    /// conflicts).
    pub fn set_print_errors(&self) {
        self.inner.config.set_print_errors();
    }

    /// Install a callback invoked once per *response* header line as it
    /// comes back from an endpoint -- an observer, not a request-header
    /// mutator, matching the source's `CURLOPT_HEADERFUNCTION`-backed
    /// `headerCb`.
    pub fn set_header_callback(&self, cb: HeaderCallback) {
        self.inner.config.set_header_callback(cb);
    }
}
