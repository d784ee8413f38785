//! Connector wrapper that observes socket open/close for the connection
//! registry.
//!
//! The original transport integrates with an external HTTP library's
//! socket-open/socket-close hooks to track outbound connections. Rust's
//! `hyper_util` legacy client has no such callback surface, so this crate
//! layers a custom [`tower_service::Service<Uri>`] connector in front of the
//! stock [`HttpConnector`] instead: registration happens once the inner
//! connect future resolves (the TCP-connect equivalent of "socket writable
//! for the first time"), and deregistration happens when the wrapped IO
//! object is dropped (the equivalent of socket-close), via `pin_project`'s
//! `PinnedDrop`.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector, HttpInfo};
use hyper_util::rt::TokioIo;
use pin_project_lite::pin_project;
use tower_service::Service;

use crate::registry;
use crate::session::{SessionId, SessionIdBuilder};

/// Wraps [`HttpConnector`], registering/deregistering each connection's
/// [`SessionId`] in the process-wide [`registry`] and bumping the owning
/// `Server`'s own `connections` counter alongside it -- the source keeps
/// `server->connections` as a per-instance count distinct from the global
/// session-id hash table (`capture/http.c`), and this connector is the one
/// place both get touched together.
#[derive(Clone)]
pub(crate) struct TrackingConnector {
    inner: HttpConnector,
    session_builder: Arc<dyn SessionIdBuilder>,
    connections: Arc<AtomicU64>,
}

impl TrackingConnector {
    pub(crate) fn new(
        inner: HttpConnector,
        session_builder: Arc<dyn SessionIdBuilder>,
        connections: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner,
            session_builder,
            connections,
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl Service<http::Uri> for TrackingConnector {
    type Response = TrackedIo;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: http::Uri) -> Self::Future {
        let mut inner = self.inner.clone();
        let session_builder = self.session_builder.clone();
        let connections = self.connections.clone();
        Box::pin(async move {
            let io = inner.call(uri).await.map_err(Into::into)?;
            let connected = io.connected();
            let session_id = connected
                .extra::<HttpInfo>()
                .and_then(|info| build_session_id(&session_builder, info.local_addr(), info.remote_addr()));

            if let Some(id) = &session_id {
                registry::register(id.clone());
                connections.fetch_add(1, Ordering::Relaxed);
            }

            Ok(TrackedIo::new(io, session_id, connections))
        })
    }
}

fn build_session_id(
    builder: &Arc<dyn SessionIdBuilder>,
    local: SocketAddr,
    remote: SocketAddr,
) -> Option<SessionId> {
    match (local, remote) {
        (SocketAddr::V4(local), SocketAddr::V4(remote)) => Some(builder.build_v4(local, remote)),
        (SocketAddr::V6(local), SocketAddr::V6(remote)) => Some(builder.build_v6(local, remote)),
        _ => None,
    }
}

pin_project! {
    /// The connected socket handed back by [`TrackingConnector`]. Deregisters
    /// its session-id from the connection registry and decrements the owning
    /// `Server`'s `connections` counter on drop -- the Rust translation of
    /// the source's explicit socket-close hook.
    pub(crate) struct TrackedIo {
        #[pin]
        inner: TokioIo<tokio::net::TcpStream>,
        session_id: Option<SessionId>,
        connections: Arc<AtomicU64>,
    }

    impl PinnedDrop for TrackedIo {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(id) = this.session_id.take() {
                registry::deregister(&id);
                this.connections.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

impl TrackedIo {
    fn new(io: TokioIo<tokio::net::TcpStream>, session_id: Option<SessionId>, connections: Arc<AtomicU64>) -> Self {
        Self {
            inner: io,
            session_id,
            connections,
        }
    }
}

impl Connection for TrackedIo {
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}

impl hyper::rt::Read for TrackedIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl hyper::rt::Write for TrackedIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
