//! # Armature Dispatch Pool
//!
//! An asynchronous, priority-aware HTTP client pool that multiplexes
//! requests across a fleet of backend endpoints, with load-shedding,
//! per-endpoint cool-down and retry, and connection-level introspection for
//! callers that need to recognize their own outbound traffic.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_dispatch_pool::{Server, http::Method};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::create("http://es1:9200,http://es2:9200", 10, 1000, true);
//!
//!     server.send(Method::GET, "/_cluster/health", Vec::new(), Vec::new(), true, |response| {
//!         println!("status: {}", response.status());
//!     });
//! }
//! ```
//!
//! ## Blocking-style bootstrap call
//!
//! ```rust,no_run
//! use armature_dispatch_pool::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::create("http://es1:9200", 10, 1000, false);
//!     let response = server.get("/_cluster/health").await;
//!     println!("status: {}", response.status());
//! }
//! ```

mod config;
mod connector;
mod dispatcher;
mod endpoint;
mod error;
mod gzip;
mod priority;
mod queue;
mod registry;
mod request;
mod response;
mod server;
mod session;
mod sync_channel;

pub use config::{ClientCert, GlobalSettings, HeaderCallback, PoolConfig};
pub use error::{PoolError, Result};
pub use priority::Priority;
pub use registry::{is_arkime, open_connection_count};
pub use request::MAX_KEY_TAIL_LEN;
pub use response::Response;
pub use server::Server;
pub use session::{DefaultSessionIdBuilder, SessionId, SessionIdBuilder, SESSION_ID_LEN};

// Re-export common wire types so callers rarely need to depend on `http`
// directly for the basics.
pub use bytes::Bytes;
pub use http;
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

/// Prelude for common imports.
///
/// ```
/// use armature_dispatch_pool::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ClientCert, GlobalSettings};
    pub use crate::error::{PoolError, Result};
    pub use crate::priority::Priority;
    pub use crate::response::Response;
    pub use crate::server::Server;
    pub use crate::session::{SessionId, SessionIdBuilder};
    pub use http::{HeaderName, HeaderValue, Method, StatusCode};
}
