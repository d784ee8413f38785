//! Pool configuration.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use parking_lot::RwLock;

/// Client certificate bundle for mutual-TLS endpoints.
///
/// This crate threads the bundle through as configuration only; the TLS
/// handshake itself is out of scope (see `SPEC_FULL.md` §1) and is expected
/// to be performed by whatever connector layer the host wraps this pool's
/// transport in.
#[derive(Debug, Clone)]
pub struct ClientCert {
    pub cert_path: String,
    pub key_path: String,
    pub passphrase: Option<String>,
}

/// A function invoked once per *response* header line as it is received,
/// the Rust analogue of `SetHeaderCallback`/`ArkimeHttpHeader_cb`.
///
/// The source's `headerCb` is installed as libcurl's `CURLOPT_HEADERFUNCTION`
/// and fires per response header with `(url, key, value, valuelen, uw)` -- it
/// observes what the upstream sent back, it does not contribute headers to
/// the outgoing request. `(url, key, value)` mirrors that observer shape;
/// there is no `uw` userdata parameter since a Rust closure captures its own
/// state instead.
pub type HeaderCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Pool-wide configuration. `max_outstanding_requests` and `compress` are
/// fixed at construction (`max_conns` is applied directly to the transport's
/// connection pool at construction time and is not retained here);
/// everything else may be changed via the `Server::set_*` methods, which --
/// per the specification -- must only be called before any request is
/// submitted. Concurrent reconfiguration is not supported; the interior
/// mutability here exists only so a `Server` sitting behind an `Arc` can
/// still expose the `set_*` setters.
pub struct PoolConfig {
    pub(crate) max_outstanding_requests: u64,
    pub(crate) compress: bool,
    max_retries: AtomicU32,
    print_errors: AtomicBool,
    default_headers: RwLock<Vec<(HeaderName, HeaderValue)>>,
    client_auth: RwLock<Option<ClientCert>>,
    header_callback: RwLock<Option<HeaderCallback>>,
}

impl PoolConfig {
    pub(crate) fn new(max_outstanding_requests: u64, compress: bool) -> Self {
        Self {
            max_outstanding_requests,
            compress,
            // The source defaults `server->maxRetries` to 2
            // (`capture/http.c`'s `arkime_http_create_server`); a `Normal`
            // request submitted before any `set_retries()` call must still
            // get retried on transport failure rather than silently behaving
            // like `Dropable`.
            max_retries: AtomicU32::new(2),
            print_errors: AtomicBool::new(false),
            default_headers: RwLock::new(Vec::new()),
            client_auth: RwLock::new(None),
            header_callback: RwLock::new(None),
        }
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_retries(&self, n: u32) {
        self.max_retries.store(n, Ordering::Relaxed);
    }

    pub(crate) fn print_errors(&self) -> bool {
        self.print_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn set_print_errors(&self) {
        self.print_errors.store(true, Ordering::Relaxed);
    }

    pub(crate) fn default_headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        self.default_headers.read().clone()
    }

    pub(crate) fn set_default_headers(&self, headers: Vec<(HeaderName, HeaderValue)>) {
        *self.default_headers.write() = headers;
    }

    /// The configured client certificate bundle, if any.
    ///
    /// This crate never performs the TLS handshake itself (see
    /// `SPEC_FULL.md` §1); a host that needs mutual TLS reads this back
    /// through [`crate::Server::client_cert`] to configure its own connector
    /// wrapper.
    pub(crate) fn client_auth(&self) -> Option<ClientCert> {
        self.client_auth.read().clone()
    }

    pub(crate) fn set_client_auth(&self, cert: ClientCert) {
        *self.client_auth.write() = Some(cert);
    }

    pub(crate) fn header_callback(&self) -> Option<HeaderCallback> {
        self.header_callback.read().clone()
    }

    pub(crate) fn set_header_callback(&self, cb: HeaderCallback) {
        *self.header_callback.write() = Some(cb);
    }
}

/// Process-wide settings normally sourced from a host application's global
/// configuration (the `insecure`/`caTrustFile`/`debug`/... knobs in
/// `SPEC_FULL.md` §6).
#[derive(Debug)]
pub struct GlobalSettings {
    pub insecure: bool,
    pub ca_trust_file: Option<String>,
    pub debug: u8,
    pub log_es_requests: bool,
    pub log_http_connections: bool,
    quitting: AtomicBool,
}

impl GlobalSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the host has asked the process to shut down. When set,
    /// admission drops are disabled so shutdown flushes can complete.
    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Relaxed)
    }

    pub fn set_quitting(&self, quitting: bool) {
        self.quitting.store(quitting, Ordering::Relaxed);
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            insecure: false,
            ca_trust_file: None,
            debug: 0,
            log_es_requests: false,
            log_http_connections: false,
            quitting: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_default_to_two_until_set() {
        let config = PoolConfig::new(100, false);
        assert_eq!(config.max_retries(), 2);
        config.set_max_retries(3);
        assert_eq!(config.max_retries(), 3);
    }

    #[test]
    fn print_errors_defaults_off() {
        let config = PoolConfig::new(100, false);
        assert!(!config.print_errors());
        config.set_print_errors();
        assert!(config.print_errors());
    }

    #[test]
    fn quitting_disables_admission_drops_by_convention() {
        let settings = GlobalSettings::default();
        assert!(!settings.is_quitting());
        settings.set_quitting(true);
        assert!(settings.is_quitting());
    }
}
