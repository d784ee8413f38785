//! Process-wide registry of this process's own outbound connections.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use once_cell::sync::Lazy;

use crate::session::SessionId;

/// Process-wide set of session-ids for connections this pool currently has
/// open, shared by every [`crate::Server`] instance so the capture engine
/// only needs one place to ask "is this mine?".
///
/// `DashSet` provides its own internal sharded locking, which satisfies the
/// "registry mutex" discipline from the specification's concurrency model at
/// finer granularity than a single mutex would.
static CONNECTIONS: Lazy<DashSet<SessionId>> = Lazy::new(DashSet::new);

static OPEN_CONNECTION_COUNT: AtomicU64 = AtomicU64::new(0);

/// Register a newly-opened connection's session-id.
///
/// A duplicate insert (same session-id already present) is logged and the
/// existing entry is kept -- not fatal, and unlike the source, does not leak
/// the new entry's allocation (there is nothing to leak in Rust).
pub(crate) fn register(session_id: SessionId) {
    if !CONNECTIONS.insert(session_id) {
        armature_log::warn!(
            target: "armature_dispatch_pool::registry",
            "duplicate connection registry insert, keeping first entry"
        );
        return;
    }
    OPEN_CONNECTION_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Remove a connection's session-id on socket close.
pub(crate) fn deregister(session_id: &SessionId) {
    if CONNECTIONS.remove(session_id).is_some() {
        OPEN_CONNECTION_COUNT.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Number of connections currently registered, process-wide.
pub fn open_connection_count() -> u64 {
    OPEN_CONNECTION_COUNT.load(Ordering::Relaxed)
}

/// Whether `session_id` belongs to a connection this process currently has
/// open. `session_id_hash` is accepted for interface parity with the
/// external `IsArkime(sessionIdHash, sessionId)` signature but is unused:
/// `DashSet`'s own hashing is authoritative here.
pub fn is_arkime(_session_id_hash: u64, session_id: &SessionId) -> bool {
    CONNECTIONS.contains(session_id)
}
