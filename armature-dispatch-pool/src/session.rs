//! Opaque, length-prefixed connection session identifiers.

use std::hash::{Hash, Hasher};
use std::net::{SocketAddrV4, SocketAddrV6};

use bytes::Bytes;

/// Maximum length of a [`SessionId`]'s byte representation, including its
/// own length-prefix byte.
pub const SESSION_ID_LEN: usize = 37;

/// An opaque, length-prefixed byte string identifying a TCP 5-tuple as seen
/// by the capture engine.
///
/// Equality and hashing deliberately mirror the source's unusual semantics
/// rather than a conventional full-content comparison (see `SPEC_FULL.md`
/// §9): the first byte is the id's own length, equality compares only the
/// first `min(len_a, len_b)` bytes of the two buffers, and hashing uses only
/// that length-prefix byte. This means distinct ids with the same declared
/// length collide in the hash -- acceptable, since `Eq` still disambiguates
/// them correctly; it is preserved because the specification calls for
/// mirroring observed behavior rather than "fixing" it.
#[derive(Debug, Clone)]
pub struct SessionId(Bytes);

impl SessionId {
    /// Build a session id from its raw, already length-prefixed bytes.
    ///
    /// `bytes[0]` must equal the number of bytes that are meaningful
    /// (typically `bytes.len()`, but a builder may pad beyond it).
    pub fn from_bytes(bytes: Bytes) -> Self {
        debug_assert!(!bytes.is_empty(), "session id must carry at least its length prefix");
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn declared_len(&self) -> usize {
        self.0.first().copied().unwrap_or(0) as usize
    }
}

impl PartialEq for SessionId {
    fn eq(&self, other: &Self) -> bool {
        let n = self.declared_len().min(other.declared_len()).min(self.0.len()).min(other.0.len());
        self.0[..n] == other.0[..n]
    }
}

impl Eq for SessionId {}

impl Hash for SessionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.first().hash(state);
    }
}

/// Builds opaque [`SessionId`]s from the local/remote socket addresses of a
/// freshly-opened connection.
///
/// The real construction of a session-id (matching the surrounding capture
/// engine's own hashing of packet 5-tuples) is out of scope for this crate
/// and is normally supplied by the host; [`DefaultSessionIdBuilder`] exists
/// so the pool is self-testable without one.
pub trait SessionIdBuilder: Send + Sync {
    fn build_v4(&self, local: SocketAddrV4, remote: SocketAddrV4) -> SessionId;
    fn build_v6(&self, local: SocketAddrV6, remote: SocketAddrV6) -> SessionId;
}

/// A reasonable standalone session-id layout: a length byte followed by the
/// local/remote IP and port pairs (big-endian ports). Deterministic given
/// the same 5-tuple, which is all the pool's own tests require.
#[derive(Debug, Default)]
pub struct DefaultSessionIdBuilder;

impl SessionIdBuilder for DefaultSessionIdBuilder {
    fn build_v4(&self, local: SocketAddrV4, remote: SocketAddrV4) -> SessionId {
        let mut buf = Vec::with_capacity(1 + 4 + 2 + 4 + 2);
        buf.push(0); // placeholder, fixed below
        buf.extend_from_slice(&local.ip().octets());
        buf.extend_from_slice(&local.port().to_be_bytes());
        buf.extend_from_slice(&remote.ip().octets());
        buf.extend_from_slice(&remote.port().to_be_bytes());
        buf[0] = buf.len() as u8;
        SessionId::from_bytes(Bytes::from(buf))
    }

    fn build_v6(&self, local: SocketAddrV6, remote: SocketAddrV6) -> SessionId {
        let mut buf = Vec::with_capacity(1 + 16 + 2 + 16 + 2);
        buf.push(0);
        buf.extend_from_slice(&local.ip().octets());
        buf.extend_from_slice(&local.port().to_be_bytes());
        buf.extend_from_slice(&remote.ip().octets());
        buf.extend_from_slice(&remote.port().to_be_bytes());
        buf[0] = buf.len() as u8;
        SessionId::from_bytes(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_when_shared_prefix_covers_the_shorter_declared_length() {
        let a = SessionId::from_bytes(Bytes::from_static(&[3, b'a', b'b', b'c']));
        let b = SessionId::from_bytes(Bytes::from_static(&[3, b'a', b'b', b'z']));
        // declared length 3 means only the first 3 bytes (len byte + 2 payload
        // bytes) are compared, so the trailing 'c' vs 'z' never matters here.
        assert_eq!(a, b);
    }

    #[test]
    fn not_equal_when_prefixes_differ() {
        let a = SessionId::from_bytes(Bytes::from_static(&[4, b'a', b'b', b'c', b'd']));
        let b = SessionId::from_bytes(Bytes::from_static(&[4, b'a', b'b', b'x', b'd']));
        assert_ne!(a, b);
    }

    #[test]
    fn different_declared_lengths_are_unequal_via_the_length_byte_itself() {
        // memcmp starts at byte 0, which *is* the length prefix, so two ids
        // that declare different lengths diverge immediately.
        let short = SessionId::from_bytes(Bytes::from_static(&[2, b'a', b'b']));
        let long = SessionId::from_bytes(Bytes::from_static(&[4, b'a', b'b', b'c', b'd']));
        assert_ne!(short, long);
    }
}
