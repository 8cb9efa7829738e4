//! Connection identifier type

use core::fmt;

/// Unique identifier for a connection
///
/// This is an opaque 64-bit value handed to workers in place of any
/// reference to the connection object. Workers address the connection
/// through the send queue by this id only; the registry on the reactor
/// thread is the single place that resolves it to a live object.
///
/// The identifier is stable across a protocol upgrade: the object in the
/// registry is swapped, the id is not. `0` is reserved as the sentinel
/// for the listening socket in the poll set.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Sentinel identifying the listening socket in poll-set event data
    pub const LISTENER: ConnectionId = ConnectionId(0);

    /// Create a ConnectionId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is the listener sentinel
    #[inline]
    pub const fn is_listener(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ConnectionId {
    #[inline]
    fn from(id: u64) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}
