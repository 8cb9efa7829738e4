//! evsrv-reactor error types.
//!
//! Only initialization can fail loudly. Per-connection kernel failures
//! are logged and degraded at the call site, never propagated.

use std::fmt;

#[derive(Debug)]
pub enum ReactorError {
    /// Kernel poll-set creation failed. Fatal at startup.
    PollSetCreate(nix::errno::Errno),
    /// Listening socket could not be registered with the poll set.
    ListenerRegister,
    /// Socket setup (bind/listen/nonblocking) failed.
    Io(std::io::Error),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PollSetCreate(e) => write!(f, "epoll_create failed: {}", e),
            Self::ListenerRegister => write!(f, "failed to register listener with poll set"),
            Self::Io(e) => write!(f, "socket setup failed: {}", e),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReactorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;
