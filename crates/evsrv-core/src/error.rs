//! evsrv-core error types.

use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    /// The send queue consumer is gone (reactor shut down).
    QueueClosed,
    /// A worker thread could not be spawned.
    SpawnFailed(std::io::Error),
    /// Request head could not be understood.
    BadRequest(&'static str),
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueClosed => write!(f, "send queue closed"),
            Self::SpawnFailed(e) => write!(f, "worker spawn failed: {}", e),
            Self::BadRequest(what) => write!(f, "bad request: {}", what),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;
