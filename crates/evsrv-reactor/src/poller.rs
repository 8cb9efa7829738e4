//! Thin wrapper over the kernel readiness facility (epoll).
//!
//! The poller tracks nothing itself — pairing poll-set membership with
//! the connection registry is the reactor's job. Event data carries the
//! connection id (`0` = listener sentinel), never a pointer.
//!
//! Tolerated kernel conditions: EEXIST on add and ENOENT on delete are
//! success. Everything else is logged and reported as failure; callers
//! degrade gracefully.

use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::error::{ReactorError, Result};

/// Read + write interest, edge-triggered. The standing registration for
/// every connection; re-armed explicitly after each queued send.
pub fn rw_edge() -> EpollFlags {
    EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT | EpollFlags::EPOLLET
}

/// Read-only interest, edge-triggered. Used for the listening socket.
pub fn read_edge() -> EpollFlags {
    EpollFlags::EPOLLIN | EpollFlags::EPOLLET
}

pub struct Poller {
    epoll: Epoll,
    events: Vec<EpollEvent>,
    num_events: usize,
}

impl Poller {
    /// Create the kernel poll set. Failure here is fatal: the process
    /// cannot multiplex anything without it.
    pub fn new(max_events: usize) -> Result<Poller> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(ReactorError::PollSetCreate)?;
        Ok(Poller {
            epoll,
            events: vec![EpollEvent::empty(); max_events.max(1)],
            num_events: 0,
        })
    }

    /// Add a descriptor with the given interest. "Already registered" is
    /// tolerated.
    pub fn add(&self, fd: BorrowedFd<'_>, data: u64, interest: EpollFlags) -> bool {
        match self.epoll.add(fd, EpollEvent::new(interest, data)) {
            Ok(()) => {
                log::trace!("epoll add ok (data {}, events {:?})", data, interest);
                true
            }
            Err(Errno::EEXIST) => {
                log::debug!("epoll add: already registered (data {})", data);
                true
            }
            Err(e) => {
                log::error!("epoll add failed (data {}): {}", data, e);
                false
            }
        }
    }

    /// Change a descriptor's interest. Failure is logged and non-fatal.
    pub fn modify(&self, fd: BorrowedFd<'_>, data: u64, interest: EpollFlags) -> bool {
        let mut event = EpollEvent::new(interest, data);
        match self.epoll.modify(fd, &mut event) {
            Ok(()) => true,
            Err(e) => {
                log::error!("epoll modify failed (data {}, events {:?}): {}", data, interest, e);
                false
            }
        }
    }

    /// Remove a descriptor. "Already absent" is tolerated.
    pub fn delete(&self, fd: BorrowedFd<'_>) -> bool {
        match self.epoll.delete(fd) {
            Ok(()) => true,
            Err(Errno::ENOENT) => {
                log::debug!("epoll delete: already absent");
                true
            }
            Err(e) => {
                log::error!("epoll delete failed: {}", e);
                false
            }
        }
    }

    /// Block until at least one descriptor is ready or the timeout
    /// elapses. A wait failure is logged and mapped to zero ready
    /// events; EINTR is silent.
    pub fn wait(&mut self, timeout_ms: u16) -> usize {
        self.num_events = 0;
        match self.epoll.wait(&mut self.events, EpollTimeout::from(timeout_ms)) {
            Ok(n) => {
                self.num_events = n;
                n
            }
            Err(Errno::EINTR) => 0,
            Err(e) => {
                log::error!("epoll wait failed: {}", e);
                0
            }
        }
    }

    /// Event at index `i` of the last wait: (data, ready bits).
    pub fn event(&self, i: usize) -> (u64, EpollFlags) {
        let ev = &self.events[i];
        (ev.data(), ev.events())
    }

    pub fn num_ready(&self) -> usize {
        self.num_events
    }
}
