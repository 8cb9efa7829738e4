//! Live-worker accounting.
//!
//! Every worker thread holds a ticket for its whole lifetime; the counter
//! is the number of tickets alive. Shutdown blocks on `await_all_done`
//! until the counter reaches zero or the timeout elapses — workers are
//! never cancelled mid-flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct WorkerGate {
    live: AtomicUsize,
}

impl WorkerGate {
    pub const fn new() -> WorkerGate {
        WorkerGate {
            live: AtomicUsize::new(0),
        }
    }

    /// Take a ticket. The count drops when the ticket drops — also on
    /// unwind, so a panicking worker cannot wedge shutdown.
    pub fn enter(self: &Arc<Self>) -> WorkerTicket {
        self.live.fetch_add(1, Ordering::AcqRel);
        WorkerTicket {
            gate: Arc::clone(self),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Block until every ticket has been returned or `timeout` elapses.
    /// Returns true iff the count reached zero in time.
    pub fn await_all_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.live_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Default for WorkerGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkerTicket {
    gate: Arc<WorkerGate>,
}

impl Drop for WorkerTicket {
    fn drop(&mut self) {
        self.gate.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_and_drop() {
        let gate = Arc::new(WorkerGate::new());
        assert_eq!(gate.live_count(), 0);
        let t1 = gate.enter();
        let t2 = gate.enter();
        assert_eq!(gate.live_count(), 2);
        drop(t1);
        assert_eq!(gate.live_count(), 1);
        drop(t2);
        assert_eq!(gate.live_count(), 0);
    }

    #[test]
    fn test_await_all_done_immediate() {
        let gate = Arc::new(WorkerGate::new());
        assert!(gate.await_all_done(Duration::from_millis(1)));
    }

    #[test]
    fn test_await_all_done_timeout() {
        let gate = Arc::new(WorkerGate::new());
        let _held = gate.enter();
        assert!(!gate.await_all_done(Duration::from_millis(10)));
        assert_eq!(gate.live_count(), 1);
    }

    #[test]
    fn test_await_all_done_after_threads_finish() {
        let gate = Arc::new(WorkerGate::new());
        let mut joins = Vec::new();
        for _ in 0..8 {
            let ticket = gate.enter();
            joins.push(thread::spawn(move || {
                let _t = ticket;
                thread::sleep(Duration::from_millis(5));
            }));
        }
        assert!(gate.await_all_done(Duration::from_secs(2)));
        assert_eq!(gate.live_count(), 0);
        for j in joins {
            j.join().unwrap();
        }
    }

    #[test]
    fn test_ticket_released_on_panic() {
        let gate = Arc::new(WorkerGate::new());
        let ticket = gate.enter();
        let handle = thread::spawn(move || {
            let _t = ticket;
            panic!("worker died");
        });
        let _ = handle.join();
        assert_eq!(gate.live_count(), 0);
    }
}
