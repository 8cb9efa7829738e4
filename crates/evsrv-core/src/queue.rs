//! # Send Queue — the worker → reactor hand-off
//!
//! The one synchronized channel in the system. Any number of worker
//! threads enqueue pending actions; the reactor is the sole consumer and
//! drains the whole backlog in one batch per cycle, so a burst of worker
//! completions costs one wakeup, not one per item.
//!
//! Ordering: the channel is FIFO, so actions for the same connection are
//! applied in enqueue order. Actions for different connections have no
//! relative ordering guarantee.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::action::{Action, Body, SendBuffer};
use crate::error::{CoreError, Result};
use crate::http::RequestHead;
use crate::id::ConnectionId;

/// Reactor-side end of the queue. Owns the receiver; hands out cloneable
/// producer handles to workers.
pub struct SendQueue {
    tx: Sender<Action>,
    rx: Receiver<Action>,
}

impl SendQueue {
    pub fn new() -> SendQueue {
        let (tx, rx) = unbounded();
        SendQueue { tx, rx }
    }

    /// A producer handle for worker threads.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle { tx: self.tx.clone() }
    }

    /// Timed blocking dequeue plus batch drain: wait up to `timeout` for
    /// the first action, then take everything else that is already queued
    /// without waiting again.
    pub fn wait_and_drain(&self, timeout: Duration) -> Vec<Action> {
        match self.rx.recv_timeout(timeout) {
            Ok(first) => {
                let mut batch = vec![first];
                batch.extend(self.rx.try_iter());
                batch
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Vec::new(),
        }
    }

    /// Non-blocking drain of whatever is queued right now.
    pub fn try_drain(&self) -> Vec<Action> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle held by workers. Cheap to clone; enqueueing never
/// blocks.
#[derive(Clone)]
pub struct QueueHandle {
    tx: Sender<Action>,
}

impl QueueHandle {
    pub fn enqueue(&self, action: Action) -> Result<()> {
        self.tx.send(action).map_err(|_| CoreError::QueueClosed)
    }

    /// HTTP worker path: response header bytes plus a body.
    pub fn enqueue_send(&self, id: ConnectionId, header: Vec<u8>, body: Body) -> Result<()> {
        self.enqueue(Action::Send {
            id,
            buf: SendBuffer::with_body(header, body),
        })
    }

    /// WebSocket worker path: raw, already-framed bytes.
    pub fn enqueue_send_raw(&self, id: ConnectionId, bytes: Vec<u8>) -> Result<()> {
        self.enqueue(Action::Send {
            id,
            buf: SendBuffer::from_bytes(bytes),
        })
    }

    pub fn enqueue_send_buffer(&self, id: ConnectionId, buf: SendBuffer) -> Result<()> {
        self.enqueue(Action::Send { id, buf })
    }

    pub fn enqueue_disconnect(&self, id: ConnectionId) -> Result<()> {
        self.enqueue(Action::Disconnect { id })
    }

    pub fn enqueue_upgrade(&self, id: ConnectionId, request: RequestHead) -> Result<()> {
        self.enqueue(Action::UpgradeToWebSocket { id, request })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_empty() {
        let q = SendQueue::new();
        let batch = q.wait_and_drain(Duration::from_millis(5));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_drain() {
        let q = SendQueue::new();
        let h = q.handle();
        for i in 1..=5u64 {
            h.enqueue_disconnect(ConnectionId::new(i)).unwrap();
        }
        let batch = q.wait_and_drain(Duration::from_millis(100));
        assert_eq!(batch.len(), 5);
    }

    #[test]
    fn test_per_connection_fifo_across_producers() {
        let q = SendQueue::new();

        // Several worker threads, each hammering its own connection id
        // with numbered sends. Whatever the interleaving, per-connection
        // order must survive the drain.
        let mut joins = Vec::new();
        for conn in 1..=4u64 {
            let h = q.handle();
            joins.push(thread::spawn(move || {
                for seq in 0..100u64 {
                    h.enqueue_send_raw(ConnectionId::new(conn), seq.to_be_bytes().to_vec())
                        .unwrap();
                }
            }));
        }
        for j in joins {
            j.join().unwrap();
        }

        let mut last_seen: std::collections::HashMap<u64, u64> = Default::default();
        let mut total = 0;
        for action in q.try_drain() {
            if let Action::Send { id, mut buf } = action {
                let chunk = buf.next_chunk().unwrap();
                let seq = u64::from_be_bytes(chunk.try_into().unwrap());
                if let Some(prev) = last_seen.insert(id.as_u64(), seq) {
                    assert!(seq > prev, "per-connection order violated on {}", id);
                }
                total += 1;
            }
        }
        assert_eq!(total, 400);
    }

    #[test]
    fn test_enqueue_after_reactor_gone() {
        let q = SendQueue::new();
        let h = q.handle();
        drop(q);
        assert!(matches!(
            h.enqueue_disconnect(ConnectionId::new(1)),
            Err(CoreError::QueueClosed)
        ));
    }
}
