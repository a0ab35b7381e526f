//! Bounded frame queue
//!
//! Fixed-capacity circular buffer of frames between a socket reader and the
//! frame processing loop. Enqueue never waits: a full queue rejects the frame
//! so the producer can push back explicitly. Dequeue waits until a frame is
//! available, and a producer that must get a frame in can wait for space.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::protocol::WireFrame;

/// Returned by [`BoundedFrameQueue::enqueue`] when the queue is at capacity.
/// Hands the rejected frame back to the caller.
#[derive(Debug, Error)]
#[error("frame queue full")]
pub struct QueueFull(pub WireFrame);

struct Ring {
    slots: Vec<Option<WireFrame>>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
}

/// Thread-safe fixed-capacity FIFO of frames
pub struct BoundedFrameQueue {
    ring: Mutex<Ring>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

impl BoundedFrameQueue {
    /// Create a queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    /// Append a frame, failing immediately if the queue is full or closed
    pub fn enqueue(&self, frame: WireFrame) -> Result<(), QueueFull> {
        {
            let mut ring = self.ring.lock();
            if ring.closed || ring.count == self.capacity {
                return Err(QueueFull(frame));
            }
            let tail = ring.tail;
            ring.slots[tail] = Some(frame);
            ring.tail = (tail + 1) % self.capacity;
            ring.count += 1;
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest frame without waiting
    pub fn try_dequeue(&self) -> Option<WireFrame> {
        let frame = {
            let mut ring = self.ring.lock();
            if ring.count == 0 {
                return None;
            }
            let head = ring.head;
            let frame = ring.slots[head].take();
            ring.head = (head + 1) % self.capacity;
            ring.count -= 1;
            frame
        };
        self.not_full.notify_one();
        frame
    }

    /// Wait for the oldest frame.
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub async fn dequeue(&self) -> Option<WireFrame> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            // register before checking so an enqueue in between is not missed
            notified.as_mut().enable();

            if let Some(frame) = self.try_dequeue() {
                return Some(frame);
            }
            if self.ring.lock().closed {
                return None;
            }

            notified.await;
        }
    }

    /// Wait until a slot is free or the queue is closed
    pub async fn wait_for_space(&self) {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let ring = self.ring.lock();
                if ring.closed || ring.count < self.capacity {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting frames and wake every waiting consumer and producer
    pub fn close(&self) {
        self.ring.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
