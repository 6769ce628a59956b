//! Bounded frame queue with predicate-based, timeout-aware waiting.
//!
//! Producers push frames in arrival order. Each waiter scans the queue for the
//! first frame matching its predicate and removes only that frame, so parallel
//! waiters looking for different frames never consume each other's traffic.
//!
//! The queue holds at most [`MAX_QUEUE_DEPTH`] frames (configurable per queue).
//! Pushing onto a full queue evicts the oldest frame, which bounds memory when
//! nobody is waiting for the traffic.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

/// Default upper bound on queued frames per queue.
pub const MAX_QUEUE_DEPTH: usize = 1024;

/// Errors returned by the wait operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// Nothing matching arrived before the deadline
    #[error("timed out after {waited:?} waiting on {queue}")]
    Timeout {
        /// Queue name
        queue: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// The queue was closed while waiting
    #[error("queue {0} is closed")]
    Closed(String),

    /// A frame arrived but it was not the expected one
    #[error("unexpected frame on {queue}: {frame}")]
    Unexpected {
        /// Queue name
        queue: String,
        /// Description of the frame that arrived instead
        frame: String,
    },
}

struct QueueState<T> {
    frames: VecDeque<T>,
    closed: bool,
    evicted: u64,
}

/// Bounded, ordered frame queue shared between one producer and many waiters.
pub struct FrameQueue<T> {
    name: String,
    depth: usize,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> FrameQueue<T> {
    /// Creates a queue bounded at [`MAX_QUEUE_DEPTH`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_depth(name, MAX_QUEUE_DEPTH)
    }

    /// Creates a queue bounded at `depth` frames (at least one).
    pub fn with_depth(name: impl Into<String>, depth: usize) -> Self {
        Self {
            name: name.into(),
            depth: depth.max(1),
            state: Mutex::new(QueueState {
                frames: VecDeque::new(),
                closed: false,
                evicted: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue name, used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of frames held.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Appends a frame and wakes every waiter. Frames pushed after `close` are dropped.
    pub fn push(&self, frame: T) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if state.frames.len() >= self.depth {
                state.frames.pop_front();
                state.evicted += 1;
                warn!(
                    queue = %self.name,
                    depth = self.depth,
                    evicted = state.evicted,
                    "Frame queue full, evicting oldest frame"
                );
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_waiters();
    }

    /// Closes the queue. Pending and future waits return [`WaitError::Closed`]
    /// once no queued frame satisfies them.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Number of frames dropped because the queue was full.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    /// Removes all queued frames.
    pub fn clear(&self) {
        self.lock().frames.clear();
    }

    /// Waits for the first frame (in arrival order) satisfying `predicate`
    /// and removes it from the queue.
    pub async fn wait_for<F>(&self, mut predicate: F, timeout: Duration) -> Result<T, WaitError>
    where
        F: FnMut(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before scanning so a push between scan and await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(pos) = state.frames.iter().position(&mut predicate) {
                    if let Some(frame) = state.frames.remove(pos) {
                        return Ok(frame);
                    }
                }
                if state.closed {
                    return Err(WaitError::Closed(self.name.clone()));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(WaitError::Timeout {
                    queue: self.name.clone(),
                    waited: timeout,
                });
            }
        }
    }

    /// Waits for the oldest frame, whatever it is.
    pub async fn wait_for_next_frame(&self, timeout: Duration) -> Result<T, WaitError> {
        self.wait_for(|_| true, timeout).await
    }

    /// Removes a matching frame if one is already queued.
    pub fn try_take<F>(&self, predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut state = self.lock();
        let pos = state.frames.iter().position(predicate)?;
        state.frames.remove(pos)
    }
}

impl<T: fmt::Debug> FrameQueue<T> {
    /// Takes the next frame and checks it against `predicate`.
    ///
    /// Separates "nothing arrived" ([`WaitError::Timeout`]) from "the wrong
    /// thing arrived" ([`WaitError::Unexpected`]); the wrong frame is consumed.
    pub async fn expect_next<F>(&self, predicate: F, timeout: Duration) -> Result<T, WaitError>
    where
        F: FnOnce(&T) -> bool,
    {
        let frame = self.wait_for_next_frame(timeout).await?;
        if predicate(&frame) {
            Ok(frame)
        } else {
            Err(WaitError::Unexpected {
                queue: self.name.clone(),
                frame: format!("{frame:?}"),
            })
        }
    }
}

impl<T> fmt::Debug for FrameQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("len", &self.len())
            .finish()
    }
}
