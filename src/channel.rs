//! Unbounded FIFO request queue owned by a background capturer

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Ordered, unbounded queue of pending requests.
///
/// Requests come from user-driven layout events, so there is no capacity
/// limit and `enqueue` never blocks or fails.
pub struct CaptureChannel<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> CaptureChannel<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, request: T) {
        self.queue.lock().push_back(request);
    }

    /// Oldest pending request, if any
    pub fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Take every pending request, oldest first
    pub fn drain(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<T> Default for CaptureChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}
