use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Accumulates messages until either the size limit is hit or the oldest
/// buffered message has waited `batch_timeout`.
pub struct BatchBuffer<E> {
    pub(super) max_batch_size: usize,
    pub(super) batch_timeout: Duration,
    pub(super) buffer: VecDeque<E>,
    pub(super) oldest: Option<Instant>,
}

impl<E> BatchBuffer<E> {
    pub fn new(
        max_batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            batch_timeout,
            buffer: VecDeque::with_capacity(max_batch_size),
            oldest: None,
        }
    }

    /// Returns the buffered length once it reaches the batch size.
    pub fn push(
        &mut self,
        item: E,
    ) -> Option<usize> {
        if self.buffer.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.buffer.push_back(item);
        trace!(
            "BatchBuffer::push, self.max_batch_size={}, self.buffer.len()={}",
            self.max_batch_size,
            self.buffer.len()
        );
        if self.buffer.len() >= self.max_batch_size {
            Some(self.buffer.len())
        } else {
            None
        }
    }

    /// When the current partial batch must be flushed; `None` while empty.
    pub fn deadline(&self) -> Option<Instant> {
        self.oldest.map(|t| t + self.batch_timeout)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn take(&mut self) -> Vec<E> {
        self.oldest = None;
        std::mem::take(&mut self.buffer).into()
    }
}
