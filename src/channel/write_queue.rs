//! Outbound write queue with watermark-based backpressure
//!
//! Encoded frames wait here until the socket accepts them. The queue
//! tracks its byte total against a pair of watermarks:
//!
//! ```text
//!   queued bytes
//!        │
//!   high ┼────────────  cross upward  → writable goes false
//!        │
//!    low ┼────────────  cross downward → writable goes true
//!        │
//!        0
//! ```
//!
//! The gap between the two marks is deliberate hysteresis: a queue
//! hovering around a single threshold would flap the writability signal
//! on every frame. State only changes when the total rises above `high`
//! or drains back to `low`, so each transition is reported exactly once.

use bytes::{Buf, Bytes};
use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct WriteQueue {
    segments: VecDeque<Bytes>,
    queued_bytes: usize,
    high_watermark: usize,
    low_watermark: usize,
    writable: bool,
}

impl WriteQueue {
    pub(crate) fn new(high_watermark: usize, low_watermark: usize) -> Self {
        debug_assert!(low_watermark <= high_watermark);
        Self {
            segments: VecDeque::new(),
            queued_bytes: 0,
            high_watermark,
            low_watermark: low_watermark.min(high_watermark),
            writable: true,
        }
    }

    /// Enqueues a frame. Returns `Some(false)` if this push crossed the
    /// high watermark and the channel just became unwritable.
    pub(crate) fn push(&mut self, data: Bytes) -> Option<bool> {
        if data.is_empty() {
            return None;
        }
        self.queued_bytes += data.len();
        self.segments.push_back(data);

        if self.writable && self.queued_bytes > self.high_watermark {
            self.writable = false;
            return Some(false);
        }
        None
    }

    /// The frame the socket should write next.
    pub(crate) fn front(&self) -> Option<&Bytes> {
        self.segments.front()
    }

    /// Records `written` bytes as flushed, starting at the queue front.
    /// Returns `Some(true)` if the drain crossed the low watermark and
    /// the channel just became writable again.
    pub(crate) fn advance(&mut self, written: usize) -> Option<bool> {
        debug_assert!(written <= self.queued_bytes);
        let mut left = written.min(self.queued_bytes);
        self.queued_bytes -= left;

        while left > 0 {
            let front_len = match self.segments.front() {
                Some(front) => front.len(),
                None => break,
            };
            if front_len <= left {
                self.segments.pop_front();
                left -= front_len;
            } else {
                if let Some(front) = self.segments.front_mut() {
                    front.advance(left);
                }
                left = 0;
            }
        }

        if !self.writable && self.queued_bytes <= self.low_watermark {
            self.writable = true;
            return Some(true);
        }
        None
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub(crate) fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }
}
