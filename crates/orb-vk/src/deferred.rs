//! Deferred buffer deletion for frames in flight.
//!
//! Buffers replaced while earlier frames may still read them are parked here
//! and freed once every frame that could reference them has completed.

use crate::error::Result;
use crate::memory::{GpuAllocator, GpuBuffer};
use std::collections::VecDeque;

/// Items tagged with the frame that retired them, in queue order.
struct RetireQueue<T> {
    pending: VecDeque<(T, u64)>,
    frames_in_flight: usize,
}

impl<T> RetireQueue<T> {
    fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    fn push(&mut self, item: T, frame_number: u64) {
        self.pending.push_back((item, frame_number));
    }

    /// Items queued before this frame number are safe to free.
    fn ready_before(&self, current_frame_number: u64) -> u64 {
        current_frame_number.saturating_sub(self.frames_in_flight as u64)
    }

    /// Pop the oldest item if no in-flight frame can still use it.
    fn pop_ready(&mut self, current_frame_number: u64) -> Option<T> {
        let cutoff = self.ready_before(current_frame_number);

        // Frame numbers are non-decreasing, so only the front can be ready
        match self.pending.front() {
            Some(&(_, frame_queued)) if frame_queued < cutoff => {
                self.pending.pop_front().map(|(item, _)| item)
            }
            _ => None,
        }
    }

    fn pop_any(&mut self) -> Option<T> {
        self.pending.pop_front().map(|(item, _)| item)
    }
}

/// Queue of buffers awaiting deletion.
pub struct DeferredDeletionQueue {
    retired: RetireQueue<GpuBuffer>,
}

impl DeferredDeletionQueue {
    /// Buffers are kept for `frames_in_flight` frames after being queued.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            retired: RetireQueue::new(frames_in_flight),
        }
    }

    /// Retire a buffer during frame `frame_number`.
    pub fn queue(&mut self, buffer: GpuBuffer, frame_number: u64) {
        self.retired.push(buffer, frame_number);
    }

    /// Free buffers no in-flight frame can still use.
    ///
    /// Call once per frame after waiting on the frame's fence.
    pub fn process(
        &mut self,
        allocator: &mut GpuAllocator,
        current_frame_number: u64,
    ) -> Result<()> {
        while let Some(mut buffer) = self.retired.pop_ready(current_frame_number) {
            allocator.free_buffer(&mut buffer)?;
        }
        Ok(())
    }

    /// Free everything immediately.
    ///
    /// Only valid once the device is idle.
    pub fn flush(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        while let Some(mut buffer) = self.retired.pop_any() {
            allocator.free_buffer(&mut buffer)?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.retired.pending.len()
    }

    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.retired.frames_in_flight = frames_in_flight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_ready(queue: &mut RetireQueue<&'static str>, frame: u64) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.pop_ready(frame)).collect()
    }

    #[test]
    fn cutoff_waits_for_frames_in_flight() {
        let queue = RetireQueue::<()>::new(2);
        assert_eq!(queue.ready_before(0), 0);
        assert_eq!(queue.ready_before(1), 0);
        assert_eq!(queue.ready_before(5), 3);
    }

    #[test]
    fn items_free_in_queue_order_after_frames_in_flight() {
        let mut queue = RetireQueue::new(2);
        queue.push("a", 0);
        queue.push("b", 0);
        queue.push("c", 1);
        queue.push("d", 3);

        assert!(drain_ready(&mut queue, 1).is_empty());
        assert!(drain_ready(&mut queue, 2).is_empty());
        assert_eq!(drain_ready(&mut queue, 3), vec!["a", "b"]);
        assert_eq!(drain_ready(&mut queue, 4), vec!["c"]);
        assert_eq!(queue.pending.len(), 1);
        assert_eq!(drain_ready(&mut queue, 6), vec!["d"]);
        assert!(queue.pending.is_empty());
    }

    #[test]
    fn flush_takes_everything() {
        let mut queue = RetireQueue::new(3);
        queue.push(1, 10);
        queue.push(2, 11);
        assert_eq!(queue.pop_ready(11), None);
        assert_eq!(queue.pop_any(), Some(1));
        assert_eq!(queue.pop_any(), Some(2));
        assert_eq!(queue.pop_any(), None);
    }

    #[test]
    fn starts_empty() {
        let mut queue = DeferredDeletionQueue::new(3);
        assert_eq!(queue.pending_count(), 0);
        queue.set_frames_in_flight(1);
        assert_eq!(queue.retired.ready_before(4), 3);
    }
}
