//! Drop-oldest ring buffer carrying sampled frames from capture to analysis

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::capture::Frame;

/// Bounded queue where the producer never waits: a full queue evicts its
/// oldest entry, so it always holds the most recent `capacity` samples.
pub struct SampledQueue {
    ring: Mutex<HeapRb<Frame>>,
    available: Condvar,
    capacity: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    offered: AtomicUsize,
    taken: AtomicUsize,
    dropped: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub offered: usize,
    pub taken: usize,
    pub dropped: usize,
}

impl SampledQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            available: Condvar::new(),
            capacity,
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn ring(&self) -> MutexGuard<'_, HeapRb<Frame>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: insert a sample, returning the evicted oldest entry if full
    pub fn offer(&self, frame: Frame) -> Option<Frame> {
        let evicted = self.ring().push_overwrite(frame);
        self.available.notify_one();

        self.stats.offered.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Consumer: oldest retained sample, waiting up to `timeout` for one
    pub fn take(&self, timeout: Duration) -> Option<Frame> {
        let (mut ring, _) = self
            .available
            .wait_timeout_while(self.ring(), timeout, |ring| ring.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let frame = ring.try_pop()?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Drop every retained sample, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut ring = self.ring();
        std::iter::from_fn(|| ring.try_pop()).count()
    }

    pub fn len(&self) -> usize {
        self.ring().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            offered: self.stats.offered.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::PixelFormat;

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, 1, 1, PixelFormat::Rgb24, vec![0u8; 3]).unwrap()
    }

    #[test]
    fn never_exceeds_capacity_and_keeps_newest() {
        let queue = SampledQueue::new(2);
        for seq in 0..5 {
            queue.offer(frame(seq));
            assert!(queue.len() <= 2);
        }

        assert_eq!(queue.take(Duration::ZERO).map(|f| f.sequence()), Some(3));
        assert_eq!(queue.take(Duration::ZERO).map(|f| f.sequence()), Some(4));
        assert!(queue.take(Duration::ZERO).is_none());
        assert_eq!(
            queue.stats(),
            QueueStats {
                offered: 5,
                taken: 2,
                dropped: 3
            }
        );
    }

    #[test]
    fn offer_reports_the_evicted_frame() {
        let queue = SampledQueue::new(2);
        assert!(queue.offer(frame(0)).is_none());
        assert!(queue.offer(frame(1)).is_none());
        assert_eq!(queue.offer(frame(2)).map(|f| f.sequence()), Some(0));
    }

    #[test]
    fn take_times_out_when_empty() {
        let queue = SampledQueue::new(2);
        let started = Instant::now();
        assert!(queue.take(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn take_wakes_when_a_frame_arrives() {
        let queue = Arc::new(SampledQueue::new(2));
        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.offer(frame(9));
        });

        let taken = queue.take(Duration::from_secs(5));
        assert_eq!(taken.map(|f| f.sequence()), Some(9));
        handle.join().unwrap();
    }

    #[test]
    fn clear_drains_everything() {
        let queue = SampledQueue::new(2);
        queue.offer(frame(0));
        queue.offer(frame(1));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(SampledQueue::new(0).capacity(), 1);
    }
}
