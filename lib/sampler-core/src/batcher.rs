use std::collections::VecDeque;
use std::sync::Mutex;

use crate::id::TraceId;

/// Rolling queue of per-second batches of trace ids awaiting a decision.
///
/// Conceptually `N = ceil(decision_wait_seconds)` closed buckets plus one
/// in-progress bucket. `add_to_current` is called from many
/// concurrent ingest callers; `close_current_and_take_first` is called
/// exactly once per tick by the single decision loop, so the ring itself
/// only needs to serialize against `add_to_current`, never against itself.
pub struct IdBatcher {
    current: Mutex<Vec<TraceId>>,
    closed: Mutex<VecDeque<Vec<TraceId>>>,
    depth: usize,
}

impl IdBatcher {
    /// `depth` is `N`, the number of closed buckets kept in flight before a
    /// batch becomes due — i.e. `ceil(decision_wait_seconds)`. `current` is
    /// the in-progress bucket on top of those `N - 1` closed ones, so a
    /// freshly-created batcher has exactly `depth` rotations of lead time
    /// before an id added to `current` becomes due.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        let mut closed = VecDeque::with_capacity(depth);
        for _ in 0..depth - 1 {
            closed.push_back(Vec::new());
        }
        Self {
            current: Mutex::new(Vec::new()),
            closed: Mutex::new(closed),
            depth,
        }
    }

    pub fn add_to_current(&self, id: TraceId) {
        self.current.lock().unwrap().push(id);
    }

    /// Closes the in-progress bucket, rotates it to the back of the ring,
    /// and returns the oldest bucket that just became due.
    pub fn close_current_and_take_first(&self) -> Vec<TraceId> {
        let finished = std::mem::take(&mut *self.current.lock().unwrap());
        let mut closed = self.closed.lock().unwrap();
        closed.push_back(finished);
        closed.pop_front().unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_trace_is_due_after_depth_ticks() {
        let batcher = IdBatcher::new(3);
        let id = TraceId::from_bytes(&[9u8; 16]).0;
        batcher.add_to_current(id);

        assert!(batcher.close_current_and_take_first().is_empty());
        assert!(batcher.close_current_and_take_first().is_empty());
        let due = batcher.close_current_and_take_first();
        assert_eq!(due, vec![id]);
    }

    #[test]
    fn ring_depth_stays_constant() {
        let batcher = IdBatcher::new(2);
        for _ in 0..10 {
            batcher.close_current_and_take_first();
        }
        // `closed` rests at depth - 1 buckets between calls; the Nth slot of
        // lead time is `current`, so closed.len() + 1 == depth always holds.
        assert_eq!(batcher.closed.lock().unwrap().len(), 1);
    }

    #[test]
    fn depth_one_surfaces_an_id_on_the_very_next_tick() {
        let batcher = IdBatcher::new(1);
        let id = TraceId::from_bytes(&[1u8; 16]).0;
        batcher.add_to_current(id);
        assert_eq!(batcher.close_current_and_take_first(), vec![id]);
    }
}
