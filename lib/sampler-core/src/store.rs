use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::id::TraceId;
use crate::record::TraceRecord;

/// Concurrent trace-id to trace-record mapping, plus a FIFO of ids used to
/// evict the oldest live record once `num_traces` is exceeded.
///
/// `dashmap::DashMap` gives the "many readers, many writers" concurrent map
/// without a single global lock; the eviction FIFO is a bounded
/// `tokio::sync::mpsc` channel carrying ids in the order they were first
/// seen.
pub struct TraceStore {
    records: DashMap<TraceId, Arc<TraceRecord>, ahash::RandomState>,
    live_count: AtomicUsize,
    num_traces: usize,
    eviction_tx: mpsc::Sender<TraceId>,
    eviction_rx: tokio::sync::Mutex<mpsc::Receiver<TraceId>>,
    decided: DashMap<TraceId, Arc<TraceRecord>, ahash::RandomState>,
    decided_eviction_tx: mpsc::Sender<TraceId>,
    decided_eviction_rx: tokio::sync::Mutex<mpsc::Receiver<TraceId>>,
}

impl TraceStore {
    pub fn new(num_traces: usize) -> Self {
        let (eviction_tx, eviction_rx) = mpsc::channel(num_traces.max(1));
        let (decided_eviction_tx, decided_eviction_rx) = mpsc::channel(num_traces.max(1));
        Self {
            records: DashMap::with_hasher(ahash::RandomState::new()),
            live_count: AtomicUsize::new(0),
            num_traces,
            eviction_tx,
            eviction_rx: tokio::sync::Mutex::new(eviction_rx),
            decided: DashMap::with_hasher(ahash::RandomState::new()),
            decided_eviction_tx,
            decided_eviction_rx: tokio::sync::Mutex::new(decided_eviction_rx),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live_count.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.num_traces
    }

    /// Looks up an existing record, or creates one with `num_policies`
    /// per-policy decision slots. The second element of the tuple reports
    /// whether the record was newly created, so the caller can enqueue the
    /// id into the batcher and the eviction FIFO only once.
    pub async fn load_or_create(
        &self,
        id: TraceId,
        num_policies: usize,
    ) -> (Arc<TraceRecord>, bool) {
        if let Some(existing) = self.records.get(&id) {
            return (existing.clone(), false);
        }

        let record = Arc::new(TraceRecord::new(Instant::now(), num_policies));
        match self.records.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                self.live_count.fetch_add(1, Ordering::Relaxed);
                self.admit_to_eviction_fifo(id).await;
                (record, true)
            }
        }
    }

    pub fn load(&self, id: &TraceId) -> Option<Arc<TraceRecord>> {
        self.records.get(id).map(|entry| entry.clone())
    }

    /// Removes a trace record, decrementing the live counter. Used by both
    /// eviction and post-decision cleanup.
    pub fn delete(&self, id: &TraceId) -> Option<Arc<TraceRecord>> {
        let removed = self.records.remove(id).map(|(_, record)| record);
        if removed.is_some() {
            self.live_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Pushes a newly-created id onto the eviction FIFO. If the FIFO is
    /// full, synchronously drains and drops the oldest live record first —
    /// bounded work, the only blocking path on ingest.
    async fn admit_to_eviction_fifo(&self, id: TraceId) {
        if let Err(mpsc::error::TrySendError::Full(id)) = self.eviction_tx.try_send(id) {
            self.evict_oldest().await;
            // best-effort: if the channel is still full (a concurrent
            // evictor beat us to it) we simply drop the id from the FIFO;
            // the record itself remains reachable until the next overflow.
            let _ = self.eviction_tx.try_send(id);
        }
    }

    async fn evict_oldest(&self) {
        let mut rx = self.eviction_rx.lock().await;
        if let Ok(oldest_id) = rx.try_recv() {
            drop(rx);
            self.drop_trace(&oldest_id);
        }
    }

    /// Evicts a trace ahead of its decision.
    pub fn drop_trace(&self, id: &TraceId) {
        if let Some(record) = self.delete(id) {
            let age = record.arrival_time.elapsed();
            debug!(trace_id = %id, age_secs = age.as_secs_f64(), "evicted trace before decision");
        } else {
            warn!(trace_id = %id, "attempted to evict a trace that was already gone");
        }
    }

    /// Moves a just-decided record out of the live map (so it no longer
    /// counts toward `live_count`/`num_traces`) and into a bounded
    /// late-arrival cache, so a span arriving for this id after the decision
    /// loop has already emitted still finds its fixed decision instead of
    /// starting a brand-new pending trace.
    pub fn move_to_decided(&self, id: &TraceId, record: Arc<TraceRecord>) {
        self.delete(id);
        if let Err(mpsc::error::TrySendError::Full(oldest_id)) =
            self.decided_eviction_tx.try_send(*id)
        {
            let mut rx = self.decided_eviction_rx.try_lock();
            if let Ok(rx) = &mut rx {
                if let Ok(to_drop) = rx.try_recv() {
                    self.decided.remove(&to_drop);
                }
            }
            let _ = self.decided_eviction_tx.try_send(oldest_id);
        }
        self.decided.insert(*id, record);
    }

    /// Looks up a trace whose decision has already been rendered, for the
    /// ingest path's late-arrival handling.
    pub fn load_decided(&self, id: &TraceId) -> Option<Arc<TraceRecord>> {
        self.decided.get(id).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_or_create_reuses_existing_record() {
        let store = TraceStore::new(10);
        let id = TraceId::from_bytes(&[1u8; 16]).0;
        let (record_a, was_new_a) = store.load_or_create(id, 1).await;
        let (record_b, was_new_b) = store.load_or_create(id, 1).await;
        assert!(was_new_a);
        assert!(!was_new_b);
        assert!(Arc::ptr_eq(&record_a, &record_b));
        assert_eq!(store.live_count(), 1);
    }

    #[tokio::test]
    async fn eviction_is_fifo_under_num_traces_pressure() {
        let store = TraceStore::new(2);
        let t1 = TraceId::from_bytes(&[1u8; 16]).0;
        let t2 = TraceId::from_bytes(&[2u8; 16]).0;
        let t3 = TraceId::from_bytes(&[3u8; 16]).0;

        store.load_or_create(t1, 1).await;
        store.load_or_create(t2, 1).await;
        store.load_or_create(t3, 1).await;

        assert!(store.load(&t1).is_none(), "oldest id should be evicted");
        assert!(store.load(&t2).is_some());
        assert!(store.load(&t3).is_some());
        assert_eq!(store.live_count(), 2);
    }

    #[tokio::test]
    async fn decided_records_are_reachable_after_leaving_the_live_map() {
        let store = TraceStore::new(10);
        let id = TraceId::from_bytes(&[9u8; 16]).0;
        let (record, _) = store.load_or_create(id, 1).await;

        store.move_to_decided(&id, record.clone());

        assert!(store.load(&id).is_none());
        assert_eq!(store.live_count(), 0);
        assert!(Arc::ptr_eq(&store.load_decided(&id).unwrap(), &record));
    }
}
