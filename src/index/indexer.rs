use crate::error::Result;
use crate::index::builder::{FullTextShardBuilder, MergeStats};
use crate::index::document::Document;
use crate::index::merger::{Callback, MemoryCounter, MergeScheduler};
use crate::index::types::{IndexConfig, ShardId};
use crate::utils::{distinct_words, hash_word, shard_for};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One lock per full-text shard, shared by every worker. Held while a
/// builder writes a fragment or merges, never while adding to a cache.
#[derive(Clone)]
pub struct ShardLocks(Arc<Vec<Mutex<()>>>);

impl ShardLocks {
    pub fn new(num_shards: usize) -> Self {
        Self(Arc::new((0..num_shards).map(|_| Mutex::new(())).collect()))
    }

    pub fn lock(&self, shard_id: ShardId) -> parking_lot::MutexGuard<'_, ()> {
        self.0[shard_id].lock()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct WorkerState {
    builders: Vec<FullTextShardBuilder>,
    /// Shards flushed since the last merge
    dirty: BTreeSet<ShardId>,
    merged: MergeStats,
}

impl WorkerState {
    fn flush_shard(&mut self, locks: &ShardLocks, shard_id: ShardId) -> Result<()> {
        let builder = &mut self.builders[shard_id];
        if builder.is_cache_empty() {
            return Ok(());
        }
        let _guard = locks.lock(shard_id);
        builder.write()?;
        self.dirty.insert(shard_id);
        Ok(())
    }

    fn flush(&mut self, locks: &ShardLocks) -> Result<()> {
        for shard_id in 0..self.builders.len() {
            self.flush_shard(locks, shard_id)?;
        }
        Ok(())
    }

    fn merge(&mut self, locks: &ShardLocks) -> Result<()> {
        while let Some(shard_id) = self.dirty.pop_first() {
            let stats = {
                let _guard = locks.lock(shard_id);
                self.builders[shard_id].merge()
            };
            match stats {
                Ok(stats) => self.merged.absorb(&stats),
                Err(e) => {
                    self.dirty.insert(shard_id);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Indexing worker: a private set of shard caches plus the shared shard
/// locks. Each worker thread owns one, so `add_document` only contends
/// with the merge scheduler.
pub struct FullTextIndexer {
    state: Arc<Mutex<WorkerState>>,
    locks: ShardLocks,
    registration: Option<u64>,
}

impl FullTextIndexer {
    pub fn new(config: &IndexConfig, db_name: &str, locks: ShardLocks, memory: MemoryCounter) -> Self {
        let builders = (0..config.ft_num_shards)
            .map(|i| FullTextShardBuilder::new(config, db_name, i).with_memory(memory.clone()))
            .collect();
        Self {
            state: Arc::new(Mutex::new(WorkerState {
                builders,
                dirty: BTreeSet::new(),
                merged: MergeStats::default(),
            })),
            locks,
            registration: None,
        }
    }

    /// Add the words of every field of `doc`, scored by the field weight.
    /// A word found in several fields sums their weights at merge time.
    pub fn add_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.state.lock();
        let num_shards = state.builders.len();
        let mut full = BTreeSet::new();

        for field in &doc.fields {
            for word in distinct_words(&field.text) {
                let key = hash_word(&word);
                let shard_id = shard_for(key, num_shards);
                let builder = &mut state.builders[shard_id];
                builder.add(key, doc.key, field.weight);
                if builder.full() {
                    full.insert(shard_id);
                }
            }
        }

        for shard_id in full {
            state.flush_shard(&self.locks, shard_id)?;
        }
        Ok(())
    }

    /// Write every non-empty cache to a fragment
    pub fn flush(&self) -> Result<()> {
        self.state.lock().flush(&self.locks)
    }

    /// Merge the shards this worker flushed since its last merge
    pub fn merge(&self) -> Result<()> {
        self.state.lock().merge(&self.locks)
    }

    /// Totals of every merge this worker ran
    pub fn merge_stats(&self) -> MergeStats {
        self.state.lock().merged.clone()
    }

    fn callbacks(&self) -> (Callback, Callback) {
        let (append_state, merge_state) = (Arc::clone(&self.state), Arc::clone(&self.state));
        let (append_locks, merge_locks) = (self.locks.clone(), self.locks.clone());
        (
            Arc::new(move || append_state.lock().flush(&append_locks)),
            Arc::new(move || merge_state.lock().merge(&merge_locks)),
        )
    }

    /// Let `scheduler` flush and merge this worker's caches
    pub fn register(&mut self, scheduler: &MergeScheduler) {
        let (append, merge) = self.callbacks();
        self.registration = Some(scheduler.register(append, merge));
    }

    pub fn deregister(&mut self, scheduler: &MergeScheduler) {
        if let Some(id) = self.registration.take() {
            scheduler.deregister(id);
        }
    }
}
