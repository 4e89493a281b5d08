//! Sharded key-value store mapping document keys to stored payloads.
//!
//! Writes go through per-shard [`HashTableShardBuilder`]s; reads binary
//! search the sorted `.pos` index of a shard and slice the `.data` blob.

pub mod builder;

pub use builder::{HashTablePaths, HashTableShardBuilder};

use crate::error::Result;
use crate::index::format::PosIndex;
use crate::index::merger::{Callback, MemoryCounter};
use crate::index::types::{IndexConfig, ShardId};
use crate::utils::shard_for;
use log::warn;
use memmap2::Mmap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io;
use std::sync::{Arc, OnceLock};

struct ShardData {
    pos: PosIndex,
    data: Option<Mmap>,
}

/// Read-only view of one sorted key-value shard
pub struct HashTableShard {
    shard_id: ShardId,
    paths: HashTablePaths,
    loaded: OnceLock<Option<ShardData>>,
}

impl HashTableShard {
    pub fn new(config: &IndexConfig, db_name: &str, shard_id: ShardId) -> Self {
        Self {
            shard_id,
            paths: HashTablePaths::new(config, db_name, shard_id),
            loaded: OnceLock::new(),
        }
    }

    fn load(&self) -> Option<&ShardData> {
        self.loaded
            .get_or_init(|| match self.open() {
                Ok(data) => data,
                Err(e) => {
                    warn!("kv shard {}: cannot open: {}", self.shard_id, e);
                    None
                }
            })
            .as_ref()
    }

    fn open(&self) -> io::Result<Option<ShardData>> {
        let buf = match fs::read(self.paths.pos()) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(pos) = PosIndex::decode(&buf) else {
            warn!("kv shard {}: inconsistent position index", self.shard_id);
            return Ok(None);
        };

        let file = File::open(self.paths.data())?;
        let data = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: the data file is replaced by rename, never written in place
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Some(ShardData { pos, data }))
    }

    /// Payload stored under `key`
    pub fn find(&self, key: u64) -> Option<Vec<u8>> {
        let shard = self.load()?;
        let (offset, len) = shard.pos.lookup(key)?;
        let data: &[u8] = shard.data.as_deref().unwrap_or(&[]);

        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        match data.get(start..end) {
            Some(bytes) => Some(bytes.to_vec()),
            None => {
                warn!("kv shard {}: payload of key {} past end of blob", self.shard_id, key);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.load().map(|s| s.pos.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The sharded key-value store
pub struct HashTable {
    config: IndexConfig,
    db_name: String,
    shards: Vec<HashTableShard>,
    builders: Arc<Vec<Mutex<HashTableShardBuilder>>>,
}

impl HashTable {
    pub fn new(config: &IndexConfig, db_name: &str) -> Self {
        Self::with_memory(config, db_name, MemoryCounter::default())
    }

    /// Store whose builders report cache size to `memory`
    pub fn with_memory(config: &IndexConfig, db_name: &str, memory: MemoryCounter) -> Self {
        let builders = (0..config.ht_num_shards)
            .map(|i| {
                Mutex::new(HashTableShardBuilder::new(config, db_name, i).with_memory(memory.clone()))
            })
            .collect();
        Self {
            config: config.clone(),
            db_name: db_name.to_string(),
            shards: Self::open_shards(config, db_name),
            builders: Arc::new(builders),
        }
    }

    fn open_shards(config: &IndexConfig, db_name: &str) -> Vec<HashTableShard> {
        (0..config.ht_num_shards)
            .map(|i| HashTableShard::new(config, db_name, i))
            .collect()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Number of keys in the sorted shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_of(&self, key: u64) -> ShardId {
        shard_for(key, self.shards.len())
    }

    /// Buffer a payload; flushes the shard's cache when it is full
    pub fn add(&self, key: u64, payload: &[u8]) -> Result<()> {
        let mut builder = self.builders[self.shard_of(key)].lock();
        builder.add(key, payload);
        if builder.full() {
            builder.write()?;
        }
        Ok(())
    }

    pub fn find(&self, key: u64) -> Option<Vec<u8>> {
        self.shards[self.shard_of(key)].find(key)
    }

    /// Payload of `key` as UTF-8, lossily decoded
    pub fn find_str(&self, key: u64) -> Option<String> {
        self.find(key)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Flush every shard cache to its fragment log
    pub fn write(&self) -> Result<()> {
        self.builders.par_iter().try_for_each(|b| b.lock().write())
    }

    /// Sort every shard and reopen the readers
    pub fn sort(&mut self) -> Result<()> {
        self.builders.par_iter().try_for_each(|b| b.lock().sort())?;
        self.reload();
        Ok(())
    }

    pub fn optimize(&mut self) -> Result<()> {
        self.builders.par_iter().try_for_each(|b| b.lock().optimize())?;
        self.reload();
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        for builder in self.builders.iter() {
            builder.lock().truncate()?;
        }
        self.reload();
        Ok(())
    }

    /// Drop mapped shards so the next lookup sees the files on disk
    pub fn reload(&mut self) {
        self.shards = Self::open_shards(&self.config, &self.db_name);
    }

    /// Appender and merger callbacks for the merge scheduler
    pub fn scheduler_callbacks(&self) -> (Callback, Callback) {
        let appender = Arc::clone(&self.builders);
        let sorter = Arc::clone(&self.builders);
        (
            Arc::new(move || appender.iter().try_for_each(|b| b.lock().write())),
            Arc::new(move || sorter.iter().try_for_each(|b| b.lock().sort())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> IndexConfig {
        IndexConfig {
            ht_num_shards: 4,
            ..IndexConfig::with_data_dir(dir)
        }
    }

    #[test]
    fn test_add_sort_find() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = HashTable::new(&config(dir.path()), "test");

        for key in 0..20u64 {
            table.add(key, format!("payload {}", key).as_bytes()).unwrap();
        }
        table.sort().unwrap();

        for key in 0..20u64 {
            assert_eq!(table.find_str(key).unwrap(), format!("payload {}", key));
        }
        assert!(table.find(20).is_none());
    }

    #[test]
    fn test_missing_store_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let table = HashTable::new(&config(dir.path()), "missing");
        assert!(table.find(1).is_none());
        assert!(table.shards.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn test_scheduler_callbacks_flush_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = HashTable::new(&config(dir.path()), "test");
        table.add(7, b"seven").unwrap();

        let (append, merge) = table.scheduler_callbacks();
        append().unwrap();
        merge().unwrap();
        table.reload();
        assert_eq!(table.find_str(7).unwrap(), "seven");
    }

    #[test]
    fn test_corrupt_pos_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut table = HashTable::new(&config, "test");
        table.add(1, b"one").unwrap();
        table.sort().unwrap();

        let paths = HashTablePaths::new(&config, "test", shard_for(1, 4));
        fs::write(paths.pos(), [1u8, 2, 3]).unwrap();
        table.reload();
        assert!(table.find(1).is_none());
    }
}
