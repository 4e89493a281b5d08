use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hash of a word or phrase token
pub type TermKey = u64;

/// Opaque document identifier (usually the hash of the document URL)
pub type DocValue = u64;

/// Shard number in `0..num_shards`
pub type ShardId = usize;

/// Directory slot value marking an empty bucket
pub const EMPTY_SLOT: u64 = u64::MAX;

/// Posting entry - a scored reference to a document containing a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub value: DocValue,
    pub score: u32,
}

impl Posting {
    /// Size of an encoded posting in bytes (value u64 + score u32)
    pub const SIZE: usize = 8 + 4;

    pub fn new(value: DocValue, score: u32) -> Self {
        Self { value, score }
    }
}

/// Location of one term's postings inside a shard block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: TermKey,
    /// Offset from the start of the block's data section
    pub data_offset: u64,
    /// Length of the posting list in bytes
    pub data_length: u64,
    /// True population count, may exceed `data_length / Posting::SIZE`
    pub total_num_results: u64,
}

impl KeyEntry {
    pub fn num_postings(&self) -> u64 {
        self.data_length / Posting::SIZE as u64
    }
}

/// Postings returned for one term by a shard lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardWindow {
    /// Materialized postings, ascending by value, capped at the section limit
    pub postings: Vec<Posting>,
    /// Number of postings the term really has
    pub total_num_results: u64,
}

impl ShardWindow {
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// True when the stored list is known to be incomplete
    pub fn is_truncated(&self) -> bool {
        self.total_num_results > self.postings.len() as u64
    }
}

/// Thresholds for the memory-pressure merge scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Fraction of total memory that triggers an append (flush) pass
    pub append_fraction: f64,
    /// Fraction of `merge_multiple * total memory` of flushed bytes that triggers a merge pass
    pub merge_fraction: f64,
    pub merge_multiple: f64,
    /// Control loop polling interval
    pub poll_interval_ms: u64,
    /// Wait after raising the merging flag before running callbacks
    pub settle_ms: u64,
    /// Override for total available memory in bytes (None = physical memory)
    pub total_memory: Option<u64>,
    /// Measure the resident set size of the process instead of the bytes
    /// held by builder caches
    pub process_memory: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            append_fraction: 0.5,
            merge_fraction: 0.5,
            merge_multiple: 5.0,
            poll_interval_ms: 100,
            settle_ms: 1000,
            total_memory: None,
            process_memory: false,
        }
    }
}

/// Configuration for index building and serving
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Mount points; shard `i` lives under `data_dirs[i % data_dirs.len()]`
    pub data_dirs: Vec<PathBuf>,
    /// Number of full-text shards
    pub ft_num_shards: usize,
    /// Number of key-value shards
    pub ht_num_shards: usize,
    /// Number of slots in each shard's directory file
    pub directory_size: u64,
    /// Maximum postings persisted per term (materialized cap)
    pub max_postings_per_term: usize,
    /// Maximum postings returned by one shard read
    pub max_results_per_section: usize,
    /// Buffered postings per full-text builder before it reports full
    pub ft_cache_limit: usize,
    /// Buffered payload bytes per key-value builder before it reports full
    pub ht_cache_limit: usize,
    /// Worker threads for indexing (0 = CPU count)
    pub num_threads_indexing: usize,
    /// Worker threads for merging (0 = CPU count)
    pub num_threads_merging: usize,
    /// TSV columns holding indexable text
    pub text_columns: Vec<usize>,
    /// Score weight per entry of `text_columns`
    pub column_weights: Vec<u32>,
    pub merge: MergeConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dirs: Vec::new(),
            ft_num_shards: 256,
            ht_num_shards: 32,
            directory_size: 16384,
            max_postings_per_term: 1_000_000,
            max_results_per_section: 1_000_000,
            ft_cache_limit: 200_000,
            ht_cache_limit: 16 * 1024 * 1024,
            num_threads_indexing: 0,
            num_threads_merging: 0,
            text_columns: vec![1, 2, 3, 4],
            column_weights: vec![10, 3, 2, 1],
            merge: MergeConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Config rooted at a single data directory
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dirs: vec![dir.into()],
            ..Self::default()
        }
    }

    /// Data directory holding files of `shard_id`
    pub fn mount_point(&self, shard_id: ShardId) -> PathBuf {
        if self.data_dirs.is_empty() {
            return PathBuf::from(".");
        }
        self.data_dirs[shard_id % self.data_dirs.len()].clone()
    }

    /// Effective indexing thread count (resolves 0 to CPU count)
    pub fn indexing_threads(&self) -> usize {
        resolve_threads(self.num_threads_indexing)
    }

    /// Effective merging thread count (resolves 0 to CPU count)
    pub fn merging_threads(&self) -> usize {
        resolve_threads(self.num_threads_merging)
    }

    /// Check invariants the on-disk format relies on
    pub fn validate(&self) -> crate::Result<()> {
        if self.ft_num_shards == 0 || self.ht_num_shards == 0 {
            return Err(crate::Error::Config("shard counts must be positive".into()));
        }
        if self.directory_size == 0 {
            return Err(crate::Error::Config("directory_size must be positive".into()));
        }
        if self.max_results_per_section == 0 || self.max_postings_per_term == 0 {
            return Err(crate::Error::Config("posting caps must be positive".into()));
        }
        if self.text_columns.len() != self.column_weights.len() {
            return Err(crate::Error::Config(format!(
                "{} text columns but {} column weights",
                self.text_columns.len(),
                self.column_weights.len()
            )));
        }
        Ok(())
    }
}

fn resolve_threads(n: usize) -> usize {
    if n == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        n
    }
}
