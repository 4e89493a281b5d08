pub mod builder;
pub mod document;
pub mod format;
pub mod indexer;
pub mod merger;
pub mod runner;
pub mod shard;
pub mod stats;
pub mod types;

pub use builder::{FullTextShardBuilder, MergeStats};
pub use document::{Document, Field, TsvDocuments};
pub use indexer::{FullTextIndexer, ShardLocks};
pub use merger::{
    MemoryCounter, MemoryProbe, MergeScheduler, ProcessMemory, SchedulerState, TrackedMemory,
    memory_probe,
};
pub use runner::{IndexerRunner, RunStats};
pub use shard::{FullTextShard, ShardPaths};
pub use types::*;
