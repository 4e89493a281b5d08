//! # shardex - sharded, disk-resident full-text index
//!
//! shardex builds and serves an inverted index split into many shards, plus
//! a key-value store holding the indexed documents. It is meant as the
//! storage layer of a web search backend: documents go in as TSV rows, and
//! word or phrase queries come back as ranked document ids.
//!
//! ## Architecture
//!
//! - [`index`] - shard file format, builders, merge scheduler, indexer runner
//! - [`hash_table`] - sorted key-value shards for document payloads
//! - [`query`] - word and phrase search over the shards
//! - [`transfer`] - shard upload and download through an object store
//! - [`output`] - result formatting (terminal and JSON)
//! - [`utils`] - tokenizer, hashing, config loading, partitioning
//!
//! ## Quick Start
//!
//! ```no_run
//! use shardex::index::{IndexConfig, IndexerRunner};
//! use shardex::query::FullTextIndex;
//!
//! let config = IndexConfig::with_data_dir("/var/lib/shardex");
//!
//! let mut runner = IndexerRunner::new(&config, "web")?;
//! runner.index_reader("https://example.com/\tQuick brown fox".as_bytes(), 0, 1)?;
//!
//! let index = FullTextIndex::new(&config, "web");
//! let result = index.search_phrase("brown fox", 10);
//! println!("{} found", result.total_found);
//! # Ok::<(), shardex::Error>(())
//! ```
//!
//! ## Build pipeline
//!
//! Postings are buffered per shard, flushed to immutable fragment files and
//! later merged into the canonical shard. A [`index::MergeScheduler`]
//! decides when to flush and merge based on memory pressure.

pub mod error;
pub mod hash_table;
pub mod index;
pub mod output;
pub mod query;
pub mod transfer;
pub mod utils;

pub use error::{Error, Result};
