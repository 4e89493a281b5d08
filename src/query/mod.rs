//! Query engine over the sharded full-text index.
//!
//! - [`engine`] - word and phrase search, statistics, shard transfer
//! - [`intersect`] - leapfrog intersection of sorted posting lists
//! - [`top_k`] - threshold selection of the best scoring results

pub mod engine;
pub mod intersect;
pub mod top_k;

pub use engine::{FullTextIndex, SearchResult};
pub use intersect::{value_intersection, value_union};
pub use top_k::top_k;
