//! Utility functions shared by the index and query code.
//!
//! ## Modules
//!
//! - [`app_data`] - Application data directory and config file (XDG-compliant)
//! - [`encoding`] - Fixed-width little-endian integer helpers
//! - [`hash`] - Stable word hashing and shard routing
//! - [`partition`] - Splitting work between cluster nodes
//! - [`progress`] - Progress bars, no-op without the `progress` feature
//! - [`tokenizer`] - Word extraction for indexing and queries
//!
//! ## Key Functions
//!
//! ```
//! use shardex::utils::{full_text_words, hash_word, shard_for};
//!
//! let words = full_text_words("The quick, brown FOX!");
//! assert_eq!(words, vec!["the", "quick", "brown", "fox"]);
//!
//! let shard = shard_for(hash_word("fox"), 256);
//! assert!(shard < 256);
//! ```

pub mod app_data;
pub mod encoding;
pub mod hash;
pub mod partition;
pub mod progress;
pub mod tokenizer;

pub use app_data::*;
pub use encoding::*;
pub use hash::*;
pub use partition::*;
pub use tokenizer::*;
