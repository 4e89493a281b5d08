use crate::error::Result;
use crate::index::shard::FullTextShard;
use crate::index::types::{DocValue, IndexConfig, Posting, ShardWindow, TermKey};
use crate::query::intersect::{value_intersection, value_union};
use crate::query::top_k::top_k;
use crate::transfer::{ObjectStore, TransferStats, download_shards, upload_shards};
use crate::utils::{distinct_words, full_text_words, hash_word, shard_for};
use log::debug;
use rayon::prelude::*;
use serde::Serialize;

/// Ranked documents of a phrase search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub results: Vec<Posting>,
    /// Exact on the intersection path, an estimate on the OR fallback,
    /// 0 when no word was found
    pub total_found: u64,
}

/// One looked-up word of a phrase
struct WordWindow {
    word: String,
    window: ShardWindow,
}

/// Query side of the sharded full-text index
pub struct FullTextIndex {
    config: IndexConfig,
    db_name: String,
    shards: Vec<FullTextShard>,
}

impl FullTextIndex {
    pub fn new(config: &IndexConfig, db_name: &str) -> Self {
        Self {
            config: config.clone(),
            db_name: db_name.to_string(),
            shards: Self::open_shards(config, db_name),
        }
    }

    fn open_shards(config: &IndexConfig, db_name: &str) -> Vec<FullTextShard> {
        (0..config.ft_num_shards)
            .map(|i| FullTextShard::new(config, db_name, i))
            .collect()
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn shards(&self) -> &[FullTextShard] {
        &self.shards
    }

    /// Reopen every shard, picking up merged or downloaded files
    pub fn reload(&mut self) {
        for shard in &mut self.shards {
            shard.reload();
        }
    }

    /// Term key of `word`, normalized the way indexing tokenizes text.
    /// None unless `word` is exactly one token.
    fn word_key(word: &str) -> Option<TermKey> {
        match full_text_words(word).as_slice() {
            [token] => Some(hash_word(token)),
            _ => None,
        }
    }

    fn shard_of(&self, key: TermKey) -> &FullTextShard {
        &self.shards[shard_for(key, self.shards.len())]
    }

    fn find_word(&self, word: &str) -> ShardWindow {
        match Self::word_key(word) {
            Some(key) => self.shard_of(key).find(key),
            None => ShardWindow::default(),
        }
    }

    /// Postings of one word, highest score first
    pub fn search_word(&self, word: &str) -> Vec<Posting> {
        let mut postings = self.find_word(word).postings;
        // stable: equal scores keep storage order
        postings.sort_by(|a, b| b.score.cmp(&a.score));
        postings
    }

    /// Documents containing every word of `phrase`, best `limit` by score.
    ///
    /// Words whose stored list is truncated cannot take part in an exact
    /// intersection. They are ignored when at least one complete list
    /// exists; otherwise the union of the truncated lists is ranked instead.
    pub fn search_phrase(&self, phrase: &str, limit: usize) -> SearchResult {
        let words: Vec<WordWindow> = distinct_words(phrase)
            .into_par_iter()
            .map(|word| WordWindow {
                window: self.find_word(&word),
                word,
            })
            .collect();
        if words.is_empty() {
            return SearchResult::default();
        }

        for w in &words {
            debug!(
                "word '{}': {} postings of {}",
                w.word,
                w.window.len(),
                w.window.total_num_results
            );
        }

        let (or_words, and_words): (Vec<&WordWindow>, Vec<&WordWindow>) =
            words.iter().partition(|w| w.window.is_truncated());

        let (matches, total_found) = if !and_words.is_empty() {
            let lists: Vec<&[Posting]> =
                and_words.iter().map(|w| w.window.postings.as_slice()).collect();
            let matches = value_intersection(&lists);
            let total = matches.len() as u64;
            (matches, total)
        } else {
            let lists: Vec<&[Posting]> =
                or_words.iter().map(|w| w.window.postings.as_slice()).collect();
            let total = or_words
                .iter()
                .map(|w| w.window.total_num_results)
                .max()
                .unwrap_or(0);
            debug!("every word truncated, ranking the union of {} lists", lists.len());
            (value_union(&lists), total)
        };

        SearchResult {
            results: top_k(matches, limit),
            total_found,
        }
    }

    /// Document ids of a phrase search
    pub fn ids(&self, phrase: &str, limit: usize) -> Vec<DocValue> {
        self.search_phrase(phrase, limit)
            .results
            .into_iter()
            .map(|p| p.value)
            .collect()
    }

    /// Population count of every distinct word of `phrase`
    pub fn word_stats(&self, phrase: &str) -> Vec<(String, u64)> {
        distinct_words(phrase)
            .into_iter()
            .map(|word| {
                let count = self.total_num_results(&word);
                (word, count)
            })
            .collect()
    }

    /// Number of documents containing `word`, without reading postings
    pub fn total_num_results(&self, word: &str) -> u64 {
        Self::word_key(word)
            .map(|key| self.shard_of(key).total_num_results(key))
            .unwrap_or(0)
    }

    /// Bytes used by all shard data files
    pub fn disk_size(&self) -> u64 {
        self.shards.iter().map(|s| s.disk_size()).sum()
    }

    /// Shards that have a canonical data file
    pub fn num_built_shards(&self) -> usize {
        self.shards.iter().filter(|s| !s.empty()).count()
    }

    pub fn upload(&self, store: &dyn ObjectStore) -> Result<TransferStats> {
        upload_shards(&self.shards, &self.db_name, store, self.config.merging_threads())
    }

    /// Fetch all shards from `store` and reopen them
    pub fn download(&mut self, store: &dyn ObjectStore) -> Result<TransferStats> {
        let stats = download_shards(&self.shards, &self.db_name, store, self.config.merging_threads())?;
        self.shards = Self::open_shards(&self.config, &self.db_name);
        Ok(stats)
    }
}
