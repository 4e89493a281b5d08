//! End-to-end scenarios through the public API: build shards, query them,
//! and store documents in the key-value store.

use shardex::hash_table::HashTable;
use shardex::index::{FullTextShardBuilder, IndexConfig, IndexerRunner, Posting};
use shardex::query::FullTextIndex;
use shardex::utils::{hash_word, shard_for};
use std::collections::BTreeSet;
use std::path::Path;

fn config(dir: &Path) -> IndexConfig {
    IndexConfig {
        ft_num_shards: 8,
        ht_num_shards: 4,
        directory_size: 64,
        num_threads_indexing: 2,
        num_threads_merging: 2,
        ..IndexConfig::with_data_dir(dir)
    }
}

/// Write (word, value, score) triples through shard builders and merge
fn build_index(config: &IndexConfig, db: &str, triples: &[(&str, u64, u32)]) -> FullTextIndex {
    let mut builders: Vec<FullTextShardBuilder> = (0..config.ft_num_shards)
        .map(|i| FullTextShardBuilder::new(config, db, i))
        .collect();
    for &(word, value, score) in triples {
        let key = hash_word(word);
        builders[shard_for(key, config.ft_num_shards)].add(key, value, score);
    }
    for builder in &mut builders {
        builder.write().unwrap();
        builder.merge().unwrap();
    }
    FullTextIndex::new(config, db)
}

#[test]
fn single_word_shard() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(&config(dir.path()), "fox", &[("fox", 42, 10)]);

    assert_eq!(index.search_word("fox"), vec![Posting::new(42, 10)]);
    assert!(index.search_word("dog").is_empty());
}

#[test]
fn phrase_intersection() {
    let dir = tempfile::tempdir().unwrap();
    let mut triples = Vec::new();
    for doc in 1..=3u64 {
        triples.push(("quick", doc, 1));
        triples.push(("fox", doc, 1));
    }
    triples.push(("brown", 2, 1));
    let index = build_index(&config(dir.path()), "phrase", &triples);

    let result = index.search_phrase("quick brown fox", 10);
    let ids: Vec<u64> = result.results.iter().map(|p| p.value).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(result.total_found, 1);
}

#[test]
fn key_value_truncate_and_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut table = HashTable::new(&config, "kv");

    table.add(123, b"hejsan").unwrap();
    table.sort().unwrap();
    assert_eq!(table.find_str(123).as_deref(), Some("hejsan"));

    table.truncate().unwrap();
    table.add(123, b"testing").unwrap();
    table.sort().unwrap();

    assert_eq!(table.find_str(123).as_deref(), Some("testing"));
    assert!(table.find(999).is_none());
}

#[test]
fn round_trip_matches_added_postings() {
    let dir = tempfile::tempdir().unwrap();
    let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let mut triples = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for doc in 0..(20 * (i as u64 + 1)) {
            triples.push((*word, doc * 7 + i as u64, (doc % 13) as u32));
        }
    }
    let index = build_index(&config(dir.path()), "rt", &triples);

    for word in words {
        let expected: BTreeSet<(u64, u32)> = triples
            .iter()
            .filter(|t| t.0 == word)
            .map(|t| (t.1, t.2))
            .collect();
        let got: BTreeSet<(u64, u32)> = index
            .search_word(word)
            .into_iter()
            .map(|p| (p.value, p.score))
            .collect();
        assert_eq!(got, expected, "postings of {}", word);
    }
}

#[test]
fn truncated_words_fall_back_to_or() {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig {
        max_results_per_section: 3,
        ..config(dir.path())
    };
    let mut triples = Vec::new();
    for doc in 0..10u64 {
        triples.push(("the", doc, 1));
    }
    for doc in 0..25u64 {
        triples.push(("a", doc, 1));
    }
    let index = build_index(&config, "or", &triples);

    let result = index.search_phrase("the a", 10);
    assert_eq!(result.total_found, 25);
    assert!(!result.results.is_empty());
}

#[test]
fn top_k_keeps_best_scores() {
    let dir = tempfile::tempdir().unwrap();
    let mut triples = Vec::new();
    for doc in 0..50u64 {
        triples.push(("common", doc, 1));
        triples.push(("word", doc, (doc % 17) as u32));
    }
    let index = build_index(&config(dir.path()), "topk", &triples);

    let all = index.search_phrase("word common", 1000);
    let best = index.search_phrase("word common", 5);
    assert_eq!(best.results.len(), 5);
    assert_eq!(best.total_found, 50);

    let min_kept = best.results.iter().map(|p| p.score).min().unwrap();
    for p in &all.results {
        if !best.results.contains(p) {
            assert!(p.score <= min_kept);
        }
    }
    assert!(best.results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn directory_miss_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(&config(dir.path()), "miss", &[("present", 1, 1)]);

    assert!(index.search_word("absent").is_empty());
    let result = index.search_phrase("absent", 10);
    assert!(result.results.is_empty());
    assert_eq!(result.total_found, 0);

    // a database that was never built
    let empty = FullTextIndex::new(&config(dir.path()), "never-built");
    assert_eq!(empty.search_phrase("present", 10).total_found, 0);
}

#[test]
fn runner_indexes_and_stores_documents() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let input = "\
https://a.example/\tQuick fox\tthe quick fox runs
https://b.example/\tBrown dog\ta quick brown dog sleeps
https://c.example/\tQuick brown fox\tthe quick brown fox jumps
";

    let mut runner = IndexerRunner::new(&config, "web").unwrap();
    let stats = runner.index_reader(input.as_bytes(), 0, 1).unwrap();
    assert_eq!(stats.documents, 3);

    let index = FullTextIndex::new(&config, "web");
    let result = index.search_phrase("quick brown fox", 10);
    assert_eq!(result.total_found, 1);
    let id = result.results[0].value;
    assert_eq!(id, hash_word("https://c.example/"));

    let stored = runner.hash_table().find_str(id).unwrap();
    assert!(stored.starts_with("https://c.example/\t"));

    // title weight outranks body weight
    let quick = index.search_word("quick");
    assert_eq!(quick.len(), 3);
    assert!(quick[0].score > quick[2].score);
}
