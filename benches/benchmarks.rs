//! Performance benchmarks for shardex
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use shardex::index::{IndexConfig, IndexerRunner, Posting};
use shardex::query::{FullTextIndex, top_k, value_intersection};
use tempfile::TempDir;

const VOCABULARY: &[&str] = &[
    "search", "engine", "index", "shard", "quick", "brown", "fox", "lazy", "dog", "rust",
    "memory", "merge", "posting", "phrase", "word", "disk", "query", "result", "score", "page",
];

/// Build a small index of generated documents
fn create_benchmark_index() -> (TempDir, IndexConfig) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = IndexConfig {
        ft_num_shards: 16,
        ht_num_shards: 4,
        directory_size: 1024,
        ..IndexConfig::with_data_dir(temp_dir.path())
    };

    let mut input = String::new();
    for i in 0..5_000usize {
        let title: Vec<&str> = (0..4).map(|j| VOCABULARY[(i * 7 + j * 3) % VOCABULARY.len()]).collect();
        let body: Vec<&str> = (0..20).map(|j| VOCABULARY[(i * 13 + j * 11) % VOCABULARY.len()]).collect();
        input.push_str(&format!(
            "https://bench.example/{}\t{}\t{}\n",
            i,
            title.join(" "),
            body.join(" ")
        ));
    }

    let mut runner = IndexerRunner::new(&config, "bench").expect("Failed to create runner");
    runner
        .index_reader(input.as_bytes(), 0, 1)
        .expect("Failed to build index");

    (temp_dir, config)
}

fn sorted_list(len: u64, step: u64) -> Vec<Posting> {
    (0..len).map(|i| Posting::new(i * step, (i % 100) as u32)).collect()
}

fn bench_intersection(c: &mut Criterion) {
    let mut group = c.benchmark_group("intersection");
    let long = sorted_list(1_000_000, 2);

    for short_len in [100u64, 10_000, 500_000] {
        let short = sorted_list(short_len, 3);
        group.bench_with_input(BenchmarkId::from_parameter(short_len), &short, |b, short| {
            b.iter(|| value_intersection(black_box(&[long.as_slice(), short.as_slice()])))
        });
    }

    group.finish();
}

fn bench_top_k(c: &mut Criterion) {
    let postings: Vec<Posting> = (0..200_000u64)
        .map(|i| Posting::new(i, (i.wrapping_mul(2_654_435_761) % 1000) as u32))
        .collect();

    c.bench_function("top_k_1000_of_200k", |b| {
        b.iter(|| top_k(black_box(postings.clone()), 1000))
    });
}

fn bench_search(c: &mut Criterion) {
    let (_temp_dir, config) = create_benchmark_index();
    let index = FullTextIndex::new(&config, "bench");

    let mut group = c.benchmark_group("search");

    group.bench_function("word", |b| b.iter(|| index.search_word(black_box("quick"))));

    group.bench_function("phrase", |b| {
        b.iter(|| index.search_phrase(black_box("quick brown fox"), 10))
    });

    group.bench_function("phrase_miss", |b| {
        b.iter(|| index.search_phrase(black_box("quick unicorn"), 10))
    });

    group.finish();
}

criterion_group!(benches, bench_intersection, bench_top_k, bench_search);

criterion_main!(benches);
