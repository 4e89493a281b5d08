//! Index build orchestration.
//!
//! `IndexerRunner::run` indexes a slice of the input files on a worker pool.
//! Each pool thread feeds its own [`FullTextIndexer`]; the document payloads
//! go to the key-value store. A [`MergeScheduler`] flushes and merges caches
//! under memory pressure while the run is in progress and drains everything
//! when the run ends.

use crate::error::{Error, Result};
use crate::hash_table::HashTable;
use crate::index::builder::{FullTextShardBuilder, MergeStats};
use crate::index::document::{Document, TsvDocuments};
use crate::index::indexer::{FullTextIndexer, ShardLocks};
use crate::index::merger::{MemoryCounter, MergeScheduler, memory_probe};
use crate::index::types::IndexConfig;
use crate::utils::progress;
use crate::utils::{in_partition, make_partition};
use ignore::WalkBuilder;
use log::{error, info, warn};
use rayon::prelude::*;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Documents handed to the pool at once by `index_reader`
const READER_BATCH: usize = 10_000;

/// Counters of one indexing run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub files: usize,
    pub documents: usize,
    /// Documents belonging to another partition
    pub skipped: usize,
    pub merge: MergeStats,
}

/// Builds the full-text index and key-value store of one database
pub struct IndexerRunner {
    config: IndexConfig,
    db_name: String,
    memory: MemoryCounter,
    locks: ShardLocks,
    hash_table: HashTable,
    pool: rayon::ThreadPool,
    merge_pool: rayon::ThreadPool,
    show_progress: bool,
}

impl IndexerRunner {
    pub fn new(config: &IndexConfig, db_name: &str) -> Result<Self> {
        config.validate()?;
        let memory = MemoryCounter::default();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.indexing_threads())
            .thread_name(|i| format!("shardex-index-{}", i))
            .build()?;
        let merge_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.merging_threads())
            .build()?;

        Ok(Self {
            config: config.clone(),
            db_name: db_name.to_string(),
            locks: ShardLocks::new(config.ft_num_shards),
            hash_table: HashTable::with_memory(config, db_name, memory.clone()),
            memory,
            pool,
            merge_pool,
            show_progress: false,
        })
    }

    /// Draw progress bars on stderr
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn hash_table(&self) -> &HashTable {
        &self.hash_table
    }

    /// Index the files of `partition` out of `total` partitions
    pub fn run(&mut self, files: &[PathBuf], partition: usize, total: usize) -> Result<RunStats> {
        let files = make_partition(files, partition, total);
        info!(
            "partition {}/{}: indexing {} files into '{}'",
            partition,
            total.max(1),
            files.len(),
            self.db_name
        );

        let bar = self
            .show_progress
            .then(|| progress::file_bar(files.len() as u64, "Indexing files..."));
        let documents = AtomicUsize::new(0);

        let result = self.with_workers(|workers, scheduler| {
            self.pool.install(|| {
                files.par_iter().try_for_each(|path| {
                    scheduler.wait_for_merges();
                    let worker = current_worker(workers);
                    let mut count = 0;
                    for doc in TsvDocuments::open(path, &self.config)? {
                        self.add_document(worker, &doc?)?;
                        count += 1;
                    }
                    documents.fetch_add(count, Ordering::Relaxed);
                    info!("indexed {} documents from {}", count, path.display());
                    if let Some(pb) = &bar {
                        pb.inc(1);
                    }
                    Ok(())
                })
            })
        });
        self.hash_table.reload();
        let mut stats = result?;

        if let Some(pb) = bar {
            pb.finish_with_message(format!("Indexed {} files", files.len()));
        }
        stats.files = files.len();
        stats.documents = documents.into_inner();
        Ok(stats)
    }

    /// Index a single document stream, keeping only documents whose key
    /// belongs to `partition` out of `total`
    pub fn index_reader<R: BufRead>(
        &mut self,
        reader: R,
        partition: usize,
        total: usize,
    ) -> Result<RunStats> {
        let mut docs = TsvDocuments::new(reader, &self.config);
        let mut documents = 0;
        let mut skipped = 0;

        let result = self.with_workers(|workers, scheduler| {
            loop {
                let mut batch: Vec<Document> = Vec::with_capacity(READER_BATCH);
                for doc in docs.by_ref().take(READER_BATCH) {
                    let doc = doc?;
                    if in_partition(doc.key, partition, total) {
                        batch.push(doc);
                    } else {
                        skipped += 1;
                    }
                }
                if batch.is_empty() {
                    return Ok(());
                }

                scheduler.wait_for_merges();
                documents += batch.len();
                self.pool.install(|| {
                    batch
                        .par_iter()
                        .try_for_each(|doc| self.add_document(current_worker(workers), doc))
                })?;
            }
        });
        self.hash_table.reload();
        let mut stats = result?;

        stats.documents = documents;
        stats.skipped = skipped;
        Ok(stats)
    }

    fn add_document(&self, worker: &FullTextIndexer, doc: &Document) -> Result<()> {
        worker.add_document(doc)?;
        self.hash_table.add(doc.key, doc.payload.as_bytes())
    }

    /// Run `body` with one registered worker per pool thread and a live
    /// scheduler, then drain every cache into merged shards. The caller
    /// reloads the key-value readers afterwards.
    fn with_workers<F>(&self, body: F) -> Result<RunStats>
    where
        F: FnOnce(&[FullTextIndexer], &MergeScheduler) -> Result<()>,
    {
        let scheduler = MergeScheduler::new(
            self.config.merge.clone(),
            memory_probe(&self.config.merge, self.memory.clone()),
            self.config.merging_threads(),
        )?;

        let mut workers: Vec<FullTextIndexer> = (0..self.pool.current_num_threads())
            .map(|_| {
                FullTextIndexer::new(&self.config, &self.db_name, self.locks.clone(), self.memory.clone())
            })
            .collect();
        for worker in &mut workers {
            worker.register(&scheduler);
        }
        let (append, merge) = self.hash_table.scheduler_callbacks();
        let kv_id = scheduler.register(append, merge);

        scheduler.start()?;
        let result = body(&workers, &scheduler);

        let spinner = self
            .show_progress
            .then(|| progress::phase_spinner("Flushing and merging shards..."));
        let shutdown = scheduler.shutdown();
        if let Some(sp) = spinner {
            sp.finish_and_clear();
        }

        for worker in &mut workers {
            worker.deregister(&scheduler);
        }
        scheduler.deregister(kv_id);

        result?;
        shutdown?;
        if let Some(first) = scheduler.take_failures().into_iter().next() {
            error!("a scheduled flush or merge failed during the run");
            return Err(first);
        }

        let mut stats = RunStats::default();
        for worker in &workers {
            stats.merge.absorb(&worker.merge_stats());
        }
        info!(
            "merged {} fragments into {} terms ({} truncated)",
            stats.merge.fragments_merged, stats.merge.terms, stats.merge.truncated_terms
        );
        Ok(stats)
    }

    /// Merge the fragments of every full-text shard in parallel
    pub fn merge(&self) -> Result<MergeStats> {
        let stats = self.merge_pool.install(|| {
            (0..self.config.ft_num_shards)
                .into_par_iter()
                .map(|shard_id| {
                    let _guard = self.locks.lock(shard_id);
                    FullTextShardBuilder::new(&self.config, &self.db_name, shard_id).merge()
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut total = MergeStats::default();
        for s in &stats {
            total.absorb(s);
        }
        Ok(total)
    }

    /// Sort the key-value store
    pub fn sort(&mut self) -> Result<()> {
        self.hash_table.sort()
    }

    /// Remove every shard file of this database
    pub fn truncate(&mut self) -> Result<()> {
        warn!("truncating database '{}'", self.db_name);
        for shard_id in 0..self.config.ft_num_shards {
            let _guard = self.locks.lock(shard_id);
            FullTextShardBuilder::new(&self.config, &self.db_name, shard_id).truncate()?;
        }
        self.hash_table.truncate()
    }

    /// Remove unmerged full-text fragments, keeping merged shards
    pub fn truncate_cache(&self) -> Result<()> {
        for shard_id in 0..self.config.ft_num_shards {
            let _guard = self.locks.lock(shard_id);
            FullTextShardBuilder::new(&self.config, &self.db_name, shard_id)
                .truncate_cache_files()?;
        }
        Ok(())
    }
}

/// The worker owned by the calling pool thread
fn current_worker(workers: &[FullTextIndexer]) -> &FullTextIndexer {
    let idx = rayon::current_thread_index().unwrap_or(0);
    &workers[idx % workers.len()]
}

/// Expand directories into the files below them, sorted so that every
/// node of a cluster sees the same order
pub fn collect_input_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input {} does not exist", path.display()),
            )));
        }
        let walker = WalkBuilder::new(path).hidden(true).git_ignore(false).build();
        files.extend(
            walker
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.into_path())
                .filter(|p| p.is_file() && is_document_file(p)),
        );
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn is_document_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tsv") | Some("txt")
    )
}
