use crate::error::{Error, Result};
use crate::index::format::{
    BlockView, TermPostings, decode_postings, directory_slot, encode_block, encode_directory,
    read_fragment_record, write_fragment_record,
};
use crate::index::merger::MemoryCounter;
use crate::index::shard::ShardPaths;
use crate::index::types::{DocValue, EMPTY_SLOT, IndexConfig, Posting, ShardId, TermKey};
use ahash::AHashMap;
use log::debug;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Approximate heap cost of one cached term besides its postings
const TERM_OVERHEAD: usize = 64;

/// Postings buffered for one term
#[derive(Debug, Default)]
struct CachedTerm {
    postings: Vec<Posting>,
    total: u64,
}

/// Statistics of one merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub fragments_merged: usize,
    pub terms: usize,
    pub postings: usize,
    /// Terms whose posting list hit the materialized cap
    pub truncated_terms: usize,
}

impl MergeStats {
    pub fn absorb(&mut self, other: &MergeStats) {
        self.fragments_merged += other.fragments_merged;
        self.terms += other.terms;
        self.postings += other.postings;
        self.truncated_terms += other.truncated_terms;
    }
}

/// In-memory accumulator and flush/merge logic for one full-text shard.
///
/// `add` is not synchronized; the owner serializes calls. `write` and
/// `merge` touch shared files and must run under the shard's lock.
pub struct FullTextShardBuilder {
    shard_id: ShardId,
    paths: ShardPaths,
    num_shards: usize,
    directory_size: u64,
    max_postings_per_term: usize,
    cache_limit: usize,
    cache: BTreeMap<TermKey, CachedTerm>,
    cache_records: usize,
    cache_bytes: usize,
    memory: Option<MemoryCounter>,
}

impl FullTextShardBuilder {
    pub fn new(config: &IndexConfig, db_name: &str, shard_id: ShardId) -> Self {
        Self {
            shard_id,
            paths: ShardPaths::new(config, db_name, shard_id),
            num_shards: config.ft_num_shards,
            directory_size: config.directory_size,
            max_postings_per_term: config.max_postings_per_term,
            cache_limit: config.ft_cache_limit,
            cache: BTreeMap::new(),
            cache_records: 0,
            cache_bytes: 0,
            memory: None,
        }
    }

    /// Report cache growth to a shared memory counter
    pub fn with_memory(mut self, memory: MemoryCounter) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn paths(&self) -> &ShardPaths {
        &self.paths
    }

    /// Buffer one posting for `key`
    pub fn add(&mut self, key: TermKey, value: DocValue, score: u32) {
        let mut grown = Posting::SIZE;
        let term = self.cache.entry(key).or_insert_with(|| {
            grown += TERM_OVERHEAD;
            CachedTerm::default()
        });
        term.postings.push(Posting { value, score });
        term.total += 1;

        self.cache_records += 1;
        self.cache_bytes += grown;
        if let Some(memory) = &self.memory {
            memory.add(grown);
        }
    }

    /// True when the cache reached its record limit
    pub fn full(&self) -> bool {
        self.cache_records >= self.cache_limit
    }

    pub fn cache_records(&self) -> usize {
        self.cache_records
    }

    pub fn cache_bytes(&self) -> usize {
        self.cache_bytes
    }

    pub fn is_cache_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        if let Some(memory) = &self.memory {
            memory.sub(self.cache_bytes);
        }
        self.cache_records = 0;
        self.cache_bytes = 0;
    }

    /// Flush the cache into a new fragment file and clear it.
    /// Returns the fragment path, None when the cache was empty.
    pub fn write(&mut self) -> Result<Option<PathBuf>> {
        if self.cache.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(self.paths.dir())?;
        let next = self
            .paths
            .fragments()?
            .last()
            .map(|(n, _)| n + 1)
            .unwrap_or(0);
        let path = self.paths.fragment(next);
        let tmp = tmp_path(&path);

        {
            let mut file = BufWriter::new(File::create(&tmp)?);
            for (&key, term) in &self.cache {
                write_fragment_record(&mut file, key, term.total, &term.postings)?;
            }
            file.flush()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(
            "shard {}: flushed {} terms, {} postings to {}",
            self.shard_id,
            self.cache.len(),
            self.cache_records,
            path.display()
        );

        self.clear_cache();
        Ok(Some(path))
    }

    /// Fold all fragments and the current canonical shard into a new
    /// canonical shard, then delete the consumed fragments.
    pub fn merge(&mut self) -> Result<MergeStats> {
        let fragments = self.paths.fragments()?;
        if fragments.is_empty() {
            return Ok(MergeStats::default());
        }

        let mut terms: BTreeMap<TermKey, MergingTerm> = BTreeMap::new();

        let idx_path = self.paths.idx();
        match fs::read(&idx_path) {
            Ok(data) => read_canonical(&idx_path, &data, &mut terms)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        for (_, path) in &fragments {
            let mut reader = BufReader::new(File::open(path)?);
            while let Some(record) = read_fragment_record(&mut reader)
                .map_err(|e| Error::corrupt(path, e.to_string()))?
            {
                terms
                    .entry(record.key)
                    .or_default()
                    .absorb_fragment(record.total_num_results, &record.postings);
            }
        }

        let mut stats = MergeStats {
            fragments_merged: fragments.len(),
            terms: terms.len(),
            ..MergeStats::default()
        };

        let mut slots: BTreeMap<u64, Vec<TermPostings>> = BTreeMap::new();
        for (key, term) in terms {
            let (postings, truncated) = term.finish(key, self.max_postings_per_term);
            stats.postings += postings.postings.len();
            stats.truncated_terms += usize::from(truncated);
            slots
                .entry(directory_slot(key, self.num_shards, self.directory_size))
                .or_default()
                .push(postings);
        }

        self.write_canonical(&slots)?;

        for (_, path) in &fragments {
            fs::remove_file(path)?;
        }

        debug!(
            "shard {}: merged {} fragments into {} terms",
            self.shard_id, stats.fragments_merged, stats.terms
        );
        Ok(stats)
    }

    fn write_canonical(&self, slots: &BTreeMap<u64, Vec<TermPostings>>) -> Result<()> {
        fs::create_dir_all(self.paths.dir())?;

        let idx_path = self.paths.idx();
        let keys_path = self.paths.keys();
        let idx_tmp = tmp_path(&idx_path);
        let keys_tmp = tmp_path(&keys_path);

        let mut directory = vec![EMPTY_SLOT; self.directory_size as usize];
        {
            let mut file = BufWriter::new(File::create(&idx_tmp)?);
            let mut offset = 0u64;
            for (&slot, block_terms) in slots {
                let block = encode_block(block_terms);
                file.write_all(&block)?;
                directory[slot as usize] = offset;
                offset += block.len() as u64;
            }
            file.flush()?;
        }
        fs::write(&keys_tmp, encode_directory(&directory))?;

        fs::rename(&idx_tmp, &idx_path)?;
        fs::rename(&keys_tmp, &keys_path)?;
        Ok(())
    }

    /// Drop the cache and every fragment; keeps the canonical shard
    pub fn truncate_cache_files(&mut self) -> Result<()> {
        self.clear_cache();
        for (_, path) in self.paths.fragments()? {
            remove_if_exists(&path)?;
        }
        Ok(())
    }

    /// Drop the cache, fragments and the canonical shard
    pub fn truncate(&mut self) -> Result<()> {
        self.truncate_cache_files()?;
        remove_if_exists(&self.paths.idx())?;
        remove_if_exists(&self.paths.keys())?;
        Ok(())
    }
}

impl Drop for FullTextShardBuilder {
    fn drop(&mut self) {
        if let Some(memory) = &self.memory {
            memory.sub(self.cache_bytes);
        }
    }
}

/// Accumulates one term's postings from the canonical shard and fragments
#[derive(Debug, Default)]
struct MergingTerm {
    /// value -> combined score
    scores: AHashMap<DocValue, u32>,
    total: u64,
}

impl MergingTerm {
    fn absorb_canonical(&mut self, total: u64, postings: &[Posting]) {
        self.total = self.total.saturating_add(total);
        for p in postings {
            let score = self.scores.entry(p.value).or_insert(0);
            *score = score.saturating_add(p.score);
        }
    }

    fn absorb_fragment(&mut self, total: u64, postings: &[Posting]) {
        self.total = self.total.saturating_add(total);
        for p in postings {
            match self.scores.get_mut(&p.value) {
                Some(score) => {
                    // Same document seen again: combine, count once
                    *score = score.saturating_add(p.score);
                    self.total = self.total.saturating_sub(1);
                }
                None => {
                    self.scores.insert(p.value, p.score);
                }
            }
        }
    }

    /// Sorted postings capped at `cap`, and whether the cap removed any
    fn finish(self, key: TermKey, cap: usize) -> (TermPostings, bool) {
        let mut postings: Vec<Posting> = self
            .scores
            .into_iter()
            .map(|(value, score)| Posting { value, score })
            .collect();

        let truncated = postings.len() > cap;
        if truncated {
            // keep the best scoring, lowest document id on ties
            postings.sort_unstable_by(|a, b| b.score.cmp(&a.score).then(a.value.cmp(&b.value)));
            postings.truncate(cap);
        }
        postings.sort_unstable_by_key(|p| p.value);

        let total = self.total.max(postings.len() as u64);
        (
            TermPostings {
                key,
                total_num_results: total,
                postings,
            },
            truncated,
        )
    }
}

/// Load every block of a canonical shard file into `terms`
fn read_canonical(path: &Path, data: &[u8], terms: &mut BTreeMap<TermKey, MergingTerm>) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        let block = BlockView::parse(data, offset as u64)
            .ok_or_else(|| Error::corrupt(path, format!("bad block header at {}", offset)))?;
        for entry in block.entries() {
            let bytes = block.posting_bytes(&entry).ok_or_else(|| {
                Error::corrupt(path, format!("postings of key {} out of bounds", entry.key))
            })?;
            let postings = decode_postings(bytes, usize::MAX);
            terms
                .entry(entry.key)
                .or_default()
                .absorb_canonical(entry.total_num_results, &postings);
        }
        let len = block
            .encoded_len()
            .ok_or_else(|| Error::corrupt(path, format!("block at {} has oversized data", offset)))?;
        offset += len;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
