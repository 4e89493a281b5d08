use crate::index::format::{BlockView, decode_postings, directory_slot, read_directory_slot};
use crate::index::types::{IndexConfig, KeyEntry, ShardId, ShardWindow, TermKey};
use log::{debug, warn};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File locations of one full-text shard
#[derive(Debug, Clone)]
pub struct ShardPaths {
    dir: PathBuf,
    stem: String,
}

impl ShardPaths {
    pub fn new(config: &IndexConfig, db_name: &str, shard_id: ShardId) -> Self {
        Self {
            dir: config.mount_point(shard_id).join("full_text"),
            stem: format!("fti_{}_{}", db_name, shard_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical shard file
    pub fn idx(&self) -> PathBuf {
        self.dir.join(format!("{}.idx", self.stem))
    }

    /// Directory (key position) file
    pub fn keys(&self) -> PathBuf {
        self.dir.join(format!("{}.keys", self.stem))
    }

    /// Flush fragment number `n`
    pub fn fragment(&self, n: u64) -> PathBuf {
        self.dir.join(format!("{}.frag.{}", self.stem, n))
    }

    /// Existing fragments, ordered by fragment number
    pub fn fragments(&self) -> io::Result<Vec<(u64, PathBuf)>> {
        let prefix = format!("{}.frag.", self.stem);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut fragments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(n) = name.strip_prefix(&prefix).and_then(|s| s.parse::<u64>().ok()) {
                fragments.push((n, entry.path()));
            }
        }
        fragments.sort_by_key(|(n, _)| *n);
        Ok(fragments)
    }
}

/// Memory-mapped canonical shard files
struct ShardMaps {
    data: Mmap,
    directory: Mmap,
}

/// Read-only view of one immutable shard of the inverted index.
///
/// Files are mapped on first access. A missing or empty shard behaves as a
/// shard without terms.
pub struct FullTextShard {
    shard_id: ShardId,
    paths: ShardPaths,
    num_shards: usize,
    directory_size: u64,
    max_results_per_section: usize,
    maps: OnceLock<Option<ShardMaps>>,
}

impl FullTextShard {
    pub fn new(config: &IndexConfig, db_name: &str, shard_id: ShardId) -> Self {
        Self {
            shard_id,
            paths: ShardPaths::new(config, db_name, shard_id),
            num_shards: config.ft_num_shards,
            directory_size: config.directory_size,
            max_results_per_section: config.max_results_per_section,
            maps: OnceLock::new(),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn filename(&self) -> PathBuf {
        self.paths.idx()
    }

    pub fn key_filename(&self) -> PathBuf {
        self.paths.keys()
    }

    pub fn paths(&self) -> &ShardPaths {
        &self.paths
    }

    /// Drop the mapped files so the next lookup sees a freshly merged shard
    pub fn reload(&mut self) {
        self.maps = OnceLock::new();
    }

    fn maps(&self) -> Option<&ShardMaps> {
        self.maps.get_or_init(|| match self.open_maps() {
            Ok(maps) => maps,
            Err(e) => {
                warn!("shard {}: cannot map {}: {}", self.shard_id, self.filename().display(), e);
                None
            }
        })
        .as_ref()
    }

    fn open_maps(&self) -> io::Result<Option<ShardMaps>> {
        let (Some(data), Some(directory)) = (map_file(&self.filename())?, map_file(&self.key_filename())?)
        else {
            return Ok(None);
        };
        Ok(Some(ShardMaps { data, directory }))
    }

    /// Byte offset of the block that would hold `key`, None for an empty slot
    pub fn read_key_pos(&self, key: TermKey) -> Option<u64> {
        let maps = self.maps()?;
        read_directory_slot(&maps.directory, directory_slot(key, self.num_shards, self.directory_size))
    }

    /// Locate `key` and return its entry together with the block it lives in
    fn lookup(&self, key: TermKey) -> Option<(BlockView<'_>, KeyEntry)> {
        let maps = self.maps()?;
        let key_pos = self.read_key_pos(key)?;

        let Some(block) = BlockView::parse(&maps.data, key_pos) else {
            warn!(
                "shard {}: directory slot points at invalid block offset {} (file size {})",
                self.shard_id,
                key_pos,
                maps.data.len()
            );
            return None;
        };

        match block.find(key) {
            Some(entry) => Some((block, entry)),
            None => {
                debug!("shard {}: key {} not in block at {}", self.shard_id, key, key_pos);
                None
            }
        }
    }

    /// Postings of `key`, capped at the configured section size.
    /// Unknown keys and unreadable shards give an empty window.
    pub fn find(&self, key: TermKey) -> ShardWindow {
        let Some((block, entry)) = self.lookup(key) else {
            return ShardWindow::default();
        };

        let Some(bytes) = block.posting_bytes(&entry) else {
            warn!(
                "shard {}: postings of key {} run past end of file",
                self.shard_id, key
            );
            return ShardWindow::default();
        };

        ShardWindow {
            postings: decode_postings(bytes, self.max_results_per_section),
            total_num_results: entry.total_num_results,
        }
    }

    /// Population count of `key` without reading its postings
    pub fn total_num_results(&self, key: TermKey) -> u64 {
        self.lookup(key)
            .map(|(_, entry)| entry.total_num_results)
            .unwrap_or(0)
    }

    /// Size of the shard data file, 0 if it does not exist
    pub fn disk_size(&self) -> u64 {
        fs::metadata(self.filename()).map(|m| m.len()).unwrap_or(0)
    }

    pub fn empty(&self) -> bool {
        self.disk_size() == 0
    }
}

/// Map a file read-only; None when it is missing or empty
fn map_file(path: &Path) -> io::Result<Option<Mmap>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // SAFETY: canonical shard files are immutable once renamed into place
    let map = unsafe { Mmap::map(&file)? };
    Ok(Some(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::format::{TermPostings, encode_block, encode_directory};
    use crate::index::types::{EMPTY_SLOT, Posting};

    fn small_config(dir: &Path) -> IndexConfig {
        IndexConfig {
            ft_num_shards: 1,
            directory_size: 4,
            max_results_per_section: 2,
            ..IndexConfig::with_data_dir(dir)
        }
    }

    /// Write a shard by hand: slot 1 holds keys 1 and 5, slot 2 holds key 6
    fn write_fixture(config: &IndexConfig) {
        let paths = ShardPaths::new(config, "test", 0);
        fs::create_dir_all(paths.dir()).unwrap();

        let block_a = encode_block(&[
            TermPostings {
                key: 1,
                total_num_results: 1,
                postings: vec![Posting::new(42, 10)],
            },
            TermPostings {
                key: 5,
                total_num_results: 7,
                postings: vec![Posting::new(1, 1), Posting::new(2, 2), Posting::new(3, 3)],
            },
        ]);
        let block_b = encode_block(&[TermPostings {
            key: 6,
            total_num_results: 1,
            postings: vec![Posting::new(9, 9)],
        }]);

        let mut data = block_a.clone();
        data.extend(&block_b);
        fs::write(paths.idx(), data).unwrap();

        let slots = [EMPTY_SLOT, 0, block_a.len() as u64, 1_000_000];
        fs::write(paths.keys(), encode_directory(&slots)).unwrap();
    }

    #[test]
    fn test_find_in_shared_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_fixture(&config);

        let shard = FullTextShard::new(&config, "test", 0);
        let window = shard.find(1);
        assert_eq!(window.postings, vec![Posting::new(42, 10)]);
        assert_eq!(window.total_num_results, 1);

        // capped at max_results_per_section
        let window = shard.find(5);
        assert_eq!(window.postings.len(), 2);
        assert_eq!(window.total_num_results, 7);
        assert!(window.is_truncated());

        assert_eq!(shard.find(6).postings, vec![Posting::new(9, 9)]);
        assert_eq!(shard.total_num_results(5), 7);
    }

    #[test]
    fn test_misses_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_fixture(&config);

        let shard = FullTextShard::new(&config, "test", 0);
        // empty slot
        assert!(shard.find(4).is_empty());
        assert_eq!(shard.read_key_pos(4), None);
        // slot 1 block does not contain key 9
        assert!(shard.find(9).is_empty());
        // slot 3 points past the end of the data file
        assert!(shard.find(3).is_empty());
        assert_eq!(shard.total_num_results(3), 0);
    }

    #[test]
    fn test_missing_shard_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());

        let shard = FullTextShard::new(&config, "nothing", 0);
        assert!(shard.find(1).is_empty());
        assert!(shard.empty());
        assert_eq!(shard.disk_size(), 0);
    }

    #[test]
    fn test_fragment_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let paths = ShardPaths::new(&config, "test", 0);
        fs::create_dir_all(paths.dir()).unwrap();

        for n in [10, 2, 7] {
            fs::write(paths.fragment(n), b"").unwrap();
        }
        fs::write(paths.dir().join("fti_test_0.frag.x"), b"").unwrap();
        fs::write(paths.dir().join("fti_test_01.frag.3"), b"").unwrap();

        let numbers: Vec<u64> = paths.fragments().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![2, 7, 10]);
    }
}
