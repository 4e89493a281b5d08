use crate::error::{Error, Result};
use crate::index::format::{PosIndex, read_kv_record, write_kv_record};
use crate::index::merger::MemoryCounter;
use crate::index::types::{IndexConfig, ShardId};
use log::debug;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Per-record bookkeeping cost on top of the payload
const RECORD_OVERHEAD: usize = 16;

/// File locations of one key-value shard
#[derive(Debug, Clone)]
pub struct HashTablePaths {
    dir: PathBuf,
    stem: String,
}

impl HashTablePaths {
    pub fn new(config: &IndexConfig, db_name: &str, shard_id: ShardId) -> Self {
        Self {
            dir: config.mount_point(shard_id).join("hash_table"),
            stem: format!("ht_{}_{}", db_name, shard_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append-only log of unsorted records
    pub fn fragment(&self) -> PathBuf {
        self.dir.join(format!("{}.frag", self.stem))
    }

    /// Payload blob area
    pub fn data(&self) -> PathBuf {
        self.dir.join(format!("{}.data", self.stem))
    }

    /// Sorted keys with payload offsets and lengths
    pub fn pos(&self) -> PathBuf {
        self.dir.join(format!("{}.pos", self.stem))
    }
}

/// Write buffer and sort logic for one key-value shard
pub struct HashTableShardBuilder {
    shard_id: ShardId,
    paths: HashTablePaths,
    cache_limit: usize,
    cache: Vec<(u64, Vec<u8>)>,
    cache_bytes: usize,
    memory: Option<MemoryCounter>,
}

impl HashTableShardBuilder {
    pub fn new(config: &IndexConfig, db_name: &str, shard_id: ShardId) -> Self {
        Self {
            shard_id,
            paths: HashTablePaths::new(config, db_name, shard_id),
            cache_limit: config.ht_cache_limit,
            cache: Vec::new(),
            cache_bytes: 0,
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: MemoryCounter) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn paths(&self) -> &HashTablePaths {
        &self.paths
    }

    pub fn add(&mut self, key: u64, payload: &[u8]) {
        let bytes = payload.len() + RECORD_OVERHEAD;
        self.cache.push((key, payload.to_vec()));
        self.cache_bytes += bytes;
        if let Some(memory) = &self.memory {
            memory.add(bytes);
        }
    }

    /// True when buffered payload bytes reached the cache limit
    pub fn full(&self) -> bool {
        self.cache_bytes >= self.cache_limit
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        if let Some(memory) = &self.memory {
            memory.sub(self.cache_bytes);
        }
        self.cache_bytes = 0;
    }

    /// Append the cache to the shard's fragment log and clear it
    pub fn write(&mut self) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(self.paths.dir())?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.fragment())?;
        let mut writer = BufWriter::new(file);
        for (key, payload) in &self.cache {
            write_kv_record(&mut writer, *key, payload)?;
        }
        writer.flush()?;

        debug!("kv shard {}: appended {} records", self.shard_id, self.cache.len());
        self.clear_cache();
        Ok(())
    }

    /// Flush the cache, then fold the fragment log into the sorted shard.
    /// A key written more than once keeps its last payload.
    pub fn sort(&mut self) -> Result<()> {
        self.write()?;

        let frag_path = self.paths.fragment();
        let file = match File::open(&frag_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut latest: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        let mut reader = BufReader::new(file);
        while let Some((key, payload)) =
            read_kv_record(&mut reader).map_err(|e| Error::corrupt(&frag_path, e.to_string()))?
        {
            latest.insert(key, payload);
        }

        let mut entries = self.read_pos()?;
        let data_path = self.paths.data();
        let data_tmp = tmp_path(&data_path);
        let mut offset = match fs::copy(&data_path, &data_tmp) {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                File::create(&data_tmp)?;
                0
            }
            Err(e) => return Err(e.into()),
        };

        {
            let file = OpenOptions::new().append(true).open(&data_tmp)?;
            let mut writer = BufWriter::new(file);
            for (key, payload) in &latest {
                writer.write_all(payload)?;
                entries.insert(*key, (offset, payload.len() as u64));
                offset += payload.len() as u64;
            }
            writer.flush()?;
        }

        self.write_pos(&entries)?;
        fs::rename(&data_tmp, &data_path)?;
        fs::rename(tmp_path(&self.paths.pos()), self.paths.pos())?;
        fs::remove_file(&frag_path)?;

        debug!(
            "kv shard {}: sorted {} new records, {} keys total",
            self.shard_id,
            latest.len(),
            entries.len()
        );
        Ok(())
    }

    /// Rewrite the payload blob keeping only payloads the index points at
    pub fn optimize(&mut self) -> Result<()> {
        let entries = self.read_pos()?;
        if entries.is_empty() {
            return Ok(());
        }

        let data_path = self.paths.data();
        let mut data = File::open(&data_path)?;
        let data_len = data.metadata()?.len();
        let data_tmp = tmp_path(&data_path);

        let mut compacted = BTreeMap::new();
        {
            let mut writer = BufWriter::new(File::create(&data_tmp)?);
            let mut offset = 0u64;
            let mut buf = Vec::new();
            for (&key, &(old_offset, len)) in &entries {
                if old_offset.checked_add(len).is_none_or(|end| end > data_len) {
                    return Err(Error::corrupt(
                        &data_path,
                        format!("payload of key {} past end of blob", key),
                    ));
                }
                buf.resize(len as usize, 0);
                data.seek(SeekFrom::Start(old_offset))?;
                data.read_exact(&mut buf)?;
                writer.write_all(&buf)?;
                compacted.insert(key, (offset, len));
                offset += len;
            }
            writer.flush()?;
        }

        self.write_pos(&compacted)?;
        fs::rename(&data_tmp, &data_path)?;
        fs::rename(tmp_path(&self.paths.pos()), self.paths.pos())?;
        Ok(())
    }

    /// Drop the cache and every file of the shard
    pub fn truncate(&mut self) -> Result<()> {
        self.clear_cache();
        for path in [self.paths.fragment(), self.paths.data(), self.paths.pos()] {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn read_pos(&self) -> Result<BTreeMap<u64, (u64, u64)>> {
        let pos_path = self.paths.pos();
        let buf = match fs::read(&pos_path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let pos = PosIndex::decode(&buf)
            .ok_or_else(|| Error::corrupt(&pos_path, "inconsistent position index"))?;

        Ok(pos
            .keys
            .iter()
            .zip(pos.offsets.iter().zip(&pos.lengths))
            .map(|(&key, (&offset, &len))| (key, (offset, len)))
            .collect())
    }

    /// Write the position index to its tmp path; the caller renames it
    fn write_pos(&self, entries: &BTreeMap<u64, (u64, u64)>) -> Result<()> {
        let mut pos = PosIndex::default();
        for (&key, &(offset, len)) in entries {
            pos.keys.push(key);
            pos.offsets.push(offset);
            pos.lengths.push(len);
        }
        fs::write(tmp_path(&self.paths.pos()), pos.encode())?;
        Ok(())
    }
}

impl Drop for HashTableShardBuilder {
    fn drop(&mut self) {
        if let Some(memory) = &self.memory {
            memory.sub(self.cache_bytes);
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
