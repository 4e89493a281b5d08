//! Moving built shards to and from object storage.
//!
//! A shard is stored as two objects, `full_text/<db>/<shard>.idx` and
//! `full_text/<db>/<shard>.keys`. Transfers are blocking; many shards move
//! in parallel on a rayon pool.

use crate::error::{Error, Result};
use crate::index::shard::FullTextShard;
use crate::index::types::ShardId;
use log::{debug, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Blob storage addressed by string keys
pub trait ObjectStore: Send + Sync {
    /// Store the file at `path` under `key`
    fn upload(&self, key: &str, path: &Path) -> Result<()>;
    /// Fetch `key` into `path`, replacing it
    fn download(&self, key: &str, path: &Path) -> Result<()>;
}

/// Object store backed by a local directory (or a mounted bucket)
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalObjectStore {
    fn upload(&self, key: &str, path: &Path) -> Result<()> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_atomic(path, &target)
    }

    fn download(&self, key: &str, path: &Path) -> Result<()> {
        let source = self.object_path(key);
        if !source.is_file() {
            return Err(Error::Transfer(format!("object {} not found", key)));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_atomic(&source, path)
    }
}

fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    let mut tmp = to.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::copy(from, &tmp)?;
    fs::rename(&tmp, to)?;
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Object key of one file of a full-text shard
pub fn object_key(db_name: &str, shard_id: ShardId, ext: &str) -> String {
    format!("full_text/{}/{}.{}", db_name, shard_id, ext)
}

/// Counters of one transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub shards: usize,
    /// Empty shards not uploaded, or shards missing in the store
    pub skipped: usize,
    pub bytes: u64,
}

/// Upload every non-empty shard
pub fn upload_shards(
    shards: &[FullTextShard],
    db_name: &str,
    store: &dyn ObjectStore,
    threads: usize,
) -> Result<TransferStats> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let done = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);
    let bytes = AtomicU64::new(0);

    pool.install(|| {
        shards.par_iter().try_for_each(|shard| -> Result<()> {
            if shard.empty() {
                skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            let id = shard.shard_id();
            store.upload(&object_key(db_name, id, "idx"), &shard.filename())?;
            store.upload(&object_key(db_name, id, "keys"), &shard.key_filename())?;
            bytes.fetch_add(shard.disk_size(), Ordering::Relaxed);
            done.fetch_add(1, Ordering::Relaxed);
            debug!("uploaded shard {}", id);
            Ok(())
        })
    })?;

    let stats = TransferStats {
        shards: done.into_inner(),
        skipped: skipped.into_inner(),
        bytes: bytes.into_inner(),
    };
    info!("uploaded {} shards ({} bytes), {} empty", stats.shards, stats.bytes, stats.skipped);
    Ok(stats)
}

/// Download every shard present in the store. Shards the store does not
/// have are counted as skipped; the local files are left alone.
pub fn download_shards(
    shards: &[FullTextShard],
    db_name: &str,
    store: &dyn ObjectStore,
    threads: usize,
) -> Result<TransferStats> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let done = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    pool.install(|| {
        shards.par_iter().try_for_each(|shard| -> Result<()> {
            let id = shard.shard_id();
            // Both objects are staged before either local file is replaced,
            // so a failed transfer leaves the old pair intact
            let keys_part = part_path(&shard.key_filename());
            let idx_part = part_path(&shard.filename());
            match store.download(&object_key(db_name, id, "keys"), &keys_part) {
                Err(Error::Transfer(_)) => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                other => other?,
            }
            if let Err(e) = store.download(&object_key(db_name, id, "idx"), &idx_part) {
                let _ = fs::remove_file(&keys_part);
                return Err(e);
            }
            fs::rename(&idx_part, shard.filename())?;
            fs::rename(&keys_part, shard.key_filename())?;
            done.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    })?;

    let stats = TransferStats {
        shards: done.into_inner(),
        skipped: skipped.into_inner(),
        bytes: shards.iter().map(|s| s.disk_size()).sum(),
    };
    info!("downloaded {} shards, {} not in store", stats.shards, stats.skipped);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::FullTextShardBuilder;
    use crate::index::types::{IndexConfig, Posting};

    fn config(dir: &Path) -> IndexConfig {
        IndexConfig {
            ft_num_shards: 3,
            directory_size: 16,
            ..IndexConfig::with_data_dir(dir)
        }
    }

    fn shards(config: &IndexConfig) -> Vec<FullTextShard> {
        (0..config.ft_num_shards)
            .map(|i| FullTextShard::new(config, "db", i))
            .collect()
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("web", 12, "idx"), "full_text/web/12.idx");
    }

    #[test]
    fn test_upload_skips_empty_then_download() {
        let source = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();

        let src_config = config(source.path());
        let mut builder = FullTextShardBuilder::new(&src_config, "db", 1);
        builder.add(5, 50, 3);
        builder.write().unwrap();
        builder.merge().unwrap();

        let store = LocalObjectStore::new(bucket.path());
        let up = upload_shards(&shards(&src_config), "db", &store, 2).unwrap();
        assert_eq!(up.shards, 1);
        assert_eq!(up.skipped, 2);
        assert!(bucket.path().join("full_text/db/1.idx").is_file());

        let dst_config = config(target.path());
        let down = download_shards(&shards(&dst_config), "db", &store, 2).unwrap();
        assert_eq!(down.shards, 1);
        assert_eq!(down.skipped, 2);

        let shard = FullTextShard::new(&dst_config, "db", 1);
        assert_eq!(shard.find(5).postings, vec![Posting::new(50, 3)]);
    }

    #[test]
    fn test_failed_download_keeps_local_shard() {
        let local = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let config = config(local.path());

        let mut builder = FullTextShardBuilder::new(&config, "db", 0);
        builder.add(5, 50, 3);
        builder.write().unwrap();
        builder.merge().unwrap();

        // the store holds a directory file but no data file for shard 0
        let keys_object = bucket.path().join(object_key("db", 0, "keys"));
        fs::create_dir_all(keys_object.parent().unwrap()).unwrap();
        fs::write(&keys_object, [0u8; 8]).unwrap();

        let store = LocalObjectStore::new(bucket.path());
        assert!(download_shards(&shards(&config)[..1], "db", &store, 1).is_err());

        let shard = FullTextShard::new(&config, "db", 0);
        assert_eq!(shard.find(5).postings, vec![Posting::new(50, 3)]);
        assert!(!part_path(&shard.key_filename()).exists());
    }

    #[test]
    fn test_missing_object() {
        let bucket = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(bucket.path());
        let err = store
            .download("full_text/none/0.idx", &bucket.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
    }
}
