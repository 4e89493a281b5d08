use crate::hash_table::HashTable;
use crate::index::shard::ShardPaths;
use crate::index::types::IndexConfig;
use crate::query::FullTextIndex;
use anyhow::{Context, Result};
use std::path::Path;

/// Display index statistics
pub fn show_stats(config: &IndexConfig, db_name: &str) -> Result<()> {
    let index = FullTextIndex::new(config, db_name);
    let table = HashTable::new(config, db_name);

    let mut pending = 0;
    for shard_id in 0..config.ft_num_shards {
        pending += ShardPaths::new(config, db_name, shard_id)
            .fragments()
            .with_context(|| format!("Failed to list fragments of shard {}", shard_id))?
            .len();
    }

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Database:         {}", db_name);
    for (i, dir) in config.data_dirs.iter().enumerate() {
        println!("Mount point {}:    {}", i, dir.display());
    }
    println!(
        "Full-text shards: {} of {} built",
        index.num_built_shards(),
        config.ft_num_shards
    );
    println!("Pending fragments: {}", pending);
    println!("Directory size:   {} slots", config.directory_size);
    println!("Stored documents: {}", table.len());

    println!();
    println!("Full-text size:   {}", format_size(index.disk_size()));
    let kv_size: u64 = config
        .data_dirs
        .iter()
        .map(|d| dir_size(&d.join("hash_table")).unwrap_or(0))
        .sum();
    println!("Key-value size:   {}", format_size(kv_size));

    // Largest shards show skew in the term hash
    let mut sizes: Vec<(usize, u64)> = index
        .shards()
        .iter()
        .map(|s| (s.shard_id(), s.disk_size()))
        .filter(|&(_, size)| size > 0)
        .collect();
    sizes.sort_by(|a, b| b.1.cmp(&a.1));

    if !sizes.is_empty() {
        println!();
        println!("Largest shards:");
        for (shard_id, size) in sizes.iter().take(5) {
            println!("  {:5} {}", shard_id, format_size(*size));
        }
    }

    Ok(())
}

/// Calculate directory size recursively
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                size += entry.metadata()?.len();
            } else if path.is_dir() {
                size += dir_size(&path)?;
            }
        }
    }
    Ok(size)
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
