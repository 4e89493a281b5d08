use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::LevelFilter;
use shardex::hash_table::HashTable;
use shardex::index::runner::collect_input_files;
use shardex::index::{IndexConfig, IndexerRunner};
use shardex::query::FullTextIndex;
use shardex::transfer::LocalObjectStore;
use shardex::{output, utils};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shardex")]
#[command(about = "Sharded full-text index and document store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database name; shard files are named after it
    #[arg(long, global = true, default_value = "main")]
    db: String,

    /// Data directory, overrides the config file (repeat for mount points)
    #[arg(long = "data-dir", global = true)]
    data_dirs: Vec<PathBuf>,

    /// More output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Index TSV files (url, then text columns)
    Index {
        /// Files or directories to index; reads stdin when none are given
        paths: Vec<PathBuf>,

        /// This node's partition
        #[arg(long, default_value_t = 0)]
        partition: usize,

        /// Total number of partitions
        #[arg(long, default_value_t = 1)]
        partitions: usize,

        /// Remove existing shards first
        #[arg(long)]
        fresh: bool,
    },
    /// Look up a single word
    Word {
        word: String,
    },
    /// Search for documents containing all words of a phrase
    Search {
        phrase: Vec<String>,

        /// Maximum results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Print JSON
        #[arg(long)]
        json: bool,

        /// Show document counts per word instead of results
        #[arg(long)]
        word_stats: bool,
    },
    /// Print the stored document of a key (decimal or 0x-prefixed hex)
    Lookup {
        key: String,
    },
    /// Merge pending fragments of every shard
    Merge,
    /// Show index statistics
    Stats,
    /// Remove shard files
    Truncate {
        /// Only remove unmerged fragments
        #[arg(long)]
        cache_only: bool,
    },
    /// Copy built shards into an object store directory
    Upload {
        store: PathBuf,
    },
    /// Fetch shards from an object store directory
    Download {
        store: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let mut config = utils::load_config()?;
    if !cli.data_dirs.is_empty() {
        config.data_dirs = cli.data_dirs.clone();
    }
    let db = cli.db.as_str();

    match cli.command {
        Commands::Index {
            paths,
            partition,
            partitions,
            fresh,
        } => {
            run_index(&config, db, &paths, partition, partitions, fresh)?;
        }
        Commands::Word { word } => {
            let index = FullTextIndex::new(&config, db);
            let table = HashTable::new(&config, db);
            let hits = output::to_hits(&index.search_word(&word), Some(&table));
            output::print_hits(&hits, true)?;
        }
        Commands::Search {
            phrase,
            limit,
            json,
            word_stats,
        } => {
            let phrase = phrase.join(" ");
            let index = FullTextIndex::new(&config, db);
            if word_stats {
                output::print_word_stats(&index.word_stats(&phrase), true)?;
                return Ok(());
            }

            let result = index.search_phrase(&phrase, limit);
            let table = HashTable::new(&config, db);
            if json {
                let hits = output::to_hits(&result.results, Some(&table));
                output::print_json(result.total_found, &hits)?;
            } else {
                output::print_search_result(&result, Some(&table), true)?;
            }
        }
        Commands::Lookup { key } => {
            let key = parse_key(&key)?;
            let table = HashTable::new(&config, db);
            match table.find_str(key) {
                Some(doc) => println!("{}", doc),
                None => bail!("no document stored under {}", key),
            }
        }
        Commands::Merge => {
            let runner = IndexerRunner::new(&config, db)?;
            let stats = runner.merge()?;
            println!(
                "Merged {} fragments ({} terms)",
                stats.fragments_merged, stats.terms
            );
        }
        Commands::Stats => {
            shardex::index::stats::show_stats(&config, db)?;
        }
        Commands::Truncate { cache_only } => {
            let mut runner = IndexerRunner::new(&config, db)?;
            if cache_only {
                runner.truncate_cache()?;
                println!("Removed pending fragments of '{}'", db);
            } else {
                runner.truncate()?;
                println!("Removed index '{}'", db);
            }
        }
        Commands::Upload { store } => {
            let index = FullTextIndex::new(&config, db);
            let stats = index
                .upload(&LocalObjectStore::new(store))
                .context("Upload failed")?;
            println!("Uploaded {} shards ({} empty)", stats.shards, stats.skipped);
        }
        Commands::Download { store } => {
            let mut index = FullTextIndex::new(&config, db);
            let stats = index
                .download(&LocalObjectStore::new(store))
                .context("Download failed")?;
            println!("Downloaded {} shards ({} missing)", stats.shards, stats.skipped);
        }
    }

    Ok(())
}

fn run_index(
    config: &IndexConfig,
    db: &str,
    paths: &[PathBuf],
    partition: usize,
    partitions: usize,
    fresh: bool,
) -> Result<()> {
    if partitions > 0 && partition >= partitions {
        bail!("partition {} out of range for {} partitions", partition, partitions);
    }

    let mut runner = IndexerRunner::new(config, db)?.with_progress(true);
    if fresh {
        runner.truncate()?;
    }

    let stats = if paths.is_empty() {
        runner.index_reader(io::stdin().lock(), partition, partitions)?
    } else {
        let files = collect_input_files(paths)?;
        if files.is_empty() {
            bail!("no .tsv or .txt files found");
        }
        runner.run(&files, partition, partitions)?
    };

    println!(
        "Indexed {} documents ({} skipped) into '{}'",
        stats.documents, stats.skipped, db
    );
    if stats.merge.truncated_terms > 0 {
        println!(
            "{} terms hit the per-term posting cap",
            stats.merge.truncated_terms
        );
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<u64> {
    let parsed = match key.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => key.parse(),
    };
    parsed.with_context(|| format!("invalid key '{}'", key))
}
