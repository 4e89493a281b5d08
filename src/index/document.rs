//! Documents and the tab-separated document source.
//!
//! One line per document: column 0 is the URL, other columns hold text.
//! The columns to index and their score weights come from
//! [`IndexConfig::text_columns`] and [`IndexConfig::column_weights`].

use crate::error::Result;
use crate::index::types::{DocValue, IndexConfig};
use crate::utils::hash_word;
use memchr::memchr_iter;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A text column of a document together with its score weight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub column: usize,
    pub text: String,
    pub weight: u32,
}

/// A document ready for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable document key, the hash of the URL
    pub key: DocValue,
    pub url: String,
    pub fields: Vec<Field>,
    /// Stored for lookups through the key-value store
    pub payload: String,
}

impl Document {
    /// Build a document keyed by the hash of `url`
    pub fn new(url: impl Into<String>, fields: Vec<Field>, payload: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            key: hash_word(&url),
            url,
            fields,
            payload: payload.into(),
        }
    }
}

/// Parse one TSV line. Lines without a URL give None.
pub fn parse_tsv_line(line: &str, text_columns: &[usize], weights: &[u32]) -> Option<Document> {
    let line = line.trim_end_matches(['\r', '\n']);
    let bytes = line.as_bytes();

    let mut columns = Vec::with_capacity(8);
    let mut start = 0;
    for tab in memchr_iter(b'\t', bytes) {
        columns.push(&line[start..tab]);
        start = tab + 1;
    }
    columns.push(&line[start..]);

    let url = columns[0];
    if url.is_empty() {
        return None;
    }

    let fields = text_columns
        .iter()
        .zip(weights)
        .filter_map(|(&column, &weight)| {
            let text = columns.get(column)?;
            (!text.is_empty()).then(|| Field {
                column,
                text: (*text).to_string(),
                weight,
            })
        })
        .collect();

    Some(Document::new(url, fields, line))
}

/// Iterator over the documents of a TSV stream
pub struct TsvDocuments<R> {
    reader: R,
    text_columns: Vec<usize>,
    weights: Vec<u32>,
    line: Vec<u8>,
}

impl<R: BufRead> TsvDocuments<R> {
    pub fn new(reader: R, config: &IndexConfig) -> Self {
        Self {
            reader,
            text_columns: config.text_columns.clone(),
            weights: config.column_weights.clone(),
            line: Vec::new(),
        }
    }
}

impl TsvDocuments<BufReader<File>> {
    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::with_capacity(1 << 20, file), config))
    }
}

impl<R: BufRead> Iterator for TsvDocuments<R> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    // crawled text carries stray bytes; keep the line
                    let line = String::from_utf8_lossy(&self.line);
                    if let Some(doc) = parse_tsv_line(&line, &self.text_columns, &self.weights) {
                        return Some(Ok(doc));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
