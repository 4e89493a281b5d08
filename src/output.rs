//! Output formatting for search results

use crate::hash_table::HashTable;
use crate::index::types::Posting;
use crate::query::SearchResult;
use serde::Serialize;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// A result row as printed in JSON mode
#[derive(Debug, Serialize)]
pub struct Hit {
    pub id: u64,
    pub score: u32,
    /// First column of the stored document, if the key-value store has it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
struct JsonResponse<'a> {
    total_found: u64,
    results: &'a [Hit],
}

/// Resolve postings to hits, looking up stored documents when a store is given
pub fn to_hits(postings: &[Posting], table: Option<&HashTable>) -> Vec<Hit> {
    postings
        .iter()
        .map(|p| Hit {
            id: p.value,
            score: p.score,
            url: table
                .and_then(|t| t.find_str(p.value))
                .map(|doc| doc.split('\t').next().unwrap_or_default().to_string()),
        })
        .collect()
}

/// Print a search result as one JSON document
pub fn print_json(total_found: u64, hits: &[Hit]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(
        &mut out,
        &JsonResponse {
            total_found,
            results: hits,
        },
    )
    .map_err(io::Error::other)?;
    writeln!(out)
}

/// Print hits one per line: rank, score, id and url
pub fn print_hits(hits: &[Hit], color: bool) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(color));

    for (rank, hit) in hits.iter().enumerate() {
        write!(stdout, "{:>4}. ", rank + 1)?;

        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(stdout, "{:>8}", hit.score)?;
        stdout.reset()?;
        write!(stdout, "  ")?;

        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(stdout, "{:016x}", hit.id)?;
        stdout.reset()?;

        if let Some(url) = &hit.url {
            write!(stdout, "  ")?;
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
            write!(stdout, "{}", url)?;
            stdout.reset()?;
        }
        writeln!(stdout)?;
    }

    Ok(())
}

/// Print a phrase search: the hits followed by a summary line
pub fn print_search_result(
    result: &SearchResult,
    table: Option<&HashTable>,
    color: bool,
) -> io::Result<()> {
    let hits = to_hits(&result.results, table);
    print_hits(&hits, color)?;

    let mut stdout = StandardStream::stdout(color_choice(color));
    stdout.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(
        stdout,
        "{} shown, about {} found",
        hits.len(),
        result.total_found
    )?;
    stdout.reset()
}

/// Print per-word document counts
pub fn print_word_stats(stats: &[(String, u64)], color: bool) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(color));
    for (word, count) in stats {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(stdout, "{}", word)?;
        stdout.reset()?;
        writeln!(stdout, ":{}", count)?;
    }
    Ok(())
}

fn color_choice(color: bool) -> ColorChoice {
    if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}
