//! On-disk layouts, encoded and decoded field by field.
//!
//! All integers are fixed width little-endian.
//!
//! ## Shard file (`fti_<db>_<i>.idx`)
//!
//! A sequence of blocks, one per non-empty directory slot:
//!
//! ```text
//! [8: num_keys]
//! [num_keys * 8: keys]
//! [num_keys * 8: data_offset]        relative to the block's data section
//! [num_keys * 8: data_length]        bytes
//! [num_keys * 8: total_num_results]
//! [data: posting lists, 12 bytes per posting (value u64, score u32)]
//! ```
//!
//! ## Directory file (`fti_<db>_<i>.keys`)
//!
//! `directory_size` u64 slots; slot `(key / num_shards) % directory_size` holds the byte
//! offset of the block containing every key of that slot, or [`EMPTY_SLOT`].
//!
//! ## Fragment file (`fti_<db>_<i>.frag.<n>`)
//!
//! Repeated `[key u64][total u64][count u64][count * posting]` records.
//!
//! ## Key-value files
//!
//! `ht_<db>_<i>.pos`: `[count][keys...][offsets...][lengths...]`, keys
//! ascending; `ht_<db>_<i>.data`: payload blob area; `ht_<db>_<i>.frag`:
//! repeated `[key u64][len u64][bytes]` records.

use crate::index::types::{EMPTY_SLOT, KeyEntry, Posting, TermKey};
use crate::utils::{read_u32_le, read_u64_le, read_u64_or_eof, u32_at, u64_at, write_u32_le, write_u64_le};
use std::io::{self, Read, Write};

/// Size of the `num_keys` field plus the four parallel arrays for `n` keys
#[inline]
pub fn block_header_len(num_keys: u64) -> Option<u64> {
    num_keys.checked_mul(32)?.checked_add(8)
}

/// One term's postings ready to be written into a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermPostings {
    pub key: TermKey,
    pub total_num_results: u64,
    /// Ascending by value
    pub postings: Vec<Posting>,
}

/// Append an encoded posting to `buf`
#[inline]
pub fn encode_posting(buf: &mut Vec<u8>, posting: &Posting) {
    buf.extend_from_slice(&posting.value.to_le_bytes());
    buf.extend_from_slice(&posting.score.to_le_bytes());
}

/// Decode up to `max` postings from `bytes`; a trailing partial record is ignored
pub fn decode_postings(bytes: &[u8], max: usize) -> Vec<Posting> {
    bytes
        .chunks_exact(Posting::SIZE)
        .take(max)
        .filter_map(|chunk| {
            Some(Posting {
                value: u64_at(chunk, 0)?,
                score: u32_at(chunk, 8)?,
            })
        })
        .collect()
}

/// Encode a block holding `terms`
pub fn encode_block(terms: &[TermPostings]) -> Vec<u8> {
    let num_keys = terms.len();
    let data_len: usize = terms.iter().map(|t| t.postings.len() * Posting::SIZE).sum();
    let mut buf = Vec::with_capacity(8 + num_keys * 32 + data_len);

    buf.extend_from_slice(&(num_keys as u64).to_le_bytes());
    for term in terms {
        buf.extend_from_slice(&term.key.to_le_bytes());
    }

    let mut offset = 0u64;
    for term in terms {
        buf.extend_from_slice(&offset.to_le_bytes());
        offset += (term.postings.len() * Posting::SIZE) as u64;
    }
    for term in terms {
        buf.extend_from_slice(&((term.postings.len() * Posting::SIZE) as u64).to_le_bytes());
    }
    for term in terms {
        buf.extend_from_slice(&term.total_num_results.to_le_bytes());
    }

    for term in terms {
        for posting in &term.postings {
            encode_posting(&mut buf, posting);
        }
    }

    buf
}

/// Borrowed view of a block inside a shard file
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    buf: &'a [u8],
    start: usize,
    num_keys: usize,
}

impl<'a> BlockView<'a> {
    /// Parse the block header at `offset`; None if it does not fit in `buf`
    pub fn parse(buf: &'a [u8], offset: u64) -> Option<Self> {
        let start = usize::try_from(offset).ok()?;
        let num_keys = u64_at(buf, start)?;
        let header_len = usize::try_from(block_header_len(num_keys)?).ok()?;
        if start.checked_add(header_len)? > buf.len() {
            return None;
        }
        Some(Self {
            buf,
            start,
            num_keys: num_keys as usize,
        })
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Absolute position of the block's data section
    pub fn data_start(&self) -> usize {
        self.start + 8 + self.num_keys * 32
    }

    fn field(&self, array: usize, idx: usize) -> u64 {
        // parse() checked that the whole header is in bounds
        u64_at(self.buf, self.start + 8 + (array * self.num_keys + idx) * 8).unwrap_or(0)
    }

    /// Index of `key` in the key array
    pub fn position(&self, key: TermKey) -> Option<usize> {
        (0..self.num_keys).find(|&i| self.field(0, i) == key)
    }

    /// Directory entry of the key at `idx`
    pub fn entry(&self, idx: usize) -> KeyEntry {
        KeyEntry {
            key: self.field(0, idx),
            data_offset: self.field(1, idx),
            data_length: self.field(2, idx),
            total_num_results: self.field(3, idx),
        }
    }

    /// Directory entry for `key`, None if the key is not in this block
    pub fn find(&self, key: TermKey) -> Option<KeyEntry> {
        self.position(key).map(|i| self.entry(i))
    }

    /// Raw posting bytes of `entry`, None if they run past the buffer
    pub fn posting_bytes(&self, entry: &KeyEntry) -> Option<&'a [u8]> {
        let begin = self
            .data_start()
            .checked_add(usize::try_from(entry.data_offset).ok()?)?;
        let end = begin.checked_add(usize::try_from(entry.data_length).ok()?)?;
        self.buf.get(begin..end)
    }

    /// Every entry of the block, in key array order
    pub fn entries(&self) -> impl Iterator<Item = KeyEntry> + '_ {
        (0..self.num_keys).map(move |i| self.entry(i))
    }

    /// Total encoded size of the block, None if the lengths overflow
    pub fn encoded_len(&self) -> Option<usize> {
        let data = self
            .entries()
            .try_fold(0u64, |acc, e| acc.checked_add(e.data_length))?;
        (self.data_start() - self.start).checked_add(usize::try_from(data).ok()?)
    }
}

/// Slot of `key` in a directory of `directory_size` slots.
///
/// Every key of a shard shares `key % num_shards`, so the slot uses the
/// quotient; otherwise a common factor of the two sizes leaves most
/// slots of each shard unused.
#[inline]
pub fn directory_slot(key: TermKey, num_shards: usize, directory_size: u64) -> u64 {
    (key / num_shards.max(1) as u64) % directory_size
}

/// Encode a directory file
pub fn encode_directory(slots: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(slots.len() * 8);
    for slot in slots {
        buf.extend_from_slice(&slot.to_le_bytes());
    }
    buf
}

/// Block offset stored in `slot`, None for empty or out-of-range slots
pub fn read_directory_slot(buf: &[u8], slot: u64) -> Option<u64> {
    let pos = usize::try_from(slot).ok()?.checked_mul(8)?;
    match u64_at(buf, pos)? {
        EMPTY_SLOT => None,
        offset => Some(offset),
    }
}

/// Write one fragment record
pub fn write_fragment_record<W: Write>(
    writer: &mut W,
    key: TermKey,
    total_num_results: u64,
    postings: &[Posting],
) -> io::Result<()> {
    write_u64_le(writer, key)?;
    write_u64_le(writer, total_num_results)?;
    write_u64_le(writer, postings.len() as u64)?;
    for posting in postings {
        write_u64_le(writer, posting.value)?;
        write_u32_le(writer, posting.score)?;
    }
    Ok(())
}

/// Read the next fragment record, None at a clean end of file
pub fn read_fragment_record<R: Read>(reader: &mut R) -> io::Result<Option<TermPostings>> {
    let Some(key) = read_u64_or_eof(reader)? else {
        return Ok(None);
    };
    let total_num_results = read_u64_le(reader)?;
    let count = read_u64_le(reader)?;

    let mut postings = Vec::with_capacity(count.min(1 << 20) as usize);
    for _ in 0..count {
        let value = read_u64_le(reader)?;
        let score = read_u32_le(reader)?;
        postings.push(Posting { value, score });
    }

    Ok(Some(TermPostings {
        key,
        total_num_results,
        postings,
    }))
}

/// Sorted key index of a key-value shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosIndex {
    pub keys: Vec<u64>,
    pub offsets: Vec<u64>,
    pub lengths: Vec<u64>,
}

impl PosIndex {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `(offset, length)` of `key` in the data file, by binary search
    pub fn lookup(&self, key: u64) -> Option<(u64, u64)> {
        let idx = self.keys.binary_search(&key).ok()?;
        Some((self.offsets[idx], self.lengths[idx]))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.keys.len() * 24);
        buf.extend_from_slice(&(self.keys.len() as u64).to_le_bytes());
        for array in [&self.keys, &self.offsets, &self.lengths] {
            for v in array.iter() {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }

    /// Decode a pos file; None when the header disagrees with the length
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let count = usize::try_from(u64_at(buf, 0)?).ok()?;
        let expected = count.checked_mul(24)?.checked_add(8)?;
        if buf.len() != expected {
            return None;
        }
        let read_array = |array: usize| -> Vec<u64> {
            (0..count)
                .filter_map(|i| u64_at(buf, 8 + (array * count + i) * 8))
                .collect()
        };
        let index = Self {
            keys: read_array(0),
            offsets: read_array(1),
            lengths: read_array(2),
        };
        if !index.keys.windows(2).all(|w| w[0] < w[1]) {
            return None;
        }
        Some(index)
    }
}

/// Write one key-value fragment record
pub fn write_kv_record<W: Write>(writer: &mut W, key: u64, payload: &[u8]) -> io::Result<()> {
    write_u64_le(writer, key)?;
    write_u64_le(writer, payload.len() as u64)?;
    writer.write_all(payload)
}

/// Read the next key-value fragment record, None at a clean end of file
pub fn read_kv_record<R: Read>(reader: &mut R) -> io::Result<Option<(u64, Vec<u8>)>> {
    let Some(key) = read_u64_or_eof(reader)? else {
        return Ok(None);
    };
    let len = read_u64_le(reader)?;
    let mut payload = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated key-value record",
        ));
    }
    Ok(Some((key, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn term(key: u64, total: u64, values: &[(u64, u32)]) -> TermPostings {
        TermPostings {
            key,
            total_num_results: total,
            postings: values.iter().map(|&(v, s)| Posting::new(v, s)).collect(),
        }
    }

    #[test]
    fn test_block_layout_offsets() {
        let terms = vec![term(7, 2, &[(1, 10), (5, 3)]), term(42, 9, &[(2, 1)])];
        let buf = encode_block(&terms);

        assert_eq!(buf.len(), 8 + 2 * 32 + 3 * Posting::SIZE);
        assert_eq!(u64_at(&buf, 0), Some(2));
        // keys, then offsets
        assert_eq!(u64_at(&buf, 8), Some(7));
        assert_eq!(u64_at(&buf, 16), Some(42));
        assert_eq!(u64_at(&buf, 24), Some(0));
        assert_eq!(u64_at(&buf, 32), Some(24));

        let block = BlockView::parse(&buf, 0).unwrap();
        let entry = block.find(42).unwrap();
        assert_eq!(entry.data_offset, 24);
        assert_eq!(entry.data_length, 12);
        assert_eq!(entry.total_num_results, 9);
        assert_eq!(block.encoded_len(), Some(buf.len()));

        let postings = decode_postings(block.posting_bytes(&entry).unwrap(), usize::MAX);
        assert_eq!(postings, vec![Posting::new(2, 1)]);
        assert!(block.find(8).is_none());
    }

    #[test]
    fn test_block_at_offset_and_truncated_header() {
        let mut buf = vec![0xAB; 5];
        buf.extend(encode_block(&[term(3, 1, &[(9, 9)])]));

        let block = BlockView::parse(&buf, 5).unwrap();
        assert_eq!(block.find(3).unwrap().total_num_results, 1);

        // num_keys claims more keys than the file holds
        let mut bad = Vec::new();
        bad.extend_from_slice(&1000u64.to_le_bytes());
        bad.extend_from_slice(&[0; 16]);
        assert!(BlockView::parse(&bad, 0).is_none());
        assert!(BlockView::parse(&bad, 4096).is_none());
    }

    #[test]
    fn test_posting_window_cap() {
        let mut buf = Vec::new();
        for v in 0..10u64 {
            encode_posting(&mut buf, &Posting::new(v, v as u32));
        }
        buf.push(0xFF);
        assert_eq!(decode_postings(&buf, 3).len(), 3);
        assert_eq!(decode_postings(&buf, 100).len(), 10);
    }

    #[test]
    fn test_slots_spread_within_a_shard() {
        // 256 shards and 16384 slots share a factor of 256
        let (num_shards, directory_size) = (256usize, 16384u64);
        let mut used = std::collections::HashSet::new();
        let mut key = 0u64;
        for _ in 0..8192 {
            used.insert(directory_slot(key, num_shards, directory_size));
            key += num_shards as u64;
        }
        assert_eq!(used.len(), 8192);
        assert!(used.iter().all(|&slot| slot < directory_size));
        assert_eq!(directory_slot(13, 1, 8), 5);
    }

    #[test]
    fn test_directory_slots() {
        let buf = encode_directory(&[EMPTY_SLOT, 16, EMPTY_SLOT]);
        assert_eq!(read_directory_slot(&buf, 0), None);
        assert_eq!(read_directory_slot(&buf, 1), Some(16));
        assert_eq!(read_directory_slot(&buf, 3), None);
    }

    #[test]
    fn test_fragment_records() {
        let mut buf = Vec::new();
        write_fragment_record(&mut buf, 11, 2, &[Posting::new(4, 1), Posting::new(3, 2)]).unwrap();
        write_fragment_record(&mut buf, 12, 0, &[]).unwrap();

        let mut cursor = Cursor::new(buf);
        let first = read_fragment_record(&mut cursor).unwrap().unwrap();
        assert_eq!(first.key, 11);
        assert_eq!(first.postings.len(), 2);
        let second = read_fragment_record(&mut cursor).unwrap().unwrap();
        assert!(second.postings.is_empty());
        assert!(read_fragment_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_pos_index_rejects_bad_length() {
        let index = PosIndex {
            keys: vec![1, 5, 9],
            offsets: vec![0, 3, 8],
            lengths: vec![3, 5, 1],
        };
        let buf = index.encode();
        let decoded = PosIndex::decode(&buf).unwrap();
        assert_eq!(decoded.lookup(5), Some((3, 5)));
        assert_eq!(decoded.lookup(6), None);

        assert!(PosIndex::decode(&buf[..buf.len() - 1]).is_none());
    }

    #[test]
    fn test_kv_record_truncated() {
        let mut buf = Vec::new();
        write_kv_record(&mut buf, 123, b"hejsan").unwrap();
        let mut cursor = Cursor::new(buf.clone());
        assert_eq!(
            read_kv_record(&mut cursor).unwrap(),
            Some((123, b"hejsan".to_vec()))
        );

        let mut cut = Cursor::new(buf[..buf.len() - 2].to_vec());
        assert!(read_kv_record(&mut cut).is_err());
    }
}
