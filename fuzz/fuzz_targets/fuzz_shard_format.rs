#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shardex::index::format::{BlockView, PosIndex, decode_postings, read_directory_slot, read_fragment_record};

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    offset: u64,
    key: u64,
    slot: u64,
    data: &'a [u8],
}

fuzz_target!(|input: Input| {
    // Corrupt shard bytes must decode to "not found", never panic
    if let Some(block) = BlockView::parse(input.data, input.offset) {
        if let Some(entry) = block.find(input.key) {
            if let Some(bytes) = block.posting_bytes(&entry) {
                let _ = decode_postings(bytes, 1000);
            }
        }
        for entry in block.entries() {
            let _ = block.posting_bytes(&entry);
        }
    }
    let _ = read_directory_slot(input.data, input.slot);
    let _ = PosIndex::decode(input.data);
    let mut reader = input.data;
    while let Ok(Some(_)) = read_fragment_record(&mut reader) {}
});
