/// Select the slice of `items` assigned to `partition` out of `total`.
///
/// Items are split into `total` contiguous runs of near-equal size; the
/// first `len % total` partitions get one extra item. A `total` of 0 or 1
/// returns everything.
pub fn make_partition<T: Clone>(items: &[T], partition: usize, total: usize) -> Vec<T> {
    if total <= 1 {
        return items.to_vec();
    }
    if partition >= total {
        return Vec::new();
    }

    let base = items.len() / total;
    let extra = items.len() % total;
    let start = partition * base + partition.min(extra);
    let len = base + usize::from(partition < extra);

    items[start..start + len].to_vec()
}

/// True when a document key belongs to `partition` out of `total`
#[inline]
pub fn in_partition(key: u64, partition: usize, total: usize) -> bool {
    total <= 1 || key % total as u64 == partition as u64
}
