//! In-memory chunk sort: most-significant-byte radix sort driven by an
//! explicit frame stack.
//!
//! Only the `RecordMeta` handles move; record bytes stay put in the arena.
//! Each frame refines one bucket of the parent partition by one byte of
//! depth, so the stack never holds more than one frame per live bucket and
//! peak depth is bounded by key length, not record count. Small partitions
//! drop to insertion sort, which also preserves stability.

use crate::record::{KeyOrdering, RecordArena, RecordMeta};

/// Partitions at or below this size are insertion-sorted.
const INSERTION_THRESHOLD: usize = 16;

/// Frame-stack ceiling. Reaching it means pathologically long shared
/// prefixes; rather than growing the stack further, such partitions recurse
/// into the same routine with a fresh stack.
const STACK_MAX: usize = 1024;

/// One pending partition: `len` records starting at `start`, already equal
/// on the first `depth` weights.
#[derive(Debug, Clone, Copy)]
struct Frame {
    start: usize,
    len: usize,
    depth: usize,
}

/// Stable sort of one chunk's records under `ord`.
pub fn sort_chunk(arena: &RecordArena, metas: &mut [RecordMeta], ord: &KeyOrdering) {
    sort_bounded(arena, metas, ord, 0, STACK_MAX);
}

fn sort_bounded(
    arena: &RecordArena,
    metas: &mut [RecordMeta],
    ord: &KeyOrdering,
    start_depth: usize,
    stack_max: usize,
) {
    if metas.len() < 2 {
        return;
    }

    let mut stack: Vec<Frame> = Vec::with_capacity(64);
    let mut scratch: Vec<RecordMeta> = Vec::with_capacity(metas.len());
    stack.push(Frame {
        start: 0,
        len: metas.len(),
        depth: start_depth,
    });

    while let Some(frame) = stack.pop() {
        let Frame { start, len, depth } = frame;
        let slice = &mut metas[start..start + len];

        if len <= INSERTION_THRESHOLD {
            insertion_sort(arena, slice, ord, depth);
            continue;
        }

        // Counting pass over the weight at this depth.
        let mut counts = [0usize; 256];
        for meta in slice.iter() {
            counts[ord.weight_at(ord.view(arena, meta), depth) as usize] += 1;
        }

        // Prefix sums give each bucket its slot range.
        let mut offsets = [0usize; 256];
        let mut sum = 0usize;
        for (off, &count) in offsets.iter_mut().zip(counts.iter()) {
            *off = sum;
            sum += count;
        }

        // Stable scatter through the scratch copy.
        scratch.clear();
        scratch.extend_from_slice(slice);
        for meta in &scratch {
            let w = ord.weight_at(ord.view(arena, meta), depth) as usize;
            slice[offsets[w]] = *meta;
            offsets[w] += 1;
        }

        // Queue every bucket that still needs refinement.
        let mut at = 0usize;
        for (w, &count) in counts.iter().enumerate() {
            let bucket_start = at;
            at += count;
            if count < 2 {
                continue;
            }
            let bucket = &metas[start + bucket_start..start + bucket_start + count];
            if w == ord.term as usize && !any_longer(arena, bucket, ord, depth + 1) {
                // Exhausted records weight `term` at every further depth;
                // once nothing in the bucket has bytes left, it is a run of
                // equals.
                continue;
            }
            let sub = Frame {
                start: start + bucket_start,
                len: count,
                depth: depth + 1,
            };
            if stack.len() >= stack_max {
                // stack at capacity: recurse instead of overflowing it
                let slice = &mut metas[sub.start..sub.start + sub.len];
                sort_bounded(arena, slice, ord, sub.depth, stack_max);
            } else {
                stack.push(sub);
            }
        }
    }
}

/// True when some record in the bucket still has a weight of its own at
/// `depth` or beyond.
fn any_longer(arena: &RecordArena, bucket: &[RecordMeta], ord: &KeyOrdering, depth: usize) -> bool {
    bucket.iter().any(|meta| ord.view(arena, meta).len() > depth)
}

fn insertion_sort(arena: &RecordArena, metas: &mut [RecordMeta], ord: &KeyOrdering, depth: usize) {
    for i in 1..metas.len() {
        let mut j = i;
        while j > 0 {
            let prev = ord.view(arena, &metas[j - 1]);
            let cur = ord.view(arena, &metas[j]);
            if ord.compare_from(prev, cur, depth) != std::cmp::Ordering::Greater {
                break;
            }
            metas.swap(j - 1, j);
            j -= 1;
        }
    }
}
