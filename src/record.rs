//! Records, the chunk arena and the private run format.
//!
//! Records live in one growable byte arena and are addressed by offset
//! handles, so arena growth never invalidates outstanding references; there
//! is no pointer patching step. When a key was materialized the record bytes
//! are `encoded-key ‖ original-line` and `key_len` marks the boundary; in
//! whole-record mode `key_len` is 0 and comparison re-derives weights on the
//! fly.

use crate::error::{SortError, SortResult};
use crate::fields::WeightTable;
use std::cmp::Ordering;

/// Run-record header: total length, key length, raw line length (u32 LE).
pub const RUN_HEADER_LEN: usize = 12;

/// Offset handle for one record inside a [`RecordArena`].
#[derive(Debug, Clone, Copy)]
pub struct RecordMeta {
    pub offset: usize,
    pub key_len: u32,
    pub raw_len: u32,
}

impl RecordMeta {
    #[inline]
    pub fn total_len(&self) -> usize {
        self.key_len as usize + self.raw_len as usize
    }
}

/// Growable byte arena with a soft cap that doubles up to a hard cap.
///
/// The soft cap is the capacity signal: appends past it report exhaustion so
/// the chunk pipeline can decide between growing and closing the chunk.
#[derive(Debug)]
pub struct RecordArena {
    bytes: Vec<u8>,
    cap: usize,
    hard_cap: usize,
}

impl RecordArena {
    pub fn new(initial_cap: usize, hard_cap: usize) -> Self {
        let cap = initial_cap.min(hard_cap).max(1);
        Self {
            bytes: Vec::with_capacity(cap),
            cap,
            hard_cap,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.bytes.len())
    }

    /// Double the soft cap. Returns false once the hard cap is reached.
    pub fn grow(&mut self) -> bool {
        if self.cap >= self.hard_cap {
            return false;
        }
        self.cap = (self.cap * 2).min(self.hard_cap);
        true
    }

    /// Append bytes without consulting the cap; callers check `remaining`.
    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    #[inline]
    pub fn push_byte(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    #[inline]
    pub fn record<'a>(&'a self, meta: &RecordMeta) -> &'a [u8] {
        &self.bytes[meta.offset..meta.offset + meta.total_len()]
    }

    /// Encoded key bytes (empty in whole-record mode).
    #[inline]
    pub fn key<'a>(&'a self, meta: &RecordMeta) -> &'a [u8] {
        &self.bytes[meta.offset..meta.offset + meta.key_len as usize]
    }

    /// Original line bytes.
    #[inline]
    pub fn line<'a>(&'a self, meta: &RecordMeta) -> &'a [u8] {
        let start = meta.offset + meta.key_len as usize;
        &self.bytes[start..start + meta.raw_len as usize]
    }

    pub fn tail_from(&self, offset: usize) -> &[u8] {
        &self.bytes[offset..]
    }
}

pub fn encode_run_header(meta: &RecordMeta) -> [u8; RUN_HEADER_LEN] {
    let mut h = [0u8; RUN_HEADER_LEN];
    h[0..4].copy_from_slice(&(meta.total_len() as u32).to_le_bytes());
    h[4..8].copy_from_slice(&meta.key_len.to_le_bytes());
    h[8..12].copy_from_slice(&meta.raw_len.to_le_bytes());
    h
}

/// Decode and sanity-check one run header. A header whose lengths do not
/// add up, or that exceeds `max_record`, is a fatal condition: no partial
/// output is preferable to silently-wrong output.
pub fn decode_run_header(h: &[u8; RUN_HEADER_LEN], max_record: usize) -> SortResult<(u32, u32)> {
    let total = u32::from_le_bytes([h[0], h[1], h[2], h[3]]);
    let key_len = u32::from_le_bytes([h[4], h[5], h[6], h[7]]);
    let raw_len = u32::from_le_bytes([h[8], h[9], h[10], h[11]]);
    if key_len as u64 + raw_len as u64 != total as u64 {
        return Err(SortError::corrupt_run("inconsistent record lengths"));
    }
    if total as usize > max_record {
        return Err(SortError::corrupt_run("record length out of range"));
    }
    Ok((key_len, raw_len))
}

/// How records of one session compare: either their materialized keys are
/// byte-comparable as-is, or raw lines are weighted on the fly. `term` is
/// the rank an exhausted record compares with.
#[derive(Clone, Copy)]
pub struct KeyOrdering<'a> {
    pub keyed: bool,
    pub table: &'a WeightTable,
    pub term: u8,
}

impl<'a> KeyOrdering<'a> {
    pub fn for_key(key: &'a crate::fields::CompiledKey) -> Self {
        if key.keyed() {
            KeyOrdering {
                keyed: true,
                table: key.table(crate::fields::WeightKind::Identity),
                term: 0,
            }
        } else {
            let (table, term) = key.whole_line_ordering();
            KeyOrdering {
                keyed: false,
                table,
                term,
            }
        }
    }

    /// Comparison view of a record: the key prefix when materialized,
    /// otherwise the raw line.
    #[inline]
    pub fn view<'b>(&self, arena: &'b RecordArena, meta: &RecordMeta) -> &'b [u8] {
        if self.keyed {
            arena.key(meta)
        } else {
            arena.line(meta)
        }
    }

    #[inline]
    pub fn weight_at(&self, bytes: &[u8], depth: usize) -> u8 {
        if depth < bytes.len() {
            if self.keyed {
                bytes[depth]
            } else {
                self.table.weight(bytes[depth])
            }
        } else {
            self.term
        }
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare_from(a, b, 0)
    }

    pub fn compare_from(&self, a: &[u8], b: &[u8], depth: usize) -> Ordering {
        let n = a.len().max(b.len());
        for i in depth..n {
            match self.weight_at(a, i).cmp(&self.weight_at(b, i)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

/// Byte-wise comparison of two materialized keys. The per-field terminators
/// and the 0x00 global terminator make this agree with the user-visible
/// ordering by construction.
#[inline]
pub fn compare_keyed(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Whole-record comparison through a weight table. End-of-record compares
/// with the delimiter's rank, so record length participates the same way it
/// would had the delimiter been part of the data.
pub fn compare_weighted(a: &[u8], b: &[u8], table: &WeightTable, term: u8) -> Ordering {
    let n = a.len().max(b.len());
    for i in 0..n {
        let wa = if i < a.len() { table.weight(a[i]) } else { term };
        let wb = if i < b.len() { table.weight(b[i]) } else { term };
        match wa.cmp(&wb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
