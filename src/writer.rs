//! Record output: delimited lines for users, the length-prefixed run format
//! for the spill stage, and the key-dump diagnostic.

use crate::record::{encode_run_header, KeyOrdering, RecordArena, RecordMeta};
use std::io::{self, BufWriter, Write};

/// What a writer emits for each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// Raw line plus the record delimiter
    Lines,
    /// Length-prefixed `key ‖ line` run record
    Run,
    /// Hex dump of the comparison key, one per record
    Keys,
}

pub struct RecordWriter<W: Write> {
    out: BufWriter<W>,
    mode: EmitMode,
    delim: u8,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W, mode: EmitMode, delim: u8) -> Self {
        Self {
            out: BufWriter::new(out),
            mode,
            delim,
        }
    }

    pub fn write_record(&mut self, key: &[u8], line: &[u8]) -> io::Result<()> {
        match self.mode {
            EmitMode::Lines => {
                self.out.write_all(line)?;
                self.out.write_all(&[self.delim])
            }
            EmitMode::Run => {
                let meta = RecordMeta {
                    offset: 0,
                    key_len: key.len() as u32,
                    raw_len: line.len() as u32,
                };
                self.out.write_all(&encode_run_header(&meta))?;
                self.out.write_all(key)?;
                self.out.write_all(line)
            }
            EmitMode::Keys => {
                // whole-record mode has no materialized key; dump the line
                let dump = if key.is_empty() { line } else { key };
                for &b in dump {
                    write!(self.out, "{:02x}", b)?;
                }
                self.out.write_all(&[self.delim])
            }
        }
    }

    /// Emit one sorted chunk. With `unique`, only the first of each run of
    /// records comparing equal under `ord` is written.
    pub fn write_chunk(
        &mut self,
        arena: &RecordArena,
        metas: &[RecordMeta],
        ord: &KeyOrdering,
        unique: bool,
    ) -> io::Result<()> {
        let mut last: Option<&RecordMeta> = None;
        for meta in metas {
            if unique {
                if let Some(prev) = last {
                    let equal = ord
                        .compare(ord.view(arena, prev), ord.view(arena, meta))
                        .is_eq();
                    if equal {
                        continue;
                    }
                }
                last = Some(meta);
            }
            self.write_record(arena.key(meta), arena.line(meta))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Flush and hand back the underlying stream (used to reopen an
    /// intermediate run for reading).
    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(io::IntoInnerError::into_error)
    }
}
