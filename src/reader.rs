//! Record input: splitting byte streams into records and loading them into
//! the chunk arena, plus the cursor types the merge stage reads from.
//!
//! Readers never pull a record they cannot deliver: when the arena is out of
//! space they report `NeedsMoreSpace` and hold on to the partial input, so
//! the caller can grow the arena and retry, or close the chunk first. A
//! record is consumed from the underlying stream exactly once either way.

use crate::encode::KeyEncoder;
use crate::error::{SortContext, SortResult};
use crate::fields::CompiledKey;
use crate::record::{
    decode_run_header, RecordArena, RecordMeta, RUN_HEADER_LEN,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

/// Result of one `RecordReader::next` call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete record was appended to the arena.
    Record(RecordMeta),
    /// The input is exhausted.
    EndOfInput,
    /// The arena's current cap cannot hold the next record. Nothing was
    /// lost; grow the arena and retry, or close the chunk first.
    NeedsMoreSpace,
}

/// Pulls records from an input stream into a chunk arena.
pub trait RecordReader {
    fn next(&mut self, arena: &mut RecordArena) -> SortResult<ReadOutcome>;

    /// Move any in-arena partial record back into the reader so the arena
    /// can be recycled for the next chunk.
    fn stash_partial(&mut self, arena: &mut RecordArena) {
        let _ = arena;
    }
}

#[derive(Debug)]
enum Source {
    File(BufReader<File>),
    Stdin(BufReader<io::Stdin>),
}

impl Source {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Source::File(r) => r.fill_buf(),
            Source::Stdin(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Source::File(r) => r.consume(amt),
            Source::Stdin(r) => r.consume(amt),
        }
    }
}

/// One logical byte stream over a list of input files, read in order.
/// `-` names standard input. Files are opened up front so a missing file is
/// diagnosed before any output is produced.
#[derive(Debug)]
pub struct InputStream {
    sources: Vec<Source>,
    index: usize,
}

impl InputStream {
    pub fn open(files: &[String]) -> SortResult<Self> {
        let mut sources = Vec::new();
        if files.is_empty() {
            sources.push(Source::Stdin(BufReader::new(io::stdin())));
        }
        for name in files {
            if name == "-" {
                sources.push(Source::Stdin(BufReader::new(io::stdin())));
            } else {
                let file = File::open(name).with_file_context(name)?;
                sources.push(Source::File(BufReader::new(file)));
            }
        }
        Ok(InputStream { sources, index: 0 })
    }
}

impl Read for InputStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let buf = self.fill_buf()?;
        let n = buf.len().min(out.len());
        out[..n].copy_from_slice(&buf[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for InputStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        loop {
            if self.index >= self.sources.len() {
                return Ok(&[]);
            }
            let len = self.sources[self.index].fill_buf()?.len();
            if len == 0 {
                self.index += 1;
                continue;
            }
            return self.sources[self.index].fill_buf();
        }
    }

    fn consume(&mut self, amt: usize) {
        if self.index < self.sources.len() {
            self.sources[self.index].consume(amt);
        }
    }
}

/// Whole-record reader: record bytes go straight into the arena while
/// scanning for the delimiter, so a record is copied exactly once.
pub struct LineReader<R> {
    input: R,
    delim: u8,
    line_max: usize,
    /// Partial line carried across a chunk boundary
    stash: Vec<u8>,
    /// Arena offset of the record currently being assembled
    partial_at: Option<usize>,
    /// Dropping the remainder of an over-long line
    discarding: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(input: R, delim: u8, line_max: usize) -> Self {
        Self {
            input,
            delim,
            line_max,
            stash: Vec::new(),
            partial_at: None,
            discarding: false,
        }
    }
}

impl<R: BufRead> RecordReader for LineReader<R> {
    fn next(&mut self, arena: &mut RecordArena) -> SortResult<ReadOutcome> {
        let start = match self.partial_at {
            Some(s) => s,
            None => {
                let s = arena.len();
                if !self.stash.is_empty() {
                    if arena.remaining() < self.stash.len() {
                        return Ok(ReadOutcome::NeedsMoreSpace);
                    }
                    arena.push_slice(&self.stash);
                    self.stash.clear();
                }
                self.partial_at = Some(s);
                s
            }
        };

        loop {
            let buf = self.input.fill_buf()?;
            if buf.is_empty() {
                // end of input: an unterminated final line still counts,
                // including the empty record an over-long one degrades to
                self.partial_at = None;
                let was_discarding = std::mem::take(&mut self.discarding);
                let len = arena.len() - start;
                if len == 0 && !was_discarding {
                    return Ok(ReadOutcome::EndOfInput);
                }
                return Ok(ReadOutcome::Record(RecordMeta {
                    offset: start,
                    key_len: 0,
                    raw_len: len as u32,
                }));
            }

            let (chunk, hit_delim) = match memchr::memchr(self.delim, buf) {
                Some(i) => (&buf[..i], true),
                None => (buf, false),
            };

            if !self.discarding && arena.len() - start + chunk.len() > self.line_max {
                // over the hard bound: the whole record degrades to an
                // empty one and the rest of the physical line is dropped
                log::warn!("record longer than {} bytes dropped", self.line_max);
                arena.truncate(start);
                self.discarding = true;
            }
            let take = if self.discarding { 0 } else { chunk.len() };

            if take > arena.remaining() {
                let fit = arena.remaining();
                arena.push_slice(&chunk[..fit]);
                self.input.consume(fit);
                return Ok(ReadOutcome::NeedsMoreSpace);
            }
            arena.push_slice(&chunk[..take]);
            // over-long remainders are consumed without being kept
            let consumed = if self.discarding { chunk.len() } else { take };

            if hit_delim {
                self.input.consume(consumed + 1);
                self.partial_at = None;
                self.discarding = false;
                let len = arena.len() - start;
                return Ok(ReadOutcome::Record(RecordMeta {
                    offset: start,
                    key_len: 0,
                    raw_len: len as u32,
                }));
            }
            self.input.consume(consumed);
        }
    }

    fn stash_partial(&mut self, arena: &mut RecordArena) {
        if let Some(start) = self.partial_at.take() {
            self.stash.extend_from_slice(arena.tail_from(start));
            arena.truncate(start);
        }
    }
}

/// Keyed reader: lines are assembled in a private buffer, then encoded as
/// `key ‖ line` into the arena. A line whose encoding does not fit stays
/// buffered and is re-encoded after the caller makes space; the input stream
/// is never re-read.
pub struct KeyedReader<'k, R> {
    input: R,
    key: &'k CompiledKey,
    encoder: KeyEncoder,
    raw: Vec<u8>,
    pending: bool,
    line_max: usize,
}

impl<'k, R: BufRead> KeyedReader<'k, R> {
    pub fn new(input: R, key: &'k CompiledKey, line_max: usize) -> Self {
        Self {
            input,
            encoder: KeyEncoder::new(key),
            key,
            raw: Vec::new(),
            pending: false,
            line_max,
        }
    }
}

impl<R: BufRead> RecordReader for KeyedReader<'_, R> {
    fn next(&mut self, arena: &mut RecordArena) -> SortResult<ReadOutcome> {
        if !self.pending {
            self.raw.clear();
            if !read_raw_line(&mut self.input, &mut self.raw, self.key.delimiter, self.line_max)? {
                return Ok(ReadOutcome::EndOfInput);
            }
        }
        match self.encoder.encode(self.key, &self.raw, arena) {
            Some(meta) => {
                self.pending = false;
                Ok(ReadOutcome::Record(meta))
            }
            None => {
                self.pending = true;
                Ok(ReadOutcome::NeedsMoreSpace)
            }
        }
    }
}

/// Read one delimited line into `out`, without the delimiter. A line longer
/// than `line_max` is dropped and delivered as an empty one. Returns false
/// at end of input.
fn read_raw_line<R: BufRead>(
    input: &mut R,
    out: &mut Vec<u8>,
    delim: u8,
    line_max: usize,
) -> SortResult<bool> {
    let mut discarding = false;
    loop {
        let buf = input.fill_buf()?;
        if buf.is_empty() {
            // an over-long unterminated final line still delivers its
            // empty record
            return Ok(!out.is_empty() || discarding);
        }
        let (chunk, hit_delim) = match memchr::memchr(delim, buf) {
            Some(i) => (&buf[..i], true),
            None => (buf, false),
        };
        if !discarding && out.len() + chunk.len() > line_max {
            log::warn!("record longer than {} bytes dropped", line_max);
            out.clear();
            discarding = true;
        }
        if !discarding {
            out.extend_from_slice(chunk);
        }
        let consumed = chunk.len() + usize::from(hit_delim);
        input.consume(consumed);
        if hit_delim {
            return Ok(true);
        }
    }
}

/// One sorted input of the merge stage.
pub trait MergeInput {
    /// Load the next record; false once the input is exhausted.
    fn advance(&mut self) -> SortResult<bool>;
    /// Encoded key of the current record (empty in whole-record mode).
    fn key(&self) -> &[u8];
    /// Raw line of the current record.
    fn line(&self) -> &[u8];
}

/// Cursor over one temporary run in the private length-prefixed format.
pub struct RunCursor<R> {
    input: R,
    buf: Vec<u8>,
    key_len: usize,
    raw_len: usize,
    max_record: usize,
}

impl<R: BufRead> RunCursor<R> {
    pub fn new(input: R, max_record: usize) -> Self {
        Self {
            input,
            buf: Vec::new(),
            key_len: 0,
            raw_len: 0,
            max_record,
        }
    }
}

impl<R: BufRead> MergeInput for RunCursor<R> {
    fn advance(&mut self) -> SortResult<bool> {
        let mut header = [0u8; RUN_HEADER_LEN];
        match read_full(&mut self.input, &mut header)? {
            0 => return Ok(false),
            RUN_HEADER_LEN => {}
            _ => {
                return Err(crate::error::SortError::corrupt_run(
                    "truncated record header",
                ))
            }
        }
        let (key_len, raw_len) = decode_run_header(&header, self.max_record)?;
        self.key_len = key_len as usize;
        self.raw_len = raw_len as usize;
        self.buf.resize(self.key_len + self.raw_len, 0);
        if read_full(&mut self.input, &mut self.buf)? != self.buf.len() {
            return Err(crate::error::SortError::corrupt_run(
                "truncated record body",
            ));
        }
        Ok(true)
    }

    fn key(&self) -> &[u8] {
        &self.buf[..self.key_len]
    }

    fn line(&self) -> &[u8] {
        &self.buf[self.key_len..]
    }
}

/// Cursor over one already-sorted text input (merge mode). Each record is
/// keyed on the fly with a private arena, so merge mode never spills.
pub struct LineCursor<'k, R> {
    input: R,
    key: &'k CompiledKey,
    encoder: Option<KeyEncoder>,
    arena: RecordArena,
    meta: RecordMeta,
    raw: Vec<u8>,
    line_max: usize,
}

impl<'k, R: BufRead> LineCursor<'k, R> {
    pub fn new(input: R, key: &'k CompiledKey, line_max: usize) -> Self {
        Self {
            input,
            encoder: key.keyed().then(|| KeyEncoder::new(key)),
            key,
            arena: RecordArena::new(4096, usize::MAX >> 1),
            meta: RecordMeta {
                offset: 0,
                key_len: 0,
                raw_len: 0,
            },
            raw: Vec::new(),
            line_max,
        }
    }
}

impl<R: BufRead> MergeInput for LineCursor<'_, R> {
    fn advance(&mut self) -> SortResult<bool> {
        self.raw.clear();
        if !read_raw_line(&mut self.input, &mut self.raw, self.key.delimiter, self.line_max)? {
            return Ok(false);
        }
        self.arena.reset();
        match &mut self.encoder {
            Some(encoder) => loop {
                if let Some(meta) = encoder.encode(self.key, &self.raw, &mut self.arena) {
                    self.meta = meta;
                    break;
                }
                if !self.arena.grow() {
                    return Err(crate::error::SortError::RecordTooLarge);
                }
            },
            None => {
                while self.arena.remaining() < self.raw.len() {
                    if !self.arena.grow() {
                        return Err(crate::error::SortError::RecordTooLarge);
                    }
                }
                self.arena.push_slice(&self.raw);
                self.meta = RecordMeta {
                    offset: 0,
                    key_len: 0,
                    raw_len: self.raw.len() as u32,
                };
            }
        }
        Ok(true)
    }

    fn key(&self) -> &[u8] {
        self.arena.key(&self.meta)
    }

    fn line(&self) -> &[u8] {
        self.arena.line(&self.meta)
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut at = 0;
    while at < buf.len() {
        let n = input.read(&mut buf[at..])?;
        if n == 0 {
            break;
        }
        at += n;
    }
    Ok(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySpec, SortConfig};
    use crate::record::encode_run_header;
    use std::io::Cursor;

    fn collect_lines<R: RecordReader>(
        reader: &mut R,
        arena: &mut RecordArena,
    ) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match reader.next(arena).unwrap() {
                ReadOutcome::Record(meta) => out.push(arena.line(&meta).to_vec()),
                ReadOutcome::EndOfInput => return out,
                ReadOutcome::NeedsMoreSpace => {
                    assert!(arena.grow(), "test arena exhausted");
                }
            }
        }
    }

    #[test]
    fn test_line_reader_basic() {
        let mut arena = RecordArena::new(1 << 12, 1 << 12);
        let mut reader = LineReader::new(Cursor::new(b"one\ntwo\n\nthree".to_vec()), b'\n', 1 << 12);
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec(), b"".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_line_reader_nul_delimiter() {
        let mut arena = RecordArena::new(1 << 12, 1 << 12);
        let mut reader = LineReader::new(Cursor::new(b"a\nb\0c\0".to_vec()), b'\0', 1 << 12);
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"a\nb".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_line_reader_grows_for_long_record() {
        let mut arena = RecordArena::new(4, 64);
        let mut reader = LineReader::new(Cursor::new(b"0123456789\nx\n".to_vec()), b'\n', 64);
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"0123456789".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn test_line_reader_stash_across_chunks() {
        let mut arena = RecordArena::new(8, 8);
        let mut reader = LineReader::new(Cursor::new(b"abcd\nefghijkl\n".to_vec()), b'\n', 64);

        let meta = match reader.next(&mut arena).unwrap() {
            ReadOutcome::Record(meta) => meta,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(arena.line(&meta), b"abcd");

        // second record cannot fit; close the chunk and carry the partial
        assert!(matches!(
            reader.next(&mut arena).unwrap(),
            ReadOutcome::NeedsMoreSpace
        ));
        reader.stash_partial(&mut arena);
        assert_eq!(arena.len(), meta.total_len());

        arena.reset();
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"efghijkl".to_vec()]);
    }

    #[test]
    fn test_line_reader_drops_overlong_record() {
        let mut arena = RecordArena::new(1 << 12, 1 << 12);
        let mut reader = LineReader::new(
            Cursor::new(b"0123456789ABCDEF\nok\n".to_vec()),
            b'\n',
            8,
        );
        // the over-long record degrades to an empty one; the stream survives
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"".to_vec(), b"ok".to_vec()]);
    }

    #[test]
    fn test_line_reader_overlong_final_line_unterminated() {
        let mut arena = RecordArena::new(1 << 12, 1 << 12);
        let mut reader = LineReader::new(
            Cursor::new(b"ok\n0123456789ABCDEF".to_vec()),
            b'\n',
            8,
        );
        // the empty record arrives even without a trailing delimiter
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"ok".to_vec(), b"".to_vec()]);
    }

    #[test]
    fn test_keyed_reader_overlong_final_line_unterminated() {
        let mut config = SortConfig::default();
        config.keys = vec![KeySpec::parse("1").unwrap()];
        let key = CompiledKey::compile(&config).unwrap();

        let mut arena = RecordArena::new(1 << 12, 1 << 12);
        let mut reader = KeyedReader::new(
            Cursor::new(b"ok\n0123456789ABCDEF".to_vec()),
            &key,
            8,
        );
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"ok".to_vec(), b"".to_vec()]);
    }

    #[test]
    fn test_keyed_reader_drops_overlong_record() {
        let mut config = SortConfig::default();
        config.keys = vec![KeySpec::parse("1").unwrap()];
        let key = CompiledKey::compile(&config).unwrap();

        let mut arena = RecordArena::new(1 << 12, 1 << 12);
        let mut reader = KeyedReader::new(
            Cursor::new(b"0123456789ABCDEF\nok\n".to_vec()),
            &key,
            8,
        );
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"".to_vec(), b"ok".to_vec()]);
    }

    #[test]
    fn test_keyed_reader_pending_retry() {
        let mut config = SortConfig::default();
        config.keys = vec![KeySpec::parse("1").unwrap()];
        let key = CompiledKey::compile(&config).unwrap();

        let mut arena = RecordArena::new(4, 1 << 12);
        let mut reader = KeyedReader::new(
            Cursor::new(b"delta\nalpha\n".to_vec()),
            &key,
            1 << 12,
        );
        let lines = collect_lines(&mut reader, &mut arena);
        assert_eq!(lines, vec![b"delta".to_vec(), b"alpha".to_vec()]);
    }

    #[test]
    fn test_run_cursor_round_trip() {
        let mut bytes = Vec::new();
        for (key, line) in [(&b"k1\x00"[..], &b"line one"[..]), (b"k2\x00", b"line two")] {
            let meta = RecordMeta {
                offset: 0,
                key_len: key.len() as u32,
                raw_len: line.len() as u32,
            };
            bytes.extend_from_slice(&encode_run_header(&meta));
            bytes.extend_from_slice(key);
            bytes.extend_from_slice(line);
        }
        let mut cursor = RunCursor::new(Cursor::new(bytes), 1 << 16);
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.key(), b"k1\x00");
        assert_eq!(cursor.line(), b"line one");
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.line(), b"line two");
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_run_cursor_rejects_truncation() {
        let meta = RecordMeta {
            offset: 0,
            key_len: 3,
            raw_len: 5,
        };
        let mut bytes = encode_run_header(&meta).to_vec();
        bytes.extend_from_slice(b"abc"); // body cut short
        let mut cursor = RunCursor::new(Cursor::new(bytes), 1 << 16);
        assert!(cursor.advance().is_err());

        let mut cursor = RunCursor::new(Cursor::new(vec![1u8, 2, 3]), 1 << 16);
        assert!(cursor.advance().is_err());
    }

    #[test]
    fn test_line_cursor_keys_on_the_fly() {
        let mut config = SortConfig::default();
        config.keys = vec![KeySpec::parse("2").unwrap()];
        let key = CompiledKey::compile(&config).unwrap();

        let mut cursor = LineCursor::new(Cursor::new(b"a z\nb y\n".to_vec()), &key, 1 << 12);
        assert!(cursor.advance().unwrap());
        assert!(!cursor.key().is_empty());
        assert_eq!(cursor.line(), b"a z");
        let first_key = cursor.key().to_vec();
        assert!(cursor.advance().unwrap());
        assert!(cursor.key().to_vec() < first_key);
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_line_cursor_whole_record() {
        let config = SortConfig::default();
        let key = CompiledKey::compile(&config).unwrap();
        let mut cursor = LineCursor::new(Cursor::new(b"abc\n".to_vec()), &key, 1 << 12);
        assert!(cursor.advance().unwrap());
        assert!(cursor.key().is_empty());
        assert_eq!(cursor.line(), b"abc");
    }

    #[test]
    fn test_input_stream_chains_files() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (name, data) in [("a.txt", "1\n2\n"), ("b.txt", "3\n")] {
            let path = dir.path().join(name);
            let mut f = File::create(&path).unwrap();
            f.write_all(data.as_bytes()).unwrap();
            paths.push(path.to_string_lossy().into_owned());
        }
        let mut stream = InputStream::open(&paths).unwrap();
        let mut all = String::new();
        stream.read_to_string(&mut all).unwrap();
        assert_eq!(all, "1\n2\n3\n");
    }

    #[test]
    fn test_input_stream_missing_file() {
        let err = InputStream::open(&["/nonexistent/xyz".to_string()]).unwrap_err();
        assert!(matches!(err, crate::error::SortError::FileNotFound { .. }));
    }
}
