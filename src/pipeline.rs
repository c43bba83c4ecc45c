//! The sort session: chunking, spilling and the final merge.
//!
//! Input is consumed chunk by chunk. A chunk closes when it reaches the
//! record cap or when the arena cannot grow any further; closed chunks are
//! sorted in place and either written straight to the output (single-chunk
//! case) or spilled as a temporary run. Spilled runs are merged with a
//! bounded fan-in; when the number of runs on disk reaches the open-handle
//! ceiling they are collapsed into one before reading continues.

use crate::config::SortConfig;
use crate::error::{SortContext, SortError, SortResult};
use crate::fields::CompiledKey;
use crate::merge::{merge_inputs, validate_order};
use crate::radix_sort::sort_chunk;
use crate::reader::{
    InputStream, KeyedReader, LineCursor, LineReader, MergeInput, ReadOutcome, RecordReader,
    RunCursor,
};
use crate::record::{KeyOrdering, RecordArena, RecordMeta};
use crate::writer::{EmitMode, RecordWriter};
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

pub struct SortSession {
    config: SortConfig,
    key: CompiledKey,
    temp: TempDir,
}

impl SortSession {
    pub fn new(config: SortConfig) -> SortResult<Self> {
        config.validate()?;
        let key = CompiledKey::compile(&config)?;
        let temp = match &config.temp_dir {
            Some(dir) => tempfile::tempdir_in(dir).with_file_context(dir)?,
            None => tempfile::tempdir()?,
        };
        Ok(Self { config, key, temp })
    }

    /// Run the configured operation over `files` (empty means stdin).
    pub fn run(&self, files: &[String]) -> SortResult<()> {
        let ord = KeyOrdering::for_key(&self.key);
        if self.config.check {
            self.check(files, &ord)
        } else if self.config.merge {
            self.merge(files, &ord)
        } else {
            self.sort(files, &ord)
        }
    }

    fn check(&self, files: &[String], ord: &KeyOrdering) -> SortResult<()> {
        let input = InputStream::open(files)?;
        let mut cursor = LineCursor::new(input, &self.key, self.config.line_max);
        validate_order(&mut cursor, ord, self.config.unique)
    }

    fn merge(&self, files: &[String], ord: &KeyOrdering) -> SortResult<()> {
        let mut inputs: Vec<Box<dyn MergeInput + '_>> = Vec::new();
        if files.is_empty() {
            let input = InputStream::open(files)?;
            inputs.push(Box::new(LineCursor::new(input, &self.key, self.config.line_max)));
        }
        for file in files {
            let input = InputStream::open(std::slice::from_ref(file))?;
            inputs.push(Box::new(LineCursor::new(input, &self.key, self.config.line_max)));
        }
        self.with_output(|writer| {
            merge_inputs(
                inputs,
                ord,
                self.config.unique,
                self.config.fan_in,
                self.temp.path(),
                self.max_record(),
                writer,
            )
        })
    }

    fn sort(&self, files: &[String], ord: &KeyOrdering) -> SortResult<()> {
        let input = InputStream::open(files)?;
        let mut reader: Box<dyn RecordReader + '_> = if self.key.keyed() {
            Box::new(KeyedReader::new(input, &self.key, self.config.line_max))
        } else {
            Box::new(LineReader::new(
                input,
                self.config.record_delimiter,
                self.config.line_max,
            ))
        };

        let initial = (self.config.chunk_bytes / 8).max(4096);
        let mut arena = RecordArena::new(initial, self.config.chunk_bytes);
        let mut metas: Vec<RecordMeta> = Vec::new();
        let mut runs: Vec<File> = Vec::new();
        let mut eof = false;

        while !eof {
            // fill one chunk
            while metas.len() < self.config.chunk_records {
                match reader.next(&mut arena)? {
                    ReadOutcome::Record(meta) => metas.push(meta),
                    ReadOutcome::EndOfInput => {
                        eof = true;
                        break;
                    }
                    ReadOutcome::NeedsMoreSpace => {
                        if arena.grow() {
                            continue;
                        }
                        if metas.is_empty() {
                            return Err(SortError::RecordTooLarge);
                        }
                        break;
                    }
                }
            }
            reader.stash_partial(&mut arena);

            sort_chunk(&arena, &mut metas, ord);

            if eof && runs.is_empty() {
                // the whole input fit in one chunk
                return self.with_output(|writer| {
                    writer.write_chunk(&arena, &metas, ord, self.config.unique)?;
                    writer.flush()?;
                    Ok(())
                });
            }
            if !metas.is_empty() {
                log::debug!("spilling run of {} records", metas.len());
                runs.push(self.spill_chunk(&arena, &metas, ord)?);
                // the open-handle ceiling bounds the run table no matter
                // how many chunks the input produces
                if runs.len() >= self.config.max_open_runs {
                    let merged = self.collapse_runs(std::mem::take(&mut runs), ord)?;
                    runs.push(merged);
                }
            }
            arena.reset();
            metas.clear();
        }

        let inputs: Vec<Box<dyn MergeInput + '_>> = runs
            .into_iter()
            .map(|file| {
                Box::new(RunCursor::new(BufReader::new(file), self.max_record()))
                    as Box<dyn MergeInput>
            })
            .collect();
        self.with_output(|writer| {
            merge_inputs(
                inputs,
                ord,
                self.config.unique,
                self.config.fan_in,
                self.temp.path(),
                self.max_record(),
                writer,
            )
        })
    }

    /// Write one sorted chunk as a temporary run, rewound for reading.
    fn spill_chunk(
        &self,
        arena: &RecordArena,
        metas: &[RecordMeta],
        ord: &KeyOrdering,
    ) -> SortResult<File> {
        let file = tempfile::tempfile_in(self.temp.path())?;
        let mut run = RecordWriter::new(file, EmitMode::Run, 0);
        // duplicates are resolved at the final merge
        run.write_chunk(arena, metas, ord, false)?;
        run.flush()?;
        let mut file = run.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Merge all current runs into a single run, resetting the run count
    /// to one.
    fn collapse_runs(&self, runs: Vec<File>, ord: &KeyOrdering) -> SortResult<File> {
        log::debug!("collapsing {} runs", runs.len());
        let inputs: Vec<Box<dyn MergeInput + '_>> = runs
            .into_iter()
            .map(|file| {
                Box::new(RunCursor::new(BufReader::new(file), self.max_record()))
                    as Box<dyn MergeInput>
            })
            .collect();
        let file = tempfile::tempfile_in(self.temp.path())?;
        let mut writer = RecordWriter::new(file, EmitMode::Run, 0);
        merge_inputs(
            inputs,
            ord,
            false,
            self.config.fan_in,
            self.temp.path(),
            self.max_record(),
            &mut writer,
        )?;
        let mut file = writer.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Sanity ceiling for a single run record, used to reject corrupt run
    /// headers. Keyed records carry at most one key byte per line byte per
    /// field, plus per-field framing.
    fn max_record(&self) -> usize {
        let fields = self.key.fields.len() + 1;
        self.config
            .chunk_bytes
            .max(fields * self.config.line_max + 16 * fields + 64)
    }

    /// Run `emit` against the configured output. A named output is written
    /// to a temporary file beside it and moved into place afterwards, so an
    /// output that doubles as an input is never clobbered mid-stream and a
    /// failed sort leaves no partial file behind.
    fn with_output<F>(&self, emit: F) -> SortResult<()>
    where
        F: FnOnce(&mut RecordWriter<Box<dyn Write>>) -> SortResult<()>,
    {
        let mode = if self.config.key_dump {
            EmitMode::Keys
        } else {
            EmitMode::Lines
        };

        let mut staged: Option<tempfile::NamedTempFile> = None;
        let sink: Box<dyn Write> = match &self.config.output_file {
            None => Box::new(io::stdout().lock()),
            Some(path) => {
                let dir = Path::new(path)
                    .parent()
                    .filter(|d| !d.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let tmp = tempfile::NamedTempFile::new_in(dir).with_file_context(path)?;
                let handle = tmp.reopen().with_file_context(path)?;
                staged = Some(tmp);
                Box::new(handle)
            }
        };

        let mut writer = RecordWriter::new(sink, mode, self.config.record_delimiter);
        emit(&mut writer)?;
        writer.flush()?;
        drop(writer);

        if let (Some(tmp), Some(path)) = (staged, &self.config.output_file) {
            tmp.persist(path)
                .map_err(|e| e.error)
                .with_file_context(path)?;
        }
        Ok(())
    }
}
