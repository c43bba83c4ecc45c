//! K-way merge of sorted inputs, with a bounded fan-in, and the check-mode
//! order validator.
//!
//! When more runs exist than the fan-in allows, batches of `fan_in` inputs
//! are merged into intermediate runs first; each pass replaces `fan_in`
//! handles with one, so the number of simultaneously open inputs never
//! exceeds the configured ceiling. Ties between inputs break toward the
//! lower input index, which keeps the overall sort stable because earlier
//! runs hold earlier records; an intermediate run therefore takes over its
//! batch's position at the front of the input list.

use crate::error::{SortError, SortResult};
use crate::reader::{MergeInput, RunCursor};
use crate::record::KeyOrdering;
use crate::writer::{EmitMode, RecordWriter};
use std::cmp::Ordering;
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::Path;

/// Comparison view of an input's current record.
#[inline]
fn view(input: &dyn MergeInput, keyed: bool) -> &[u8] {
    if keyed {
        input.key()
    } else {
        input.line()
    }
}

fn cmp_inputs(
    inputs: &[Box<dyn MergeInput + '_>],
    ord: &KeyOrdering,
    a: usize,
    b: usize,
) -> Ordering {
    ord.compare(view(&*inputs[a], ord.keyed), view(&*inputs[b], ord.keyed))
        .then(a.cmp(&b))
}

/// Merge all `inputs` into `writer`, spilling intermediate runs to
/// `temp_dir` whenever more than `fan_in` inputs are open. With `unique`,
/// the final pass keeps the first of each run of equal records.
pub fn merge_inputs<W: Write>(
    mut inputs: Vec<Box<dyn MergeInput + '_>>,
    ord: &KeyOrdering,
    unique: bool,
    fan_in: usize,
    temp_dir: &Path,
    max_record: usize,
    writer: &mut RecordWriter<W>,
) -> SortResult<()> {
    while inputs.len() > fan_in {
        log::debug!(
            "intermediate merge pass: {} inputs, fan-in {}",
            inputs.len(),
            fan_in
        );
        let batch: Vec<_> = inputs.drain(..fan_in).collect();
        let file = tempfile::tempfile_in(temp_dir)?;
        let mut run = RecordWriter::new(file, EmitMode::Run, 0);
        // duplicates survive intermediate passes; only the final pass
        // decides which record the user sees
        merge_pass(batch, ord, false, &mut run)?;
        let mut file = run.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        // the merged run holds the earliest inputs' records, so it takes
        // the batch's place at the front of the list; appending it would
        // hand the tie-break to the later inputs
        inputs.insert(
            0,
            Box::new(RunCursor::new(BufReader::new(file), max_record)),
        );
    }
    merge_pass(inputs, ord, unique, writer)
}

/// One merge pass over at most `fan_in` inputs.
fn merge_pass<W: Write>(
    mut inputs: Vec<Box<dyn MergeInput + '_>>,
    ord: &KeyOrdering,
    unique: bool,
    out: &mut RecordWriter<W>,
) -> SortResult<()> {
    // Sorted list of live input indices; the front holds the least record.
    let mut live: Vec<usize> = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter_mut().enumerate() {
        if input.advance()? {
            live.push(i);
        }
    }
    live.sort_by(|&a, &b| cmp_inputs(&inputs, ord, a, b));

    let mut last: Vec<u8> = Vec::new();
    let mut have_last = false;

    while !live.is_empty() {
        let i = live.remove(0);
        {
            let cur = view(&*inputs[i], ord.keyed);
            let dup = unique && have_last && ord.compare(&last, cur).is_eq();
            if !dup {
                out.write_record(inputs[i].key(), inputs[i].line())?;
                if unique {
                    let cur = view(&*inputs[i], ord.keyed);
                    last.clear();
                    last.extend_from_slice(cur);
                    have_last = true;
                }
            }
        }
        if inputs[i].advance()? {
            let at = live.partition_point(|&j| cmp_inputs(&inputs, ord, j, i) != Ordering::Greater);
            live.insert(at, i);
        }
    }
    out.flush()?;
    Ok(())
}

/// Check mode: verify `input` is ordered under `ord` (and duplicate-free
/// with `unique`) without producing output. The reported line number is
/// that of the offending record.
pub fn validate_order(
    input: &mut dyn MergeInput,
    ord: &KeyOrdering,
    unique: bool,
) -> SortResult<()> {
    let mut line_no: u64 = 0;
    let mut prev: Vec<u8> = Vec::new();
    let mut have_prev = false;
    while input.advance()? {
        line_no += 1;
        let cur = view(input, ord.keyed);
        if have_prev {
            match ord.compare(&prev, cur) {
                Ordering::Greater => {
                    return Err(SortError::Disorder {
                        line: line_no,
                        text: String::from_utf8_lossy(input.line()).into_owned(),
                    })
                }
                Ordering::Equal if unique => {
                    return Err(SortError::Duplicate {
                        line: line_no,
                        text: String::from_utf8_lossy(input.line()).into_owned(),
                    })
                }
                _ => {}
            }
        }
        prev.clear();
        prev.extend_from_slice(cur);
        have_prev = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{build_weight_tables, Tables};

    /// In-memory sorted input for merge tests.
    struct VecInput {
        records: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
        current: Option<(Vec<u8>, Vec<u8>)>,
    }

    impl VecInput {
        fn lines(lines: &[&[u8]]) -> Box<dyn MergeInput> {
            let records: Vec<_> = lines
                .iter()
                .map(|l| (Vec::new(), l.to_vec()))
                .collect();
            Box::new(VecInput {
                records: records.into_iter(),
                current: None,
            })
        }

        fn keyed(records: &[(&[u8], &[u8])]) -> Box<dyn MergeInput> {
            let records: Vec<_> = records
                .iter()
                .map(|(k, l)| (k.to_vec(), l.to_vec()))
                .collect();
            Box::new(VecInput {
                records: records.into_iter(),
                current: None,
            })
        }
    }

    impl MergeInput for VecInput {
        fn advance(&mut self) -> SortResult<bool> {
            self.current = self.records.next();
            Ok(self.current.is_some())
        }

        fn key(&self) -> &[u8] {
            self.current.as_ref().map(|c| c.0.as_slice()).unwrap_or(b"")
        }

        fn line(&self) -> &[u8] {
            self.current.as_ref().map(|c| c.1.as_slice()).unwrap_or(b"")
        }
    }

    fn forward(tables: &Tables) -> KeyOrdering<'_> {
        KeyOrdering {
            keyed: false,
            table: &tables.forward,
            term: tables.forward.weight(b'\n'),
        }
    }

    fn run_merge(
        inputs: Vec<Box<dyn MergeInput + '_>>,
        ord: &KeyOrdering,
        unique: bool,
        fan_in: usize,
    ) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RecordWriter::new(Vec::new(), EmitMode::Lines, b'\n');
        merge_inputs(inputs, ord, unique, fan_in, dir.path(), 1 << 16, &mut writer).unwrap();
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_three_way_merge() {
        let tables = build_weight_tables(b'\n', None);
        let inputs = vec![
            VecInput::lines(&[b"b", b"e"]),
            VecInput::lines(&[b"a", b"f"]),
            VecInput::lines(&[b"c", b"d"]),
        ];
        let out = run_merge(inputs, &forward(&tables), false, 16);
        assert_eq!(out, b"a\nb\nc\nd\ne\nf\n");
    }

    #[test]
    fn test_ties_break_toward_earlier_input() {
        let tables = build_weight_tables(b'\n', None);
        // equal under fold; originals reveal which input won
        let fold = KeyOrdering {
            keyed: false,
            table: &tables.fold,
            term: tables.fold.weight(b'\n'),
        };
        let inputs = vec![
            VecInput::lines(&[b"DUP", b"zz"]),
            VecInput::lines(&[b"dup"]),
        ];
        let out = run_merge(inputs, &fold, false, 16);
        assert_eq!(out, b"DUP\ndup\nzz\n");
    }

    #[test]
    fn test_equal_keys_keep_input_order_across_batches() {
        let tables = build_weight_tables(b'\n', None);
        let ord = KeyOrdering {
            keyed: true,
            table: &tables.forward,
            term: 0,
        };
        let inputs = vec![
            VecInput::keyed(&[(b"k\x00", b"first")]),
            VecInput::keyed(&[(b"k\x00", b"second")]),
            VecInput::keyed(&[(b"k\x00", b"third")]),
        ];
        // fan-in 2 folds the first two inputs into an intermediate run;
        // the third input must not outrank it on equal keys
        let out = run_merge(inputs, &ord, false, 2);
        assert_eq!(out, b"first\nsecond\nthird\n");
    }

    #[test]
    fn test_unique_keeps_earliest_input_across_batches() {
        let tables = build_weight_tables(b'\n', None);
        let ord = KeyOrdering {
            keyed: true,
            table: &tables.forward,
            term: 0,
        };
        let inputs = vec![
            VecInput::keyed(&[(b"k\x00", b"first")]),
            VecInput::keyed(&[(b"k\x00", b"second")]),
            VecInput::keyed(&[(b"k\x00", b"third")]),
        ];
        let out = run_merge(inputs, &ord, true, 2);
        assert_eq!(out, b"first\n");
    }

    #[test]
    fn test_unique_across_inputs() {
        let tables = build_weight_tables(b'\n', None);
        let inputs = vec![
            VecInput::lines(&[b"a", b"b", b"b"]),
            VecInput::lines(&[b"a", b"c"]),
        ];
        let out = run_merge(inputs, &forward(&tables), true, 16);
        assert_eq!(out, b"a\nb\nc\n");
    }

    #[test]
    fn test_fan_in_batches_intermediate_runs() {
        let tables = build_weight_tables(b'\n', None);
        let mut inputs: Vec<Box<dyn MergeInput>> = Vec::new();
        let mut data: Vec<Vec<u8>> = Vec::new();
        for i in 0..9u8 {
            data.push(vec![b'a' + i]);
        }
        for chunk in data.chunks(1) {
            let refs: Vec<&[u8]> = chunk.iter().map(|v| v.as_slice()).collect();
            inputs.push(VecInput::lines(&refs));
        }
        // fan-in 2 forces several intermediate passes over 9 inputs
        let out = run_merge(inputs, &forward(&tables), false, 2);
        assert_eq!(out, b"a\nb\nc\nd\ne\nf\ng\nh\ni\n");
    }

    #[test]
    fn test_validate_order() {
        let tables = build_weight_tables(b'\n', None);
        let ord = forward(&tables);

        let mut ok = VecInput::lines(&[b"a", b"b", b"b", b"c"]);
        assert!(validate_order(ok.as_mut(), &ord, false).is_ok());

        let mut bad = VecInput::lines(&[b"a", b"c", b"b"]);
        match validate_order(bad.as_mut(), &ord, false) {
            Err(SortError::Disorder { line, text }) => {
                assert_eq!(line, 3);
                assert_eq!(text, "b");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let mut dup = VecInput::lines(&[b"a", b"b", b"b"]);
        match validate_order(dup.as_mut(), &ord, true) {
            Err(SortError::Duplicate { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected: {:?}", other),
        }

        let mut empty = VecInput::lines(&[]);
        assert!(validate_order(empty.as_mut(), &ord, true).is_ok());
    }
}
