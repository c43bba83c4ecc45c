//! Key-spec compilation: field descriptors, the shared column list and the
//! collation weight tables.
//!
//! Compilation is two-phase. While `-k` options are parsed, every start/end
//! boundary is inserted into one shared, sorted column list. Only after the
//! last key is known does `bind_columns` resolve each field's boundaries to
//! indices into that list, because earlier inserts shift later positions.
//! Everything built here is immutable once the first record is read.

use crate::config::SortConfig;
use crate::error::SortResult;

/// Per-key ordering flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyFlags {
    /// Skip leading blanks of the start field before indenting
    pub skip_start_blanks: bool,
    /// Count the end position from the first non-blank of the end field
    pub skip_end_blanks: bool,
    /// Consider only alphanumerics and blanks
    pub dictionary: bool,
    /// Fold lower case onto upper case
    pub fold_case: bool,
    /// Consider only printable characters
    pub printable_only: bool,
    /// Compare as a decimal number
    pub numeric: bool,
    /// Reverse this key's ordering
    pub reverse: bool,
}

/// Which collation table a field compares through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKind {
    /// Bytes are already comparison-ready (materialized keys)
    Identity,
    Forward,
    Reverse,
    Fold,
    FoldReverse,
}

/// 256-entry byte-to-rank remapping.
#[derive(Debug, Clone)]
pub struct WeightTable(pub [u8; 256]);

impl WeightTable {
    #[inline]
    pub fn weight(&self, b: u8) -> u8 {
        self.0[b as usize]
    }
}

/// 256-entry inclusion filter applied before weighting.
#[derive(Debug, Clone)]
pub struct ByteMask(pub [bool; 256]);

/// A column boundary: 1-based field number plus character indent as written
/// in the key spec (0 on the end side means "through the end of the field").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColPos {
    pub field: usize,
    pub offset: usize,
}

/// A field boundary reference, bound to a column-list slot in phase two.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef {
    pub field: usize,
    pub offset: usize,
    /// Index into `CompiledKey::columns`, resolved by `bind_columns`
    pub index: usize,
}

/// A compiled sort field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub start: ColumnRef,
    pub end: Option<ColumnRef>,
    pub flags: KeyFlags,
    pub table: WeightKind,
    pub mask: Option<ByteMask>,
}

/// The five weight tables shared by every field.
#[derive(Debug, Clone)]
pub struct Tables {
    pub identity: WeightTable,
    pub forward: WeightTable,
    pub reverse: WeightTable,
    pub fold: WeightTable,
    pub fold_reverse: WeightTable,
}

/// Everything the encoder, sorter and merger need to honor the requested
/// ordering. Built once per session, immutable afterwards.
#[derive(Debug, Clone)]
pub struct CompiledKey {
    /// Configured sort fields; empty means whole-record mode
    pub fields: Vec<FieldSpec>,
    /// Globally sorted, deduplicated column boundaries
    pub columns: Vec<ColPos>,
    pub tables: Tables,
    /// Separator-agnostic tables for whole-record comparison: a field
    /// separator is ordinary data when the whole record is the key
    line_tables: Tables,
    /// Table used for whole-record comparison (and tie dumps)
    pub whole_line: WeightKind,
    pub separator: Option<u8>,
    pub delimiter: u8,
}

impl CompiledKey {
    /// Compile all key specs from the configuration.
    pub fn compile(config: &SortConfig) -> SortResult<CompiledKey> {
        let delim = config.record_delimiter;
        let sep = config.field_separator;
        let tables = build_weight_tables(delim, sep);
        let line_tables = build_weight_tables(delim, None);

        let mut specs = config.keys.clone();

        // Whole-record ordering with d/i/n flags needs materialized keys, so
        // synthesize an implicit key covering the record from field 1.
        let g = config.global_flags;
        if specs.is_empty() && (g.numeric || g.dictionary || g.printable_only) {
            specs.push(crate::config::KeySpec {
                start_field: 1,
                start_char: None,
                end_field: None,
                end_char: None,
                flags: g,
                has_flags: true,
            });
        }

        let mut columns: Vec<ColPos> = Vec::new();
        let mut fields = Vec::with_capacity(specs.len());

        for spec in &specs {
            let flags = if spec.has_flags { spec.flags } else { g };
            let field = compile_field(spec, flags)?;
            register_column(&mut columns, ColPos {
                field: field.start.field,
                offset: field.start.offset,
            });
            if let Some(end) = &field.end {
                register_column(&mut columns, ColPos {
                    field: end.field,
                    offset: end.offset,
                });
            }
            fields.push(field);
        }

        bind_columns(&mut fields, &columns);

        let whole_line = table_kind(g.fold_case, g.reverse);

        Ok(CompiledKey {
            fields,
            columns,
            tables,
            line_tables,
            whole_line,
            separator: sep,
            delimiter: delim,
        })
    }

    /// True when keys are materialized ahead of each record.
    pub fn keyed(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn table(&self, kind: WeightKind) -> &WeightTable {
        match kind {
            WeightKind::Identity => &self.tables.identity,
            WeightKind::Forward => &self.tables.forward,
            WeightKind::Reverse => &self.tables.reverse,
            WeightKind::Fold => &self.tables.fold,
            WeightKind::FoldReverse => &self.tables.fold_reverse,
        }
    }

    /// Weight table and end-of-record rank used when comparing raw records.
    pub fn whole_line_ordering(&self) -> (&WeightTable, u8) {
        let table = match self.whole_line {
            WeightKind::Identity => &self.line_tables.identity,
            WeightKind::Forward => &self.line_tables.forward,
            WeightKind::Reverse => &self.line_tables.reverse,
            WeightKind::Fold => &self.line_tables.fold,
            WeightKind::FoldReverse => &self.line_tables.fold_reverse,
        };
        (table, table.weight(self.delimiter))
    }
}

fn table_kind(fold: bool, reverse: bool) -> WeightKind {
    match (fold, reverse) {
        (false, false) => WeightKind::Forward,
        (false, true) => WeightKind::Reverse,
        (true, false) => WeightKind::Fold,
        (true, true) => WeightKind::FoldReverse,
    }
}

/// Turn one parsed key spec into a field descriptor.
fn compile_field(spec: &crate::config::KeySpec, flags: KeyFlags) -> SortResult<FieldSpec> {
    let start = ColumnRef {
        field: spec.start_field,
        // 1-based character position to 0-based indent
        offset: spec.start_char.unwrap_or(1) - 1,
        index: 0,
    };
    let end = spec.end_field.map(|f| ColumnRef {
        field: f,
        // kept 1-based: the end indent is an inclusive character count,
        // 0 meaning the whole field
        offset: spec.end_char.unwrap_or(0),
        index: 0,
    });

    let mask = build_mask(&flags);
    let table = if flags.numeric {
        // encode_number handles reversal itself
        WeightKind::Identity
    } else {
        table_kind(flags.fold_case, flags.reverse)
    };

    Ok(FieldSpec {
        start,
        end,
        flags,
        table,
        mask,
    })
}

/// Insert one boundary into the shared column list, keeping it sorted and
/// deduplicated. O(n) per insert is fine: n is bounded by the number of -k
/// options, not by input size.
fn register_column(columns: &mut Vec<ColPos>, pos: ColPos) {
    match columns.binary_search(&pos) {
        Ok(_) => {}
        Err(at) => columns.insert(at, pos),
    }
}

/// Phase two: resolve every field's boundaries to column-list indices.
fn bind_columns(fields: &mut [FieldSpec], columns: &[ColPos]) {
    let find = |f: usize, o: usize| {
        columns
            .binary_search(&ColPos { field: f, offset: o })
            .expect("column registered during compilation")
    };
    for field in fields {
        field.start.index = find(field.start.field, field.start.offset);
        if let Some(end) = &mut field.end {
            end.index = find(end.field, end.offset);
        }
    }
}

/// Build the four collation tables plus identity.
///
/// Forward tables: the record delimiter gets rank 0 (reserved; it never
/// appears inside an encoded key), an explicit separator gets rank 1, all
/// remaining byte values get increasing ranks. The folded variant gives
/// a-z the ranks of A-Z. Reverse tables mirror the forward ranks; the
/// delimiter maps to 255 there so that end-of-record sorts last.
pub fn build_weight_tables(delim: u8, sep: Option<u8>) -> Tables {
    let mut forward = [0u8; 256];
    let mut rank: u16 = if sep.is_some() { 2 } else { 1 };
    for b in 0..=255u8 {
        if b == delim {
            forward[b as usize] = 0;
        } else if Some(b) == sep {
            forward[b as usize] = 1;
        } else {
            forward[b as usize] = rank as u8;
            rank += 1;
        }
    }

    let mut fold = forward;
    for b in b'a'..=b'z' {
        if b != delim && Some(b) != sep {
            fold[b as usize] = forward[(b - 32) as usize];
        }
    }

    let invert = |t: &[u8; 256]| {
        let mut rev = [0u8; 256];
        for b in 0..=255u8 {
            rev[b as usize] = if b == delim {
                255
            } else {
                (256 - t[b as usize] as u16) as u8
            };
        }
        rev
    };

    let mut identity = [0u8; 256];
    for (b, w) in identity.iter_mut().enumerate() {
        *w = b as u8;
    }

    Tables {
        identity: WeightTable(identity),
        reverse: WeightTable(invert(&forward)),
        fold_reverse: WeightTable(invert(&fold)),
        forward: WeightTable(forward),
        fold: WeightTable(fold),
    }
}

#[inline]
pub fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Intersection of the membership masks a flag set asks for.
fn build_mask(flags: &KeyFlags) -> Option<ByteMask> {
    if !flags.dictionary && !flags.printable_only {
        return None;
    }
    let mut mask = [true; 256];
    for (b, keep) in mask.iter_mut().enumerate() {
        let b = b as u8;
        if flags.dictionary && !(b.is_ascii_alphanumeric() || is_blank(b)) {
            *keep = false;
        }
        if flags.printable_only && !(b.is_ascii_graphic() || is_blank(b)) {
            *keep = false;
        }
    }
    Some(ByteMask(mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySpec, SortConfig};

    fn compile(keys: &[&str]) -> CompiledKey {
        let mut config = SortConfig::default();
        config.keys = keys.iter().map(|k| KeySpec::parse(k).unwrap()).collect();
        CompiledKey::compile(&config).unwrap()
    }

    #[test]
    fn test_forward_table_order() {
        let tables = build_weight_tables(b'\n', None);
        let t = &tables.forward;
        assert_eq!(t.weight(b'\n'), 0);
        // ranks preserve byte order for everything else
        assert!(t.weight(b'a') < t.weight(b'b'));
        assert!(t.weight(b'A') < t.weight(b'a'));
        assert!(t.weight(0) >= 1);
        assert_eq!(t.weight(255), 255);
    }

    #[test]
    fn test_separator_ranks() {
        let tables = build_weight_tables(b'\n', Some(b':'));
        assert_eq!(tables.forward.weight(b':'), 1);
        assert_eq!(tables.reverse.weight(b':'), 255);
        // no other byte shares the separator rank
        for b in 0..=255u8 {
            if b != b':' && b != b'\n' {
                assert!(tables.forward.weight(b) >= 2);
            }
        }
    }

    #[test]
    fn test_fold_unifies_case() {
        let tables = build_weight_tables(b'\n', None);
        for b in b'a'..=b'z' {
            assert_eq!(tables.fold.weight(b), tables.fold.weight(b - 32));
        }
        assert_ne!(tables.fold.weight(b'a'), tables.fold.weight(b'b'));
    }

    #[test]
    fn test_reverse_inverts_order() {
        let tables = build_weight_tables(b'\n', None);
        assert!(tables.reverse.weight(b'a') > tables.reverse.weight(b'b'));
        // end-of-record sorts last under reverse
        assert_eq!(tables.reverse.weight(b'\n'), 255);
        for b in 0..=255u8 {
            assert_ne!(tables.reverse.weight(b), 0);
        }
    }

    #[test]
    fn test_column_list_sorted_dedup() {
        let key = compile(&["2,3", "2", "1.2,2"]);
        let cols = &key.columns;
        assert!(cols.windows(2).all(|w| w[0] < w[1]));
        // 2 and 2,3 share the start boundary (2, 0)
        assert_eq!(
            cols.iter().filter(|c| c.field == 2 && c.offset == 0).count(),
            1
        );
        // every field reference resolves to its own boundary
        for f in &key.fields {
            assert_eq!(cols[f.start.index].field, f.start.field);
            if let Some(end) = &f.end {
                assert_eq!(cols[end.index].field, end.field);
            }
        }
    }

    #[test]
    fn test_masks() {
        let mut flags = KeyFlags::default();
        flags.dictionary = true;
        let mask = build_mask(&flags).unwrap();
        assert!(mask.0[b'a' as usize]);
        assert!(mask.0[b' ' as usize]);
        assert!(!mask.0[b'-' as usize]);

        flags.dictionary = false;
        flags.printable_only = true;
        let mask = build_mask(&flags).unwrap();
        assert!(mask.0[b'-' as usize]);
        assert!(!mask.0[0x01]);
        assert!(mask.0[b'\t' as usize]);
    }

    #[test]
    fn test_global_flags_synthesize_key() {
        let mut config = SortConfig::default();
        config.global_flags.numeric = true;
        let key = CompiledKey::compile(&config).unwrap();
        assert!(key.keyed());
        assert!(key.fields[0].flags.numeric);
    }

    #[test]
    fn test_fold_only_stays_whole_line() {
        let mut config = SortConfig::default();
        config.global_flags.fold_case = true;
        let key = CompiledKey::compile(&config).unwrap();
        assert!(!key.keyed());
        assert_eq!(key.whole_line, WeightKind::Fold);
    }

    #[test]
    fn test_bare_key_inherits_global_flags() {
        let mut config = SortConfig::default();
        config.global_flags.reverse = true;
        config.keys = vec![KeySpec::parse("1").unwrap(), KeySpec::parse("2n").unwrap()];
        let key = CompiledKey::compile(&config).unwrap();
        assert!(key.fields[0].flags.reverse);
        assert!(!key.fields[1].flags.reverse);
        assert!(key.fields[1].flags.numeric);
    }
}
