//! Key encoding: converts one raw record into an order-preserving binary
//! key so that later stages can compare records byte-wise.
//!
//! The encoded form is the concatenation of per-field encodings, each closed
//! by a one-byte field terminator (1, or 255 for a reversed field) so a key
//! that is a prefix of another never compares equal to it, followed by a
//! 0x00 global terminator. The original line bytes are appended immediately
//! after the key; nothing needs to be copied again at comparison time.
//! Byte value 0x00 never appears inside the encoded key.

use crate::fields::{is_blank, ColumnRef, CompiledKey, FieldSpec};
use crate::record::{RecordArena, RecordMeta};

/// Capacity-checked appender over the chunk arena. A failed push leaves the
/// arena length untouched beyond the record start; the caller rolls back.
struct ArenaSink<'a> {
    arena: &'a mut RecordArena,
}

impl ArenaSink<'_> {
    #[inline]
    fn push(&mut self, b: u8) -> bool {
        if self.arena.remaining() == 0 {
            return false;
        }
        self.arena.push_byte(b);
        true
    }
}

/// Reusable per-session key encoder.
pub struct KeyEncoder {
    /// Resolved field-start byte positions, one per column-list entry
    positions: Vec<usize>,
}

impl KeyEncoder {
    pub fn new(key: &CompiledKey) -> Self {
        Self {
            positions: vec![0; key.columns.len()],
        }
    }

    /// Encode one line into the arena as `key ‖ line`. Returns `None` when
    /// the arena's current cap cannot hold the record; the arena is rolled
    /// back and the same line can be retried against a larger cap.
    pub fn encode(
        &mut self,
        key: &CompiledKey,
        line: &[u8],
        arena: &mut RecordArena,
    ) -> Option<RecordMeta> {
        let start = arena.len();
        self.resolve_columns(key, line);

        let ok = self.emit_key(key, line, arena);
        if !ok {
            arena.truncate(start);
            return None;
        }
        let key_len = arena.len() - start;

        if arena.remaining() < line.len() {
            arena.truncate(start);
            return None;
        }
        arena.push_slice(line);

        Some(RecordMeta {
            offset: start,
            key_len: key_len as u32,
            raw_len: line.len() as u32,
        })
    }

    fn emit_key(&self, key: &CompiledKey, line: &[u8], arena: &mut RecordArena) -> bool {
        let mut sink = ArenaSink { arena };
        for field in &key.fields {
            let (s, e) = self.field_bounds(key, field, line);
            let slice = &line[s..e];
            if field.flags.numeric {
                if !encode_number(slice, field.flags.reverse, &mut sink) {
                    return false;
                }
            } else {
                let table = key.table(field.table);
                for &b in slice {
                    if let Some(mask) = &field.mask {
                        if !mask.0[b as usize] {
                            continue;
                        }
                    }
                    if !sink.push(table.weight(b)) {
                        return false;
                    }
                }
            }
            let term = if field.flags.reverse { 255 } else { 1 };
            if !sink.push(term) {
                return false;
            }
        }
        sink.push(0x00)
    }

    /// Byte range of one field's key contribution within the line.
    fn field_bounds(&self, key: &CompiledKey, field: &FieldSpec, line: &[u8]) -> (usize, usize) {
        let sbase = self.positions[field.start.index];
        let mut s = if field.flags.skip_start_blanks {
            skip_blanks(line, sbase)
        } else {
            sbase
        };
        s = (s + field.start.offset).min(line.len());

        let e = match &field.end {
            None => line.len(),
            Some(end) => self.end_bound(key, field, end, line),
        };
        (s, e.max(s))
    }

    fn end_bound(&self, key: &CompiledKey, field: &FieldSpec, end: &ColumnRef, line: &[u8]) -> usize {
        let base = self.positions[end.index];
        if end.offset == 0 {
            // through the end of the field
            end_of_field(line, base, key.separator)
        } else {
            let base = if field.flags.skip_end_blanks {
                skip_blanks(line, base)
            } else {
                base
            };
            // the end indent is a 1-based inclusive character count
            (base + end.offset).min(line.len())
        }
    }

    /// Resolve every registered column boundary to a field-start byte
    /// position in one left-to-right scan.
    fn resolve_columns(&mut self, key: &CompiledKey, line: &[u8]) {
        let mut field = 1usize;
        let mut start = 0usize;
        for (i, col) in key.columns.iter().enumerate() {
            while field < col.field {
                start = next_field_start(line, start, key.separator);
                field += 1;
            }
            self.positions[i] = start;
        }
    }
}

#[inline]
fn skip_blanks(line: &[u8], mut i: usize) -> usize {
    while i < line.len() && is_blank(line[i]) {
        i += 1;
    }
    i
}

/// Start of the field following the one starting at `start`. With an
/// explicit separator, fields are split at each separator byte; by default a
/// field is a run of leading blanks followed by a run of non-blanks.
fn next_field_start(line: &[u8], start: usize, sep: Option<u8>) -> usize {
    match sep {
        Some(sep) => match memchr::memchr(sep, &line[start..]) {
            Some(at) => start + at + 1,
            None => line.len(),
        },
        None => {
            let mut i = skip_blanks(line, start);
            while i < line.len() && !is_blank(line[i]) {
                i += 1;
            }
            i
        }
    }
}

fn end_of_field(line: &[u8], start: usize, sep: Option<u8>) -> usize {
    match sep {
        Some(sep) => match memchr::memchr(sep, &line[start..]) {
            Some(at) => start + at,
            None => line.len(),
        },
        None => {
            let mut i = skip_blanks(line, start);
            while i < line.len() && !is_blank(line[i]) {
                i += 1;
            }
            i
        }
    }
}

// Numeric key encoding. One lead byte combines sign and an exponent bucket:
// 0x80 is exact zero, positive values occupy 0x82..=0xFE ascending with the
// exponent, negative values mirror to 0x02..=0x7E descending as magnitude
// grows. Exponents beyond +-61 escape behind lead 0xFE / 0x82 into five
// continuation bytes of 7 bits each, offset into 0x40..=0xBF. The mantissa
// follows as two decimal digits per byte (+0x40) with trailing zeros
// trimmed, closed by a sentinel that differs from every digit byte (0x02
// for positive, 0xFE for negative) so a trimmed mantissa can never alias a
// longer one. Every emitted byte lies in 0x01..=0xFE, which keeps 0x00 out
// of the key and makes the reverse-field complement (0xFF - b) safe.

const EXP_DIRECT_MAX: i64 = 61;
const LEAD_ZERO: u8 = 0x80;
const LEAD_BIAS: i64 = 0xC0;
const LEAD_ESC_HIGH: u8 = 0xFE;
const LEAD_ESC_LOW: u8 = 0x82;

fn encode_number(text: &[u8], reversed: bool, sink: &mut ArenaSink<'_>) -> bool {
    let xf = |b: u8| if reversed { 0xFF - b } else { b };

    let (negative, digits, point) = parse_decimal(text);

    let first_sig = digits.iter().position(|&d| d != 0);
    let first_sig = match first_sig {
        Some(i) => i,
        // no significant digit: exact zero regardless of sign
        None => return sink.push(xf(LEAD_ZERO)) && sink.push(xf(0x01)),
    };
    let last_sig = digits.iter().rposition(|&d| d != 0).unwrap_or(first_sig);
    let mantissa = &digits[first_sig..=last_sig];
    // value = 0.m1 m2 ... * 10^exp
    let exp = point as i64 - first_sig as i64;

    let (lead, escape) = if exp > EXP_DIRECT_MAX {
        (LEAD_ESC_HIGH, Some((exp - EXP_DIRECT_MAX - 1) as u32))
    } else if exp < -EXP_DIRECT_MAX {
        (LEAD_ESC_LOW, Some((exp + 0x8000_0000) as u32))
    } else {
        ((LEAD_BIAS + exp) as u8, None)
    };
    let lead = if negative {
        (0x100 - lead as u16) as u8
    } else {
        lead
    };
    if !sink.push(xf(lead)) {
        return false;
    }

    if let Some(n) = escape {
        for k in (0..5).rev() {
            let b = 0x40 + ((n >> (7 * k)) & 0x7F) as u8;
            let b = if negative { 0xFF - b } else { b };
            if !sink.push(xf(b)) {
                return false;
            }
        }
    }

    for pair in mantissa.chunks(2) {
        let v = pair[0] * 10 + if pair.len() == 2 { pair[1] } else { 0 };
        let b = 0x40 + v;
        let b = if negative { 0xE3 - b } else { b };
        if !sink.push(xf(b)) {
            return false;
        }
    }

    sink.push(xf(if negative { 0xFE } else { 0x02 }))
}

/// Extract sign, decimal digits and the position of the decimal point from
/// a numeric prefix of `text`. Anything after the first non-numeric byte is
/// ignored; a token with no digits encodes as zero.
fn parse_decimal(text: &[u8]) -> (bool, Vec<u8>, usize) {
    let mut i = skip_blanks(text, 0);
    let mut negative = false;
    if i < text.len() && text[i] == b'-' {
        negative = true;
        i += 1;
    }
    let mut digits = Vec::new();
    let mut point = None;
    while i < text.len() {
        let b = text[i];
        if b.is_ascii_digit() {
            digits.push(b - b'0');
        } else if b == b'.' && point.is_none() {
            point = Some(digits.len());
        } else {
            break;
        }
        i += 1;
    }
    let point = point.unwrap_or(digits.len());
    (negative, digits, point)
}
