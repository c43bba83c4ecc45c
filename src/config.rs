//! Configuration and key-spec parsing for sort operations

use crate::error::{SortError, SortResult};
use crate::fields::KeyFlags;

/// One parsed `-k F[.C][flags][,F[.C][flags]]` specification.
///
/// Field and character numbers are 1-based as written by the user; the
/// key-spec compiler converts them to internal column references.
#[derive(Debug, Clone)]
pub struct KeySpec {
    /// Starting field number (1-based)
    pub start_field: usize,
    /// Starting character position within the field (1-based, optional)
    pub start_char: Option<usize>,
    /// Ending field number (1-based, optional; defaults to end of line)
    pub end_field: Option<usize>,
    /// Ending character position within the field (1-based; 0 or omitted
    /// means "through the end of the field")
    pub end_char: Option<usize>,
    /// Ordering flags attached to this key
    pub flags: KeyFlags,
    /// Whether any per-key flag letter was given (a bare key inherits the
    /// global ordering flags)
    pub has_flags: bool,
}

impl KeySpec {
    /// Parse a key definition like `2`, `2,4`, `1.3,1.5` or `2nr`.
    pub fn parse(keydef: &str) -> SortResult<Self> {
        let parts: Vec<&str> = keydef.split(',').collect();
        if parts.is_empty() || parts.len() > 2 || parts[0].is_empty() {
            return Err(SortError::invalid_key_spec(keydef, "malformed field spec"));
        }

        let mut flags = KeyFlags::default();
        let mut has_flags = false;

        let (start_field, start_char) =
            Self::parse_part(keydef, parts[0], true, &mut flags, &mut has_flags)?;

        let (end_field, end_char) = if parts.len() == 2 {
            if parts[1].is_empty() {
                return Err(SortError::invalid_key_spec(keydef, "empty end position"));
            }
            let (f, c) = Self::parse_part(keydef, parts[1], false, &mut flags, &mut has_flags)?;
            (Some(f), c)
        } else {
            (None, None)
        };

        // A zero end character means "through the end of the field" and is
        // only meaningful on the end position; everywhere else positions are
        // 1-based.
        if start_field == 0 {
            return Err(SortError::invalid_key_spec(keydef, "field numbers start at 1"));
        }
        if start_char == Some(0) {
            return Err(SortError::invalid_key_spec(
                keydef,
                "character positions start at 1",
            ));
        }
        if end_field == Some(0) {
            return Err(SortError::invalid_key_spec(
                keydef,
                "cannot indent the end of line",
            ));
        }
        if let Some(ef) = end_field {
            let sc = start_char.unwrap_or(1);
            let ec = end_char.unwrap_or(0);
            if ef < start_field || (ef == start_field && ec != 0 && ec < sc) {
                return Err(SortError::invalid_key_spec(
                    keydef,
                    "end position precedes start position",
                ));
            }
        }

        Ok(KeySpec {
            start_field,
            start_char,
            end_field,
            end_char,
            flags,
            has_flags,
        })
    }

    /// Parse one side of a key definition: `F[.C][flags]`.
    fn parse_part(
        keydef: &str,
        part: &str,
        is_start: bool,
        flags: &mut KeyFlags,
        has_flags: &mut bool,
    ) -> SortResult<(usize, Option<usize>)> {
        let bytes = part.as_bytes();
        let mut i = 0;

        let field = Self::parse_number(keydef, bytes, &mut i)?
            .ok_or_else(|| SortError::invalid_key_spec(keydef, "missing field number"))?;

        let char_pos = if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            Some(
                Self::parse_number(keydef, bytes, &mut i)?.ok_or_else(|| {
                    SortError::invalid_key_spec(keydef, "missing character position")
                })?,
            )
        } else {
            None
        };

        for &b in &bytes[i..] {
            *has_flags = true;
            match b {
                b'b' => {
                    if is_start {
                        flags.skip_start_blanks = true;
                    } else {
                        flags.skip_end_blanks = true;
                    }
                }
                b'd' => flags.dictionary = true,
                b'f' => flags.fold_case = true,
                b'i' => flags.printable_only = true,
                b'n' => flags.numeric = true,
                b'r' => flags.reverse = true,
                _ => {
                    return Err(SortError::invalid_key_spec(
                        keydef,
                        &format!("unknown flag `{}'", b as char),
                    ))
                }
            }
        }

        Ok((field, char_pos))
    }

    fn parse_number(keydef: &str, bytes: &[u8], i: &mut usize) -> SortResult<Option<usize>> {
        let start = *i;
        let mut value: usize = 0;
        while *i < bytes.len() && bytes[*i].is_ascii_digit() {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((bytes[*i] - b'0') as usize))
                .ok_or_else(|| SortError::invalid_key_spec(keydef, "position too large"))?;
            *i += 1;
        }
        if *i == start {
            return Ok(None);
        }
        Ok(Some(value))
    }
}

/// Main configuration structure for a sort session.
///
/// The capacity knobs bound peak memory and the number of simultaneously
/// open temporary runs independent of total input size.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Sort keys; empty means the whole record is the key
    pub keys: Vec<KeySpec>,
    /// Global ordering flags, applied to bare keys and to whole-record mode
    pub global_flags: KeyFlags,
    /// Output only the first of an equal run
    pub unique: bool,
    /// Check that input is already sorted; do not sort
    pub check: bool,
    /// Suppress the diagnostic for check-mode violations
    pub check_silent: bool,
    /// Merge already sorted inputs; do not sort
    pub merge: bool,
    /// Write only the encoded keys (diagnostic dump)
    pub key_dump: bool,
    /// Explicit field separator byte; `None` means runs of blanks
    pub field_separator: Option<u8>,
    /// Record delimiter byte (newline by default, NUL with -z)
    pub record_delimiter: u8,
    /// Output file path; `None` means stdout
    pub output_file: Option<String>,
    /// Directory for temporary runs; `None` means the system default
    pub temp_dir: Option<String>,
    /// Byte-arena cap per chunk
    pub chunk_bytes: usize,
    /// Record cap per chunk
    pub chunk_records: usize,
    /// Merge fan-in limit
    pub fan_in: usize,
    /// Hard ceiling on simultaneously open run handles
    pub max_open_runs: usize,
    /// Hard bound on a single record's length
    pub line_max: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            global_flags: KeyFlags::default(),
            unique: false,
            check: false,
            check_silent: false,
            merge: false,
            key_dump: false,
            field_separator: None,
            record_delimiter: b'\n',
            output_file: None,
            temp_dir: None,
            chunk_bytes: 1024 * 1024,
            chunk_records: 65_536,
            fan_in: 16,
            max_open_runs: 16,
            line_max: 1024 * 1024,
        }
    }
}

impl SortConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a human buffer size like `64K`, `8M` or a plain byte count.
    pub fn set_chunk_bytes_from_string(&mut self, size_str: &str) -> SortResult<()> {
        let s = size_str.trim();
        let (digits, mult) = match s.as_bytes().last() {
            Some(b'k') | Some(b'K') => (&s[..s.len() - 1], 1024usize),
            Some(b'm') | Some(b'M') => (&s[..s.len() - 1], 1024 * 1024),
            Some(b'g') | Some(b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
            Some(b'b') | Some(b'B') => (&s[..s.len() - 1], 1),
            _ => (s, 1),
        };
        let value: usize = digits
            .parse()
            .map_err(|_| SortError::invalid_option(&format!("invalid buffer size `{}'", size_str)))?;
        self.chunk_bytes = value
            .checked_mul(mult)
            .ok_or_else(|| SortError::invalid_option("buffer size too large"))?;
        Ok(())
    }

    /// Validate the configuration for consistency before any record is read.
    pub fn validate(&self) -> SortResult<()> {
        if self.check && self.merge {
            return Err(SortError::conflicting_options(
                "cannot use both --check and --merge",
            ));
        }
        if let Some(sep) = self.field_separator {
            if sep == self.record_delimiter {
                return Err(SortError::invalid_option(
                    "field separator equals the record delimiter",
                ));
            }
        }
        if self.fan_in < 2 {
            return Err(SortError::invalid_option("merge fan-in must be at least 2"));
        }
        if self.fan_in > self.max_open_runs {
            return Err(SortError::invalid_option(
                "merge fan-in exceeds the open-run ceiling",
            ));
        }
        if self.chunk_bytes < 4096 {
            return Err(SortError::invalid_option(
                "chunk buffer too small (minimum 4KB)",
            ));
        }
        if self.chunk_records < 16 {
            return Err(SortError::invalid_option(
                "chunk record cap too small (minimum 16)",
            ));
        }
        if self.line_max < 256 || self.line_max > self.chunk_bytes {
            return Err(SortError::invalid_option(
                "line length bound must lie between 256 bytes and the chunk buffer size",
            ));
        }
        Ok(())
    }
}
