//! External merge sort engine in the style of POSIX sort(1).
//!
//! Records are compared through order-preserving binary keys: key fields are
//! encoded once, up front, so every later comparison is a plain byte
//! comparison. Input is sorted in bounded-memory chunks with an MSD radix
//! sort, spilled to temporary runs when it does not fit, and merged with a
//! bounded fan-in. The sort is stable throughout and peak memory does not
//! depend on input size.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod config;
pub mod encode;
pub mod error;
pub mod fields;
pub mod merge;
pub mod pipeline;
pub mod radix_sort;
pub mod reader;
pub mod record;
pub mod writer;

// Re-export commonly used types
pub use config::{KeySpec, SortConfig};
pub use error::{SortError, SortResult};
pub use pipeline::SortSession;

/// Exit codes matching sort(1)
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const SORT_FAILURE: i32 = 2;

/// Sort (or merge, or check) `files` according to `config`.
pub fn sort(config: SortConfig, files: &[String]) -> SortResult<()> {
    SortSession::new(config)?.run(files)
}
