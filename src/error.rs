//! Error handling for the sort engine

use std::io;
use thiserror::Error;

/// Custom error type for sort operations
#[derive(Error, Debug)]
pub enum SortError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{file}: No such file or directory")]
    FileNotFound { file: String },

    #[error("{file}: Permission denied")]
    PermissionDenied { file: String },

    #[error("invalid key specification `{spec}': {reason}")]
    InvalidKeySpec { spec: String, reason: String },

    #[error("invalid option value: {message}")]
    InvalidOption { message: String },

    #[error("conflicting options: {message}")]
    ConflictingOptions { message: String },

    #[error("corrupt temporary run: {message}")]
    CorruptRun { message: String },

    #[error("record exceeds the sort buffer capacity")]
    RecordTooLarge,

    #[error("line {line}: disorder: {text}")]
    Disorder { line: u64, text: String },

    #[error("line {line}: duplicate: {text}")]
    Duplicate { line: u64, text: String },
}

impl SortError {
    /// Returns the appropriate process exit code for this error.
    /// Check-mode violations exit 1; everything else is a hard failure (2).
    pub fn exit_code(&self) -> i32 {
        match self {
            SortError::Disorder { .. } | SortError::Duplicate { .. } => crate::EXIT_FAILURE,
            _ => crate::SORT_FAILURE,
        }
    }

    /// True for the check-mode ordering/uniqueness violations.
    pub fn is_check_violation(&self) -> bool {
        matches!(
            self,
            SortError::Disorder { .. } | SortError::Duplicate { .. }
        )
    }

    pub fn invalid_key_spec(spec: &str, reason: &str) -> Self {
        SortError::InvalidKeySpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_option(message: &str) -> Self {
        SortError::InvalidOption {
            message: message.to_string(),
        }
    }

    pub fn conflicting_options(message: &str) -> Self {
        SortError::ConflictingOptions {
            message: message.to_string(),
        }
    }

    pub fn corrupt_run(message: &str) -> Self {
        SortError::CorruptRun {
            message: message.to_string(),
        }
    }
}

/// Result type for sort operations
pub type SortResult<T> = Result<T, SortError>;

/// Context trait for mapping I/O errors to per-file diagnostics
pub trait SortContext<T> {
    fn with_file_context(self, filename: &str) -> SortResult<T>;
}

impl<T> SortContext<T> for Result<T, io::Error> {
    fn with_file_context(self, filename: &str) -> SortResult<T> {
        self.map_err(|io_err| match io_err.kind() {
            io::ErrorKind::NotFound => SortError::FileNotFound {
                file: filename.to_string(),
            },
            io::ErrorKind::PermissionDenied => SortError::PermissionDenied {
                file: filename.to_string(),
            },
            _ => SortError::Io(io::Error::new(
                io_err.kind(),
                format!("{}: {}", filename, io_err),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = SortError::Disorder {
            line: 3,
            text: "b".to_string(),
        };
        assert_eq!(err.exit_code(), crate::EXIT_FAILURE);
        assert!(err.is_check_violation());

        let err = SortError::corrupt_run("short header");
        assert_eq!(err.exit_code(), crate::SORT_FAILURE);
        assert!(!err.is_check_violation());
    }

    #[test]
    fn test_file_context() {
        let res: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"));
        match res.with_file_context("input.txt") {
            Err(SortError::FileNotFound { file }) => assert_eq!(file, "input.txt"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
