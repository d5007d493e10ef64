//! Error types for the Weft compiler core

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Source location in a Weft program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SrcLoc {
    /// Line number (1-indexed, 0 when unknown)
    pub line: u32,
    /// Column number (1-indexed, 0 when unknown)
    pub column: u32,
}

impl SrcLoc {
    /// Create a source location
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// True when the location was not supplied by the front-end
    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for SrcLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown location>")
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// Main error type for the compiler core
///
/// Every pass returns `Result<Program, Error>`. The pass manager wraps
/// failures in [`Error::PassError`] so the user-visible line names the
/// failing pass; with `--verbose` the pretty-printed program at the point
/// of failure is attached.
#[derive(Error, Debug)]
pub enum Error {
    /// Shape/type mismatch detected by the IR typechecker
    #[error("TypeError at {location}: {message}")]
    TypeError { message: String, location: SrcLoc },

    /// Consumption of a non-unique or already-consumed name
    #[error("UniquenessError at {location}: {message}")]
    UniquenessError { message: String, location: SrcLoc },

    /// An existential dimension is unresolved at a use site
    #[error("ShapeContextError: {message}")]
    ShapeContextError { message: String },

    /// A broken invariant inside a pass; impossible in a correct compiler
    #[error("InternalError in {pass}: {detail}")]
    InternalError { pass: String, detail: String },

    /// A pass encountered a construct it is not prepared to handle
    #[error("UnsupportedConstruct in {pass}: {what}")]
    UnsupportedConstruct { pass: String, what: String },

    /// A failure attributed to a pipeline pass by the pass manager
    #[error("{pass}: {source}{}", dump.as_deref().map(|d| format!("\nprogram at point of failure:\n{}", d)).unwrap_or_default())]
    PassError {
        pass: String,
        #[source]
        source: Box<Error>,
        dump: Option<String>,
    },

    /// IO error (reading the interchange file, writing output)
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// Malformed front-end interchange program
    #[error("InterchangeError: {source}")]
    InterchangeError {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a type error without a known location
    pub fn type_error(message: impl Into<String>) -> Self {
        Error::TypeError {
            message: message.into(),
            location: SrcLoc::default(),
        }
    }

    /// Create a type error at a known location
    pub fn type_error_at(message: impl Into<String>, location: SrcLoc) -> Self {
        Error::TypeError {
            message: message.into(),
            location,
        }
    }

    /// Create a uniqueness error
    pub fn uniqueness_error(message: impl Into<String>) -> Self {
        Error::UniquenessError {
            message: message.into(),
            location: SrcLoc::default(),
        }
    }

    /// Create a uniqueness error at a known location
    pub fn uniqueness_error_at(message: impl Into<String>, location: SrcLoc) -> Self {
        Error::UniquenessError {
            message: message.into(),
            location,
        }
    }

    /// Create a shape-context error
    pub fn shape_context_error(message: impl Into<String>) -> Self {
        Error::ShapeContextError {
            message: message.into(),
        }
    }

    /// Create an internal error attributed to a pass
    pub fn internal(pass: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::InternalError {
            pass: pass.into(),
            detail: detail.into(),
        }
    }

    /// Create an unsupported-construct error attributed to a pass
    pub fn unsupported(pass: impl Into<String>, what: impl Into<String>) -> Self {
        Error::UnsupportedConstruct {
            pass: pass.into(),
            what: what.into(),
        }
    }

    /// Attribute this error to a named pass, optionally attaching a dump
    pub fn in_pass(self, pass: impl Into<String>, dump: Option<String>) -> Self {
        Error::PassError {
            pass: pass.into(),
            source: Box::new(self),
            dump,
        }
    }

    /// The error kind as a short user-facing word
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TypeError { .. } => "TypeError",
            Error::UniquenessError { .. } => "UniquenessError",
            Error::ShapeContextError { .. } => "ShapeContextError",
            Error::InternalError { .. } => "InternalError",
            Error::UnsupportedConstruct { .. } => "UnsupportedConstruct",
            Error::PassError { source, .. } => source.kind(),
            Error::IoError { .. } => "IOError",
            Error::InterchangeError { .. } => "InterchangeError",
        }
    }
}

/// Result type alias for the compiler core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_error_names_the_pass() {
        let err = Error::type_error("i32 vs f64").in_pass("simplify", None);
        let text = err.to_string();
        assert!(text.starts_with("simplify:"));
        assert!(text.contains("TypeError"));
    }

    #[test]
    fn test_pass_error_kind_is_underlying_kind() {
        let err = Error::uniqueness_error("x consumed twice").in_pass("explicit-allocations", None);
        assert_eq!(err.kind(), "UniquenessError");
    }

    #[test]
    fn test_dump_attached_in_verbose_mode() {
        let err = Error::type_error("bad").in_pass("simplify", Some("fun main() = ...".into()));
        assert!(err.to_string().contains("program at point of failure"));
    }

    #[test]
    fn test_unknown_location_display() {
        assert_eq!(SrcLoc::default().to_string(), "<unknown location>");
        assert_eq!(SrcLoc::new(3, 14).to_string(), "3:14");
    }
}
