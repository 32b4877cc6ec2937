//! Error types for parsing and committing location hierarchies

use crate::model::ServerId;
use std::fmt;
use thiserror::Error;

/// Fatal problems with the tabular input, reported before any commit work.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("header must have a positive multiple of 3 columns, found {0}")]
    HeaderWidth(usize),

    #[error("row on line {line} has {found} columns, header has {expected}")]
    RowWidth {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Whole-batch failure of the batch submission collaborator.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid batch response: {0}")]
    InvalidResponse(String),
}

/// A create entry the server refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Correlation key (the location name).
    pub key: String,
    pub parent: Option<ServerId>,
    pub status: Option<u16>,
    pub message: String,
}

/// Why a commit run halted.
///
/// Locations committed before the failure keep their server ids; `pending_batches`
/// counts the queued sibling sets that were never submitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitFailure {
    pub rejected: Vec<RejectedEntry>,
    pub transport: Option<String>,
    pub pending_batches: usize,
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(transport) = &self.transport {
            write!(f, "batch submission failed: {}", transport)?;
        } else {
            write!(f, "{} location(s) rejected", self.rejected.len())?;
            for entry in &self.rejected {
                write!(f, "; '{}': {}", entry.key, entry.message)?;
            }
        }
        write!(f, " ({} batch(es) not submitted)", self.pending_batches)
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid import file: {0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Commit(CommitFailure),

    #[error("import cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;
