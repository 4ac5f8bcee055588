//! Error kinds for the execution core.
//!
//! `CoreError` covers every fatal category the core itself can raise.
//! `UserSyntactic` is deliberately absent: that kind belongs to the
//! parser/analyzer collaborator, not this crate.

use crate::ids::ControlId;
use thiserror::Error;

/// Severity of a raised condition. Most `CoreError` variants are always
/// `Fatal`; `Warning` is reserved for the evaluator's "unknown value in
/// assignment RHS" case and similar continue-on-report situations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("instantiation error: {0}")]
    Instantiation(String),

    #[error("division by zero")]
    DivZero,

    #[error("negative exponent")]
    BadExp,

    #[error("exponent too large for base")]
    ExpTooLarge,

    #[error("value {value} outside declared range {lo}..{hi}")]
    RangeError { value: String, lo: String, hi: String },

    #[error("array index {index} outside bounds")]
    IndexOutOfBounds { index: i64 },

    #[error("communication on disconnected port")]
    Disconnected,

    #[error("conflicting union decomposition")]
    UnionConflict,

    #[error("interference: production rule for wire {wire} has both pull-up and pull-down enabled")]
    Interference { wire: String },

    #[error("instability: production rule for wire {wire} lost its enabling condition before firing")]
    Instability { wire: String },

    #[error("parallel conflict: concurrent access to variable {var} from sibling frames")]
    ParallelConflict { var: String },

    #[error("resource limit exceeded: {0}")]
    Resource(String),

    #[error("deadlock: no runnable action remains with {suspended} thread(s) suspended, including {thread}")]
    Deadlock { suspended: usize, thread: ControlId },

    #[error("selection has no true guard (immediate mode)")]
    NoTrueGuard,

    /// A condition the core would otherwise tolerate and log (unassigned
    /// read, unknown assignment RHS), promoted to fatal by
    /// `Context::warnings_as_errors`.
    #[error("{0}")]
    Warning(String),
}

impl CoreError {
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Warning(_) => Severity::Warning,
            _ => Severity::Fatal,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
