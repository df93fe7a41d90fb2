//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, locking rules, conflicts). Infrastructure concerns belong elsewhere.
/// These errors propagate unmodified to the caller of the orchestration service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A task, line or inventory unit does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the aggregate's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The inventory unit is already held by another task.
    #[error("inventory unit {lpn} is already locked by task {task}")]
    AlreadyLocked { lpn: String, task: String },

    /// The inventory unit cannot be worked by a task (allocated or terminal).
    #[error("inventory unit not eligible: {0}")]
    NotEligible(String),

    /// A quantity mutation would take on-hand stock below zero.
    #[error("quantity cannot be negative (requested {0})")]
    NegativeQuantity(i64),

    /// Batch creation found nothing to act on.
    #[error("no eligible inventory units")]
    NoEligibleUnits,

    /// A conflict occurred (e.g. stale version / duplicate identity).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_eligible(msg: impl Into<String>) -> Self {
        Self::NotEligible(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
