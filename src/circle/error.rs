//! Error types for circle ledger operations.
//!
//! Every failure the ledger can report is a variant of [`CircleError`].
//! Callers branch on [`CircleError::kind`] rather than on message text,
//! and the transport layer maps errors to HTTP statuses through
//! [`CircleError::status_code`].

use rusqlite::ErrorCode;
use thiserror::Error;

use super::join_code::JoinCode;
use super::types::{CircleId, UserId};

/// Error type for circle ledger operations.
#[derive(Error, Debug)]
pub enum CircleError {
    /// Malformed or missing input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No circle matches the given id or join code.
    #[error("Circle not found: {0}")]
    CircleNotFound(String),

    /// No user with the given id.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// The user has been soft-disabled.
    #[error("User is disabled: {0}")]
    UserDisabled(UserId),

    /// Signup with an email that is already registered.
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    /// The (user, circle) pair already exists.
    #[error("User {user} is already a member of circle {circle}")]
    AlreadyMember {
        /// The joining user.
        user: UserId,
        /// The circle they tried to join.
        circle: CircleId,
    },

    /// The circle has reached its member cap.
    #[error("Circle {circle} is full ({max} members)")]
    CircleFull {
        /// The circle.
        circle: CircleId,
        /// Configured member cap.
        max: usize,
    },

    /// The circle no longer accepts members.
    #[error("Circle {0} is not accepting members")]
    CircleNotJoinable(CircleId),

    /// The circle is not collecting contributions.
    #[error("Circle {0} is not active")]
    CircleNotActive(CircleId),

    /// Starting a circle needs at least two members.
    #[error("Circle {circle} has {count} member(s); at least 2 are required")]
    NotEnoughMembers {
        /// The circle.
        circle: CircleId,
        /// Current member count.
        count: usize,
    },

    /// The user has no membership in the circle.
    #[error("User {user} is not a member of circle {circle}")]
    NotAMember {
        /// The user.
        user: UserId,
        /// The circle.
        circle: CircleId,
    },

    /// The operation is reserved for the circle's admin.
    #[error("User {user} is not the admin of circle {circle}")]
    NotCircleAdmin {
        /// The user.
        user: UserId,
        /// The circle.
        circle: CircleId,
    },

    /// Contribution amount differs from the circle's configured amount.
    #[error("Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch {
        /// Circle's contribution amount.
        expected: i64,
        /// Amount submitted.
        actual: i64,
    },

    /// A contribution for this (circle, cycle, user) already exists.
    #[error("Duplicate contribution: circle {circle}, cycle {cycle}, user {user}")]
    DuplicateContribution {
        /// The circle.
        circle: CircleId,
        /// The cycle.
        cycle: u32,
        /// The contributor.
        user: UserId,
    },

    /// The requested cycle is not the circle's current cycle.
    #[error("Cycle {requested} is closed for circle {circle} (current cycle {current})")]
    CycleClosed {
        /// The circle.
        circle: CircleId,
        /// Cycle named by the caller.
        requested: u32,
        /// Circle's current cycle.
        current: u32,
    },

    /// Advance requested before every member contributed.
    #[error("Cycle {cycle} of circle {circle} is not fully funded")]
    CycleIncomplete {
        /// The circle.
        circle: CircleId,
        /// The current cycle.
        cycle: u32,
    },

    /// Every member has been paid; nobody is left in the rotation.
    #[error("No eligible payee in circle {0}")]
    NoEligibleMember(CircleId),

    /// The drawn join code belongs to another circle.
    #[error("Join code already in use: {0}")]
    JoinCodeTaken(JoinCode),

    /// Join code generation kept colliding.
    #[error("Join code space exhausted after {0} attempts")]
    CodeExhausted(u32),

    /// Stored state breaks a ledger invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A stored row could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Lock or storage call did not finish within the configured timeout.
    #[error("Storage operation timed out")]
    StorageTimeout,

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(rusqlite::Error),
}

/// Result type alias for circle operations.
pub type Result<T> = std::result::Result<T, CircleError>;

/// Coarse classification of a [`CircleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rejected with no side effects.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// The request conflicts with current ledger state.
    Conflict,
    /// The caller lacks the required role or standing.
    Forbidden,
    /// Stored data is inconsistent. Never auto-corrected.
    Invariant,
    /// Infrastructure hiccup; reads may be retried.
    Transient,
}

impl CircleError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::Validation,
            Self::CircleNotFound(_) | Self::UserNotFound(_) | Self::NotAMember { .. } => {
                ErrorKind::NotFound
            }
            Self::EmailTaken(_)
            | Self::AlreadyMember { .. }
            | Self::CircleFull { .. }
            | Self::CircleNotJoinable(_)
            | Self::CircleNotActive(_)
            | Self::NotEnoughMembers { .. }
            | Self::AmountMismatch { .. }
            | Self::DuplicateContribution { .. }
            | Self::CycleClosed { .. }
            | Self::CycleIncomplete { .. }
            | Self::JoinCodeTaken(_) => ErrorKind::Conflict,
            Self::UserDisabled(_) | Self::NotCircleAdmin { .. } => ErrorKind::Forbidden,
            Self::NoEligibleMember(_)
            | Self::CodeExhausted(_)
            | Self::InvariantViolation(_)
            | Self::InvalidData(_)
            | Self::Storage(_)
            | Self::Database(_) => ErrorKind::Invariant,
            Self::StorageTimeout => ErrorKind::Transient,
        }
    }

    /// HTTP status the transport layer should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Forbidden => 403,
            ErrorKind::Invariant | ErrorKind::Transient => 500,
        }
    }

    /// Whether a read that failed with this error may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

impl From<rusqlite::Error> for CircleError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::StorageTimeout,
            _ => Self::Database(err),
        }
    }
}
