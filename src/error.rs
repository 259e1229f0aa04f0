//! Error types shared by the repositories.

use crate::models::EntityKind;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Failure of a repository operation.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A required field is missing, blank, or malformed.
    #[error("{0}")]
    Validation(String),
    /// A uniqueness rule or delete restriction was violated.
    #[error("{0}")]
    Conflict(String),
    #[error("{kind} not found")]
    NotFound { kind: EntityKind },
    /// A foreign key names a row that does not exist.
    #[error("{kind} {id} does not exist")]
    Reference { kind: EntityKind, id: i64 },
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl RepoError {
    pub fn not_found(kind: EntityKind) -> Self {
        RepoError::NotFound { kind }
    }

    pub fn reference(kind: EntityKind, id: i64) -> Self {
        RepoError::Reference { kind, id }
    }
}
