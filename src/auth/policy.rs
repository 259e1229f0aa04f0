//! Access policy keyed by (role, entity kind, operation).

use crate::auth::Caller;
use crate::db::Scope;
use crate::models::{EntityKind, Role};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    /// Both single-row fetches and listings.
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Outcome of a matrix lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Full,
    /// Only rows belonging to the caller's own patients.
    Owned,
    Denied,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("{role} may not {operation} {kind} entries")]
    Forbidden {
        role: Role,
        kind: EntityKind,
        operation: Operation,
    },
}

/// The role matrix.
pub fn access(role: Role, kind: EntityKind, operation: Operation) -> Access {
    use EntityKind as K;

    match role {
        Role::Administrator => Access::Full,
        Role::Doctor | Role::Nurse => match kind {
            K::User => Access::Denied,
            K::Patient | K::MedicalRecord | K::Appointment | K::Prescription => Access::Full,
        },
        Role::Secretary => match kind {
            K::Patient | K::Appointment => Access::Full,
            K::User | K::MedicalRecord | K::Prescription => Access::Denied,
        },
        Role::Patient => match (kind, operation) {
            (K::User, _) => Access::Denied,
            (_, Operation::Read) => Access::Owned,
            _ => Access::Denied,
        },
    }
}

/// Decides whether a caller may perform an operation.
///
/// In open mode every request is allowed with full visibility, which is the
/// service's historical behavior. Enforced mode requires an authenticated
/// caller and applies [`access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessPolicy {
    enforce: bool,
}

impl AccessPolicy {
    pub fn open() -> Self {
        Self { enforce: false }
    }

    pub fn enforced() -> Self {
        Self { enforce: true }
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    pub fn authorize(
        &self,
        caller: Option<&Caller>,
        kind: EntityKind,
        operation: Operation,
    ) -> Result<Scope, AccessError> {
        if !self.enforce {
            return Ok(Scope::All);
        }
        let caller = caller.ok_or(AccessError::Unauthenticated)?;
        match access(caller.role, kind, operation) {
            Access::Full => Ok(Scope::All),
            Access::Owned => Ok(Scope::OwnedBy(caller.id)),
            Access::Denied => Err(AccessError::Forbidden {
                role: caller.role,
                kind,
                operation,
            }),
        }
    }
}
