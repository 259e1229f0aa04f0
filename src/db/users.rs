//! User accounts.

use super::{column_enum, column_timestamp, timestamp_text, Scope, Table};
use crate::auth::password::PasswordHasher;
use crate::error::{RepoError, RepoResult};
use crate::models::{EntityKind, NewUser, User, UserPatch};
use rusqlite::{params, Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::info;

impl Table for User {
    const KIND: EntityKind = EntityKind::User;
    const NAME: &'static str = "users";
    const COLUMNS: &'static str =
        "id, name, email, phone, role, department, is_active, created_at, hashed_password";
    const OWNED_BY: &'static str = "id = :owner";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            role: column_enum(row, 4)?,
            department: row.get(5)?,
            is_active: row.get(6)?,
            created_at: column_timestamp(row, 7)?,
            hashed_password: row.get(8)?,
        })
    }
}

fn email_taken() -> RepoError {
    RepoError::Conflict("Email already registered".to_string())
}

/// Maps a UNIQUE violation on `users.email` to `Conflict`.
fn unique_violation(err: rusqlite::Error) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            email_taken()
        }
        _ => RepoError::Storage(err),
    }
}

/// Looks up an account by its login email.
pub fn find_by_email(conn: &Connection, email: &str) -> RepoResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", User::COLUMNS),
            [email],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

/// Creates a new user.
///
/// The email is checked for uniqueness before the password is hashed, so a
/// duplicate registration costs no bcrypt round.
///
/// # Errors
///
/// `Validation` for blank or malformed fields, `Conflict` if the email is
/// already registered.
///
/// # Postconditions
///
/// A new active user exists whose digest verifies `input.password`.
pub fn create(
    conn: &mut Connection,
    passwords: &PasswordHasher,
    input: &NewUser,
) -> RepoResult<User> {
    input.validate()?;
    let tx = conn.transaction()?;

    if find_by_email(&tx, &input.email)?.is_some() {
        return Err(email_taken());
    }
    let hashed_password = passwords.hash(&input.password)?;

    tx.execute(
        "INSERT INTO users (name, email, phone, hashed_password, role, department, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            input.name,
            input.email,
            input.phone,
            hashed_password,
            input.role.as_str(),
            input.department,
            timestamp_text(OffsetDateTime::now_utc())?,
        ],
    )
    .map_err(unique_violation)?;
    let user = super::get::<User>(&tx, tx.last_insert_rowid(), Scope::All)?;
    tx.commit()?;

    info!(user_id = user.id, role = %user.role, "created user");
    Ok(user)
}

/// Applies a partial update to a user.
///
/// Changing the email re-checks uniqueness; a supplied password replaces the
/// stored digest with a fresh hash.
pub fn update(
    conn: &mut Connection,
    passwords: &PasswordHasher,
    id: i64,
    patch: &UserPatch,
) -> RepoResult<User> {
    patch.validate()?;
    let tx = conn.transaction()?;
    let mut user = super::get::<User>(&tx, id, Scope::All)?;

    if let Some(email) = &patch.email {
        if *email != user.email {
            if find_by_email(&tx, email)?.is_some() {
                return Err(email_taken());
            }
            user.email = email.clone();
        }
    }
    if let Some(name) = &patch.name {
        user.name = name.clone();
    }
    if let Some(phone) = &patch.phone {
        user.phone = phone.clone();
    }
    if let Some(role) = patch.role {
        user.role = role;
    }
    if let Some(department) = &patch.department {
        user.department = department.clone();
    }
    if let Some(is_active) = patch.is_active {
        user.is_active = is_active;
    }
    if let Some(password) = &patch.password {
        user.hashed_password = passwords.hash(password)?;
    }

    tx.execute(
        "UPDATE users SET name = ?1, email = ?2, phone = ?3, role = ?4, department = ?5,
         is_active = ?6, hashed_password = ?7 WHERE id = ?8",
        params![
            user.name,
            user.email,
            user.phone,
            user.role.as_str(),
            user.department,
            user.is_active,
            user.hashed_password,
            id,
        ],
    )
    .map_err(unique_violation)?;
    let user = super::get::<User>(&tx, id, Scope::All)?;
    tx.commit()?;

    info!(user_id = id, "updated user");
    Ok(user)
}
