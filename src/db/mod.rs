//! Database module for Carebase.
//!
//! This module owns everything that touches SQLite: opening the database,
//! creating the schema, and the per-entity repositories (`users`, `patients`,
//! `records`, `appointments`, `prescriptions`). Operations shared by every
//! entity kind (`get`, `list`, `delete`) are generic over [`Table`]; creation
//! and partial updates live in the entity modules.
//!
//! Every mutation runs inside a single transaction. An error before the
//! commit drops the transaction, which rolls it back.

pub mod appointments;
pub mod patients;
pub mod prescriptions;
pub mod records;
pub mod users;

use crate::auth::password::PasswordHasher;
use crate::error::{RepoError, RepoResult};
use crate::models::{EntityKind, NewUser, Page, Role, UnknownVariant};
use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, Time};
use tracing::{info, warn};

/// Schema applied on every start; all statements are idempotent.
const SCHEMA: &str = include_str!("schema.sql");

/// Which rows a read may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Rows belonging to patients owned by this user id.
    OwnedBy(i64),
}

/// A table holding rows that reference another table's ids.
#[derive(Debug)]
pub struct Dependent {
    pub table: &'static str,
    pub column: &'static str,
    pub kind: EntityKind,
}

/// Mapping between an entity type and its table.
pub trait Table: Sized {
    const KIND: EntityKind;
    const NAME: &'static str;
    /// Column list, in the order `from_row` reads them.
    const COLUMNS: &'static str;
    /// Predicate (over `:owner`) selecting rows visible to an owner.
    const OWNED_BY: &'static str;
    /// Rows that block deletion while they still reference this table.
    const DEPENDENTS: &'static [Dependent] = &[];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Shared handle to the SQLite connection.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database file and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, foreign keys cannot be
    /// enabled, or the schema fails to execute.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::init(conn)
    }

    /// Opens a private in-memory database with the schema applied.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to execute schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }
}

/// Creates the first administrator account.
///
/// Runs only while the `users` table is empty. Without a configured password
/// nothing is created and a warning is logged.
///
/// # Side Effects
///
/// Inserts one row into `users` on first start.
pub fn bootstrap_admin(
    conn: &mut Connection,
    passwords: &PasswordHasher,
    email: &str,
    password: Option<&str>,
) -> Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(());
    }
    let Some(password) = password else {
        warn!("no users exist and no admin password is configured");
        return Ok(());
    };

    let admin = users::create(
        conn,
        passwords,
        &NewUser {
            name: "Administrator".to_string(),
            email: email.to_string(),
            phone: "N/A".to_string(),
            password: password.to_string(),
            role: Role::Administrator,
            department: None,
        },
    )
    .context("Failed to create administrator account")?;
    info!(user_id = admin.id, email = %admin.email, "created administrator account");
    Ok(())
}

/// Fetches one row by id.
///
/// # Errors
///
/// Returns `NotFound` when no row with `id` is visible under `scope`.
pub fn get<T: Table>(conn: &Connection, id: i64, scope: Scope) -> RepoResult<T> {
    let found = match scope {
        Scope::All => conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = :id", T::COLUMNS, T::NAME),
                named_params! { ":id": id },
                T::from_row,
            )
            .optional()?,
        Scope::OwnedBy(owner) => conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = :id AND {}",
                    T::COLUMNS,
                    T::NAME,
                    T::OWNED_BY
                ),
                named_params! { ":id": id, ":owner": owner },
                T::from_row,
            )
            .optional()?,
    };
    found.ok_or(RepoError::not_found(T::KIND))
}

/// Lists rows in insertion order.
pub fn list<T: Table>(conn: &Connection, page: Page, scope: Scope) -> RepoResult<Vec<T>> {
    let limit = i64::from(page.effective_limit());
    let offset = i64::from(page.skip);

    let filter = match scope {
        Scope::All => String::new(),
        Scope::OwnedBy(_) => format!("WHERE {}", T::OWNED_BY),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} {} ORDER BY id LIMIT :limit OFFSET :offset",
        T::COLUMNS,
        T::NAME,
        filter
    ))?;
    let rows = match scope {
        Scope::All => stmt
            .query_map(
                named_params! { ":limit": limit, ":offset": offset },
                T::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?,
        Scope::OwnedBy(owner) => stmt
            .query_map(
                named_params! { ":owner": owner, ":limit": limit, ":offset": offset },
                T::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

/// Hard-deletes one row.
///
/// # Errors
///
/// Returns `NotFound` for an unknown id and `Conflict` while any
/// [`Table::DEPENDENTS`] row still references it.
///
/// # Postconditions
///
/// The row is gone; a later `get` with the same id reports `NotFound`.
pub fn delete<T: Table>(conn: &mut Connection, id: i64) -> RepoResult<()> {
    let tx = conn.transaction()?;
    if !exists::<T>(&tx, id)? {
        return Err(RepoError::not_found(T::KIND));
    }
    for dependent in T::DEPENDENTS {
        let count: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                dependent.table, dependent.column
            ),
            [id],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Err(RepoError::Conflict(format!(
                "{} {id} is still referenced by {count} {} entries",
                T::KIND,
                dependent.kind.to_string().to_lowercase()
            )));
        }
    }
    tx.execute(&format!("DELETE FROM {} WHERE id = ?1", T::NAME), [id])?;
    tx.commit()?;
    info!(kind = %T::KIND, id, "deleted");
    Ok(())
}

pub fn exists<T: Table>(conn: &Connection, id: i64) -> RepoResult<bool> {
    Ok(conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", T::NAME),
        [id],
        |row| row.get(0),
    )?)
}

/// Fails with `Reference` unless a row with `id` exists.
pub(crate) fn require<T: Table>(conn: &Connection, id: i64) -> RepoResult<()> {
    if exists::<T>(conn, id)? {
        Ok(())
    } else {
        Err(RepoError::reference(T::KIND, id))
    }
}

/// Timestamp for a mutation of a row last touched at `previous`.
///
/// Strictly later than `previous` even if the clock has not advanced.
pub(crate) fn next_timestamp(previous: OffsetDateTime) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

// Column encoding. Dates are `YYYY-MM-DD`, clock times `HH:MM`, timestamps
// RFC 3339 in UTC.

pub(crate) fn date_text(date: Date) -> rusqlite::Result<String> {
    let format = format_description!("[year]-[month]-[day]");
    date.format(&format).map_err(to_sql_failure)
}

pub(crate) fn time_text(clock: Time) -> rusqlite::Result<String> {
    let format = format_description!("[hour]:[minute]");
    clock.format(&format).map_err(to_sql_failure)
}

pub(crate) fn timestamp_text(timestamp: OffsetDateTime) -> rusqlite::Result<String> {
    timestamp.format(&Rfc3339).map_err(to_sql_failure)
}

pub(crate) fn column_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Date> {
    let format = format_description!("[year]-[month]-[day]");
    let text: String = row.get(idx)?;
    Date::parse(&text, &format).map_err(|e| from_sql_failure(idx, e))
}

pub(crate) fn column_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Time> {
    let format = format_description!("[hour]:[minute]");
    let text: String = row.get(idx)?;
    Time::parse(&text, &format).map_err(|e| from_sql_failure(idx, e))
}

pub(crate) fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let text: String = row.get(idx)?;
    OffsetDateTime::parse(&text, &Rfc3339).map_err(|e| from_sql_failure(idx, e))
}

pub(crate) fn column_enum<E>(row: &Row<'_>, idx: usize) -> rusqlite::Result<E>
where
    E: FromStr<Err = UnknownVariant>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| from_sql_failure(idx, e))
}

fn to_sql_failure(err: time::error::Format) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(err))
}

fn from_sql_failure<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::models::{MedicalRecord, Patient, User};

    #[test]
    fn schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| conn.execute_batch(SCHEMA)).unwrap();
    }

    #[test]
    fn foreign_keys_are_enabled() {
        let db = Database::open_in_memory().unwrap();
        let enabled: bool = db
            .with_conn(|conn| conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)))
            .unwrap();
        assert!(enabled);
    }

    #[test]
    fn bootstrap_creates_admin_only_once() {
        let db = Database::open_in_memory().unwrap();
        let hasher = fixtures::hasher();
        db.with_conn(|conn| bootstrap_admin(conn, &hasher, "admin@hospital.com", Some("secret")))
            .unwrap();
        db.with_conn(|conn| bootstrap_admin(conn, &hasher, "other@hospital.com", Some("secret")))
            .unwrap();

        let all: Vec<User> = db
            .with_conn(|conn| list(conn, Page::default(), Scope::All))
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].email, "admin@hospital.com");
        assert_eq!(all[0].role, Role::Administrator);
    }

    #[test]
    fn bootstrap_without_password_creates_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| bootstrap_admin(conn, &fixtures::hasher(), "admin@hospital.com", None))
            .unwrap();
        let all: Vec<User> = db
            .with_conn(|conn| list(conn, Page::default(), Scope::All))
            .unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn list_pages_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<i64> = db.with_conn(|conn| {
            (0..5)
                .map(|_| fixtures::patient(conn, None).id)
                .collect()
        });

        let page: Vec<Patient> = db
            .with_conn(|conn| list(conn, Page::new(1, 2), Scope::All))
            .unwrap();
        assert_eq!(
            page.iter().map(|p| p.id).collect::<Vec<_>>(),
            ids[1..3].to_vec()
        );

        let past_end: Vec<Patient> = db
            .with_conn(|conn| list(conn, Page::new(10, 100), Scope::All))
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn owned_scope_hides_other_owners_rows() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let mine = fixtures::user(conn, "me@x.com", Role::Patient);
            let theirs = fixtures::user(conn, "them@x.com", Role::Patient);
            let my_patient = fixtures::patient(conn, Some(mine.id));
            let their_patient = fixtures::patient(conn, Some(theirs.id));
            let my_record = fixtures::record(conn, my_patient.id);
            let their_record = fixtures::record(conn, their_patient.id);

            let visible: Vec<MedicalRecord> =
                list(conn, Page::default(), Scope::OwnedBy(mine.id)).unwrap();
            assert_eq!(visible, vec![my_record.clone()]);

            assert!(get::<MedicalRecord>(conn, my_record.id, Scope::OwnedBy(mine.id)).is_ok());
            assert!(matches!(
                get::<MedicalRecord>(conn, their_record.id, Scope::OwnedBy(mine.id)),
                Err(RepoError::NotFound {
                    kind: EntityKind::MedicalRecord
                })
            ));
        });
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let first = fixtures::patient(conn, None);
            delete::<Patient>(conn, first.id).unwrap();
            let second = fixtures::patient(conn, None);
            assert!(second.id > first.id);
        });
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let patient = fixtures::patient(conn, None);
            delete::<Patient>(conn, patient.id).unwrap();
            assert!(matches!(
                get::<Patient>(conn, patient.id, Scope::All),
                Err(RepoError::NotFound { .. })
            ));
            assert!(matches!(
                delete::<Patient>(conn, patient.id),
                Err(RepoError::NotFound { .. })
            ));
        });
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let future = OffsetDateTime::now_utc() + Duration::hours(1);
        assert!(next_timestamp(future) > future);
        let past = OffsetDateTime::now_utc() - Duration::hours(1);
        assert!(next_timestamp(past) > past);
    }
}
