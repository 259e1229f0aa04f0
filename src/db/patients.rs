//! Patients.

use super::{
    column_date, column_timestamp, date_text, next_timestamp, timestamp_text, Dependent, Scope,
    Table,
};
use crate::error::RepoResult;
use crate::models::{EntityKind, NewPatient, Patient, PatientPatch, User};
use rusqlite::{params, Connection, Row};
use time::OffsetDateTime;
use tracing::info;

impl Table for Patient {
    const KIND: EntityKind = EntityKind::Patient;
    const NAME: &'static str = "patients";
    const COLUMNS: &'static str = "id, name, phone, date_of_birth, gender, blood_type, address, \
         emergency_contact, owner_id, created_at, updated_at";
    const OWNED_BY: &'static str = "owner_id = :owner";
    const DEPENDENTS: &'static [Dependent] = &[
        Dependent {
            table: "medical_records",
            column: "patient_id",
            kind: EntityKind::MedicalRecord,
        },
        Dependent {
            table: "appointments",
            column: "patient_id",
            kind: EntityKind::Appointment,
        },
        Dependent {
            table: "prescriptions",
            column: "patient_id",
            kind: EntityKind::Prescription,
        },
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Patient {
            id: row.get(0)?,
            name: row.get(1)?,
            phone: row.get(2)?,
            date_of_birth: column_date(row, 3)?,
            gender: row.get(4)?,
            blood_type: row.get(5)?,
            address: row.get(6)?,
            emergency_contact: row.get(7)?,
            owner_id: row.get(8)?,
            created_at: column_timestamp(row, 9)?,
            updated_at: column_timestamp(row, 10)?,
        })
    }
}

/// Registers a patient.
///
/// # Errors
///
/// `Validation` for blank fields, `Reference` if `owner_id` names no user.
pub fn create(conn: &mut Connection, input: &NewPatient) -> RepoResult<Patient> {
    input.validate()?;
    let tx = conn.transaction()?;
    if let Some(owner_id) = input.owner_id {
        super::require::<User>(&tx, owner_id)?;
    }

    let now = timestamp_text(OffsetDateTime::now_utc())?;
    tx.execute(
        "INSERT INTO patients (name, phone, date_of_birth, gender, blood_type, address,
         emergency_contact, owner_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            input.name,
            input.phone,
            date_text(input.date_of_birth)?,
            input.gender,
            input.blood_type,
            input.address,
            input.emergency_contact,
            input.owner_id,
            now,
        ],
    )?;
    let patient = super::get::<Patient>(&tx, tx.last_insert_rowid(), Scope::All)?;
    tx.commit()?;

    info!(patient_id = patient.id, owner_id = ?patient.owner_id, "created patient");
    Ok(patient)
}

/// Applies a partial update and refreshes `updated_at`.
pub fn update(conn: &mut Connection, id: i64, patch: &PatientPatch) -> RepoResult<Patient> {
    patch.validate()?;
    let tx = conn.transaction()?;
    let mut patient = super::get::<Patient>(&tx, id, Scope::All)?;

    if let Some(name) = &patch.name {
        patient.name = name.clone();
    }
    if let Some(phone) = &patch.phone {
        patient.phone = phone.clone();
    }
    if let Some(date_of_birth) = patch.date_of_birth {
        patient.date_of_birth = date_of_birth;
    }
    if let Some(gender) = &patch.gender {
        patient.gender = gender.clone();
    }
    if let Some(blood_type) = &patch.blood_type {
        patient.blood_type = blood_type.clone();
    }
    if let Some(address) = &patch.address {
        patient.address = address.clone();
    }
    if let Some(emergency_contact) = &patch.emergency_contact {
        patient.emergency_contact = emergency_contact.clone();
    }

    tx.execute(
        "UPDATE patients SET name = ?1, phone = ?2, date_of_birth = ?3, gender = ?4,
         blood_type = ?5, address = ?6, emergency_contact = ?7, updated_at = ?8 WHERE id = ?9",
        params![
            patient.name,
            patient.phone,
            date_text(patient.date_of_birth)?,
            patient.gender,
            patient.blood_type,
            patient.address,
            patient.emergency_contact,
            timestamp_text(next_timestamp(patient.updated_at))?,
            id,
        ],
    )?;
    let patient = super::get::<Patient>(&tx, id, Scope::All)?;
    tx.commit()?;

    info!(patient_id = id, "updated patient");
    Ok(patient)
}
