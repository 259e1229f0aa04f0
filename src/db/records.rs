//! Medical records.

use super::{
    column_date, column_enum, column_timestamp, date_text, next_timestamp, timestamp_text,
    Dependent, Scope, Table,
};
use crate::error::RepoResult;
use crate::models::{EntityKind, MedicalRecord, MedicalRecordPatch, NewMedicalRecord, Patient};
use rusqlite::{params, Connection, Row};
use time::OffsetDateTime;
use tracing::info;

impl Table for MedicalRecord {
    const KIND: EntityKind = EntityKind::MedicalRecord;
    const NAME: &'static str = "medical_records";
    const COLUMNS: &'static str = "id, patient_id, date, doctor, diagnosis, treatment, \
         observations, status, created_at, updated_at";
    const OWNED_BY: &'static str = "patient_id IN (SELECT id FROM patients WHERE owner_id = :owner)";
    const DEPENDENTS: &'static [Dependent] = &[Dependent {
        table: "prescriptions",
        column: "record_id",
        kind: EntityKind::Prescription,
    }];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MedicalRecord {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            date: column_date(row, 2)?,
            doctor: row.get(3)?,
            diagnosis: row.get(4)?,
            treatment: row.get(5)?,
            observations: row.get(6)?,
            status: column_enum(row, 7)?,
            created_at: column_timestamp(row, 8)?,
            updated_at: column_timestamp(row, 9)?,
        })
    }
}

/// Adds a record to a patient's history.
///
/// # Errors
///
/// `Reference` if `patient_id` names no patient.
pub fn create(conn: &mut Connection, input: &NewMedicalRecord) -> RepoResult<MedicalRecord> {
    input.validate()?;
    let tx = conn.transaction()?;
    super::require::<Patient>(&tx, input.patient_id)?;

    let now = timestamp_text(OffsetDateTime::now_utc())?;
    tx.execute(
        "INSERT INTO medical_records (patient_id, date, doctor, diagnosis, treatment,
         observations, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            input.patient_id,
            date_text(input.date)?,
            input.doctor,
            input.diagnosis,
            input.treatment,
            input.observations,
            input.status.as_str(),
            now,
        ],
    )?;
    let record = super::get::<MedicalRecord>(&tx, tx.last_insert_rowid(), Scope::All)?;
    tx.commit()?;

    info!(record_id = record.id, patient_id = record.patient_id, "created medical record");
    Ok(record)
}

/// Applies a partial update. A record stays attached to the patient it was
/// created for.
pub fn update(
    conn: &mut Connection,
    id: i64,
    patch: &MedicalRecordPatch,
) -> RepoResult<MedicalRecord> {
    patch.validate()?;
    let tx = conn.transaction()?;
    let mut record = super::get::<MedicalRecord>(&tx, id, Scope::All)?;

    if let Some(date) = patch.date {
        record.date = date;
    }
    if let Some(doctor) = &patch.doctor {
        record.doctor = doctor.clone();
    }
    if let Some(diagnosis) = &patch.diagnosis {
        record.diagnosis = diagnosis.clone();
    }
    if let Some(treatment) = &patch.treatment {
        record.treatment = treatment.clone();
    }
    if let Some(observations) = &patch.observations {
        record.observations = observations.clone();
    }
    if let Some(status) = patch.status {
        record.status = status;
    }

    tx.execute(
        "UPDATE medical_records SET date = ?1, doctor = ?2, diagnosis = ?3, treatment = ?4,
         observations = ?5, status = ?6, updated_at = ?7 WHERE id = ?8",
        params![
            date_text(record.date)?,
            record.doctor,
            record.diagnosis,
            record.treatment,
            record.observations,
            record.status.as_str(),
            timestamp_text(next_timestamp(record.updated_at))?,
            id,
        ],
    )?;
    let record = super::get::<MedicalRecord>(&tx, id, Scope::All)?;
    tx.commit()?;

    info!(record_id = id, status = %record.status, "updated medical record");
    Ok(record)
}
