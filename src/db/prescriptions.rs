//! Prescriptions.
//!
//! A prescription points at both a medical record and a patient; the two must
//! agree, i.e. the record has to belong to that patient.

use super::{
    column_date, column_enum, column_timestamp, date_text, next_timestamp, timestamp_text, Scope,
    Table,
};
use crate::error::{RepoError, RepoResult};
use crate::models::{
    EntityKind, MedicalRecord, NewPrescription, Patient, Prescription, PrescriptionPatch,
};
use rusqlite::{params, Connection, Row};
use time::OffsetDateTime;
use tracing::info;

impl Table for Prescription {
    const KIND: EntityKind = EntityKind::Prescription;
    const NAME: &'static str = "prescriptions";
    const COLUMNS: &'static str = "id, record_id, patient_id, medication, dosage, frequency, \
         duration, prescribed_by, date_prescribed, status, created_at, updated_at";
    const OWNED_BY: &'static str = "patient_id IN (SELECT id FROM patients WHERE owner_id = :owner)";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Prescription {
            id: row.get(0)?,
            record_id: row.get(1)?,
            patient_id: row.get(2)?,
            medication: row.get(3)?,
            dosage: row.get(4)?,
            frequency: row.get(5)?,
            duration: row.get(6)?,
            prescribed_by: row.get(7)?,
            date_prescribed: column_date(row, 8)?,
            status: column_enum(row, 9)?,
            created_at: column_timestamp(row, 10)?,
            updated_at: column_timestamp(row, 11)?,
        })
    }
}

/// Checks that both referenced rows exist and that the record belongs to the
/// patient.
fn check_references(conn: &Connection, record_id: i64, patient_id: i64) -> RepoResult<()> {
    super::require::<Patient>(conn, patient_id)?;
    let record = super::get::<MedicalRecord>(conn, record_id, Scope::All).map_err(|err| {
        match err {
            RepoError::NotFound { .. } => RepoError::reference(EntityKind::MedicalRecord, record_id),
            other => other,
        }
    })?;
    if record.patient_id != patient_id {
        return Err(RepoError::Validation(format!(
            "Medical record {record_id} belongs to patient {}, not patient {patient_id}",
            record.patient_id
        )));
    }
    Ok(())
}

/// Issues a prescription against a medical record.
///
/// # Errors
///
/// `Reference` if the record or patient does not exist, `Validation` if the
/// record belongs to a different patient.
pub fn create(conn: &mut Connection, input: &NewPrescription) -> RepoResult<Prescription> {
    input.validate()?;
    let tx = conn.transaction()?;
    check_references(&tx, input.record_id, input.patient_id)?;

    let now = timestamp_text(OffsetDateTime::now_utc())?;
    tx.execute(
        "INSERT INTO prescriptions (record_id, patient_id, medication, dosage, frequency,
         duration, prescribed_by, date_prescribed, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            input.record_id,
            input.patient_id,
            input.medication,
            input.dosage,
            input.frequency,
            input.duration,
            input.prescribed_by,
            date_text(input.date_prescribed)?,
            input.status.as_str(),
            now,
        ],
    )?;
    let prescription = super::get::<Prescription>(&tx, tx.last_insert_rowid(), Scope::All)?;
    tx.commit()?;

    info!(
        prescription_id = prescription.id,
        record_id = prescription.record_id,
        "issued prescription"
    );
    Ok(prescription)
}

/// Applies a partial update. The record/patient pairing is re-checked
/// whenever either id changes.
pub fn update(
    conn: &mut Connection,
    id: i64,
    patch: &PrescriptionPatch,
) -> RepoResult<Prescription> {
    patch.validate()?;
    let tx = conn.transaction()?;
    let mut prescription = super::get::<Prescription>(&tx, id, Scope::All)?;

    let record_id = patch.record_id.unwrap_or(prescription.record_id);
    let patient_id = patch.patient_id.unwrap_or(prescription.patient_id);
    if record_id != prescription.record_id || patient_id != prescription.patient_id {
        check_references(&tx, record_id, patient_id)?;
        prescription.record_id = record_id;
        prescription.patient_id = patient_id;
    }
    if let Some(medication) = &patch.medication {
        prescription.medication = medication.clone();
    }
    if let Some(dosage) = &patch.dosage {
        prescription.dosage = dosage.clone();
    }
    if let Some(frequency) = &patch.frequency {
        prescription.frequency = frequency.clone();
    }
    if let Some(duration) = &patch.duration {
        prescription.duration = duration.clone();
    }
    if let Some(prescribed_by) = &patch.prescribed_by {
        prescription.prescribed_by = prescribed_by.clone();
    }
    if let Some(date_prescribed) = patch.date_prescribed {
        prescription.date_prescribed = date_prescribed;
    }
    if let Some(status) = patch.status {
        prescription.status = status;
    }

    tx.execute(
        "UPDATE prescriptions SET record_id = ?1, patient_id = ?2, medication = ?3, dosage = ?4,
         frequency = ?5, duration = ?6, prescribed_by = ?7, date_prescribed = ?8, status = ?9,
         updated_at = ?10 WHERE id = ?11",
        params![
            prescription.record_id,
            prescription.patient_id,
            prescription.medication,
            prescription.dosage,
            prescription.frequency,
            prescription.duration,
            prescription.prescribed_by,
            date_text(prescription.date_prescribed)?,
            prescription.status.as_str(),
            timestamp_text(next_timestamp(prescription.updated_at))?,
            id,
        ],
    )?;
    let prescription = super::get::<Prescription>(&tx, id, Scope::All)?;
    tx.commit()?;

    info!(prescription_id = id, status = %prescription.status, "updated prescription");
    Ok(prescription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, fixtures, Database};
    use crate::models::{Page, PrescriptionStatus};

    #[test]
    fn prescription_links_record_and_patient() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let patient = fixtures::patient(conn, None);
            let record = fixtures::record(conn, patient.id);
            let prescription =
                create(conn, &fixtures::new_prescription(record.id, patient.id)).unwrap();

            assert_eq!(prescription.record_id, record.id);
            assert_eq!(prescription.patient_id, patient.id);
            assert_eq!(prescription.status, PrescriptionStatus::Active);
        });
    }

    #[test]
    fn missing_record_or_patient_is_a_reference_error() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let patient = fixtures::patient(conn, None);
            assert!(matches!(
                create(conn, &fixtures::new_prescription(5, patient.id)),
                Err(RepoError::Reference {
                    kind: EntityKind::MedicalRecord,
                    id: 5
                })
            ));

            let record = fixtures::record(conn, patient.id);
            assert!(matches!(
                create(conn, &fixtures::new_prescription(record.id, 77)),
                Err(RepoError::Reference {
                    kind: EntityKind::Patient,
                    id: 77
                })
            ));
            let all: Vec<Prescription> = db::list(conn, Page::default(), Scope::All).unwrap();
            assert!(all.is_empty());
        });
    }

    #[test]
    fn record_of_another_patient_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let first = fixtures::patient(conn, None);
            let second = fixtures::patient(conn, None);
            let record = fixtures::record(conn, first.id);

            let result = create(conn, &fixtures::new_prescription(record.id, second.id));
            assert!(matches!(result, Err(RepoError::Validation(_))));
        });
    }

    #[test]
    fn update_rechecks_pairing_only_when_ids_change() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let first = fixtures::patient(conn, None);
            let second = fixtures::patient(conn, None);
            let first_record = fixtures::record(conn, first.id);
            let second_record = fixtures::record(conn, second.id);
            let prescription =
                create(conn, &fixtures::new_prescription(first_record.id, first.id)).unwrap();

            let mismatched = update(
                conn,
                prescription.id,
                &PrescriptionPatch {
                    patient_id: Some(second.id),
                    ..PrescriptionPatch::default()
                },
            );
            assert!(matches!(mismatched, Err(RepoError::Validation(_))));

            let moved = update(
                conn,
                prescription.id,
                &PrescriptionPatch {
                    record_id: Some(second_record.id),
                    patient_id: Some(second.id),
                    status: Some(PrescriptionStatus::Completed),
                    ..PrescriptionPatch::default()
                },
            )
            .unwrap();
            assert_eq!(moved.record_id, second_record.id);
            assert_eq!(moved.patient_id, second.id);
            assert_eq!(moved.status, PrescriptionStatus::Completed);
            assert_eq!(moved.medication, prescription.medication);
        });
    }
}
