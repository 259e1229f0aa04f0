//! Appointments.

use super::{
    column_date, column_enum, column_time, column_timestamp, date_text, next_timestamp, time_text,
    timestamp_text, Scope, Table,
};
use crate::error::RepoResult;
use crate::models::{Appointment, AppointmentPatch, EntityKind, NewAppointment, Patient, User};
use rusqlite::{params, Connection, Row};
use time::OffsetDateTime;
use tracing::info;

impl Table for Appointment {
    const KIND: EntityKind = EntityKind::Appointment;
    const NAME: &'static str = "appointments";
    const COLUMNS: &'static str =
        "id, patient_id, date, time, doctor, reason, status, owner_id, created_at, updated_at";
    const OWNED_BY: &'static str = "patient_id IN (SELECT id FROM patients WHERE owner_id = :owner)";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Appointment {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            date: column_date(row, 2)?,
            time: column_time(row, 3)?,
            doctor: row.get(4)?,
            reason: row.get(5)?,
            status: column_enum(row, 6)?,
            owner_id: row.get(7)?,
            created_at: column_timestamp(row, 8)?,
            updated_at: column_timestamp(row, 9)?,
        })
    }
}

/// Books an appointment.
///
/// # Errors
///
/// `Reference` if the patient or the owning user does not exist.
pub fn create(conn: &mut Connection, input: &NewAppointment) -> RepoResult<Appointment> {
    input.validate()?;
    let tx = conn.transaction()?;
    super::require::<Patient>(&tx, input.patient_id)?;
    if let Some(owner_id) = input.owner_id {
        super::require::<User>(&tx, owner_id)?;
    }

    let now = timestamp_text(OffsetDateTime::now_utc())?;
    tx.execute(
        "INSERT INTO appointments (patient_id, date, time, doctor, reason, status, owner_id,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            input.patient_id,
            date_text(input.date)?,
            time_text(input.time)?,
            input.doctor,
            input.reason,
            input.status.as_str(),
            input.owner_id,
            now,
        ],
    )?;
    let appointment = super::get::<Appointment>(&tx, tx.last_insert_rowid(), Scope::All)?;
    tx.commit()?;

    info!(
        appointment_id = appointment.id,
        patient_id = appointment.patient_id,
        "booked appointment"
    );
    Ok(appointment)
}

/// Applies a partial update. Moving the appointment to another patient
/// re-checks that the patient exists.
pub fn update(
    conn: &mut Connection,
    id: i64,
    patch: &AppointmentPatch,
) -> RepoResult<Appointment> {
    patch.validate()?;
    let tx = conn.transaction()?;
    let mut appointment = super::get::<Appointment>(&tx, id, Scope::All)?;

    if let Some(patient_id) = patch.patient_id {
        if patient_id != appointment.patient_id {
            super::require::<Patient>(&tx, patient_id)?;
            appointment.patient_id = patient_id;
        }
    }
    if let Some(date) = patch.date {
        appointment.date = date;
    }
    if let Some(time) = patch.time {
        appointment.time = time;
    }
    if let Some(doctor) = &patch.doctor {
        appointment.doctor = doctor.clone();
    }
    if let Some(reason) = &patch.reason {
        appointment.reason = reason.clone();
    }
    if let Some(status) = patch.status {
        appointment.status = status;
    }

    tx.execute(
        "UPDATE appointments SET patient_id = ?1, date = ?2, time = ?3, doctor = ?4,
         reason = ?5, status = ?6, updated_at = ?7 WHERE id = ?8",
        params![
            appointment.patient_id,
            date_text(appointment.date)?,
            time_text(appointment.time)?,
            appointment.doctor,
            appointment.reason,
            appointment.status.as_str(),
            timestamp_text(next_timestamp(appointment.updated_at))?,
            id,
        ],
    )?;
    let appointment = super::get::<Appointment>(&tx, id, Scope::All)?;
    tx.commit()?;

    info!(appointment_id = id, status = %appointment.status, "updated appointment");
    Ok(appointment)
}
