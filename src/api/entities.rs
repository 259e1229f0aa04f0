//! Create and update handlers, one pair per entity kind.
//!
//! Reads and deletes are generic over [`crate::db::Table`] and live in the
//! parent module.

use super::error::ApiResult;
use super::extract::{PathId, Payload, Session};
use super::{blocking, SharedState};
use crate::auth::policy::Operation;
use crate::db::{appointments, patients, prescriptions, records, users};
use crate::models::{
    Appointment, AppointmentPatch, EntityKind, MedicalRecord, MedicalRecordPatch, NewAppointment,
    NewMedicalRecord, NewPatient, NewPrescription, NewUser, Patient, PatientPatch, Prescription,
    PrescriptionPatch, User, UserPatch,
};
use axum::extract::State;
use axum::Json;
use tracing::instrument;

#[instrument(skip_all, fields(email = %input.email, role = %input.role))]
pub async fn create_user(
    State(state): State<SharedState>,
    session: Session,
    Payload(input): Payload<NewUser>,
) -> ApiResult<Json<User>> {
    session.authorize(&state, EntityKind::User, Operation::Create)?;
    let user = blocking(&state, move |state, conn| {
        users::create(conn, &state.auth.passwords, &input)
    })
    .await?;
    Ok(Json(user))
}

#[instrument(skip_all, fields(user_id = id))]
pub async fn update_user(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
    Payload(patch): Payload<UserPatch>,
) -> ApiResult<Json<User>> {
    session.authorize(&state, EntityKind::User, Operation::Update)?;
    let user = blocking(&state, move |state, conn| {
        users::update(conn, &state.auth.passwords, id, &patch)
    })
    .await?;
    Ok(Json(user))
}

#[instrument(skip_all)]
pub async fn create_patient(
    State(state): State<SharedState>,
    session: Session,
    Payload(mut input): Payload<NewPatient>,
) -> ApiResult<Json<Patient>> {
    session.authorize(&state, EntityKind::Patient, Operation::Create)?;
    input.owner_id = input.owner_id.or(session.caller_id());
    let patient = blocking(&state, move |_, conn| patients::create(conn, &input)).await?;
    Ok(Json(patient))
}

#[instrument(skip_all, fields(patient_id = id))]
pub async fn update_patient(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
    Payload(patch): Payload<PatientPatch>,
) -> ApiResult<Json<Patient>> {
    session.authorize(&state, EntityKind::Patient, Operation::Update)?;
    let patient = blocking(&state, move |_, conn| patients::update(conn, id, &patch)).await?;
    Ok(Json(patient))
}

#[instrument(skip_all, fields(patient_id = input.patient_id))]
pub async fn create_record(
    State(state): State<SharedState>,
    session: Session,
    Payload(input): Payload<NewMedicalRecord>,
) -> ApiResult<Json<MedicalRecord>> {
    session.authorize(&state, EntityKind::MedicalRecord, Operation::Create)?;
    let record = blocking(&state, move |_, conn| records::create(conn, &input)).await?;
    Ok(Json(record))
}

#[instrument(skip_all, fields(record_id = id))]
pub async fn update_record(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
    Payload(patch): Payload<MedicalRecordPatch>,
) -> ApiResult<Json<MedicalRecord>> {
    session.authorize(&state, EntityKind::MedicalRecord, Operation::Update)?;
    let record = blocking(&state, move |_, conn| records::update(conn, id, &patch)).await?;
    Ok(Json(record))
}

#[instrument(skip_all, fields(patient_id = input.patient_id))]
pub async fn create_appointment(
    State(state): State<SharedState>,
    session: Session,
    Payload(mut input): Payload<NewAppointment>,
) -> ApiResult<Json<Appointment>> {
    session.authorize(&state, EntityKind::Appointment, Operation::Create)?;
    input.owner_id = input.owner_id.or(session.caller_id());
    let appointment =
        blocking(&state, move |_, conn| appointments::create(conn, &input)).await?;
    Ok(Json(appointment))
}

#[instrument(skip_all, fields(appointment_id = id))]
pub async fn update_appointment(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
    Payload(patch): Payload<AppointmentPatch>,
) -> ApiResult<Json<Appointment>> {
    session.authorize(&state, EntityKind::Appointment, Operation::Update)?;
    let appointment =
        blocking(&state, move |_, conn| appointments::update(conn, id, &patch)).await?;
    Ok(Json(appointment))
}

#[instrument(skip_all, fields(record_id = input.record_id))]
pub async fn create_prescription(
    State(state): State<SharedState>,
    session: Session,
    Payload(input): Payload<NewPrescription>,
) -> ApiResult<Json<Prescription>> {
    session.authorize(&state, EntityKind::Prescription, Operation::Create)?;
    let prescription =
        blocking(&state, move |_, conn| prescriptions::create(conn, &input)).await?;
    Ok(Json(prescription))
}

#[instrument(skip_all, fields(prescription_id = id))]
pub async fn update_prescription(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
    Payload(patch): Payload<PrescriptionPatch>,
) -> ApiResult<Json<Prescription>> {
    session.authorize(&state, EntityKind::Prescription, Operation::Update)?;
    let prescription =
        blocking(&state, move |_, conn| prescriptions::update(conn, id, &patch)).await?;
    Ok(Json(prescription))
}
