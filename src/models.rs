//! Data models for Carebase.
//!
//! Every persisted entity comes in three shapes: the stored row (`Patient`),
//! the creation payload (`NewPatient`) and the partial update (`PatientPatch`).
//! Patch fields are `Option`s: `None` means "leave unchanged". Nullable
//! columns use `Option<Option<T>>` so that an explicit `null` clears the
//! value while an absent key keeps it.

use crate::error::RepoError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Date, OffsetDateTime, Time};

time::serde::format_description!(calendar_date, Date, "[year]-[month]-[day]");
time::serde::format_description!(clock_time, Time, "[hour]:[minute]");

/// Default number of rows returned by a list operation.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
/// Upper bound on a caller-supplied `limit`.
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Deserializes a key that may be absent, `null`, or a value.
///
/// Combined with `#[serde(default)]`, an absent key yields `None`, `null`
/// yields `Some(None)` and a value yields `Some(Some(v))`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Error returned when a stored text value names no known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value `{}`", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a closed set of text-valued variants.
///
/// The text form is what goes over the wire and into the database; anything
/// outside the set is rejected on the way in.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_owned(),
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// Coarse-grained staff/patient classification carried in tokens.
    Role {
        Administrator => "Administrator",
        Doctor => "Doctor",
        Nurse => "Nurse",
        Secretary => "Secretary",
        Patient => "Patient",
    }
}

text_enum! {
    /// Progress of a medical record.
    RecordStatus {
        InProgress => "In Progress",
        Completed => "Completed",
        Pending => "Pending",
    }
}

text_enum! {
    AppointmentStatus {
        Scheduled => "Scheduled",
        Completed => "Completed",
        Cancelled => "Cancelled",
    }
}

text_enum! {
    PrescriptionStatus {
        Active => "Active",
        Completed => "Completed",
        Cancelled => "Cancelled",
    }
}

impl Default for RecordStatus {
    fn default() -> Self {
        RecordStatus::InProgress
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::Scheduled
    }
}

impl Default for PrescriptionStatus {
    fn default() -> Self {
        PrescriptionStatus::Active
    }
}

/// The five kinds of persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Patient,
    MedicalRecord,
    Appointment,
    Prescription,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::User => "User",
            EntityKind::Patient => "Patient",
            EntityKind::MedicalRecord => "Medical record",
            EntityKind::Appointment => "Appointment",
            EntityKind::Prescription => "Prescription",
        })
    }
}

/// Offset/limit window for list operations (`?skip=&limit=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    pub fn new(skip: u32, limit: u32) -> Self {
        Self { skip, limit }
    }

    /// The limit actually applied to the query.
    pub fn effective_limit(&self) -> u32 {
        self.limit.min(MAX_PAGE_LIMIT)
    }
}

fn require_text(field: &str, value: &str) -> Result<(), RepoError> {
    if value.trim().is_empty() {
        return Err(RepoError::Validation(format!("`{field}` must not be empty")));
    }
    Ok(())
}

fn require_patch_text(field: &str, value: Option<&String>) -> Result<(), RepoError> {
    match value {
        Some(value) => require_text(field, value),
        None => Ok(()),
    }
}

fn require_email(value: &str) -> Result<(), RepoError> {
    match value.split_once('@') {
        Some((local, domain)) if !local.trim().is_empty() && !domain.trim().is_empty() => Ok(()),
        _ => Err(RepoError::Validation(format!(
            "`email` is not a valid address: {value}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A staff member or patient account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub department: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// bcrypt digest; never serialized.
    #[serde(skip_serializing)]
    pub hashed_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_text("name", &self.name)?;
        require_email(&self.email)?;
        require_text("phone", &self.phone)?;
        if self.password.is_empty() {
            return Err(RepoError::Validation("`password` must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "nullable")]
    pub department: Option<Option<String>>,
    pub is_active: Option<bool>,
    /// Replaces the stored digest with a fresh hash of this value.
    pub password: Option<String>,
}

impl UserPatch {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_patch_text("name", self.name.as_ref())?;
        require_patch_text("phone", self.phone.as_ref())?;
        if let Some(email) = &self.email {
            require_email(email)?;
        }
        if matches!(&self.password, Some(p) if p.is_empty()) {
            return Err(RepoError::Validation("`password` must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Patients
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub phone: String,
    #[serde(with = "calendar_date")]
    pub date_of_birth: Date,
    pub gender: String,
    pub blood_type: String,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub owner_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub phone: String,
    #[serde(with = "calendar_date")]
    pub date_of_birth: Date,
    pub gender: String,
    pub blood_type: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    /// Defaults to the authenticated caller when absent.
    #[serde(default)]
    pub owner_id: Option<i64>,
}

impl NewPatient {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_text("name", &self.name)?;
        require_text("phone", &self.phone)?;
        require_text("gender", &self.gender)?;
        require_text("blood_type", &self.blood_type)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default, with = "calendar_date::option")]
    pub date_of_birth: Option<Date>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub emergency_contact: Option<Option<String>>,
}

impl PatientPatch {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_patch_text("name", self.name.as_ref())?;
        require_patch_text("phone", self.phone.as_ref())?;
        require_patch_text("gender", self.gender.as_ref())?;
        require_patch_text("blood_type", self.blood_type.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Medical records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MedicalRecord {
    pub id: i64,
    pub patient_id: i64,
    #[serde(with = "calendar_date")]
    pub date: Date,
    pub doctor: String,
    pub diagnosis: String,
    pub treatment: String,
    pub observations: Option<String>,
    pub status: RecordStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMedicalRecord {
    pub patient_id: i64,
    #[serde(with = "calendar_date")]
    pub date: Date,
    pub doctor: String,
    pub diagnosis: String,
    pub treatment: String,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
}

impl NewMedicalRecord {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_text("doctor", &self.doctor)?;
        require_text("diagnosis", &self.diagnosis)?;
        require_text("treatment", &self.treatment)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicalRecordPatch {
    #[serde(default, with = "calendar_date::option")]
    pub date: Option<Date>,
    pub doctor: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub observations: Option<Option<String>>,
    pub status: Option<RecordStatus>,
}

impl MedicalRecordPatch {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_patch_text("doctor", self.doctor.as_ref())?;
        require_patch_text("diagnosis", self.diagnosis.as_ref())?;
        require_patch_text("treatment", self.treatment.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    #[serde(with = "calendar_date")]
    pub date: Date,
    #[serde(with = "clock_time")]
    pub time: Time,
    pub doctor: String,
    pub reason: String,
    pub status: AppointmentStatus,
    pub owner_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAppointment {
    pub patient_id: i64,
    #[serde(with = "calendar_date")]
    pub date: Date,
    #[serde(with = "clock_time")]
    pub time: Time,
    pub doctor: String,
    pub reason: String,
    #[serde(default)]
    pub status: AppointmentStatus,
    /// Defaults to the authenticated caller when absent.
    #[serde(default)]
    pub owner_id: Option<i64>,
}

impl NewAppointment {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_text("doctor", &self.doctor)?;
        require_text("reason", &self.reason)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentPatch {
    pub patient_id: Option<i64>,
    #[serde(default, with = "calendar_date::option")]
    pub date: Option<Date>,
    #[serde(default, with = "clock_time::option")]
    pub time: Option<Time>,
    pub doctor: Option<String>,
    pub reason: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentPatch {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_patch_text("doctor", self.doctor.as_ref())?;
        require_patch_text("reason", self.reason.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Prescriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prescription {
    pub id: i64,
    pub record_id: i64,
    pub patient_id: i64,
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub prescribed_by: String,
    #[serde(with = "calendar_date")]
    pub date_prescribed: Date,
    pub status: PrescriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPrescription {
    pub record_id: i64,
    pub patient_id: i64,
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub prescribed_by: String,
    #[serde(with = "calendar_date")]
    pub date_prescribed: Date,
    #[serde(default)]
    pub status: PrescriptionStatus,
}

impl NewPrescription {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_text("medication", &self.medication)?;
        require_text("dosage", &self.dosage)?;
        require_text("frequency", &self.frequency)?;
        require_text("duration", &self.duration)?;
        require_text("prescribed_by", &self.prescribed_by)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrescriptionPatch {
    pub record_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub medication: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub prescribed_by: Option<String>,
    #[serde(default, with = "calendar_date::option")]
    pub date_prescribed: Option<Date>,
    pub status: Option<PrescriptionStatus>,
}

impl PrescriptionPatch {
    pub fn validate(&self) -> Result<(), RepoError> {
        require_patch_text("medication", self.medication.as_ref())?;
        require_patch_text("dosage", self.dosage.as_ref())?;
        require_patch_text("frequency", self.frequency.as_ref())?;
        require_patch_text("duration", self.duration.as_ref())?;
        require_patch_text("prescribed_by", self.prescribed_by.as_ref())
    }
}
