//! Read-only family, student, and enrollment records.
//!
//! These tables are maintained by the rest of the platform; the billing
//! engine only reads them to resolve payers, payees, and pricing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Paying family account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Family {
    pub family_id: Uuid,
    pub name: String,
    pub email: String,
    pub created_utc: DateTime<Utc>,
}

/// Enrolled student.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub student_id: Uuid,
    pub family_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
}

/// Program enrollment with its fee schedule. Fee columns are integer minor
/// units in `currency`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub enrollment_id: Uuid,
    pub student_id: Uuid,
    pub program_name: String,
    pub monthly_fee: i64,
    pub yearly_fee: i64,
    pub individual_session_fee: i64,
    pub currency: String,
    pub active: bool,
}
