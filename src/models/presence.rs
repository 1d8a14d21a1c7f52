//! Library presence sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::StudentId;

/// One continuous visit of a student inside the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct PresenceSession {
    pub id: i64,
    #[schema(value_type = i64)]
    pub student_id: StudentId,
    pub check_in: DateTime<Utc>,
    /// Null while the student is still inside
    pub check_out: Option<DateTime<Utc>>,
}

impl PresenceSession {
    pub fn is_open(&self) -> bool {
        self.check_out.is_none()
    }
}

/// Presence snapshot returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PresenceStatus {
    pub present: bool,
    /// The open session, if any
    pub session: Option<PresenceSession>,
}
