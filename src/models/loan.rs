//! Loan (borrow) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;

use super::{Book, BookId, StudentId};

/// Lifecycle status of a loan record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Borrowed,
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrowed" => Ok(LoanStatus::Borrowed),
            "returned" => Ok(LoanStatus::Returned),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// SQLx conversion for LoanStatus (stored as TEXT)
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// A single borrow-to-return lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanRecord {
    pub id: i64,
    #[schema(value_type = i64)]
    pub student_id: StudentId,
    #[schema(value_type = i64)]
    pub book_id: BookId,
    pub borrow_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
}

impl LoanRecord {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Borrowed
    }
}

/// Outcome of a borrow or return: the loan and the book's counters after it
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanReceipt {
    pub loan: LoanRecord,
    pub book: Book,
}

/// Loan history line with the book title resolved
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanHistoryEntry {
    pub loan_id: i64,
    #[schema(value_type = i64)]
    pub book_id: BookId,
    /// Null if the book has since been retired from the catalog
    pub book_title: Option<String>,
    pub borrow_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
}

/// Borrowing history of a student, newest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanHistory {
    pub total_borrowed: usize,
    pub history: Vec<LoanHistoryEntry>,
}
