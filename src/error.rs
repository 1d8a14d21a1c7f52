//! Error types for the circulation server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{BookId, StudentId};

/// Stable numeric error codes returned in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchStudent = 4,
    NoSuchBook = 5,
    InvalidQrToken = 6,
    NotPresent = 7,
    AlreadyPresent = 8,
    ActiveLoanExists = 9,
    OutOfStock = 10,
    NoActiveLoan = 11,
    BookHasActiveLoans = 12,
    BadValue = 13,
    InvariantViolation = 14,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid QR token: {0}")]
    InvalidToken(String),

    #[error("Student {0} is not inside the library")]
    NotPresent(StudentId),

    #[error("Student {0} is already inside the library")]
    AlreadyPresent(StudentId),

    #[error("Student already has '{book_title}' on loan")]
    ActiveLoanExists {
        book_id: BookId,
        book_title: String,
        borrow_date: DateTime<Utc>,
    },

    #[error("No copies of book {0} are available")]
    OutOfStock(BookId),

    #[error("Student {student_id} has no active loan for book {book_id}")]
    NoActiveLoan {
        student_id: StudentId,
        book_id: BookId,
    },

    #[error("Book {0} not found")]
    BookNotFound(BookId),

    #[error("Student {0} not found")]
    StudentNotFound(StudentId),

    #[error("Book {book_id} has {count} copies on loan")]
    BookHasActiveLoans { book_id: BookId, count: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for caller-correctable conditions, false for server-side faults
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_) | AppError::Invariant(_) | AppError::Internal(_)
        )
    }

    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::InvalidToken(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidQrToken),
            AppError::NotPresent(_) => (StatusCode::CONFLICT, ErrorCode::NotPresent),
            AppError::AlreadyPresent(_) => (StatusCode::CONFLICT, ErrorCode::AlreadyPresent),
            AppError::ActiveLoanExists { .. } => {
                (StatusCode::CONFLICT, ErrorCode::ActiveLoanExists)
            }
            AppError::OutOfStock(_) => (StatusCode::CONFLICT, ErrorCode::OutOfStock),
            AppError::NoActiveLoan { .. } => (StatusCode::NOT_FOUND, ErrorCode::NoActiveLoan),
            AppError::BookNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchBook),
            AppError::StudentNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchStudent),
            AppError::BookHasActiveLoans { .. } => {
                (StatusCode::CONFLICT, ErrorCode::BookHasActiveLoans)
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Invariant(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InvariantViolation,
            ),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
        }
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
    /// Extra context, e.g. the loan that blocks a new borrow
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Invariant(msg) => {
                tracing::error!("Invariant violation: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let details = match &self {
            AppError::ActiveLoanExists {
                book_id,
                book_title,
                borrow_date,
            } => Some(serde_json::json!({
                "current_book": {
                    "id": book_id,
                    "title": book_title,
                    "borrow_date": borrow_date,
                }
            })),
            _ => None,
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
