//! Circulation desk endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppResult,
    models::{LoanHistory, LoanReceipt},
    services::circulation::BookLookup,
    AppState,
};

use super::{validate_body, AuthenticatedStudent};

/// Payload of a book QR scan
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BookScanRequest {
    /// QR content or QR image path, e.g. `book_42.png`
    #[validate(length(min = 1, message = "QR code must not be empty"))]
    pub qr_code: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoanResponse {
    pub message: String,
    #[serde(flatten)]
    pub receipt: LoanReceipt,
}

/// Borrow the scanned book
#[utoipa::path(
    post,
    path = "/books/borrow",
    tag = "books",
    security(("bearer_auth" = [])),
    request_body = BookScanRequest,
    responses(
        (status = 201, description = "Book borrowed", body = LoanResponse),
        (status = 400, description = "Unrecognised QR code", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown book or student", body = crate::error::ErrorResponse),
        (status = 409, description = "Not inside, already borrowing, or out of stock", body = crate::error::ErrorResponse)
    )
)]
pub async fn borrow(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Json(request): Json<BookScanRequest>,
) -> AppResult<(StatusCode, Json<LoanResponse>)> {
    validate_body(&request)?;

    let receipt = state
        .services
        .circulation
        .borrow(claims.student_id, &request.qr_code)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(LoanResponse {
            message: format!("Borrowed '{}'", receipt.book.title),
            receipt,
        }),
    ))
}

/// Return the scanned book
#[utoipa::path(
    post,
    path = "/books/return",
    tag = "books",
    security(("bearer_auth" = [])),
    request_body = BookScanRequest,
    responses(
        (status = 200, description = "Book returned", body = LoanResponse),
        (status = 400, description = "Unrecognised QR code", body = crate::error::ErrorResponse),
        (status = 404, description = "No matching loan", body = crate::error::ErrorResponse),
        (status = 409, description = "Not inside", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Json(request): Json<BookScanRequest>,
) -> AppResult<Json<LoanResponse>> {
    validate_body(&request)?;

    let receipt = state
        .services
        .circulation
        .return_book(claims.student_id, &request.qr_code)
        .await?;

    Ok(Json(LoanResponse {
        message: format!("Returned '{}'", receipt.book.title),
        receipt,
    }))
}

/// Loan history of the caller, newest first
#[utoipa::path(
    get,
    path = "/books/history",
    tag = "books",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Loan history", body = LoanHistory),
        (status = 404, description = "Unknown student", body = crate::error::ErrorResponse)
    )
)]
pub async fn history(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
) -> AppResult<Json<LoanHistory>> {
    let history = state.services.circulation.history(claims.student_id).await?;
    Ok(Json(history))
}

/// Resolve a QR code to its book
#[utoipa::path(
    get,
    path = "/books/qr/{qr_code}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("qr_code" = String, Path, description = "QR content, may include a path prefix")
    ),
    responses(
        (status = 200, description = "Book found", body = BookLookup),
        (status = 400, description = "Unrecognised QR code", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn lookup(
    State(state): State<AppState>,
    AuthenticatedStudent(_claims): AuthenticatedStudent,
    Path(qr_code): Path<String>,
) -> AppResult<Json<BookLookup>> {
    let lookup = state.services.circulation.lookup_book(&qr_code).await?;
    Ok(Json(lookup))
}
