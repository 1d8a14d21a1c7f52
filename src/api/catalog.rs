//! Endpoints for the catalog collaborator

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
    models::{Book, BookId},
    AppState,
};

use super::{validate_body, AuthenticatedStudent};

#[derive(Serialize, ToSchema)]
pub struct ActiveLoansResponse {
    #[schema(value_type = i64)]
    pub book_id: BookId,
    pub has_active_loans: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetCopiesRequest {
    #[validate(range(min = 0, message = "Copy count must not be negative"))]
    pub total_copies: i32,
}

/// Current copy counters of a book
#[utoipa::path(
    get,
    path = "/catalog/books/{id}",
    tag = "catalog",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book counters", body = Book),
        (status = 403, description = "Catalog scope required", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn availability(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Path(book_id): Path<BookId>,
) -> AppResult<Json<Book>> {
    claims.require_catalog()?;

    let book = state.services.inventory.availability(book_id).await?;
    Ok(Json(book))
}

/// Whether copies of a book are out on loan
#[utoipa::path(
    get,
    path = "/catalog/books/{id}/active-loans",
    tag = "catalog",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Loan status of the book", body = ActiveLoansResponse),
        (status = 403, description = "Catalog scope required", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn active_loans(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Path(book_id): Path<BookId>,
) -> AppResult<Json<ActiveLoansResponse>> {
    claims.require_catalog()?;

    let has_active_loans = state.services.ledger.has_active_loans(book_id).await?;
    Ok(Json(ActiveLoansResponse {
        book_id,
        has_active_loans,
    }))
}

/// Change the number of copies the library owns
#[utoipa::path(
    put,
    path = "/catalog/books/{id}/copies",
    tag = "catalog",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    request_body = SetCopiesRequest,
    responses(
        (status = 200, description = "Copy count updated", body = Book),
        (status = 400, description = "Negative copy count", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse),
        (status = 409, description = "More copies on loan than requested", body = crate::error::ErrorResponse)
    )
)]
pub async fn set_copies(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Path(book_id): Path<BookId>,
    Json(request): Json<SetCopiesRequest>,
) -> AppResult<Json<Book>> {
    claims.require_catalog()?;
    validate_body(&request)?;

    let book = state
        .services
        .ledger
        .set_total_copies(book_id, request.total_copies)
        .await?;

    tracing::info!(
        book_id,
        total_copies = book.total_copies,
        available_copies = book.available_copies,
        "copy count updated"
    );
    Ok(Json(book))
}

/// Remove a book from circulation
#[utoipa::path(
    delete,
    path = "/catalog/books/{id}",
    tag = "catalog",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    responses(
        (status = 204, description = "Book retired"),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Copies still on loan", body = crate::error::ErrorResponse)
    )
)]
pub async fn retire_book(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Path(book_id): Path<BookId>,
) -> AppResult<StatusCode> {
    claims.require_catalog()?;

    state.services.ledger.retire_book(book_id).await?;
    tracing::info!(book_id, "book retired");
    Ok(StatusCode::NO_CONTENT)
}
