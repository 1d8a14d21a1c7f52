//! Library entrance endpoints (presence)

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppResult,
    models::{PresenceSession, PresenceStatus},
    AppState,
};

use super::{validate_body, AuthenticatedStudent};

/// Payload of the entrance QR scan
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct QrScanRequest {
    /// Raw content read from the QR code
    #[validate(length(min = 1, message = "QR content must not be empty"))]
    pub qr_content: String,
}

#[derive(Serialize, ToSchema)]
pub struct PresenceResponse {
    pub message: String,
    pub session: PresenceSession,
}

/// Enter the library
#[utoipa::path(
    post,
    path = "/library/check-in",
    tag = "library",
    security(("bearer_auth" = [])),
    request_body = QrScanRequest,
    responses(
        (status = 201, description = "Presence session opened", body = PresenceResponse),
        (status = 400, description = "Unrecognised QR code", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown student", body = crate::error::ErrorResponse),
        (status = 409, description = "Already inside", body = crate::error::ErrorResponse)
    )
)]
pub async fn check_in(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Json(request): Json<QrScanRequest>,
) -> AppResult<(StatusCode, Json<PresenceResponse>)> {
    validate_body(&request)?;

    let session = state
        .services
        .circulation
        .check_in(claims.student_id, &request.qr_content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PresenceResponse {
            message: "Checked in".to_string(),
            session,
        }),
    ))
}

/// Leave the library
#[utoipa::path(
    post,
    path = "/library/check-out",
    tag = "library",
    security(("bearer_auth" = [])),
    request_body = QrScanRequest,
    responses(
        (status = 200, description = "Presence session closed", body = PresenceResponse),
        (status = 400, description = "Unrecognised QR code", body = crate::error::ErrorResponse),
        (status = 409, description = "Not inside", body = crate::error::ErrorResponse)
    )
)]
pub async fn check_out(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
    Json(request): Json<QrScanRequest>,
) -> AppResult<Json<PresenceResponse>> {
    validate_body(&request)?;

    let session = state
        .services
        .circulation
        .check_out(claims.student_id, &request.qr_content)
        .await?;

    Ok(Json(PresenceResponse {
        message: "Checked out".to_string(),
        session,
    }))
}

/// Whether the caller is currently inside
#[utoipa::path(
    get,
    path = "/library/presence",
    tag = "library",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Presence status", body = PresenceStatus),
        (status = 404, description = "Unknown student", body = crate::error::ErrorResponse)
    )
)]
pub async fn presence(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
) -> AppResult<Json<PresenceStatus>> {
    let status = state.services.circulation.presence(claims.student_id).await?;
    Ok(Json(status))
}

/// Visits of the caller, newest first
#[utoipa::path(
    get,
    path = "/library/sessions",
    tag = "library",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Presence sessions", body = Vec<PresenceSession>),
        (status = 404, description = "Unknown student", body = crate::error::ErrorResponse)
    )
)]
pub async fn sessions(
    State(state): State<AppState>,
    AuthenticatedStudent(claims): AuthenticatedStudent,
) -> AppResult<Json<Vec<PresenceSession>>> {
    let sessions = state.services.circulation.sessions(claims.student_id).await?;
    Ok(Json(sessions))
}
