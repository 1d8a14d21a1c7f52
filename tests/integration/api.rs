//! HTTP tests driving the router in-process

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use circulation_server::api::create_router;

use crate::common::*;

async fn app() -> Router {
    let (_store, state) = seeded_state().await;
    create_router(state)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_is_public() {
    let app = app().await;

    let (status, body) = send(&app, Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Method::GET, "/api/v1/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_bearer_token_required() {
    let app = app().await;

    let (status, body) = send(&app, Method::GET, "/api/v1/library/presence", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "NotAuthorized");

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/library/presence",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_desk_flow() {
    let app = app().await;
    let token = token_for(ALICE, &[]);
    let token = Some(token.as_str());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/books/borrow",
        token,
        Some(json!({ "qr_code": "book_42.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NotPresent");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/library/check-in",
        token,
        Some(json!({ "qr_content": LIBRARY_QR })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["session"]["check_out"].is_null());

    let (status, body) = send(&app, Method::GET, "/api/v1/library/presence", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["present"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/books/borrow",
        token,
        Some(json!({ "qr_code": "book_42.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["book"]["available_copies"], 2);
    assert_eq!(body["loan"]["status"], "borrowed");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/books/borrow",
        token,
        Some(json!({ "qr_code": "book_7.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ActiveLoanExists");
    assert_eq!(body["details"]["current_book"]["id"], COMPILERS);
    assert_eq!(body["details"]["current_book"]["title"], "Compilers");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/books/return",
        token,
        Some(json!({ "qr_code": "book_42.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["book"]["available_copies"], 3);
    assert_eq!(body["loan"]["status"], "returned");

    let (status, body) = send(&app, Method::GET, "/api/v1/books/history", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_borrowed"], 1);
    assert_eq!(body["history"][0]["book_title"], "Compilers");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/library/check-out",
        token,
        Some(json!({ "qr_content": LIBRARY_QR })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session"]["check_out"].is_string());
}

#[tokio::test]
async fn test_bad_scans_rejected() {
    let app = app().await;
    let token = token_for(ALICE, &[]);
    let token = Some(token.as_str());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/library/check-in",
        token,
        Some(json!({ "qr_content": "random_garbage" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidQrToken");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/library/check-in",
        token,
        Some(json!({ "qr_content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadValue");
}

#[tokio::test]
async fn test_lookup_by_qr_path() {
    let app = app().await;
    let token = token_for(BOB, &[]);
    let token = Some(token.as_str());

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/books/qr/storage/qrcodes/book_7.png",
        token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["book"]["id"], NETWORKS);
    assert_eq!(body["qr_code"], "book_7.png");

    let (status, body) = send(&app, Method::GET, "/api/v1/books/qr/book_500.png", token, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NoSuchBook");
}

#[tokio::test]
async fn test_catalog_requires_scope() {
    let app = app().await;
    let student = token_for(ALICE, &[]);

    let (status, _) = send(
        &app,
        Method::DELETE,
        "/api/v1/catalog/books/42",
        Some(student.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_catalog_guards() {
    let app = app().await;
    let student = token_for(ALICE, &[]);
    let catalog = token_for(1, &["catalog"]);
    let catalog = Some(catalog.as_str());

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/library/check-in",
        Some(student.as_str()),
        Some(json!({ "qr_content": LIBRARY_QR })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/books/borrow",
        Some(student.as_str()),
        Some(json!({ "qr_code": "book_42.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, Method::GET, "/api/v1/catalog/books/42", catalog, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_copies"], 3);
    assert_eq!(body["available_copies"], 2);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/catalog/books/42/active-loans",
        catalog,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_active_loans"], true);

    let (status, body) = send(&app, Method::DELETE, "/api/v1/catalog/books/42", catalog, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "BookHasActiveLoans");

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/v1/catalog/books/42/copies",
        catalog,
        Some(json!({ "total_copies": -2 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadValue");

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/v1/catalog/books/42/copies",
        catalog,
        Some(json!({ "total_copies": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available_copies"], 5);

    // An untouched book can go
    let (status, _) = send(&app, Method::DELETE, "/api/v1/catalog/books/7", catalog, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/catalog/books/7/active-loans",
        catalog,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_visit_history() {
    let app = app().await;
    let token = token_for(BOB, &[]);
    let token = Some(token.as_str());

    for path in ["check-in", "check-out", "check-in"] {
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/v1/library/{}", path),
            token,
            Some(json!({ "qr_content": LIBRARY_QR })),
        )
        .await;
        assert!(status.is_success(), "{} returned {}", path, status);
    }

    let (status, body) = send(&app, Method::GET, "/api/v1/library/sessions", token, None).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0]["check_out"].is_null());
    assert!(sessions[1]["check_out"].is_string());

    let ghost = token_for(GHOST, &[]);
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/library/sessions",
        Some(ghost.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_book_counters_require_catalog_scope() {
    let app = app().await;
    let student = token_for(ALICE, &[]);
    let catalog = token_for(1, &["catalog"]);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/catalog/books/7",
        Some(student.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/catalog/books/404",
        Some(catalog.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NoSuchBook");
}
