//! Live Postgres tests for the row-locking store
//!
//! Run with: DATABASE_URL=postgres://... cargo test -- --ignored

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use once_cell::sync::Lazy;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio_test::assert_ok;

use circulation_server::{
    config::CirculationConfig, error::AppError, repository::Repository, services::Services,
};

use crate::common::LIBRARY_QR;

/// Ids unique to this run so tests never see each other's rows
static NEXT_ID: Lazy<AtomicI64> =
    Lazy::new(|| AtomicI64::new(Utc::now().timestamp_micros() * 1000));

fn fresh_ids(count: i64) -> Vec<i64> {
    let base = NEXT_ID.fetch_add(count, Ordering::SeqCst);
    (base..base + count).collect()
}

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(30)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn services(pool: &PgPool) -> Services {
    Services::new(Repository::postgres(pool.clone()), &CirculationConfig::default())
}

async fn add_student(pool: &PgPool, id: i64) {
    sqlx::query("INSERT INTO students (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("student {}", id))
        .execute(pool)
        .await
        .unwrap();
}

async fn add_book(pool: &PgPool, id: i64, copies: i32) {
    sqlx::query(
        "INSERT INTO books (id, title, total_copies, available_copies) VALUES ($1, $2, $3, $3)",
    )
    .bind(id)
    .bind(format!("book {}", id))
    .bind(copies)
    .execute(pool)
    .await
    .unwrap();
}

/// `total - available` must equal the borrowed loans of each book
async fn assert_coupling(pool: &PgPool, book_ids: &[i64]) {
    let broken: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM books b
        WHERE b.id = ANY($1)
          AND b.total_copies - b.available_copies <> (
              SELECT COUNT(*) FROM loans l
              WHERE l.book_id = b.id AND l.status = 'borrowed'
          )
        "#,
    )
    .bind(book_ids)
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(broken, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_last_copy_race() {
    let pool = pool().await;
    let services = services(&pool);

    let students = fresh_ids(20);
    let book = fresh_ids(1)[0];
    add_book(&pool, book, 1).await;
    for &id in &students {
        add_student(&pool, id).await;
        assert_ok!(services.circulation.check_in(id, LIBRARY_QR).await);
    }

    let qr = format!("book_{}.png", book);
    let handles: Vec<_> = students
        .iter()
        .map(|&id| {
            let circulation = services.circulation.clone();
            let qr = qr.clone();
            tokio::spawn(async move { circulation.borrow(id, &qr).await })
        })
        .collect();

    let mut borrowed = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => borrowed += 1,
            Err(AppError::OutOfStock(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(borrowed, 1);
    assert_eq!(refused, 19);

    let counters = services.inventory.availability(book).await.unwrap();
    assert_eq!(counters.available_copies, 0);
    assert_coupling(&pool, &[book]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_same_student_two_books_race() {
    let pool = pool().await;
    let services = services(&pool);

    let student = fresh_ids(1)[0];
    let books = fresh_ids(2);
    add_student(&pool, student).await;
    for &id in &books {
        add_book(&pool, id, 2).await;
    }
    assert_ok!(services.circulation.check_in(student, LIBRARY_QR).await);

    let a = services.circulation.clone();
    let b = services.circulation.clone();
    let (qr_a, qr_b) = (
        format!("book_{}.png", books[0]),
        format!("book_{}.png", books[1]),
    );
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.borrow(student, &qr_a).await }),
        tokio::spawn(async move { b.borrow(student, &qr_b).await }),
    );
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(AppError::ActiveLoanExists { .. })))
            .count(),
        1
    );
    assert_coupling(&pool, &books).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_retire_guard() {
    let pool = pool().await;
    let services = services(&pool);

    let student = fresh_ids(1)[0];
    let book = fresh_ids(1)[0];
    add_student(&pool, student).await;
    add_book(&pool, book, 1).await;
    let qr = format!("book_{}.png", book);

    assert_ok!(services.circulation.check_in(student, LIBRARY_QR).await);
    assert_ok!(services.circulation.borrow(student, &qr).await);

    assert!(services.ledger.has_active_loans(book).await.unwrap());
    assert!(matches!(
        services.ledger.retire_book(book).await,
        Err(AppError::BookHasActiveLoans { count: 1, .. })
    ));
    assert!(matches!(
        services.ledger.set_total_copies(book, 0).await,
        Err(AppError::BookHasActiveLoans { count: 1, .. })
    ));

    assert_ok!(services.circulation.return_book(student, &qr).await);
    assert_ok!(services.ledger.retire_book(book).await);
    assert!(matches!(
        services.inventory.availability(book).await,
        Err(AppError::BookNotFound(_))
    ));

    // History keeps the loan of the retired book, without a title
    let history = services.circulation.history(student).await.unwrap();
    assert_eq!(history.total_borrowed, 1);
    assert_eq!(history.history[0].book_id, book);
    assert!(history.history[0].book_title.is_none());
}

#[tokio::test]
#[ignore]
async fn test_pg_duplicate_open_session_is_invariant() {
    let pool = pool().await;
    let repository = Repository::postgres(pool.clone());

    let student = fresh_ids(1)[0];
    add_student(&pool, student).await;

    // Skip the presence check and write two open sessions directly
    let mut tx = repository.begin().await.unwrap();
    tx.lock_student(student).await.unwrap().unwrap();
    assert_ok!(tx.insert_session(student, Utc::now()).await);
    assert!(matches!(
        tx.insert_session(student, Utc::now()).await,
        Err(AppError::Invariant(_))
    ));
    drop(tx);

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM presence_sessions WHERE student_id = $1 AND check_out IS NULL",
    )
    .bind(student)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open, 0);
}
