//! Postgres-backed circulation store
//!
//! Row locks come from `SELECT ... FOR UPDATE`. Copy counters are only ever
//! changed with conditional `UPDATE ... RETURNING` statements, so the bound
//! check and the write are one statement even without the row lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        Book, BookId, LoanHistoryEntry, LoanRecord, LoanStatus, PresenceSession, Student,
        StudentId,
    },
};

use super::{CirculationStore, CirculationTx};

const BOOK_COLUMNS: &str = "id, title, total_copies, available_copies";
const SESSION_COLUMNS: &str = "id, student_id, check_in, check_out";
const LOAN_COLUMNS: &str = "id, student_id, book_id, borrow_date, return_date, status";

/// Map constraint violations to invariant errors.
///
/// The partial unique indexes and CHECK constraints only fire when the
/// locking discipline has been bypassed.
fn db_error(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("23505") | Some("23514") => {
                return AppError::Invariant(format!(
                    "constraint {} violated: {}",
                    db.constraint().unwrap_or("unknown"),
                    db.message()
                ));
            }
            _ => {}
        }
    }
    AppError::Database(e)
}

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CirculationStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Open Postgres transaction; rolled back by sqlx when dropped uncommitted
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> AppResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal("transaction already committed".to_string()))
    }
}

#[async_trait]
impl CirculationTx for PgTx {
    async fn lock_student(&mut self, student_id: StudentId) -> AppResult<Option<Student>> {
        let student = sqlx::query_as::<_, Student>(
            "SELECT id, name FROM students WHERE id = $1 FOR UPDATE",
        )
        .bind(student_id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(student)
    }

    async fn lock_book(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let query = format!("SELECT {} FROM books WHERE id = $1 FOR UPDATE", BOOK_COLUMNS);
        let book = sqlx::query_as::<_, Book>(&query)
            .bind(book_id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(book)
    }

    async fn find_book(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let query = format!("SELECT {} FROM books WHERE id = $1", BOOK_COLUMNS);
        let book = sqlx::query_as::<_, Book>(&query)
            .bind(book_id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(book)
    }

    async fn open_sessions(&mut self, student_id: StudentId) -> AppResult<Vec<PresenceSession>> {
        let query = format!(
            "SELECT {} FROM presence_sessions WHERE student_id = $1 AND check_out IS NULL ORDER BY check_in DESC",
            SESSION_COLUMNS
        );
        let sessions = sqlx::query_as::<_, PresenceSession>(&query)
            .bind(student_id)
            .fetch_all(self.conn()?)
            .await?;
        Ok(sessions)
    }

    async fn sessions(&mut self, student_id: StudentId) -> AppResult<Vec<PresenceSession>> {
        let query = format!(
            "SELECT {} FROM presence_sessions WHERE student_id = $1 ORDER BY check_in DESC, id DESC",
            SESSION_COLUMNS
        );
        let sessions = sqlx::query_as::<_, PresenceSession>(&query)
            .bind(student_id)
            .fetch_all(self.conn()?)
            .await?;
        Ok(sessions)
    }

    async fn insert_session(
        &mut self,
        student_id: StudentId,
        check_in: DateTime<Utc>,
    ) -> AppResult<PresenceSession> {
        let query = format!(
            "INSERT INTO presence_sessions (student_id, check_in) VALUES ($1, $2) RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, PresenceSession>(&query)
            .bind(student_id)
            .bind(check_in)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_error)
    }

    async fn close_session(
        &mut self,
        student_id: StudentId,
        session_id: i64,
        check_out: DateTime<Utc>,
    ) -> AppResult<PresenceSession> {
        let query = format!(
            r#"
            UPDATE presence_sessions SET check_out = $1
            WHERE id = $2 AND student_id = $3 AND check_out IS NULL
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, PresenceSession>(&query)
            .bind(check_out)
            .bind(session_id)
            .bind(student_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                AppError::Invariant(format!("session {} is not open", session_id))
            })
    }

    async fn active_loans(&mut self, student_id: StudentId) -> AppResult<Vec<LoanRecord>> {
        let query = format!(
            "SELECT {} FROM loans WHERE student_id = $1 AND status = $2 ORDER BY borrow_date",
            LOAN_COLUMNS
        );
        let loans = sqlx::query_as::<_, LoanRecord>(&query)
            .bind(student_id)
            .bind(LoanStatus::Borrowed)
            .fetch_all(self.conn()?)
            .await?;
        Ok(loans)
    }

    async fn insert_loan(
        &mut self,
        student_id: StudentId,
        book_id: BookId,
        borrow_date: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        let query = format!(
            r#"
            INSERT INTO loans (student_id, book_id, borrow_date, status)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        );
        sqlx::query_as::<_, LoanRecord>(&query)
            .bind(student_id)
            .bind(book_id)
            .bind(borrow_date)
            .bind(LoanStatus::Borrowed)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_error)
    }

    async fn close_loan(
        &mut self,
        loan: &LoanRecord,
        return_date: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        let query = format!(
            r#"
            UPDATE loans SET status = $1, return_date = $2
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            LOAN_COLUMNS
        );
        sqlx::query_as::<_, LoanRecord>(&query)
            .bind(LoanStatus::Returned)
            .bind(return_date)
            .bind(loan.id)
            .bind(LoanStatus::Borrowed)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::Invariant(format!("loan {} is not borrowed", loan.id)))
    }

    async fn loan_history(&mut self, student_id: StudentId) -> AppResult<Vec<LoanHistoryEntry>> {
        let rows = sqlx::query_as::<_, LoanHistoryEntry>(
            r#"
            SELECT l.id AS loan_id, l.book_id, b.title AS book_title,
                   l.borrow_date, l.return_date, l.status
            FROM loans l
            LEFT JOIN books b ON b.id = l.book_id
            WHERE l.student_id = $1
            ORDER BY l.borrow_date DESC, l.id DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(rows)
    }

    async fn count_borrowed(&mut self, book_id: BookId) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status = $2")
                .bind(book_id)
                .bind(LoanStatus::Borrowed)
                .fetch_one(self.conn()?)
                .await?;
        Ok(count)
    }

    async fn decrement_available(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let query = format!(
            r#"
            UPDATE books SET available_copies = available_copies - 1
            WHERE id = $1 AND available_copies > 0
            RETURNING {}
            "#,
            BOOK_COLUMNS
        );
        sqlx::query_as::<_, Book>(&query)
            .bind(book_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_error)
    }

    async fn increment_available(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let query = format!(
            r#"
            UPDATE books SET available_copies = available_copies + 1
            WHERE id = $1 AND available_copies < total_copies
            RETURNING {}
            "#,
            BOOK_COLUMNS
        );
        sqlx::query_as::<_, Book>(&query)
            .bind(book_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_error)
    }

    async fn set_copies(
        &mut self,
        book_id: BookId,
        total: i32,
        available: i32,
    ) -> AppResult<Book> {
        let query = format!(
            "UPDATE books SET total_copies = $2, available_copies = $3 WHERE id = $1 RETURNING {}",
            BOOK_COLUMNS
        );
        sqlx::query_as::<_, Book>(&query)
            .bind(book_id)
            .bind(total)
            .bind(available)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_error)?
            .ok_or(AppError::BookNotFound(book_id))
    }

    async fn delete_book(&mut self, book_id: BookId) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(book_id)
            .execute(self.conn()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BookNotFound(book_id));
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("transaction already committed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }
}
