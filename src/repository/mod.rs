//! Repository layer: transactional storage for circulation state
//!
//! Every circulation operation runs inside one [`CirculationTx`]. Row locks
//! taken through the transaction are held until it commits or is dropped,
//! and dropping an uncommitted transaction discards all of its writes.
//! Callers lock the student row before any book row.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        Book, BookId, LoanHistoryEntry, LoanRecord, PresenceSession, Student, StudentId,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Backend able to open circulation transactions
#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// Start a new transaction
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>>;

    /// Connectivity check used by readiness
    async fn ping(&self) -> AppResult<()>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// Unit of work over students, books, presence sessions and loans.
///
/// Mutating calls require the owning row to be locked in the same
/// transaction: sessions and loans need their student, inventory writes and
/// loan inserts/closes need their book.
#[async_trait]
pub trait CirculationTx: Send {
    /// Lock a student row until the end of the transaction
    async fn lock_student(&mut self, student_id: StudentId) -> AppResult<Option<Student>>;

    /// Lock a book row until the end of the transaction
    async fn lock_book(&mut self, book_id: BookId) -> AppResult<Option<Book>>;

    /// Read a book without taking its lock
    async fn find_book(&mut self, book_id: BookId) -> AppResult<Option<Book>>;

    /// Sessions of a student with no check-out yet
    async fn open_sessions(&mut self, student_id: StudentId) -> AppResult<Vec<PresenceSession>>;

    /// All sessions of a student, newest first
    async fn sessions(&mut self, student_id: StudentId) -> AppResult<Vec<PresenceSession>>;

    async fn insert_session(
        &mut self,
        student_id: StudentId,
        check_in: DateTime<Utc>,
    ) -> AppResult<PresenceSession>;

    async fn close_session(
        &mut self,
        student_id: StudentId,
        session_id: i64,
        check_out: DateTime<Utc>,
    ) -> AppResult<PresenceSession>;

    /// Loans of a student still in `borrowed` status
    async fn active_loans(&mut self, student_id: StudentId) -> AppResult<Vec<LoanRecord>>;

    async fn insert_loan(
        &mut self,
        student_id: StudentId,
        book_id: BookId,
        borrow_date: DateTime<Utc>,
    ) -> AppResult<LoanRecord>;

    /// Transition a loan to `returned`
    async fn close_loan(
        &mut self,
        loan: &LoanRecord,
        return_date: DateTime<Utc>,
    ) -> AppResult<LoanRecord>;

    /// Loan history of a student with titles, newest first
    async fn loan_history(&mut self, student_id: StudentId) -> AppResult<Vec<LoanHistoryEntry>>;

    /// Number of `borrowed` loans referencing a book
    async fn count_borrowed(&mut self, book_id: BookId) -> AppResult<i64>;

    /// Decrement `available_copies` if it is positive.
    /// Returns `None` when no copy was left.
    async fn decrement_available(&mut self, book_id: BookId) -> AppResult<Option<Book>>;

    /// Increment `available_copies` if it is below `total_copies`.
    /// Returns `None` when the shelf was already full.
    async fn increment_available(&mut self, book_id: BookId) -> AppResult<Option<Book>>;

    /// Overwrite both copy counters
    async fn set_copies(&mut self, book_id: BookId, total: i32, available: i32)
        -> AppResult<Book>;

    async fn delete_book(&mut self, book_id: BookId) -> AppResult<()>;

    /// Make every write of this transaction visible
    async fn commit(&mut self) -> AppResult<()>;
}

/// Shared handle on the configured store
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn CirculationStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn CirculationStore>) -> Self {
        Self { store }
    }

    /// Repository backed by a Postgres pool
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::new(Arc::new(PgStore::new(pool)))
    }

    /// Repository backed by process memory
    pub fn memory(store: MemoryStore) -> Self {
        Self::new(Arc::new(store))
    }

    pub async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        self.store.begin().await
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }
}
