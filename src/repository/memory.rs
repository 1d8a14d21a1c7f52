//! In-process circulation store
//!
//! Each student and each book lives behind its own `tokio::sync::Mutex`.
//! A transaction acquires those locks with `lock_owned`, edits a private
//! working copy, and publishes the copies only on commit. Dropping the
//! transaction drops the copies, which is the rollback.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    error::{AppError, AppResult},
    models::{
        Book, BookId, LoanHistoryEntry, LoanRecord, LoanStatus, PresenceSession, Student,
        StudentId,
    },
};

use super::{CirculationStore, CirculationTx};

#[derive(Debug, Clone)]
struct StudentRow {
    student: Student,
    sessions: Vec<PresenceSession>,
    loans: Vec<LoanRecord>,
}

#[derive(Debug, Clone)]
struct BookRow {
    book: Book,
    /// Ids of `borrowed` loans for this book
    borrowed: BTreeSet<i64>,
    retired: bool,
}

type Cell<T> = Arc<Mutex<T>>;

#[derive(Default)]
struct Inner {
    students: RwLock<HashMap<StudentId, Cell<StudentRow>>>,
    books: RwLock<HashMap<BookId, Cell<BookRow>>>,
    session_seq: AtomicI64,
    loan_seq: AtomicI64,
}

/// Memory store shared by clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or rename a student (identity collaborator)
    pub async fn add_student(&self, student: Student) {
        if let Some(cell) = self.student_cell(student.id).await {
            cell.lock().await.student = student;
            return;
        }

        let mut students = self.inner.students.write().await;
        students.entry(student.id).or_insert_with(|| {
            Arc::new(Mutex::new(StudentRow {
                student,
                sessions: Vec::new(),
                loans: Vec::new(),
            }))
        });
    }

    /// Register a new catalog book (catalog collaborator)
    pub async fn add_book(&self, book: Book) -> AppResult<()> {
        if book.total_copies < 0 || !book.counts_in_bounds() {
            return Err(AppError::Validation(format!(
                "book {} has inconsistent copy counts ({}/{})",
                book.id, book.available_copies, book.total_copies
            )));
        }
        if book.on_loan() != 0 {
            return Err(AppError::Validation(format!(
                "new book {} must have every copy on the shelf",
                book.id
            )));
        }

        let mut books = self.inner.books.write().await;
        if books.contains_key(&book.id) {
            return Err(AppError::Validation(format!("book {} already exists", book.id)));
        }
        let id = book.id;
        let row = BookRow {
            book,
            borrowed: BTreeSet::new(),
            retired: false,
        };
        books.insert(id, Arc::new(Mutex::new(row)));
        Ok(())
    }

    /// Verify every cross-entity invariant against committed state
    pub async fn audit(&self) -> AppResult<()> {
        let book_cells: Vec<Cell<BookRow>> =
            { self.inner.books.read().await.values().cloned().collect() };
        for cell in book_cells {
            let row = cell.lock().await;
            if !row.book.counts_in_bounds() {
                return Err(AppError::Invariant(format!(
                    "book {} has {} of {} copies available",
                    row.book.id, row.book.available_copies, row.book.total_copies
                )));
            }
            if i64::from(row.book.on_loan()) != row.borrowed.len() as i64 {
                return Err(AppError::Invariant(format!(
                    "book {} has {} copies out but {} borrowed loans",
                    row.book.id,
                    row.book.on_loan(),
                    row.borrowed.len()
                )));
            }
        }

        let student_cells: Vec<Cell<StudentRow>> =
            { self.inner.students.read().await.values().cloned().collect() };
        for cell in student_cells {
            let row = cell.lock().await;
            let open = row.sessions.iter().filter(|s| s.is_open()).count();
            let active = row.loans.iter().filter(|l| l.is_active()).count();
            if open > 1 || active > 1 {
                return Err(AppError::Invariant(format!(
                    "student {} has {} open sessions and {} active loans",
                    row.student.id, open, active
                )));
            }
        }
        Ok(())
    }

    async fn student_cell(&self, id: StudentId) -> Option<Cell<StudentRow>> {
        self.inner.students.read().await.get(&id).cloned()
    }

    async fn book_cell(&self, id: BookId) -> Option<Cell<BookRow>> {
        self.inner.books.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl CirculationStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            students: HashMap::new(),
            books: HashMap::new(),
            committed: false,
        }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// A locked row and the transaction's private copy of it
struct Held<T> {
    guard: OwnedMutexGuard<T>,
    working: T,
}

impl<T: Clone> Held<T> {
    fn new(guard: OwnedMutexGuard<T>) -> Self {
        let working = guard.clone();
        Self { guard, working }
    }

    fn publish(mut self) {
        *self.guard = self.working;
    }
}

pub struct MemoryTx {
    store: MemoryStore,
    students: HashMap<StudentId, Held<StudentRow>>,
    books: HashMap<BookId, Held<BookRow>>,
    committed: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> AppResult<()> {
        if self.committed {
            return Err(AppError::Internal("transaction already committed".to_string()));
        }
        Ok(())
    }

    fn held_student(&mut self, id: StudentId) -> AppResult<&mut StudentRow> {
        self.ensure_open()?;
        self.students
            .get_mut(&id)
            .map(|held| &mut held.working)
            .ok_or_else(|| {
                AppError::Internal(format!("student {} is not locked in this transaction", id))
            })
    }

    fn held_book(&mut self, id: BookId) -> AppResult<&mut BookRow> {
        self.ensure_open()?;
        self.books
            .get_mut(&id)
            .map(|held| &mut held.working)
            .ok_or_else(|| {
                AppError::Internal(format!("book {} is not locked in this transaction", id))
            })
    }

    /// Snapshot of a student row, from this transaction if held
    async fn read_student(&self, id: StudentId) -> Option<StudentRow> {
        if let Some(held) = self.students.get(&id) {
            return Some(held.working.clone());
        }
        let cell = self.store.student_cell(id).await?;
        let row = cell.lock().await;
        Some(row.clone())
    }

    /// Snapshot of a live book row, from this transaction if held
    async fn read_book(&self, id: BookId) -> Option<BookRow> {
        if let Some(held) = self.books.get(&id) {
            return (!held.working.retired).then(|| held.working.clone());
        }
        let cell = self.store.book_cell(id).await?;
        let row = cell.lock().await;
        (!row.retired).then(|| row.clone())
    }
}

#[async_trait]
impl CirculationTx for MemoryTx {
    async fn lock_student(&mut self, student_id: StudentId) -> AppResult<Option<Student>> {
        self.ensure_open()?;
        if let Some(held) = self.students.get(&student_id) {
            return Ok(Some(held.working.student.clone()));
        }
        let Some(cell) = self.store.student_cell(student_id).await else {
            return Ok(None);
        };
        let held = Held::new(cell.lock_owned().await);
        let student = held.working.student.clone();
        self.students.insert(student_id, held);
        Ok(Some(student))
    }

    async fn lock_book(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        self.ensure_open()?;
        if let Some(held) = self.books.get(&book_id) {
            return Ok((!held.working.retired).then(|| held.working.book.clone()));
        }
        let Some(cell) = self.store.book_cell(book_id).await else {
            return Ok(None);
        };
        let guard = cell.lock_owned().await;
        // Retired while we were waiting for the lock
        if guard.retired {
            return Ok(None);
        }
        let held = Held::new(guard);
        let book = held.working.book.clone();
        self.books.insert(book_id, held);
        Ok(Some(book))
    }

    async fn find_book(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        self.ensure_open()?;
        Ok(self.read_book(book_id).await.map(|row| row.book))
    }

    async fn open_sessions(&mut self, student_id: StudentId) -> AppResult<Vec<PresenceSession>> {
        self.ensure_open()?;
        let mut open: Vec<PresenceSession> = self
            .read_student(student_id)
            .await
            .map(|row| row.sessions.into_iter().filter(|s| s.is_open()).collect())
            .unwrap_or_default();
        open.sort_by(|a, b| b.check_in.cmp(&a.check_in));
        Ok(open)
    }

    async fn sessions(&mut self, student_id: StudentId) -> AppResult<Vec<PresenceSession>> {
        self.ensure_open()?;
        let mut sessions = self
            .read_student(student_id)
            .await
            .map(|row| row.sessions)
            .unwrap_or_default();
        sessions.sort_by(|a, b| b.check_in.cmp(&a.check_in).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn insert_session(
        &mut self,
        student_id: StudentId,
        check_in: DateTime<Utc>,
    ) -> AppResult<PresenceSession> {
        let id = self.store.inner.session_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let row = self.held_student(student_id)?;
        if row.sessions.iter().any(|s| s.is_open()) {
            return Err(AppError::Invariant(format!(
                "student {} would have two open sessions",
                student_id
            )));
        }
        let session = PresenceSession {
            id,
            student_id,
            check_in,
            check_out: None,
        };
        row.sessions.push(session.clone());
        Ok(session)
    }

    async fn close_session(
        &mut self,
        student_id: StudentId,
        session_id: i64,
        check_out: DateTime<Utc>,
    ) -> AppResult<PresenceSession> {
        let row = self.held_student(student_id)?;
        let session = row
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_open())
            .ok_or_else(|| AppError::Invariant(format!("session {} is not open", session_id)))?;
        session.check_out = Some(check_out);
        Ok(session.clone())
    }

    async fn active_loans(&mut self, student_id: StudentId) -> AppResult<Vec<LoanRecord>> {
        self.ensure_open()?;
        Ok(self
            .read_student(student_id)
            .await
            .map(|row| row.loans.into_iter().filter(|l| l.is_active()).collect())
            .unwrap_or_default())
    }

    async fn insert_loan(
        &mut self,
        student_id: StudentId,
        book_id: BookId,
        borrow_date: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        let id = self.store.inner.loan_seq.fetch_add(1, Ordering::SeqCst) + 1;
        // Both rows must be held before anything is written
        self.held_book(book_id)?;
        let student = self.held_student(student_id)?;
        if student.loans.iter().any(|l| l.is_active()) {
            return Err(AppError::Invariant(format!(
                "student {} would have two active loans",
                student_id
            )));
        }
        let loan = LoanRecord {
            id,
            student_id,
            book_id,
            borrow_date,
            return_date: None,
            status: LoanStatus::Borrowed,
        };
        student.loans.push(loan.clone());
        self.held_book(book_id)?.borrowed.insert(id);
        Ok(loan)
    }

    async fn close_loan(
        &mut self,
        loan: &LoanRecord,
        return_date: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        self.held_book(loan.book_id)?;
        let student = self.held_student(loan.student_id)?;
        let record = student
            .loans
            .iter_mut()
            .find(|l| l.id == loan.id && l.is_active())
            .ok_or_else(|| AppError::Invariant(format!("loan {} is not borrowed", loan.id)))?;
        record.status = LoanStatus::Returned;
        record.return_date = Some(return_date);
        let closed = record.clone();
        self.held_book(loan.book_id)?.borrowed.remove(&loan.id);
        Ok(closed)
    }

    async fn loan_history(&mut self, student_id: StudentId) -> AppResult<Vec<LoanHistoryEntry>> {
        self.ensure_open()?;
        let mut loans = self
            .read_student(student_id)
            .await
            .map(|row| row.loans)
            .unwrap_or_default();
        loans.sort_by(|a, b| b.borrow_date.cmp(&a.borrow_date).then(b.id.cmp(&a.id)));

        let mut history = Vec::with_capacity(loans.len());
        for loan in loans {
            let book_title = self.read_book(loan.book_id).await.map(|row| row.book.title);
            history.push(LoanHistoryEntry {
                loan_id: loan.id,
                book_id: loan.book_id,
                book_title,
                borrow_date: loan.borrow_date,
                return_date: loan.return_date,
                status: loan.status,
            });
        }
        Ok(history)
    }

    async fn count_borrowed(&mut self, book_id: BookId) -> AppResult<i64> {
        self.ensure_open()?;
        Ok(self
            .read_book(book_id)
            .await
            .map(|row| row.borrowed.len() as i64)
            .unwrap_or(0))
    }

    async fn decrement_available(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let row = self.held_book(book_id)?;
        if row.book.available_copies <= 0 {
            return Ok(None);
        }
        row.book.available_copies -= 1;
        Ok(Some(row.book.clone()))
    }

    async fn increment_available(&mut self, book_id: BookId) -> AppResult<Option<Book>> {
        let row = self.held_book(book_id)?;
        if row.book.available_copies >= row.book.total_copies {
            return Ok(None);
        }
        row.book.available_copies += 1;
        Ok(Some(row.book.clone()))
    }

    async fn set_copies(
        &mut self,
        book_id: BookId,
        total: i32,
        available: i32,
    ) -> AppResult<Book> {
        let row = self.held_book(book_id)?;
        if available < 0 || available > total {
            return Err(AppError::Invariant(format!(
                "book {} cannot hold {} of {} copies",
                book_id, available, total
            )));
        }
        row.book.total_copies = total;
        row.book.available_copies = available;
        Ok(row.book.clone())
    }

    async fn delete_book(&mut self, book_id: BookId) -> AppResult<()> {
        let row = self.held_book(book_id)?;
        row.retired = true;
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        self.committed = true;

        let mut retired = Vec::new();
        for (id, held) in self.books.drain() {
            if held.working.retired {
                retired.push(id);
            }
            held.publish();
        }
        for (_, held) in self.students.drain() {
            held.publish();
        }

        if !retired.is_empty() {
            let mut books = self.store.inner.books.write().await;
            for id in retired {
                books.remove(&id);
            }
        }
        Ok(())
    }
}
