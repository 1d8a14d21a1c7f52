//! Circulation ledger: loan records and the borrow/return state machine
//!
//! Per student: `NoActiveLoan --borrow--> ActiveLoan(book) --return--> NoActiveLoan`.
//!
//! Each operation is a single transaction that locks the student row before
//! the book row. The loan record write and the inventory change commit
//! together or not at all; an error or a dropped request rolls both back.

use chrono::Utc;

use crate::{
    error::{AppError, AppResult},
    models::{Book, BookId, LoanHistory, LoanReceipt, LoanRecord, StudentId},
    repository::{CirculationTx, Repository},
};

use super::{
    inventory::InventoryStore,
    presence::{lock_student, PresenceTracker},
};

#[derive(Clone)]
pub struct CirculationLedger {
    repository: Repository,
    presence: PresenceTracker,
    inventory: InventoryStore,
}

impl CirculationLedger {
    pub fn new(
        repository: Repository,
        presence: PresenceTracker,
        inventory: InventoryStore,
    ) -> Self {
        Self {
            repository,
            presence,
            inventory,
        }
    }

    /// Lend one copy of a book to a student who is inside the library
    pub async fn borrow(&self, student_id: StudentId, book_id: BookId) -> AppResult<LoanReceipt> {
        let mut tx = self.repository.begin().await?;

        lock_student(tx.as_mut(), student_id).await?;
        self.presence.require_present(tx.as_mut(), student_id).await?;

        if let Some(current) = self.active_loan(tx.as_mut(), student_id).await? {
            let book_title = tx
                .find_book(current.book_id)
                .await?
                .map(|book| book.title)
                .unwrap_or_else(|| format!("book {}", current.book_id));
            return Err(AppError::ActiveLoanExists {
                book_id: current.book_id,
                book_title,
                borrow_date: current.borrow_date,
            });
        }

        tx.lock_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))?;
        let book = self.inventory.try_reserve(tx.as_mut(), book_id).await?;
        let loan = tx.insert_loan(student_id, book_id, Utc::now()).await?;

        tx.commit().await?;
        Ok(LoanReceipt { loan, book })
    }

    /// Take back the copy a student borrowed
    pub async fn return_book(
        &self,
        student_id: StudentId,
        book_id: BookId,
    ) -> AppResult<LoanReceipt> {
        let mut tx = self.repository.begin().await?;

        lock_student(tx.as_mut(), student_id).await?;
        self.presence.require_present(tx.as_mut(), student_id).await?;

        let loan = self
            .active_loan(tx.as_mut(), student_id)
            .await?
            .filter(|loan| loan.book_id == book_id)
            .ok_or(AppError::NoActiveLoan {
                student_id,
                book_id,
            })?;

        // Books with loans outstanding cannot be retired
        tx.lock_book(book_id).await?.ok_or_else(|| {
            AppError::Invariant(format!("book {} vanished with loan {} open", book_id, loan.id))
        })?;

        let return_date = Utc::now().max(loan.borrow_date);
        let loan = tx.close_loan(&loan, return_date).await?;
        let book = self.inventory.release(tx.as_mut(), book_id).await?;

        tx.commit().await?;
        Ok(LoanReceipt { loan, book })
    }

    /// Whether any copy of the book is currently out
    pub async fn has_active_loans(&self, book_id: BookId) -> AppResult<bool> {
        let mut tx = self.repository.begin().await?;
        tx.find_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))?;
        Ok(tx.count_borrowed(book_id).await? > 0)
    }

    /// Delete a book from circulation, refused while copies are out.
    ///
    /// Catalog deletions must go through here.
    pub async fn retire_book(&self, book_id: BookId) -> AppResult<()> {
        let mut tx = self.repository.begin().await?;
        tx.lock_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))?;

        let count = tx.count_borrowed(book_id).await?;
        if count > 0 {
            return Err(AppError::BookHasActiveLoans { book_id, count });
        }

        tx.delete_book(book_id).await?;
        tx.commit().await
    }

    /// Change how many copies the library owns
    pub async fn set_total_copies(&self, book_id: BookId, total_copies: i32) -> AppResult<Book> {
        let mut tx = self.repository.begin().await?;
        let book = tx
            .lock_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))?;

        let book = self
            .inventory
            .resize(tx.as_mut(), &book, total_copies)
            .await?;
        tx.commit().await?;
        Ok(book)
    }

    /// Every loan of a student, newest first
    pub async fn history(&self, student_id: StudentId) -> AppResult<LoanHistory> {
        let mut tx = self.repository.begin().await?;
        lock_student(tx.as_mut(), student_id).await?;
        let history = tx.loan_history(student_id).await?;
        Ok(LoanHistory {
            total_borrowed: history.len(),
            history,
        })
    }

    /// The student's single `borrowed` loan, if any
    async fn active_loan(
        &self,
        tx: &mut dyn CirculationTx,
        student_id: StudentId,
    ) -> AppResult<Option<LoanRecord>> {
        let mut active = tx.active_loans(student_id).await?;
        if active.len() > 1 {
            return Err(AppError::Invariant(format!(
                "student {} has {} active loans",
                student_id,
                active.len()
            )));
        }
        Ok(active.pop())
    }
}
