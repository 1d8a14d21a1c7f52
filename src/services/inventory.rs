//! Available-copy accounting
//!
//! The mutating operations take the caller's transaction: reserving a copy
//! and writing the loan record are one unit, so inventory never opens its
//! own transaction for a write. The circulation ledger is the only caller.

use crate::{
    error::{AppError, AppResult},
    models::{Book, BookId},
    repository::{CirculationTx, Repository},
};

#[derive(Clone)]
pub struct InventoryStore {
    repository: Repository,
}

impl InventoryStore {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Current counters of a book
    pub async fn availability(&self, book_id: BookId) -> AppResult<Book> {
        let mut tx = self.repository.begin().await?;
        tx.find_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))
    }

    /// Take one copy off the shelf, or fail with `OutOfStock`.
    ///
    /// The book row must already be locked in `tx`.
    pub(crate) async fn try_reserve(
        &self,
        tx: &mut dyn CirculationTx,
        book_id: BookId,
    ) -> AppResult<Book> {
        match tx.decrement_available(book_id).await? {
            Some(book) if book.counts_in_bounds() => Ok(book),
            Some(book) => Err(AppError::Invariant(format!(
                "book {} reserved into {} of {} copies",
                book.id, book.available_copies, book.total_copies
            ))),
            None => Err(AppError::OutOfStock(book_id)),
        }
    }

    /// Put one copy back on the shelf.
    ///
    /// A full shelf means a copy came back that was never lent out.
    pub(crate) async fn release(
        &self,
        tx: &mut dyn CirculationTx,
        book_id: BookId,
    ) -> AppResult<Book> {
        match tx.increment_available(book_id).await? {
            Some(book) => Ok(book),
            None => {
                tracing::error!(book_id, "release would exceed total copies");
                Err(AppError::Invariant(format!(
                    "book {} released beyond its total copies",
                    book_id
                )))
            }
        }
    }

    /// Change the owned copy count, keeping copies on loan accounted for
    pub(crate) async fn resize(
        &self,
        tx: &mut dyn CirculationTx,
        book: &Book,
        total_copies: i32,
    ) -> AppResult<Book> {
        if total_copies < 0 {
            return Err(AppError::Validation(
                "total_copies must not be negative".to_string(),
            ));
        }

        let borrowed = tx.count_borrowed(book.id).await?;
        if i64::from(book.on_loan()) != borrowed {
            return Err(AppError::Invariant(format!(
                "book {} has {} copies out but {} borrowed loans",
                book.id,
                book.on_loan(),
                borrowed
            )));
        }
        if i64::from(total_copies) < borrowed {
            return Err(AppError::BookHasActiveLoans {
                book_id: book.id,
                count: borrowed,
            });
        }

        let available = total_copies - book.on_loan();
        tx.set_copies(book.id, total_copies, available).await
    }
}
