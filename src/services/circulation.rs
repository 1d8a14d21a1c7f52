//! Request orchestration: QR decoding, delegation and outcome logging

use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    models::{Book, BookId, LoanHistory, LoanReceipt, PresenceSession, PresenceStatus, StudentId},
    qr::{BookToken, LibraryToken, QrTokenCodec},
    repository::Repository,
};

use super::{ledger::CirculationLedger, presence::PresenceTracker};

/// Book resolved from a scanned QR code
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookLookup {
    pub book: Book,
    /// File name of the book's QR image
    pub qr_code: String,
}

#[derive(Clone)]
pub struct CirculationService {
    codec: QrTokenCodec,
    repository: Repository,
    presence: PresenceTracker,
    ledger: CirculationLedger,
}

impl CirculationService {
    pub fn new(
        codec: QrTokenCodec,
        repository: Repository,
        presence: PresenceTracker,
        ledger: CirculationLedger,
    ) -> Self {
        Self {
            codec,
            repository,
            presence,
            ledger,
        }
    }

    /// Entrance scan on the way in
    pub async fn check_in(&self, student_id: StudentId, qr: &str) -> AppResult<PresenceSession> {
        let result = match self.codec.decode_library_token(qr) {
            LibraryToken::Valid => self.presence.check_in(student_id).await,
            LibraryToken::Invalid => Err(AppError::InvalidToken(qr.to_string())),
        };
        log_outcome("check_in", student_id, None, qr, &result);
        result
    }

    /// Entrance scan on the way out
    pub async fn check_out(&self, student_id: StudentId, qr: &str) -> AppResult<PresenceSession> {
        let result = match self.codec.decode_library_token(qr) {
            LibraryToken::Valid => self.presence.check_out(student_id).await,
            LibraryToken::Invalid => Err(AppError::InvalidToken(qr.to_string())),
        };
        log_outcome("check_out", student_id, None, qr, &result);
        result
    }

    /// Book scan at the desk to borrow it
    pub async fn borrow(&self, student_id: StudentId, qr: &str) -> AppResult<LoanReceipt> {
        let token = self.codec.decode_book_token(qr);
        let result = match token {
            BookToken::Book(book_id) => self.ledger.borrow(student_id, book_id).await,
            BookToken::Invalid => Err(AppError::InvalidToken(qr.to_string())),
        };
        log_outcome("borrow", student_id, token.book_id(), qr, &result);
        result
    }

    /// Book scan at the desk to hand it back
    pub async fn return_book(&self, student_id: StudentId, qr: &str) -> AppResult<LoanReceipt> {
        let token = self.codec.decode_book_token(qr);
        let result = match token {
            BookToken::Book(book_id) => self.ledger.return_book(student_id, book_id).await,
            BookToken::Invalid => Err(AppError::InvalidToken(qr.to_string())),
        };
        log_outcome("return", student_id, token.book_id(), qr, &result);
        result
    }

    /// Resolve a book QR code without borrowing
    pub async fn lookup_book(&self, qr: &str) -> AppResult<BookLookup> {
        let book_id = self
            .codec
            .decode_book_token(qr)
            .book_id()
            .ok_or_else(|| AppError::InvalidToken(qr.to_string()))?;

        let mut tx = self.repository.begin().await?;
        let book = tx
            .find_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))?;

        Ok(BookLookup {
            qr_code: self.codec.encode_book_token(book.id),
            book,
        })
    }

    pub async fn presence(&self, student_id: StudentId) -> AppResult<PresenceStatus> {
        self.presence.status(student_id).await
    }

    pub async fn sessions(&self, student_id: StudentId) -> AppResult<Vec<PresenceSession>> {
        self.presence.sessions(student_id).await
    }

    pub async fn history(&self, student_id: StudentId) -> AppResult<LoanHistory> {
        self.ledger.history(student_id).await
    }
}

/// `book_id` is only known once a book token decoded
fn log_outcome<T>(
    operation: &'static str,
    student_id: StudentId,
    book_id: Option<BookId>,
    qr: &str,
    result: &AppResult<T>,
) {
    match result {
        Ok(_) => tracing::info!(
            operation,
            student_id,
            book_id,
            qr_token = qr,
            "circulation request succeeded"
        ),
        Err(e) if e.is_recoverable() => tracing::warn!(
            operation,
            student_id,
            book_id,
            qr_token = qr,
            error = %e,
            "circulation request rejected"
        ),
        Err(e) => tracing::error!(
            operation,
            student_id,
            book_id,
            qr_token = qr,
            error = %e,
            "circulation request failed"
        ),
    }
}
