//! Data models for the circulation engine

pub mod book;
pub mod loan;
pub mod presence;
pub mod student;

/// Identity key supplied by the identity collaborator
pub type StudentId = i64;

/// Catalog identity key of a book
pub type BookId = i64;

// Re-export commonly used types
pub use book::Book;
pub use loan::{LoanHistory, LoanHistoryEntry, LoanReceipt, LoanRecord, LoanStatus};
pub use presence::{PresenceSession, PresenceStatus};
pub use student::{Student, StudentClaims};
