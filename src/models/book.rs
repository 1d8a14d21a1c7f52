//! Book inventory model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::BookId;

/// Circulation view of a catalog book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    #[schema(value_type = i64)]
    pub id: BookId,
    pub title: String,
    /// Physical copies owned by the library
    pub total_copies: i32,
    /// Copies currently on the shelf
    pub available_copies: i32,
}

impl Book {
    pub fn new(id: BookId, title: impl Into<String>, total_copies: i32) -> Self {
        Self {
            id,
            title: title.into(),
            total_copies,
            available_copies: total_copies,
        }
    }

    /// Copies currently out on loan
    pub fn on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    /// `0 <= available_copies <= total_copies`
    pub fn counts_in_bounds(&self) -> bool {
        self.available_copies >= 0 && self.available_copies <= self.total_copies
    }
}
