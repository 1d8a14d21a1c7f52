//! QR payload decoding
//!
//! Two kinds of QR codes are scanned by the student app: the fixed code at
//! the library entrance, and one code per book. Book codes are printed from
//! image files named `book_<id>.png`, and scanners often hand back the whole
//! asset path or URL, so decoding only looks at the final path segment.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::BookId;

/// Entrance token used when none is configured
pub const DEFAULT_LIBRARY_TOKEN: &str = "library_qr_code";

static BOOK_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^book_(\d+)(?:\.(?:png|jpg|jpeg))?$").expect("book token pattern is valid")
});

/// Result of decoding an entrance scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryToken {
    Valid,
    Invalid,
}

/// Result of decoding a book scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookToken {
    Book(BookId),
    Invalid,
}

impl BookToken {
    pub fn book_id(self) -> Option<BookId> {
        match self {
            BookToken::Book(id) => Some(id),
            BookToken::Invalid => None,
        }
    }
}

/// Stateless QR token codec
#[derive(Debug, Clone)]
pub struct QrTokenCodec {
    library_token: String,
}

impl Default for QrTokenCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LIBRARY_TOKEN)
    }
}

impl QrTokenCodec {
    pub fn new(library_token: impl Into<String>) -> Self {
        Self {
            library_token: library_token.into(),
        }
    }

    /// Exact match against the entrance literal
    pub fn decode_library_token(&self, raw: &str) -> LibraryToken {
        if raw == self.library_token {
            LibraryToken::Valid
        } else {
            LibraryToken::Invalid
        }
    }

    /// Extract the book id from a `book_<digits>[.png|.jpg|.jpeg]` file name
    pub fn decode_book_token(&self, raw: &str) -> BookToken {
        let file_name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

        BOOK_TOKEN
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .and_then(|digits| digits.as_str().parse::<BookId>().ok())
            .map(BookToken::Book)
            .unwrap_or(BookToken::Invalid)
    }

    /// File name of the QR image the asset collaborator stores for a book
    pub fn encode_book_token(&self, book_id: BookId) -> String {
        format!("book_{}.png", book_id)
    }
}
