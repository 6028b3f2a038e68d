//! Record validation and field normalization.
//!
//! Everything here is a pure function over a [`Book`]; the pipeline calls
//! these once per record inside a worker.

use crate::model::Book;
use std::fmt;
use thiserror::Error;

/// Reasons a record is dropped by the pipeline. Counted, never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidationFailure {
    InvalidRecord,
    DuplicateUrl,
}

impl ValidationFailure {
    pub fn label(&self) -> &'static str {
        match self {
            ValidationFailure::InvalidRecord => "invalid_record",
            ValidationFailure::DuplicateUrl => "duplicate_url",
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidBook {
    #[error("book missing title")]
    MissingTitle,
    #[error("book missing price for {0}")]
    MissingPrice(String),
    #[error("book missing rating for {0}")]
    MissingRating(String),
}

/// Currency noise seen in listing pages, including the mis-decoded pound sign.
const CURRENCY_NOISE: [&str; 2] = ["Â£", "£"];

/// Ensures the scraper captured the required fields.
pub fn validate_book(book: &Book) -> Result<(), InvalidBook> {
    if book.title.trim().is_empty() {
        return Err(InvalidBook::MissingTitle);
    }
    if book.price.trim().is_empty() {
        return Err(InvalidBook::MissingPrice(book.title.clone()));
    }
    if book.rating_text.trim().is_empty() {
        return Err(InvalidBook::MissingRating(book.title.clone()));
    }
    Ok(())
}

/// Removes currency symbols and surrounding whitespace.
pub fn normalize_price(price: &str) -> String {
    let mut cleaned = price.trim().to_string();
    for noise in CURRENCY_NOISE {
        cleaned = cleaned.replace(noise, "");
    }
    cleaned.trim().to_string()
}

pub fn normalize_availability(text: &str) -> String {
    text.trim().to_string()
}

/// Maps the star-rating word to 0..=5. Matching is case-sensitive and
/// anything unrecognized maps to zero.
pub fn rating_to_numeric(rating: &str) -> u8 {
    match rating.trim() {
        "Zero" => 0,
        "One" => 1,
        "Two" => 2,
        "Three" => 3,
        "Four" => 4,
        "Five" => 5,
        _ => 0,
    }
}

/// Rewrites price, availability and numeric rating in place.
pub fn normalize_book(book: &mut Book) {
    book.price = normalize_price(&book.price);
    book.availability = normalize_availability(&book.availability);
    book.rating_numeric = rating_to_numeric(&book.rating_text);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, price: &str, rating: &str) -> Book {
        Book::new(title, price, rating, "http://example.com/book")
    }

    #[test]
    fn test_validate_book() {
        assert_eq!(validate_book(&book("Test Book", "£10.00", "Five")), Ok(()));
        assert_eq!(
            validate_book(&book("", "£10.00", "Five")),
            Err(InvalidBook::MissingTitle)
        );
        assert_eq!(
            validate_book(&book("Test Book", "  ", "Five")),
            Err(InvalidBook::MissingPrice("Test Book".to_string()))
        );
        assert_eq!(
            validate_book(&book("Test Book", "£10.00", "")),
            Err(InvalidBook::MissingRating("Test Book".to_string()))
        );
    }

    #[test]
    fn test_normalize_price() {
        assert_eq!(normalize_price("£51.77"), "51.77");
        assert_eq!(normalize_price("Â£51.77"), "51.77");
        assert_eq!(normalize_price("£ 99.99 £"), "99.99");
        assert_eq!(normalize_price("  12.50  "), "12.50");
        assert_eq!(normalize_price(""), "");
    }

    #[test]
    fn test_normalize_availability() {
        assert_eq!(normalize_availability("\n   In stock  \n"), "In stock");
        assert_eq!(normalize_availability(""), "");
    }

    #[test]
    fn test_rating_to_numeric() {
        assert_eq!(rating_to_numeric("Zero"), 0);
        assert_eq!(rating_to_numeric("One"), 1);
        assert_eq!(rating_to_numeric("Three"), 3);
        assert_eq!(rating_to_numeric(" Five "), 5);
        assert_eq!(rating_to_numeric("three"), 0);
        assert_eq!(rating_to_numeric("Seven"), 0);
        assert_eq!(rating_to_numeric(""), 0);
    }

    #[test]
    fn test_normalize_book_in_place() {
        let mut b = book("Sapiens", "Â£54.23", "Four").with_availability("  In stock (22 available) ");
        normalize_book(&mut b);
        assert_eq!(b.price, "54.23");
        assert_eq!(b.availability, "In stock (22 available)");
        assert_eq!(b.rating_numeric, 4);
        assert_eq!(b.rating_text, "Four");
    }
}
