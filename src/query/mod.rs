//! Book queries and their cache fingerprints.
//!
//! A [`Query`] is the caller's bibliographic input. Its [`Query::fingerprint`]
//! is the cache key: lowercase, punctuation-free and whitespace-collapsed, so
//! `"Mistborn: The Final Empire"` and `"mistborn - the final empire"` share a
//! key. Alternate phrasings that do not collapse to the same key are produced
//! by the [`Normalizer`].

pub mod normalize;

pub use normalize::{Normalizer, Variant, VariantKind, Variants};

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Bibliographic input for one resolution. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    title: String,
    author: Option<String>,
    isbn: Option<String>,
}

impl Query {
    /// Create a title query
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: collapse_whitespace(&title.into()),
            author: None,
            isbn: None,
        }
    }

    /// Create an ISBN-only query
    pub fn by_isbn(isbn: &str) -> Self {
        Self::default().with_isbn(isbn)
    }

    /// Set the author; blank values are ignored
    pub fn with_author(mut self, author: impl AsRef<str>) -> Self {
        let author = collapse_whitespace(author.as_ref());
        self.author = (!author.is_empty()).then_some(author);
        self
    }

    /// Set the ISBN; values that are not a 10 or 13 digit ISBN are ignored
    pub fn with_isbn(mut self, isbn: &str) -> Self {
        self.isbn = clean_isbn(isbn);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn isbn(&self) -> Option<&str> {
        self.isbn.as_deref()
    }

    /// True when there is nothing to search for
    pub fn is_empty(&self) -> bool {
        normalize_text(&self.title).is_empty() && self.isbn.is_none()
    }

    /// Normalized cache key, e.g. `mistborn|brandon sanderson`
    pub fn fingerprint(&self) -> String {
        fingerprint_parts(&self.title, self.author.as_deref(), self.isbn.as_deref())
    }
}

/// Build a fingerprint from raw parts. Author order is canonicalised so
/// `Sanderson, Brandon` and `Brandon Sanderson` share a key.
pub(crate) fn fingerprint_parts(title: &str, author: Option<&str>, isbn: Option<&str>) -> String {
    let mut parts = Vec::with_capacity(3);

    let title = normalize_text(title);
    if !title.is_empty() {
        parts.push(title);
    }

    if let Some(author) = author {
        let author = normalize_text(&normalize::author_first_last(author));
        if !author.is_empty() {
            parts.push(author);
        }
    }

    if let Some(isbn) = isbn {
        parts.push(format!("isbn:{isbn}"));
    }

    parts.join("|")
}

/// Lowercase, strip diacritics and punctuation, collapse whitespace.
///
/// Apostrophes are dropped without a gap ("Ender's" -> "enders"); every other
/// non-alphanumeric character becomes a word break.
pub fn normalize_text(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.nfkd() {
        if is_combining_mark(ch) || ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_alphanumeric() {
            normalized.extend(ch.to_lowercase());
        } else {
            normalized.push(' ');
        }
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep ISBN digits (and a trailing check `X`), accepting only 10 or 13 characters
pub fn clean_isbn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'x' || *c == 'X')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid_shape = match cleaned.len() {
        10 => cleaned[..9].chars().all(|c| c.is_ascii_digit()),
        13 => cleaned.chars().all(|c| c.is_ascii_digit()),
        _ => false,
    };
    valid_shape.then_some(cleaned)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
