//! Query Normalizer - alternate phrasings of a query.
//!
//! Variants are produced lazily, most specific first:
//!
//! 1. the literal input
//! 2. author rewritten as "First Last"
//! 3. title with series suffixes / subtitles stripped
//! 4. series-name expansion ("Core (Series, #1)" -> "Series: Core") and the reverse
//! 5. author as "Last, F."
//! 6. title without author
//!
//! Duplicates are skipped and the sequence is capped, so a caller can stop
//! consuming as soon as it has a confident answer. [`Variants`] can be iterated
//! any number of times.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use smallvec::SmallVec;

use super::{Query, normalize_text};

/// Upper bound on variants per query
pub const DEFAULT_MAX_VARIANTS: usize = 8;

/// Number of generation stages in [`VariantIter`]
const STAGE_COUNT: u8 = 6;

static TRAILING_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[\(\[][^\(\)\[\]]*[\)\]]\s*$").expect("valid trailing group regex")
});

static NUMBERED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\s,:;-]*(?:\b(?:book|vol|volume|part|no)\.?\s*|#\s*)\d+\s*$")
        .expect("valid numbered suffix regex")
});

static SUBTITLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?::|\s[-\u{2013}\u{2014}]\s)\s*").expect("valid separator regex"));

static PAREN_SERIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<core>.+?)\s*[\(\[](?P<series>[^\(\)\[\]#,]+?)(?:,|\s)\s*(?:#|book\s+|vol\.?\s*|volume\s+)?(?P<num>\d+)[\)\]]\s*$",
    )
    .expect("valid series regex")
});

static COLON_SERIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<series>[^:]+?)(?:\s+(?:#|book\s*)?(?P<num>\d+))?\s*:\s*(?P<core>.+)$")
        .expect("valid colon series regex")
});

/// Series prefixes longer than this are treated as part of the title
const MAX_SERIES_WORDS: usize = 4;

/// How a variant was derived from the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Literal,
    Isbn,
    AuthorFirstLast,
    SubtitleStripped,
    SeriesExpanded,
    SeriesCollapsed,
    AuthorInitials,
    TitleOnly,
}

/// One phrasing of a query, handed to the source adapters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub title: String,
    pub author: Option<String>,
    /// Only the literal variant carries the ISBN
    pub isbn: Option<String>,
    pub kind: VariantKind,
}

impl Variant {
    fn new(title: &str, author: Option<&str>, kind: VariantKind) -> Self {
        Self {
            title: title.to_string(),
            author: author.map(str::to_string),
            isbn: None,
            kind,
        }
    }

    /// Dedup key. Author word order is significant here, unlike the cache
    /// fingerprint, because sources see the author exactly as written.
    fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            normalize_text(&self.title),
            self.author.as_deref().map(normalize_text).unwrap_or_default(),
            self.isbn.as_deref().unwrap_or_default()
        )
    }

    /// Human-readable summary for traces
    pub fn describe(&self) -> String {
        let mut out = match self.kind {
            VariantKind::Isbn => String::new(),
            _ => format!("\"{}\"", self.title),
        };
        if let Some(author) = &self.author {
            out.push_str(&format!(" by \"{author}\""));
        }
        if let Some(isbn) = &self.isbn {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("isbn {isbn}"));
        }
        format!("{} ({:?})", out.trim_start(), self.kind)
    }
}

/// Produces [`Variants`] for queries
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_variants: usize,
}

impl Normalizer {
    pub fn new(max_variants: usize) -> Self {
        Self {
            max_variants: max_variants.max(1),
        }
    }

    pub fn variants<'q>(&self, query: &'q Query) -> Variants<'q> {
        Variants {
            query,
            max: self.max_variants,
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VARIANTS)
    }
}

/// Restartable, finite variant sequence for one query
#[derive(Debug, Clone, Copy)]
pub struct Variants<'q> {
    query: &'q Query,
    max: usize,
}

impl<'q> Variants<'q> {
    pub fn iter(&self) -> VariantIter<'q> {
        VariantIter {
            query: self.query,
            max: self.max,
            stage: 0,
            pending: VecDeque::new(),
            seen: SmallVec::new(),
        }
    }
}

impl<'q> IntoIterator for &Variants<'q> {
    type Item = Variant;
    type IntoIter = VariantIter<'q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over variants; each stage is only computed when reached
pub struct VariantIter<'q> {
    query: &'q Query,
    max: usize,
    stage: u8,
    pending: VecDeque<Variant>,
    seen: SmallVec<[String; DEFAULT_MAX_VARIANTS]>,
}

impl Iterator for VariantIter<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        loop {
            if self.seen.len() >= self.max {
                return None;
            }

            if let Some(variant) = self.pending.pop_front() {
                let key = variant.key();
                if self.seen.contains(&key) {
                    continue;
                }
                self.seen.push(key);
                return Some(variant);
            }

            if self.stage >= STAGE_COUNT {
                return None;
            }
            self.fill_stage(self.stage);
            self.stage += 1;
        }
    }
}

impl VariantIter<'_> {
    fn fill_stage(&mut self, stage: u8) {
        let query = self.query;
        let title = query.title();
        let has_title = !normalize_text(title).is_empty();

        if stage == 0 {
            let kind = if has_title {
                VariantKind::Literal
            } else {
                VariantKind::Isbn
            };
            let mut literal = Variant::new(title, query.author(), kind);
            literal.isbn = query.isbn().map(str::to_string);
            self.pending.push_back(literal);
            return;
        }

        // An ISBN-only query has no text to rephrase
        if !has_title {
            return;
        }

        let first_last = query.author().map(author_first_last);
        let author = first_last.as_deref();

        match stage {
            1 => {
                if author.is_some() {
                    self.push(title, author, VariantKind::AuthorFirstLast);
                }
            }
            2 => {
                let without_suffix = strip_series_suffix(title);
                if without_suffix != title {
                    self.push(&without_suffix, author, VariantKind::SubtitleStripped);
                }
                let main = strip_subtitle(title);
                if main != title {
                    self.push(&main, author, VariantKind::SubtitleStripped);
                }
            }
            3 => {
                for (series_title, kind) in series_variants(title) {
                    self.push(&series_title, author, kind);
                }
            }
            4 => {
                if let Some(initials) = query.author().and_then(author_last_initial) {
                    self.push(title, Some(&initials), VariantKind::AuthorInitials);
                }
            }
            5 => {
                if author.is_some() {
                    self.push(&strip_subtitle(title), None, VariantKind::TitleOnly);
                    self.push(title, None, VariantKind::TitleOnly);
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, title: &str, author: Option<&str>, kind: VariantKind) {
        if !normalize_text(title).is_empty() {
            self.pending.push_back(Variant::new(title, author, kind));
        }
    }
}

/// Remove trailing bracketed groups and "Book N" / "#N" style suffixes
pub fn strip_series_suffix(title: &str) -> String {
    let mut current = title.trim().to_string();
    loop {
        let next = TRAILING_GROUP.replace(&current, "");
        let next = NUMBERED_SUFFIX.replace(&next, "").trim().to_string();
        if next == current || next.is_empty() {
            return current;
        }
        current = next;
    }
}

/// Main title only: series suffixes removed and anything after the first
/// subtitle separator (colon or spaced dash) dropped
pub fn strip_subtitle(title: &str) -> String {
    let base = strip_series_suffix(title);
    let main = SUBTITLE_SEPARATOR
        .split(&base)
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if main.is_empty() {
        base
    } else {
        main.to_string()
    }
}

/// Series rewrites of a title:
/// - "Core (Series, #1)" expands to "Series: Core"
/// - "Series: Core" / "Series 2: Core" collapses to "Core"
fn series_variants(title: &str) -> Vec<(String, VariantKind)> {
    let mut out = Vec::new();

    if let Some(caps) = PAREN_SERIES.captures(title) {
        let core = caps["core"].trim();
        let series = caps["series"].trim();
        if !normalize_text(core).starts_with(&normalize_text(series)) {
            out.push((format!("{series}: {core}"), VariantKind::SeriesExpanded));
        }
        out.push((core.to_string(), VariantKind::SeriesCollapsed));
    }

    let base = strip_series_suffix(title);
    if let Some(caps) = COLON_SERIES.captures(&base) {
        let series = caps["series"].trim();
        let core = caps["core"].trim();
        if series.split_whitespace().count() <= MAX_SERIES_WORDS && !core.is_empty() {
            out.push((core.to_string(), VariantKind::SeriesCollapsed));
        }
    }

    out
}

/// "Sanderson, Brandon" -> "Brandon Sanderson"; other forms are returned collapsed
pub fn author_first_last(author: &str) -> String {
    let collapsed = author.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.split_once(',') {
        Some((last, first)) if !first.trim().is_empty() => {
            format!("{} {}", first.trim(), last.trim())
        }
        Some((last, _)) => last.trim().to_string(),
        None => collapsed,
    }
}

/// "Brandon Sanderson" -> "Sanderson, B."; single-word names have no initial form
pub fn author_last_initial(author: &str) -> Option<String> {
    let first_last = author_first_last(author);
    let words: Vec<&str> = first_last.split_whitespace().collect();
    if words.len() < 2 {
        return None;
    }
    let last = words.last()?;
    let initial = words[0].chars().find(|c| c.is_alphabetic())?;
    Some(format!("{}, {}.", last, initial.to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(query: &Query) -> Vec<(String, Option<String>)> {
        Normalizer::default()
            .variants(query)
            .iter()
            .map(|v| (v.title, v.author))
            .collect()
    }

    #[test]
    fn test_literal_first() {
        let q = Query::new("Mistborn").with_author("Brandon Sanderson");
        let first = Normalizer::default().variants(&q).iter().next().unwrap();
        assert_eq!(first.kind, VariantKind::Literal);
        assert_eq!(first.title, "Mistborn");
        assert_eq!(first.author.as_deref(), Some("Brandon Sanderson"));
    }

    #[test]
    fn test_simple_query_variants() {
        let q = Query::new("Mistborn").with_author("Brandon Sanderson");
        let variants = titles(&q);
        assert_eq!(
            variants,
            vec![
                ("Mistborn".to_string(), Some("Brandon Sanderson".to_string())),
                ("Mistborn".to_string(), Some("Sanderson, B.".to_string())),
                ("Mistborn".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_author_reordered_variant() {
        let q = Query::new("Dune").with_author("Herbert, Frank");
        let variants = titles(&q);
        assert_eq!(variants[0].1.as_deref(), Some("Herbert, Frank"));
        assert_eq!(variants[1].1.as_deref(), Some("Frank Herbert"));
        assert!(variants.iter().any(|v| v.1.as_deref() == Some("Herbert, F.")));
    }

    #[test]
    fn test_series_expansion_and_stripping() {
        let q = Query::new("The Final Empire (Mistborn, #1)").with_author("Brandon Sanderson");
        let variants: Vec<String> = titles(&q).into_iter().map(|v| v.0).collect();
        assert!(variants.contains(&"The Final Empire".to_string()));
        assert!(variants.contains(&"Mistborn: The Final Empire".to_string()));
    }

    #[test]
    fn test_colon_series_collapses() {
        let q = Query::new("Mistborn: The Final Empire").with_author("Brandon Sanderson");
        let variants: Vec<String> = titles(&q).into_iter().map(|v| v.0).collect();
        assert!(variants.contains(&"Mistborn".to_string()));
        assert!(variants.contains(&"The Final Empire".to_string()));
    }

    #[test]
    fn test_variants_are_deduplicated_and_capped() {
        let q = Query::new("Alpha: Beta (Gamma Saga, Book 3)").with_author("Smith, John");
        let all: Vec<Variant> = Normalizer::new(8).variants(&q).iter().collect();
        assert!(all.len() <= 8);
        let mut keys: Vec<String> = all.iter().map(Variant::key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), all.len());

        let capped: Vec<Variant> = Normalizer::new(2).variants(&q).iter().collect();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_variants_are_restartable() {
        let q = Query::new("Mistborn: The Final Empire").with_author("Brandon Sanderson");
        let variants = Normalizer::default().variants(&q);
        let first: Vec<Variant> = variants.iter().collect();
        let second: Vec<Variant> = variants.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_isbn_only_query_has_single_variant() {
        let q = Query::by_isbn("9780765326355");
        let all: Vec<Variant> = Normalizer::default().variants(&q).iter().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, VariantKind::Isbn);
        assert_eq!(all[0].isbn.as_deref(), Some("9780765326355"));
    }

    #[test]
    fn test_only_literal_carries_isbn() {
        let q = Query::new("Mistborn")
            .with_author("Brandon Sanderson")
            .with_isbn("9780765311788");
        let all: Vec<Variant> = Normalizer::default().variants(&q).iter().collect();
        assert!(all[0].isbn.is_some());
        assert!(all[1..].iter().all(|v| v.isbn.is_none()));
    }

    #[test]
    fn test_strip_subtitle() {
        assert_eq!(strip_subtitle("Mistborn: The Final Empire"), "Mistborn");
        assert_eq!(strip_subtitle("Leviathan Wakes - The Expanse"), "Leviathan Wakes");
        assert_eq!(strip_subtitle("The Way of Kings (Book 1)"), "The Way of Kings");
        assert_eq!(strip_subtitle("Dune Messiah, Book 2"), "Dune Messiah");
        assert_eq!(strip_subtitle("Catch-22"), "Catch-22");
    }

    #[test]
    fn test_author_forms() {
        assert_eq!(author_first_last("Sanderson, Brandon"), "Brandon Sanderson");
        assert_eq!(author_first_last("Brandon  Sanderson"), "Brandon Sanderson");
        assert_eq!(author_last_initial("Brandon Sanderson").as_deref(), Some("Sanderson, B."));
        assert_eq!(author_last_initial("J. R. R. Tolkien").as_deref(), Some("Tolkien, J."));
        assert_eq!(author_last_initial("Plato"), None);
    }
}
