//! Result arbiter: picks one ASIN out of everything the sources returned.
//!
//! Candidates are grouped by ASIN. Each member is scored from its source's
//! reliability weight, its own confidence, and how closely its title/author
//! resemble the query. Exact matches (same ISBN, or same title with a
//! compatible author) win outright; otherwise the best group must clear the
//! fuzzy similarity threshold and the minimum score.

use std::collections::BTreeMap;

use strsim::normalized_levenshtein;

use super::domain::{Candidate, MatchBasis, MatchKind, SourceKind};
use crate::config::Config;
use crate::query::normalize::{author_first_last, strip_series_suffix, strip_subtitle};
use crate::query::{Query, normalize_text};

/// Share of a member's score from source weight x confidence
const SOURCE_SHARE: f32 = 0.5;

/// Share of similarity that comes from the title when both authors are known
const TITLE_SHARE: f32 = 0.75;

/// Bonus per additional distinct source agreeing on the same ASIN
const AGREEMENT_BONUS: f32 = 0.05;

/// Knobs for one arbitration
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterSettings {
    /// Source reliability weights; missing sources count as 1.0
    pub weights: BTreeMap<SourceKind, f32>,
    /// Earlier sources win ties
    pub priority: Vec<SourceKind>,
    /// `None` disables fuzzy acceptance entirely
    pub fuzzy_threshold: Option<f32>,
    pub min_score: f32,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ArbiterSettings {
    pub fn from_config(config: &Config) -> Self {
        let weights = SourceKind::ALL
            .into_iter()
            .map(|kind| (kind, config.sources.weight(kind)))
            .collect();
        Self {
            weights,
            priority: config.sources.priority.clone(),
            fuzzy_threshold: config
                .matching
                .fuzzy
                .then_some(config.matching.fuzzy_threshold),
            min_score: config.matching.min_score,
        }
    }

    fn weight(&self, kind: SourceKind) -> f32 {
        self.weights.get(&kind).copied().unwrap_or(1.0)
    }

    fn rank(&self, kind: SourceKind) -> usize {
        self.priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.priority.len())
    }
}

/// The accepted answer
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub asin: String,
    pub source: SourceKind,
    pub confidence: f32,
    pub match_kind: MatchKind,
    pub score: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(Decision),
    /// Nothing cleared the thresholds; `summary` says what came closest
    Rejected { summary: String },
}

/// Scored candidates sharing one ASIN
#[derive(Debug)]
struct Group<'c> {
    asin: &'c str,
    /// Index of the first member in discovery order
    first_seen: usize,
    members: Vec<Scored<'c>>,
}

#[derive(Debug)]
struct Scored<'c> {
    candidate: &'c Candidate,
    similarity: f32,
    score: f32,
    exact: bool,
}

impl Group<'_> {
    fn score(&self) -> f32 {
        let best = self.members.iter().map(|m| m.score).fold(0.0, f32::max);
        let mut sources: Vec<SourceKind> = self.members.iter().map(|m| m.candidate.source).collect();
        sources.sort();
        sources.dedup();
        let bonus = AGREEMENT_BONUS * sources.len().saturating_sub(1) as f32;
        (best + bonus).min(1.0)
    }

    fn similarity(&self) -> f32 {
        self.members.iter().map(|m| m.similarity).fold(0.0, f32::max)
    }

    /// Highest-scoring member, optionally restricted to exact ones
    fn best_member(&self, exact_only: bool) -> Option<&Scored<'_>> {
        self.members
            .iter()
            .filter(|m| !exact_only || m.exact)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Choose a winner from validated candidates (in discovery order)
pub fn arbitrate(query: &Query, candidates: &[Candidate], settings: &ArbiterSettings) -> Verdict {
    if candidates.is_empty() {
        return Verdict::Rejected {
            summary: "no valid candidates".to_string(),
        };
    }

    let groups = group(query, candidates, settings);

    if let Some(group) = pick(&groups, settings, |g| g.members.iter().any(|m| m.exact)) {
        if let Some(member) = group.best_member(true) {
            return Verdict::Accepted(Decision {
                asin: group.asin.to_string(),
                source: member.candidate.source,
                confidence: member.candidate.confidence,
                match_kind: MatchKind::Exact,
                score: group.score(),
                similarity: member.similarity,
            });
        }
    }

    if let Some(threshold) = settings.fuzzy_threshold {
        let eligible =
            |g: &Group<'_>| g.similarity() >= threshold && g.score() >= settings.min_score;
        if let Some(group) = pick(&groups, settings, eligible) {
            if let Some(member) = group.best_member(false) {
                let score = group.score();
                return Verdict::Accepted(Decision {
                    asin: group.asin.to_string(),
                    source: member.candidate.source,
                    confidence: score,
                    match_kind: MatchKind::Fuzzy,
                    score,
                    similarity: group.similarity(),
                });
            }
        }
    }

    let summary = match pick(&groups, settings, |_| true) {
        Some(best) => format!(
            "no candidate cleared threshold (best {} scored {:.2}, similarity {:.2}{})",
            best.asin,
            best.score(),
            best.similarity(),
            if settings.fuzzy_threshold.is_none() {
                ", fuzzy matching disabled"
            } else {
                ""
            }
        ),
        None => "no valid candidates".to_string(),
    };
    Verdict::Rejected { summary }
}

fn group<'c>(query: &Query, candidates: &'c [Candidate], settings: &ArbiterSettings) -> Vec<Group<'c>> {
    let mut groups: Vec<Group<'c>> = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        let similarity = similarity(query, candidate);
        let weighted = settings.weight(candidate.source) * candidate.confidence;
        let scored = Scored {
            candidate,
            similarity,
            score: SOURCE_SHARE * weighted + (1.0 - SOURCE_SHARE) * similarity,
            exact: is_exact(query, candidate),
        };

        match groups.iter_mut().find(|g| g.asin == candidate.asin) {
            Some(group) => group.members.push(scored),
            None => groups.push(Group {
                asin: &candidate.asin,
                first_seen: index,
                members: vec![scored],
            }),
        }
    }

    groups
}

/// Best group passing `filter`: score, then source priority, then discovery order
fn pick<'g, 'c>(
    groups: &'g [Group<'c>],
    settings: &ArbiterSettings,
    filter: impl Fn(&Group<'c>) -> bool,
) -> Option<&'g Group<'c>> {
    groups.iter().filter(|g| filter(g)).min_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then_with(|| rank_of(a, settings).cmp(&rank_of(b, settings)))
            .then_with(|| a.first_seen.cmp(&b.first_seen))
    })
}

fn rank_of(group: &Group<'_>, settings: &ArbiterSettings) -> usize {
    group
        .members
        .iter()
        .map(|m| settings.rank(m.candidate.source))
        .min()
        .unwrap_or(usize::MAX)
}

// ============================================================================
// Matching
// ============================================================================

/// Title/author similarity between the query and a candidate, in [0, 1]
pub fn similarity(query: &Query, candidate: &Candidate) -> f32 {
    if candidate.basis == MatchBasis::Isbn && query.isbn().is_some() {
        return 1.0;
    }

    let title = title_similarity(query.title(), &candidate.raw_title);
    match query.author() {
        Some(author) if !candidate.raw_author.trim().is_empty() => {
            let author = author_similarity(author, &candidate.raw_author);
            TITLE_SHARE * title + (1.0 - TITLE_SHARE) * author
        }
        _ => title,
    }
}

/// True when the candidate unambiguously answers the query
pub fn is_exact(query: &Query, candidate: &Candidate) -> bool {
    if candidate.basis == MatchBasis::Isbn && query.isbn().is_some() {
        return true;
    }

    let wanted = normalize_text(query.title());
    if wanted.is_empty() {
        return false;
    }
    let found = normalize_text(&candidate.raw_title);
    let same_title = wanted == found
        || core_title(&candidate.raw_title) == wanted
        || core_title(query.title()) == found;

    same_title && authors_compatible(query.author(), &candidate.raw_author)
}

/// Decoration may be dropped from one side only: "Mistborn" matches
/// "Mistborn: The Final Empire", but two different books of one series
/// never match through their shared series name.
fn title_similarity(wanted: &str, found: &str) -> f32 {
    let (a, b) = (normalize_text(wanted), normalize_text(found));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let full = normalized_levenshtein(&a, &b);
    let found_core = normalized_levenshtein(&a, &core_title(found));
    let wanted_core = normalized_levenshtein(&core_title(wanted), &b);
    full.max(found_core).max(wanted_core) as f32
}

fn author_similarity(wanted: &str, found: &str) -> f32 {
    let wanted = normalize_text(&author_first_last(wanted));
    author_names(found)
        .map(|name| normalized_levenshtein(&wanted, &name) as f32)
        .fold(0.0, f32::max)
}

/// Title without subtitle and series decoration
fn core_title(title: &str) -> String {
    normalize_text(&strip_subtitle(&strip_series_suffix(title)))
}

/// Normalized names from a reported author field; handles
/// "A, B" lists as well as a single "Last, First"
fn author_names(raw: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(normalize_text(&author_first_last(raw)))
        .chain(raw.split([',', ';', '&']).map(normalize_text))
        .filter(|name| !name.is_empty())
}

fn last_name(normalized: &str) -> Option<&str> {
    normalized.split_whitespace().last()
}

fn authors_compatible(wanted: Option<&str>, found: &str) -> bool {
    let Some(wanted) = wanted else {
        return true;
    };
    if found.trim().is_empty() {
        return true;
    }
    let wanted = normalize_text(&author_first_last(wanted));
    let Some(wanted_last) = last_name(&wanted) else {
        return true;
    };
    author_names(found).any(|name| last_name(&name) == Some(wanted_last))
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} ({:?}, score {:.2}, similarity {:.2})",
            self.asin, self.source, self.match_kind, self.score, self.similarity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(asin: &str, source: SourceKind, confidence: f32, title: &str, author: &str) -> Candidate {
        Candidate::new(asin, source, confidence).with_metadata(title, author)
    }

    fn mistborn() -> Query {
        Query::new("Mistborn").with_author("Brandon Sanderson")
    }

    fn accepted(verdict: Verdict) -> Decision {
        match verdict {
            Verdict::Accepted(decision) => decision,
            Verdict::Rejected { summary } => panic!("expected a decision, got: {summary}"),
        }
    }

    #[test]
    fn test_exact_title_with_subtitle() {
        let c = candidate(
            "B001QKBHG4",
            SourceKind::MarketplaceSearch,
            0.95,
            "Mistborn: The Final Empire",
            "Brandon Sanderson",
        );
        assert!(is_exact(&mistborn(), &c));

        let decision = accepted(arbitrate(&mistborn(), &[c], &ArbiterSettings::default()));
        assert_eq!(decision.asin, "B001QKBHG4");
        assert_eq!(decision.match_kind, MatchKind::Exact);
        assert_eq!(decision.confidence, 0.95);
    }

    #[test]
    fn test_sequel_in_same_series_is_not_exact() {
        let query = Query::new("Mistborn: The Final Empire").with_author("Brandon Sanderson");
        let sequel = candidate(
            "B000UZQHWI",
            SourceKind::MarketplaceSearch,
            0.95,
            "Mistborn: The Well of Ascension",
            "Brandon Sanderson",
        );
        let correct = candidate(
            "B001QKBHG4",
            SourceKind::CatalogApi,
            0.9,
            "Mistborn: The Final Empire",
            "Brandon Sanderson",
        );

        assert!(!is_exact(&query, &sequel));
        assert!(similarity(&query, &sequel) < 0.84);
        assert!(is_exact(&query, &correct));

        let decision = accepted(arbitrate(&query, &[sequel, correct], &ArbiterSettings::default()));
        assert_eq!(decision.asin, "B001QKBHG4");
        assert_eq!(decision.match_kind, MatchKind::Exact);
    }

    #[test]
    fn test_series_title_query_matches_full_title() {
        let query = Query::new("Mistborn: The Final Empire").with_author("Brandon Sanderson");
        let c = candidate("B001QKBHG4", SourceKind::CatalogApi, 0.9, "Mistborn", "Brandon Sanderson");
        assert!(is_exact(&query, &c));
    }

    #[test]
    fn test_wrong_author_is_not_exact() {
        let c = candidate("B000000001", SourceKind::CatalogApi, 0.9, "Mistborn", "Somebody Else");
        assert!(!is_exact(&mistborn(), &c));
    }

    #[test]
    fn test_isbn_basis_is_exact_for_isbn_queries() {
        let query = Query::by_isbn("9780765326355");
        let c = Candidate::new("B003P2WO5E", SourceKind::CatalogApi, 1.0).by_isbn();
        assert!(is_exact(&query, &c));
        assert_eq!(similarity(&query, &c), 1.0);

        let decision = accepted(arbitrate(&query, &[c], &ArbiterSettings::default()));
        assert_eq!(decision.source, SourceKind::CatalogApi);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_fuzzy_acceptance() {
        let query = Query::new("The Way of Kings").with_author("Brandon Sanderson");
        let c = candidate(
            "B003P2WO5E",
            SourceKind::MarketplaceSearch,
            0.9,
            "The Way of the Kings",
            "Brandon Sanderson",
        );
        assert!(!is_exact(&query, &c));

        let decision = accepted(arbitrate(&query, &[c.clone()], &ArbiterSettings::default()));
        assert_eq!(decision.match_kind, MatchKind::Fuzzy);
        assert!(decision.similarity >= 0.84);

        let strict = ArbiterSettings {
            fuzzy_threshold: None,
            ..ArbiterSettings::default()
        };
        match arbitrate(&query, &[c], &strict) {
            Verdict::Rejected { summary } => assert!(summary.contains("fuzzy matching disabled")),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_dissimilar_candidates_rejected() {
        let c = candidate(
            "B0JUNK0001",
            SourceKind::MarketplaceSearch,
            0.95,
            "A Completely Different Cookbook",
            "Chef Person",
        );
        match arbitrate(&mistborn(), &[c], &ArbiterSettings::default()) {
            Verdict::Rejected { summary } => assert!(summary.contains("B0JUNK0001")),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_exact_beats_higher_scoring_fuzzy() {
        let fuzzy = candidate(
            "B0FUZZY001",
            SourceKind::MarketplaceSearch,
            1.0,
            "Mistborne",
            "Brandon Sanderson",
        );
        let exact = candidate("B0EXACT001", SourceKind::CatalogApi, 0.6, "Mistborn", "Sanderson, Brandon");
        let decision = accepted(arbitrate(&mistborn(), &[fuzzy, exact], &ArbiterSettings::default()));
        assert_eq!(decision.asin, "B0EXACT001");
    }

    #[test]
    fn test_agreement_raises_group_score() {
        let settings = ArbiterSettings::default();
        let query = mistborn();
        let a = candidate("B001QKBHG4", SourceKind::CatalogApi, 0.8, "Mistborn", "Brandon Sanderson");
        let b = candidate("B001QKBHG4", SourceKind::BibliographicApi, 0.8, "Mistborn", "Brandon Sanderson");

        let single = accepted(arbitrate(&query, std::slice::from_ref(&a), &settings));
        let both = accepted(arbitrate(&query, &[a, b], &settings));
        assert!(both.score > single.score);
    }

    #[test]
    fn test_tie_prefers_priority_then_discovery() {
        let settings = ArbiterSettings {
            weights: BTreeMap::new(),
            ..ArbiterSettings::default()
        };
        let query = mistborn();
        let catalog = candidate("B0CATALOG1", SourceKind::CatalogApi, 0.9, "Mistborn", "Brandon Sanderson");
        let market = candidate("B0MARKET01", SourceKind::MarketplaceSearch, 0.9, "Mistborn", "Brandon Sanderson");

        let decision = accepted(arbitrate(&query, &[catalog.clone(), market.clone()], &settings));
        assert_eq!(decision.asin, "B0MARKET01");

        let same_source = candidate("B0CATALOG2", SourceKind::CatalogApi, 0.9, "Mistborn", "Brandon Sanderson");
        let decision = accepted(arbitrate(&query, &[catalog, same_source], &settings));
        assert_eq!(decision.asin, "B0CATALOG1");
    }

    #[test]
    fn test_no_candidates() {
        assert_eq!(
            arbitrate(&mistborn(), &[], &ArbiterSettings::default()),
            Verdict::Rejected {
                summary: "no valid candidates".to_string()
            }
        );
    }

    #[test]
    fn test_author_list_similarity() {
        let c = candidate(
            "B001QKBHG4",
            SourceKind::BibliographicApi,
            0.9,
            "Mistborn",
            "Brandon Sanderson, Someone Else",
        );
        assert!(similarity(&mistborn(), &c) > 0.99);
    }
}
