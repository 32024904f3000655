//! Adapter layer: convert volume records into matches
//!
//! A volume rarely carries a marketplace identifier directly. When it does
//! (an `OTHER` identifier such as `ASIN:B001QKBHG4`) we use it; otherwise the
//! volume's ISBN-13 is kept so the client can resolve it with a secondary call.

use super::dto::{Volume, VolumesResponse};
use crate::query::clean_isbn;
use crate::resolver::domain::{Candidate, MatchBasis, SourceKind};
use crate::resolver::validate::normalize_asin;

/// What one volume record tells us
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMatch {
    pub title: String,
    pub author: String,
    /// Marketplace identifier listed on the record itself
    pub asin: Option<String>,
    pub isbn13: Option<String>,
}

impl VolumeMatch {
    /// Build a candidate for `asin` carrying this volume's metadata
    pub fn to_candidate(&self, asin: &str, confidence: f32, basis: MatchBasis) -> Candidate {
        let mut candidate = Candidate::new(asin, SourceKind::BibliographicApi, confidence)
            .with_metadata(&self.title, &self.author);
        candidate.basis = basis;
        candidate
    }
}

/// Convert a volumes response, keeping record order
pub fn to_matches(response: VolumesResponse) -> Vec<VolumeMatch> {
    response.items.into_iter().map(to_match).collect()
}

fn to_match(volume: Volume) -> VolumeMatch {
    let info = volume.volume_info;

    let title = match (info.title, info.subtitle) {
        (Some(title), Some(subtitle)) => format!("{title}: {subtitle}"),
        (Some(title), None) => title,
        (None, _) => String::new(),
    };

    let mut asin = None;
    let mut isbn13 = None;
    for id in &info.industry_identifiers {
        match id.id_type.as_str() {
            "ISBN_13" if isbn13.is_none() => isbn13 = clean_isbn(&id.identifier),
            "OTHER" if asin.is_none() => {
                let value = id.identifier.trim();
                let value = value
                    .split_once(':')
                    .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("asin"))
                    .map_or(value, |(_, v)| v);
                asin = normalize_asin(value);
            }
            _ => {}
        }
    }

    VolumeMatch {
        title,
        author: info.authors.join(", "),
        asin,
        isbn13,
    }
}
