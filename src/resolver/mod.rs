//! ASIN resolution from bibliographic data.
//!
//! Module structure:
//! - `domain`: Our internal types (never change when APIs change)
//! - `marketplace`, `bibliographic`, `catalog`: One module per external source
//! - `source`: The closed set of sources the resolver dispatches to
//! - `limiter`, `retry`: Request budgets and backoff around every source call
//! - `validate`, `arbiter`: Candidate filtering and winner selection
//! - `service`: High-level orchestration API
//!
//! Each source module has:
//! - `client.rs`: HTTP communication
//! - `adapter.rs`: Converts responses into candidates
//! - `dto.rs`: Exact API response shapes (JSON sources only)

pub mod arbiter;
pub mod bibliographic;
pub mod catalog;
pub mod domain;
pub mod limiter;
pub mod marketplace;
pub mod retry;
pub mod service;
pub mod source;
pub mod validate;

pub use arbiter::{ArbiterSettings, Decision, Verdict};
pub use domain::{
    Candidate, MatchBasis, MatchKind, Resolution, SourceError, SourceFailure, SourceKind,
    TraceEvent,
};
pub use service::{ResolveOptions, Resolver};
pub use validate::{is_valid_asin, normalize_asin};
