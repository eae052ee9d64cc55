//! Semantic matching of input items against a target list.
//!
//! - [`engine`] - cosine similarity, best-target selection, target dedup
//! - [`run`] - the per-run pipeline: prepare, embed, match, summarize

pub mod engine;
pub mod run;

pub use engine::{MatchResult, MatchStatus, TargetSet, cosine_similarity, match_embeddings};
pub use run::{DEFAULT_THRESHOLD, MatchReport, MatchRequest, MatchRow, MatchSummary, Matcher};
