// Fuzzy Record Linkage - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod dataset;    // Tables + CSV I/O
pub mod normalize;  // Field Normalizer
pub mod scoring;    // Similarity Scorer
pub mod config;     // Match configuration
pub mod linker;     // Matcher / Linker
pub mod summary;    // Counters + histogram
pub mod logging;

// Re-export commonly used types
pub use error::{LinkageError, Result};
pub use dataset::{Dataset, Record, Side};
pub use normalize::{
    DateRules, FieldKind, Normalizer, PhoneRules,
    digits, is_missing, normalize_text,
};
pub use scoring::{
    FieldGate, FieldScore, LengthClass, PrefixRunRules, ScoringStrategy, MAX_SCORE,
    aggregate, prefix_run_match, score_field, soundex,
};
pub use config::{MatchConfig, MatchField};
pub use linker::{
    Candidate, Linker, MatchRequest, MatchResponse, MatchResult, MatchStatus,
    RunInfo, TransposedValue, run,
};
pub use summary::{MatchSummary, ScoreHistogram, ValueChange};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
