// 🔗 Linker - match target rows to base rows and transpose base values
//
// Pipeline per run:
//   normalize -> (optional blocking) -> score + rank -> accept -> transpose -> emit
//
// A run never fails on cell contents. Only configuration problems (unknown
// columns, bad weights, bad thresholds) are reported, and before any scoring.

use crate::config::{MatchConfig, MatchField};
use crate::dataset::{Dataset, Side};
use crate::error::{LinkageError, Result};
use crate::normalize::{digits, Normalizer};
use crate::scoring::{aggregate, score_field, FieldGate, FieldScore, ScoringStrategy};
use crate::summary::{MatchSummary, SummaryCollector};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

// Diagnostic columns appended to the annotated table
pub const COL_MATCH_KEY: &str = "MatchKey";
pub const COL_MATCH_STATUS: &str = "MatchStatus";
pub const COL_MATCHED_BASE_REF: &str = "MatchedBaseRef";
pub const COL_CONFIDENCE: &str = "Confidence";
pub const COL_SECOND_BEST_REF: &str = "SecondBestRef";
pub const COL_SECOND_BEST_CONFIDENCE: &str = "SecondBestConfidence";
pub const COL_EXACT_MATCH: &str = "ExactMatch";
pub const COL_SCORE_PREFIX: &str = "Score_";
pub const COL_POSSIBLE_MATCHES: &str = "PossibleMatches";

// ============================================================================
// REQUEST / RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub base: Dataset,
    pub target: Dataset,
    #[serde(default)]
    pub config: MatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Row position in the base dataset
    pub base_index: usize,

    /// Source row number of the base row, as shown to users
    pub base_ref: String,

    pub confidence: f64,

    /// One score per match field, in configuration order
    pub field_scores: Vec<FieldScore>,
}

impl Candidate {
    pub fn is_exact(&self) -> bool {
        !self.field_scores.is_empty() && self.field_scores.iter().all(|s| s.exact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Accepted,

    /// Candidates exist but none was accepted (under threshold, or taken in one-to-one mode)
    BelowThreshold,

    NoCandidate,
}

impl MatchStatus {
    pub fn name(&self) -> &str {
        match self {
            MatchStatus::Accepted => "accepted",
            MatchStatus::BelowThreshold => "below_threshold",
            MatchStatus::NoCandidate => "no_candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransposedValue {
    pub column: String,
    pub value: String,

    /// Target value before transposition, if it had one
    pub previous: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Row position in the target dataset
    pub target_index: usize,
    pub target_ref: String,
    pub match_key: String,
    pub status: MatchStatus,
    pub accepted: Option<Candidate>,
    pub best: Option<Candidate>,
    pub second_best: Option<Candidate>,
    pub alternates: Vec<Candidate>,
    pub transposed: Vec<TransposedValue>,
}

impl MatchResult {
    pub fn is_accepted(&self) -> bool {
        self.status == MatchStatus::Accepted
    }

    /// Accepted candidate, or the best one when nothing was accepted
    pub fn shown(&self) -> Option<&Candidate> {
        self.accepted.as_ref().or(self.best.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,

    /// SHA-256 of configuration and both inputs; equal inputs give equal fingerprints
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub results: Vec<MatchResult>,
    pub annotated: Dataset,
    pub matched: Dataset,
    pub unmatched_base: Dataset,
    pub unmatched_target: Dataset,
    pub summary: MatchSummary,
    pub run: RunInfo,
}

// ============================================================================
// LINKER
// ============================================================================

pub struct Linker {
    config: MatchConfig,
    normalizer: Normalizer,
    strategies: Vec<Vec<ScoringStrategy>>,
    weights: Vec<f64>,
    gates: Vec<FieldGate>,
}

/// Ranked candidates of one target row
struct Ranking {
    key: String,
    candidates: Vec<Candidate>,
}

impl Linker {
    pub fn new(config: MatchConfig) -> Result<Self> {
        config.validate()?;

        let strategies = config.fields.iter().map(MatchField::effective_strategies).collect();
        let weights = config.fields.iter().map(MatchField::effective_weight).collect();
        let gates = config.fields.iter().map(MatchField::gate).collect();

        Ok(Linker {
            normalizer: config.normalizer(),
            config,
            strategies,
            weights,
            gates,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn run(&self, base: &Dataset, target: &Dataset) -> Result<MatchResponse> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let config = &self.config;

        config.validate_against(base, target)?;

        info!(
            base = base.name(),
            target = target.name(),
            base_rows = base.len(),
            target_rows = target.len(),
            fields = config.fields.len(),
            threshold = config.threshold,
            "starting linkage run"
        );

        let base_columns = self.resolve_columns(base, Side::Base)?;
        let target_columns = self.resolve_columns(target, Side::Target)?;

        let base_values = self.normalize_rows(base, &base_columns);
        let target_values = self.normalize_rows(target, &target_columns);

        let buckets = self.build_buckets(&base_values);
        let all_base: Vec<usize> = (0..base.len()).collect();

        let rank_target = |t: usize| -> Ranking {
            let values = &target_values[t];
            let pool: &[usize] = match &buckets {
                Some(buckets) => buckets
                    .get(&self.blocking_key(values))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                None => &all_base,
            };

            Ranking {
                key: self.match_key(values),
                candidates: self.rank(base, &base_values, values, pool),
            }
        };

        let rankings: Vec<Ranking> = if config.parallel {
            (0..target.len()).into_par_iter().map(rank_target).collect()
        } else {
            (0..target.len()).map(rank_target).collect()
        };

        let accepted = self.accept(&rankings, base.len());

        // ----- transposition and annotation -----

        let mut collector = SummaryCollector::new(base.len(), target.len(), config.low_confidence_cutoff);
        let mut annotated = target.clone();
        let transpose_columns: Vec<(usize, usize, &str)> = config
            .transpose
            .iter()
            .filter_map(|column| {
                base.column_index(column)
                    .map(|b| (b, annotated.push_column(column), column.as_str()))
            })
            .collect();

        let mut base_used = vec![false; base.len()];
        let mut results = Vec::with_capacity(target.len());

        for (t, (ranking, accepted_rank)) in rankings.into_iter().zip(accepted).enumerate() {
            let mut result = self.build_result(target, t, ranking, accepted_rank);

            if let Some(b) = result.accepted.as_ref().map(|c| c.base_index) {
                base_used[b] = true;

                for (i, field) in config.fields.iter().enumerate() {
                    let (from, to) = (&target_values[t][i], &base_values[b][i]);
                    if from != to {
                        collector.record_difference(&field.label(), from, to);
                    }
                }

                for &(base_col, target_col, column) in &transpose_columns {
                    let value = base.rows()[b][base_col].clone();
                    let previous = annotated.rows()[t][target_col].clone();

                    collector.record_transposition(column);
                    if !previous.is_empty() && previous != value {
                        collector.record_difference(column, &previous, &value);
                    }

                    annotated.set(t, target_col, value.clone());
                    result.transposed.push(TransposedValue {
                        column: column.to_string(),
                        value,
                        previous: (!previous.is_empty()).then_some(previous),
                    });
                }
            }

            collector.record_result(&result);
            results.push(result);
        }

        self.annotate(&mut annotated, &results);

        // ----- output tables -----

        let accepted_positions: Vec<usize> = results
            .iter()
            .filter(|r| r.is_accepted())
            .map(|r| r.target_index)
            .collect();
        let unmatched_target_positions: Vec<usize> = results
            .iter()
            .filter(|r| !r.is_accepted())
            .map(|r| r.target_index)
            .collect();
        let unmatched_base_positions: Vec<usize> = base_used
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(b, _)| b)
            .collect();

        let matched = annotated.select_rows("matched", &accepted_positions);
        let unmatched_target = target.select_rows("unmatched_target", &unmatched_target_positions);
        let unmatched_base = base.select_rows("unmatched_base", &unmatched_base_positions);

        let summary = collector.finish(unmatched_base.len(), unmatched_target.len());
        let run = RunInfo {
            run_id: Uuid::new_v4(),
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            fingerprint: fingerprint(config, base, target)?,
        };

        info!(
            run_id = %run.run_id,
            matches = summary.total_matches,
            exact = summary.exact_matches,
            unmatched_target = summary.unmatched_target,
            elapsed_ms = run.elapsed_ms,
            "linkage run finished"
        );

        Ok(MatchResponse {
            results,
            annotated,
            matched,
            unmatched_base,
            unmatched_target,
            summary,
            run,
        })
    }

    // ========================================================================
    // PREPARATION
    // ========================================================================

    fn resolve_columns(&self, dataset: &Dataset, side: Side) -> Result<Vec<usize>> {
        self.config
            .fields
            .iter()
            .map(|field| {
                let column = match side {
                    Side::Base => field.column.as_str(),
                    Side::Target => field.target_column(),
                };
                dataset
                    .column_index(column)
                    .ok_or_else(|| LinkageError::UnknownColumn {
                        side,
                        column: column.to_string(),
                    })
            })
            .collect()
    }

    fn normalize_rows(&self, dataset: &Dataset, columns: &[usize]) -> Vec<Vec<String>> {
        dataset
            .records()
            .map(|record| {
                self.config
                    .fields
                    .iter()
                    .zip(columns)
                    .map(|(field, &c)| self.normalizer.normalize(field.kind, record.value(c)))
                    .collect()
            })
            .collect()
    }

    /// Key part of one normalized value: leading digits for prefix-run fields, else the value
    fn key_part(&self, field: usize, value: &str) -> String {
        if self.strategies[field].contains(&ScoringStrategy::PrefixRun) {
            self.config.prefix_run.prefix_of(&digits(value)).to_string()
        } else {
            value.to_string()
        }
    }

    pub fn match_key(&self, values: &[String]) -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| self.key_part(i, v))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Fields whose zero score vetoes the pair and is decidable from the key alone
    fn blocking_fields(&self) -> Vec<usize> {
        (0..self.config.fields.len())
            .filter(|&i| self.gates[i].rejects_zero() && self.strategies[i].iter().all(|s| s.is_blockable()))
            .collect()
    }

    fn blocking_key(&self, values: &[String]) -> String {
        self.blocking_fields()
            .into_iter()
            .map(|i| self.key_part(i, &values[i]))
            .collect::<Vec<_>>()
            .join("-")
    }

    fn build_buckets(&self, base_values: &[Vec<String>]) -> Option<HashMap<String, Vec<usize>>> {
        if !self.config.blocking {
            return None;
        }
        // a zero-confidence pair is still acceptable here, so nothing may be pruned
        if self.config.threshold <= 0.0 {
            debug!("blocking requested with threshold 0; scoring full cross product");
            return None;
        }
        if self.blocking_fields().is_empty() {
            debug!("blocking requested but no gated exact/prefix-run field; scoring full cross product");
            return None;
        }

        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (b, values) in base_values.iter().enumerate() {
            buckets.entry(self.blocking_key(values)).or_default().push(b);
        }

        debug!(buckets = buckets.len(), base_rows = base_values.len(), "built blocking buckets");
        Some(buckets)
    }

    // ========================================================================
    // SCORING AND ACCEPTANCE
    // ========================================================================

    /// Score a target against each pooled base row; highest confidence first, ties in base order
    fn rank(&self, base: &Dataset, base_values: &[Vec<String>], target: &[String], pool: &[usize]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = pool
            .iter()
            .map(|&b| {
                let field_scores: Vec<FieldScore> = target
                    .iter()
                    .zip(&base_values[b])
                    .zip(&self.strategies)
                    .map(|((t, v), strategies)| score_field(t, v, strategies, &self.config.prefix_run))
                    .collect();

                Candidate {
                    base_index: b,
                    base_ref: base_ref(base, b),
                    confidence: aggregate(&field_scores, &self.weights, &self.gates),
                    field_scores,
                }
            })
            .collect();

        // stable: equal confidences keep base input order
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let keep = if self.config.one_to_one {
            let above = candidates
                .iter()
                .take_while(|c| c.confidence >= self.config.threshold)
                .count();
            above.max(self.config.max_alternates + 2)
        } else {
            self.config.max_alternates + 2
        };
        candidates.truncate(keep);
        candidates
    }

    /// Index into each target's ranking of the accepted candidate, if any
    fn accept(&self, rankings: &[Ranking], base_len: usize) -> Vec<Option<usize>> {
        let threshold = self.config.threshold;

        if !self.config.one_to_one {
            return rankings
                .iter()
                .map(|r| match r.candidates.first() {
                    Some(best) if best.confidence >= threshold => Some(0),
                    _ => None,
                })
                .collect();
        }

        // (confidence, target, rank, base), greedily assigned best-first
        let mut pairs: Vec<(f64, usize, usize, usize)> = rankings
            .iter()
            .enumerate()
            .flat_map(|(t, r)| {
                r.candidates
                    .iter()
                    .enumerate()
                    .filter(move |(_, c)| c.confidence >= threshold)
                    .map(move |(rank, c)| (c.confidence, t, rank, c.base_index))
            })
            .collect();

        pairs.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.3.cmp(&b.3))
        });

        let mut assigned: Vec<Option<usize>> = vec![None; rankings.len()];
        let mut base_taken = vec![false; base_len];

        for (_, t, rank, b) in pairs {
            if assigned[t].is_none() && !base_taken[b] {
                assigned[t] = Some(rank);
                base_taken[b] = true;
            }
        }

        assigned
    }

    fn build_result(&self, target: &Dataset, t: usize, ranking: Ranking, accepted_rank: Option<usize>) -> MatchResult {
        let Ranking { key, candidates } = ranking;

        let status = match (accepted_rank, candidates.is_empty()) {
            (Some(_), _) => MatchStatus::Accepted,
            (None, true) => MatchStatus::NoCandidate,
            (None, false) => MatchStatus::BelowThreshold,
        };

        // second best ranks below the shown candidate; better ones taken elsewhere stay alternates
        let shown_rank = accepted_rank.unwrap_or(0);
        let second_rank = Some(shown_rank + 1).filter(|&i| i < candidates.len());

        let accepted = accepted_rank.and_then(|i| candidates.get(i).cloned());
        let best = candidates.first().cloned();
        let second_best = second_rank.and_then(|i| candidates.get(i).cloned());
        let alternates = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != shown_rank && Some(*i) != second_rank)
            .map(|(_, c)| c.clone())
            .take(self.config.max_alternates)
            .collect();

        MatchResult {
            target_index: t,
            target_ref: row_ref(target, t),
            match_key: key,
            status,
            accepted,
            best,
            second_best,
            alternates,
            transposed: Vec::new(),
        }
    }

    // ========================================================================
    // ANNOTATION
    // ========================================================================

    fn annotate(&self, annotated: &mut Dataset, results: &[MatchResult]) {
        let key_col = annotated.push_column(COL_MATCH_KEY);
        let status_col = annotated.push_column(COL_MATCH_STATUS);
        let ref_col = annotated.push_column(COL_MATCHED_BASE_REF);
        let confidence_col = annotated.push_column(COL_CONFIDENCE);
        let second_ref_col = annotated.push_column(COL_SECOND_BEST_REF);
        let second_confidence_col = annotated.push_column(COL_SECOND_BEST_CONFIDENCE);
        let exact_col = annotated.push_column(COL_EXACT_MATCH);
        let score_cols: Vec<usize> = self
            .config
            .fields
            .iter()
            .map(|f| annotated.push_column(&format!("{}{}", COL_SCORE_PREFIX, f.label())))
            .collect();
        let possible_col = annotated.push_column(COL_POSSIBLE_MATCHES);

        for result in results {
            let t = result.target_index;
            let shown = result.shown();
            let exact = result.accepted.as_ref().is_some_and(Candidate::is_exact);

            annotated.set(t, key_col, result.match_key.as_str());
            annotated.set(t, status_col, result.status.name());
            annotated.set(
                t,
                ref_col,
                result.accepted.as_ref().map(|c| c.base_ref.clone()).unwrap_or_default(),
            );
            annotated.set(t, confidence_col, shown.map(|c| format_score(c.confidence)).unwrap_or_default());
            annotated.set(
                t,
                second_ref_col,
                result.second_best.as_ref().map(|c| c.base_ref.clone()).unwrap_or_default(),
            );
            annotated.set(
                t,
                second_confidence_col,
                result
                    .second_best
                    .as_ref()
                    .map(|c| format_score(c.confidence))
                    .unwrap_or_default(),
            );
            annotated.set(t, exact_col, exact.to_string());

            for (i, &col) in score_cols.iter().enumerate() {
                let score = shown
                    .and_then(|c| c.field_scores.get(i))
                    .map(|s| format_score(s.score))
                    .unwrap_or_default();
                annotated.set(t, col, score);
            }

            let possible = result
                .second_best
                .iter()
                .chain(&result.alternates)
                .map(|c| format!("{} ({})", c.base_ref, format_score(c.confidence)))
                .collect::<Vec<_>>()
                .join("; ");
            annotated.set(t, possible_col, possible);
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Validate, then run one batch
pub fn run(request: &MatchRequest) -> Result<MatchResponse> {
    Linker::new(request.config.clone())?.run(&request.base, &request.target)
}

fn row_ref(dataset: &Dataset, position: usize) -> String {
    dataset
        .record(position)
        .map(|r| r.index())
        .unwrap_or(position)
        .to_string()
}

fn base_ref(base: &Dataset, position: usize) -> String {
    row_ref(base, position)
}

fn format_score(score: f64) -> String {
    format!("{:.2}", score)
}

fn fingerprint(config: &MatchConfig, base: &Dataset, target: &Dataset) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(config)?);
    hasher.update(serde_json::to_vec(base)?);
    hasher.update(serde_json::to_vec(target)?);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_dataset(name: &str, columns: &[&str], rows: &[&[&str]]) -> Dataset {
        Dataset::new(
            name,
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    fn create_test_base() -> Dataset {
        create_test_dataset(
            "base",
            &["ContactPhone", "Executed", "Beneficiary"],
            &[
                &["+373 69 123 456", "15.03.2023", "Ana Rusu"],
                &["+373 78 555 001", "16.03.2023", "Ion Popa"],
                &["060000111", "17.03.2023", "Maria Cebotari"],
            ],
        )
    }

    fn create_test_target() -> Dataset {
        create_test_dataset(
            "target",
            &["ContactPhone", "Executed"],
            &[
                &["069123457", "15-03-2023"],
                &["078555001", "16/03/2023"],
                &["022999888", "01.01.2023"],
            ],
        )
    }

    fn create_test_config() -> MatchConfig {
        MatchConfig::phone_and_date("ContactPhone", "Executed")
            .with_transpose(&["Beneficiary"])
            .with_threshold(80.0)
    }

    #[test]
    fn test_basic_linkage_and_transposition() {
        let linker = Linker::new(create_test_config()).unwrap();
        let response = linker.run(&create_test_base(), &create_test_target()).unwrap();

        assert_eq!(response.results.len(), 3);

        let first = &response.results[0];
        assert_eq!(first.status, MatchStatus::Accepted);
        assert_eq!(first.accepted.as_ref().unwrap().base_index, 0);
        assert_eq!(first.transposed[0].value, "Ana Rusu");
        assert_eq!(first.transposed[0].previous, None);
        assert_eq!(first.match_key, "373-2023-03-15");

        let second = &response.results[1];
        assert_eq!(second.status, MatchStatus::Accepted);
        assert!(second.accepted.as_ref().unwrap().is_exact());

        let third = &response.results[2];
        assert_eq!(third.status, MatchStatus::BelowThreshold);
        assert!(third.accepted.is_none());

        assert_eq!(response.annotated.record(0).unwrap().get("Beneficiary"), Some("Ana Rusu"));
        assert_eq!(response.annotated.record(2).unwrap().get("Beneficiary"), Some(""));
        assert_eq!(response.annotated.record(1).unwrap().get(COL_EXACT_MATCH), Some("true"));
        assert_eq!(response.annotated.record(0).unwrap().get(COL_CONFIDENCE), Some("100.00"));

        assert_eq!(response.matched.len(), 2);
        assert_eq!(response.unmatched_target.len(), 1);
        assert_eq!(response.unmatched_base.len(), 1);
        assert_eq!(response.unmatched_base.record(0).unwrap().get("Beneficiary"), Some("Maria Cebotari"));

        assert_eq!(response.summary.total_matches, 2);
        assert_eq!(response.summary.exact_matches, 1);
        assert_eq!(response.summary.transposed_values, 2);
        assert_eq!(response.summary.column_differences.get("ContactPhone"), Some(&1));
        println!("✅ {}", response.summary.summary());
    }

    #[test]
    fn test_ties_keep_first_base_row() {
        let base = create_test_dataset(
            "base",
            &["ContactPhone", "Executed"],
            &[
                &["069123456", "15.03.2023"],
                &["069123456", "15.03.2023"],
            ],
        );
        let target = create_test_dataset("target", &["ContactPhone", "Executed"], &[&["069123456", "15.03.2023"]]);

        let response = Linker::new(MatchConfig::phone_and_date("ContactPhone", "Executed"))
            .unwrap()
            .run(&base, &target)
            .unwrap();

        let result = &response.results[0];
        assert_eq!(result.accepted.as_ref().unwrap().base_index, 0);
        assert_eq!(result.second_best.as_ref().unwrap().base_index, 1);
        assert_eq!(response.annotated.record(0).unwrap().get(COL_SECOND_BEST_REF), Some("1"));
    }

    #[test]
    fn test_one_to_one_uses_each_base_row_once() {
        let base = create_test_dataset("base", &["ContactPhone", "Executed"], &[&["069123456", "15.03.2023"]]);
        let target = create_test_dataset(
            "target",
            &["ContactPhone", "Executed"],
            &[
                &["069123457", "16.03.2023"],
                &["069123456", "15.03.2023"],
            ],
        );

        let mut config = MatchConfig::phone_and_date("ContactPhone", "Executed").with_threshold(60.0);
        config.one_to_one = true;

        let response = Linker::new(config.clone()).unwrap().run(&base, &target).unwrap();
        // the 100-point target row wins the single base row even though it comes second
        assert_eq!(response.results[0].status, MatchStatus::BelowThreshold);
        assert_eq!(response.results[1].status, MatchStatus::Accepted);
        assert_eq!(response.summary.total_matches, 1);

        config.one_to_one = false;
        let response = Linker::new(config).unwrap().run(&base, &target).unwrap();
        assert_eq!(response.summary.total_matches, 2);
    }

    #[test]
    fn test_one_to_one_falls_back_to_next_free_candidate() {
        let base = create_test_dataset(
            "base",
            &["ContactPhone", "Executed"],
            &[
                &["069123456", "15.03.2023"],
                &["069123999", "15.03.2023"],
            ],
        );
        let target = create_test_dataset(
            "target",
            &["ContactPhone", "Executed"],
            &[
                &["069123456", "15.03.2023"],
                &["069123457", "15.03.2023"],
            ],
        );

        let mut config = MatchConfig::phone_and_date("ContactPhone", "Executed");
        config.one_to_one = true;

        let response = Linker::new(config).unwrap().run(&base, &target).unwrap();
        assert_eq!(response.results[0].accepted.as_ref().unwrap().base_index, 0);
        assert_eq!(response.results[1].accepted.as_ref().unwrap().base_index, 1);
        assert!(response.unmatched_base.is_empty());

        // base 0 ranked higher but went to target 0: an alternate, not the second best
        let fallback = &response.results[1];
        assert!(fallback.second_best.is_none());
        assert_eq!(fallback.alternates.len(), 1);
        assert_eq!(fallback.alternates[0].base_index, 0);
        assert_eq!(response.annotated.record(1).unwrap().get(COL_SECOND_BEST_REF), Some(""));
        assert_eq!(response.annotated.record(1).unwrap().get(COL_MATCHED_BASE_REF), Some("1"));
    }

    #[test]
    fn test_blocking_gives_same_accepted_matches() {
        let mut config = MatchConfig::new(vec![
            MatchField::phone("ContactPhone").required(),
            MatchField::date("Executed"),
        ])
        .with_transpose(&["Beneficiary"]);

        let target = create_test_dataset(
            "target",
            &["ContactPhone", "Executed"],
            &[
                &["069123457", "15-03-2023"],
                &["078555001", "16/03/2023"],
                &["+40 721 000 111", "17.03.2023"],
            ],
        );

        let plain = Linker::new(config.clone())
            .unwrap()
            .run(&create_test_base(), &target)
            .unwrap();

        config.blocking = true;
        let blocked = Linker::new(config)
            .unwrap()
            .run(&create_test_base(), &target)
            .unwrap();

        for (a, b) in plain.results.iter().zip(&blocked.results) {
            assert_eq!(a.accepted, b.accepted);
        }
        assert_eq!(blocked.summary.total_matches, 2);

        // no base phone starts with 407, so the third target has an empty bucket
        assert_eq!(plain.results[2].status, MatchStatus::BelowThreshold);
        assert_eq!(blocked.results[2].status, MatchStatus::NoCandidate);
    }

    #[test]
    fn test_blocking_disabled_at_zero_threshold() {
        let base = create_test_dataset("base", &["ContactPhone", "Executed"], &[&["069123456", "15.03.2023"]]);
        let target = create_test_dataset(
            "target",
            &["ContactPhone", "Executed"],
            &[&["+40 721 000 111", "15.03.2023"]],
        );

        let mut config = MatchConfig::new(vec![
            MatchField::phone("ContactPhone").required(),
            MatchField::date("Executed"),
        ])
        .with_threshold(0.0);

        let plain = Linker::new(config.clone()).unwrap().run(&base, &target).unwrap();

        config.blocking = true;
        let blocked = Linker::new(config).unwrap().run(&base, &target).unwrap();

        // the required phone scores 0, yet a 0 confidence still clears threshold 0
        assert_eq!(plain.results[0].status, MatchStatus::Accepted);
        assert_eq!(blocked.results[0].status, MatchStatus::Accepted);
        assert_eq!(plain.results[0].accepted, blocked.results[0].accepted);
        assert_eq!(blocked.results[0].accepted.as_ref().unwrap().confidence, 0.0);
    }

    #[test]
    fn test_min_score_field_vetoes_pair() {
        let target = create_test_dataset(
            "target",
            &["ContactPhone", "Beneficiary"],
            &[&["069123457", "Ana Rusi"]],
        );
        let config = |min_score: f64| {
            MatchConfig::new(vec![
                MatchField::phone("ContactPhone"),
                MatchField::text("Beneficiary").with_min_score(min_score),
            ])
            .with_threshold(50.0)
        };

        // "ana rusi" vs "ana rusu" is one edit in eight
        let lenient = Linker::new(config(80.0)).unwrap().run(&create_test_base(), &target).unwrap();
        assert_eq!(lenient.results[0].status, MatchStatus::Accepted);
        assert_eq!(lenient.results[0].accepted.as_ref().unwrap().base_index, 0);

        let strict = Linker::new(config(90.0)).unwrap().run(&create_test_base(), &target).unwrap();
        assert_eq!(strict.results[0].status, MatchStatus::BelowThreshold);
        assert_eq!(strict.results[0].best.as_ref().unwrap().confidence, 0.0);
    }

    #[test]
    fn test_blocking_on_min_score_field() {
        let mut config = MatchConfig::new(vec![
            MatchField::phone("ContactPhone").with_min_score(50.0),
            MatchField::date("Executed"),
        ]);

        let target = create_test_dataset(
            "target",
            &["ContactPhone", "Executed"],
            &[
                &["069123457", "15-03-2023"],
                &["+40 721 000 111", "17.03.2023"],
            ],
        );

        let plain = Linker::new(config.clone()).unwrap().run(&create_test_base(), &target).unwrap();

        config.blocking = true;
        let linker = Linker::new(config).unwrap();
        assert_eq!(linker.blocking_fields(), vec![0]);
        let blocked = linker.run(&create_test_base(), &target).unwrap();

        for (a, b) in plain.results.iter().zip(&blocked.results) {
            assert_eq!(a.accepted, b.accepted);
        }
        assert_eq!(blocked.results[0].status, MatchStatus::Accepted);
        assert_eq!(blocked.results[1].status, MatchStatus::NoCandidate);

        // a field without any gate never blocks
        let ungated = MatchConfig::new(vec![MatchField::phone("ContactPhone"), MatchField::date("Executed")]);
        assert!(Linker::new(ungated).unwrap().blocking_fields().is_empty());
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let mut config = create_test_config();
        let parallel = Linker::new(config.clone())
            .unwrap()
            .run(&create_test_base(), &create_test_target())
            .unwrap();

        config.parallel = false;
        let sequential = Linker::new(config)
            .unwrap()
            .run(&create_test_base(), &create_test_target())
            .unwrap();

        assert_eq!(parallel.results, sequential.results);
        assert_eq!(parallel.annotated, sequential.annotated);
        assert_eq!(parallel.summary, sequential.summary);
    }

    #[test]
    fn test_unknown_column_fails_before_matching() {
        let config = MatchConfig::phone_and_date("Phone", "Executed");
        let err = Linker::new(config)
            .unwrap()
            .run(&create_test_base(), &create_test_target())
            .unwrap_err();

        assert!(matches!(err, LinkageError::UnknownColumn { side: Side::Base, .. }));
    }

    #[test]
    fn test_preview_slice_keeps_row_refs() {
        let target = create_test_target().slice(1, 1);
        let response = Linker::new(create_test_config())
            .unwrap()
            .run(&create_test_base(), &target)
            .unwrap();

        assert_eq!(response.results[0].target_ref, "1");
        assert_eq!(response.results[0].accepted.as_ref().unwrap().base_ref, "1");
    }

    #[test]
    fn test_run_from_request() {
        let request = MatchRequest {
            base: create_test_base(),
            target: create_test_target(),
            config: create_test_config(),
        };

        let response = run(&request).unwrap();
        assert_eq!(response.summary.total_target_rows, 3);
        assert_eq!(response.run.fingerprint.len(), 64);
    }
}
