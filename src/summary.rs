// 📊 Match Summary - counters, score histogram and value-change tallies
//
// Built incrementally by the linker through `SummaryCollector`, one target row at a time.

use crate::dataset::Dataset;
use crate::linker::{MatchResult, MatchStatus};
use crate::scoring::MAX_SCORE;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Value changes kept in the summary, most frequent first
pub const MAX_VALUE_CHANGES: usize = 20;

// ============================================================================
// SCORE HISTOGRAM
// ============================================================================

/// Ten-point buckets: 0-9, 10-19, ... 90-99, and 100 on its own
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreHistogram {
    pub buckets: [usize; 11],
}

impl ScoreHistogram {
    pub fn bucket_of(score: f64) -> usize {
        if !score.is_finite() || score <= 0.0 {
            return 0;
        }
        ((score.min(MAX_SCORE) / 10.0).floor() as usize).min(10)
    }

    pub fn record(&mut self, score: f64) {
        self.buckets[Self::bucket_of(score)] += 1;
    }

    pub fn label(bucket: usize) -> String {
        if bucket >= 10 {
            "100".to_string()
        } else {
            format!("{}-{}", bucket * 10, bucket * 10 + 9)
        }
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().sum()
    }

    /// Non-empty buckets as (label, count)
    pub fn entries(&self) -> Vec<(String, usize)> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, &count)| (Self::label(i), count))
            .collect()
    }
}

// ============================================================================
// VALUE CHANGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    pub column: String,
    pub from: String,
    pub to: String,
    pub count: usize,
}

// ============================================================================
// MATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub total_base_rows: usize,
    pub total_target_rows: usize,

    /// Accepted matches
    pub total_matches: usize,

    /// Accepted matches whose every field was identical after normalization
    pub exact_matches: usize,

    /// Best candidates scoring in [low_confidence_cutoff, 100)
    pub possible_matches: usize,

    /// Best candidates scoring below the low-confidence cutoff
    pub low_confidence_matches: usize,

    pub below_threshold: usize,
    pub no_candidate: usize,

    pub unmatched_base: usize,
    pub unmatched_target: usize,

    pub histogram: ScoreHistogram,

    pub transposed_values: usize,
    pub transposition_counts: BTreeMap<String, usize>,

    /// Per column: matched pairs whose values disagreed
    pub column_differences: BTreeMap<String, usize>,

    pub value_changes: Vec<ValueChange>,
}

impl MatchSummary {
    /// Share of target rows with an accepted match (0.0 - 1.0)
    pub fn match_rate(&self) -> f64 {
        if self.total_target_rows == 0 {
            0.0
        } else {
            self.total_matches as f64 / self.total_target_rows as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Linked {} of {} target rows ({:.1}%) against {} base rows: {} exact, {} possible, {} low confidence, {} values transposed",
            self.total_matches,
            self.total_target_rows,
            self.match_rate() * 100.0,
            self.total_base_rows,
            self.exact_matches,
            self.possible_matches,
            self.low_confidence_matches,
            self.transposed_values
        )
    }

    /// Metric,Value table for CSV download
    pub fn to_dataset(&self) -> Dataset {
        let mut rows: Vec<(String, String)> = vec![
            ("Total Base Rows".into(), self.total_base_rows.to_string()),
            ("Total Target Rows".into(), self.total_target_rows.to_string()),
            ("Total Matches".into(), self.total_matches.to_string()),
            ("Exact Matches".into(), self.exact_matches.to_string()),
            ("Possible Matches".into(), self.possible_matches.to_string()),
            ("Low Confidence Matches".into(), self.low_confidence_matches.to_string()),
            ("Below Threshold".into(), self.below_threshold.to_string()),
            ("No Candidate".into(), self.no_candidate.to_string()),
            ("Unmatched Base Rows".into(), self.unmatched_base.to_string()),
            ("Unmatched Target Rows".into(), self.unmatched_target.to_string()),
            ("Match Rate".into(), format!("{:.4}", self.match_rate())),
            ("Values Transposed".into(), self.transposed_values.to_string()),
        ];

        for (i, count) in self.histogram.buckets.iter().enumerate() {
            rows.push((format!("Score {}", ScoreHistogram::label(i)), count.to_string()));
        }
        for (column, count) in &self.transposition_counts {
            rows.push((format!("Transposed {}", column), count.to_string()));
        }
        for (column, count) in &self.column_differences {
            rows.push((format!("Differences {}", column), count.to_string()));
        }
        for change in &self.value_changes {
            rows.push((
                format!("Change {}: '{}' -> '{}'", change.column, change.from, change.to),
                change.count.to_string(),
            ));
        }

        Dataset::new(
            "summary",
            vec!["Metric".to_string(), "Value".to_string()],
            rows.into_iter().map(|(m, v)| vec![m, v]).collect(),
        )
    }
}

// ============================================================================
// COLLECTOR
// ============================================================================

pub struct SummaryCollector {
    summary: MatchSummary,
    low_confidence_cutoff: f64,
    changes: HashMap<(String, String, String), usize>,
}

impl SummaryCollector {
    pub fn new(total_base_rows: usize, total_target_rows: usize, low_confidence_cutoff: f64) -> Self {
        SummaryCollector {
            summary: MatchSummary {
                total_base_rows,
                total_target_rows,
                ..Default::default()
            },
            low_confidence_cutoff,
            changes: HashMap::new(),
        }
    }

    /// Count one target row's outcome
    pub fn record_result(&mut self, result: &MatchResult) {
        match result.status {
            MatchStatus::Accepted => self.summary.total_matches += 1,
            MatchStatus::BelowThreshold => self.summary.below_threshold += 1,
            MatchStatus::NoCandidate => self.summary.no_candidate += 1,
        }

        if let Some(accepted) = &result.accepted {
            if accepted.is_exact() {
                self.summary.exact_matches += 1;
            }
        }

        if let Some(shown) = result.shown() {
            let confidence = shown.confidence;
            self.summary.histogram.record(confidence);

            if confidence < self.low_confidence_cutoff {
                self.summary.low_confidence_matches += 1;
            } else if confidence < MAX_SCORE {
                self.summary.possible_matches += 1;
            }
        }
    }

    pub fn record_transposition(&mut self, column: &str) {
        self.summary.transposed_values += 1;
        *self
            .summary
            .transposition_counts
            .entry(column.to_string())
            .or_insert(0) += 1;
    }

    /// A matched pair disagreed on `column`: target had `from`, base had `to`
    pub fn record_difference(&mut self, column: &str, from: &str, to: &str) {
        *self
            .summary
            .column_differences
            .entry(column.to_string())
            .or_insert(0) += 1;
        *self
            .changes
            .entry((column.to_string(), from.to_string(), to.to_string()))
            .or_insert(0) += 1;
    }

    pub fn finish(mut self, unmatched_base: usize, unmatched_target: usize) -> MatchSummary {
        self.summary.unmatched_base = unmatched_base;
        self.summary.unmatched_target = unmatched_target;

        let mut changes: Vec<ValueChange> = self
            .changes
            .into_iter()
            .map(|((column, from, to), count)| ValueChange {
                column,
                from,
                to,
                count,
            })
            .collect();

        changes.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.column.cmp(&b.column))
                .then_with(|| a.from.cmp(&b.from))
                .then_with(|| a.to.cmp(&b.to))
        });
        changes.truncate(MAX_VALUE_CHANGES);

        self.summary.value_changes = changes;
        self.summary
    }
}

// ============================================================================
// TESTS
// ============================================================================
