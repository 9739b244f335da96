// 🎯 Similarity Scorer - per-field scores and aggregate confidence
// Four strategies: Exact, Prefix + Run, Phonetic, Edit Distance
//
// All scores live on a 0-100 scale, the same scale as the acceptance threshold.

use crate::error::{LinkageError, Result};
use crate::normalize::digits;
use serde::{Deserialize, Serialize};

/// Highest score a field or a candidate can reach
pub const MAX_SCORE: f64 = 100.0;

// ============================================================================
// SCORING STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Equal after normalization
    Exact,

    /// Same leading digits plus a shared run of consecutive digits in the remainder
    PrefixRun,

    /// Soundex code similarity
    Phonetic,

    /// Normalized Levenshtein similarity
    EditDistance,
}

impl ScoringStrategy {
    pub fn name(&self) -> &str {
        match self {
            ScoringStrategy::Exact => "exact",
            ScoringStrategy::PrefixRun => "prefix_run",
            ScoringStrategy::Phonetic => "phonetic",
            ScoringStrategy::EditDistance => "edit_distance",
        }
    }

    /// Score two normalized values; empty on either side scores 0
    pub fn score(&self, a: &str, b: &str, rules: &PrefixRunRules) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let score = match self {
            ScoringStrategy::Exact => exact_score(a, b),
            ScoringStrategy::PrefixRun => {
                if prefix_run_match(a, b, rules) {
                    MAX_SCORE
                } else {
                    0.0
                }
            }
            ScoringStrategy::Phonetic => phonetic_score(a, b),
            ScoringStrategy::EditDistance => edit_distance_score(a, b),
        };

        sanitize(score)
    }

    /// Strategies whose zero score can be predicted from a key, so pairs can be bucketed
    pub fn is_blockable(&self) -> bool {
        matches!(self, ScoringStrategy::Exact | ScoringStrategy::PrefixRun)
    }
}

// ============================================================================
// PREFIX + RUN RULES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthClass {
    Short,
    Intermediate,
    Long,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixRunRules {
    /// Leading digits that must agree exactly (default: 3)
    pub prefix_len: usize,

    /// Consecutive digits required for short values, e.g. dates (default: 2)
    pub short_run: usize,

    /// Consecutive digits required for long values, e.g. full phone numbers (default: 4)
    pub long_run: usize,

    /// Digit counts below this are short (default: 10)
    pub short_below: usize,

    /// Digit counts at or above this are long (default: 10)
    pub long_from: usize,
}

impl Default for PrefixRunRules {
    fn default() -> Self {
        PrefixRunRules {
            prefix_len: 3,
            short_run: 2,
            long_run: 4,
            short_below: 10,
            long_from: 10,
        }
    }
}

impl PrefixRunRules {
    pub fn validate(&self) -> Result<()> {
        if self.prefix_len == 0 || self.short_run == 0 || self.long_run == 0 {
            return Err(LinkageError::InvalidPrefixRules(
                "prefix and run lengths must be greater than zero".to_string(),
            ));
        }
        if self.short_below > self.long_from {
            return Err(LinkageError::InvalidPrefixRules(format!(
                "short_below ({}) must not exceed long_from ({})",
                self.short_below, self.long_from
            )));
        }
        Ok(())
    }

    pub fn length_class(&self, len: usize) -> LengthClass {
        if len < self.short_below {
            LengthClass::Short
        } else if len >= self.long_from {
            LengthClass::Long
        } else {
            LengthClass::Intermediate
        }
    }

    /// Leading digits used as the bucketing part of a MatchKey
    pub fn prefix_of<'a>(&self, value_digits: &'a str) -> &'a str {
        let end = self.prefix_len.min(value_digits.len());
        &value_digits[..end]
    }
}

// ============================================================================
// STRATEGY IMPLEMENTATIONS
// ============================================================================

pub fn exact_score(a: &str, b: &str) -> f64 {
    if !a.is_empty() && a == b {
        MAX_SCORE
    } else {
        0.0
    }
}

/// First `prefix_len` digits equal, same length class, and a shared run of
/// N digits after the prefix (N = short_run or long_run by class)
pub fn prefix_run_match(a: &str, b: &str, rules: &PrefixRunRules) -> bool {
    let a = digits(a);
    let b = digits(b);

    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let p = rules.prefix_len;
    if a.len() < p || b.len() < p || a[..p] != b[..p] {
        return false;
    }

    let run = match (rules.length_class(a.len()), rules.length_class(b.len())) {
        (LengthClass::Short, LengthClass::Short) => rules.short_run,
        (LengthClass::Long, LengthClass::Long) => rules.long_run,
        _ => return false,
    };

    has_common_run(&a.as_bytes()[p..], &b.as_bytes()[p..], run)
}

/// True when some window of `run` bytes in `a` also occurs in `b`
pub fn has_common_run(a: &[u8], b: &[u8], run: usize) -> bool {
    if run == 0 {
        return true;
    }
    if a.len() < run || b.len() < run {
        return false;
    }

    a.windows(run).any(|w| b.windows(run).any(|v| v == w))
}

/// 4-character Soundex-style code: first character kept, then letter codes
/// with repeats of the previous code dropped, padded with '0'
pub fn soundex(value: &str) -> String {
    let upper = value.trim().to_uppercase();
    let mut chars = upper.chars();

    let first = match chars.next() {
        Some(c) => c,
        None => return String::new(),
    };

    let mut code = String::with_capacity(4);
    code.push(first);
    let mut last = first;

    for c in chars {
        let digit = match c {
            'B' | 'F' | 'P' | 'V' => '1',
            'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => '2',
            'D' | 'T' => '3',
            'L' => '4',
            'M' | 'N' => '5',
            'R' => '6',
            _ => continue,
        };

        if digit != last {
            code.push(digit);
            last = digit;
        }
        if code.chars().count() == 4 {
            break;
        }
    }

    while code.chars().count() < 4 {
        code.push('0');
    }
    code
}

pub fn phonetic_score(a: &str, b: &str) -> f64 {
    let code_a = soundex(a);
    let code_b = soundex(b);

    if code_a.is_empty() || code_b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&code_a, &code_b) * MAX_SCORE
}

pub fn edit_distance_score(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b) * MAX_SCORE
}

/// Clamp to [0, 100]; NaN and infinities degrade to 0
pub fn sanitize(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, MAX_SCORE)
    } else {
        0.0
    }
}

// ============================================================================
// FIELD AND AGGREGATE SCORES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldScore {
    pub score: f64,

    /// Normalized values were identical and non-empty
    pub exact: bool,
}

impl FieldScore {
    pub fn zero() -> Self {
        FieldScore {
            score: 0.0,
            exact: false,
        }
    }
}

/// Score one field: identical values reach the maximum, otherwise the mean of the strategies
pub fn score_field(
    a: &str,
    b: &str,
    strategies: &[ScoringStrategy],
    rules: &PrefixRunRules,
) -> FieldScore {
    if a.is_empty() || b.is_empty() {
        return FieldScore::zero();
    }
    if a == b {
        return FieldScore {
            score: MAX_SCORE,
            exact: true,
        };
    }
    if strategies.is_empty() {
        return FieldScore::zero();
    }

    let total: f64 = strategies.iter().map(|s| s.score(a, b, rules)).sum();
    FieldScore {
        score: sanitize(total / strategies.len() as f64),
        exact: false,
    }
}

/// Per-field veto applied before weighting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldGate {
    /// A score of 0 zeroes the pair
    pub required: bool,

    /// A score below this zeroes the pair
    pub min_score: Option<f64>,
}

impl FieldGate {
    pub fn passes(&self, score: f64) -> bool {
        if self.required && score <= 0.0 {
            return false;
        }
        self.min_score.map_or(true, |min| score >= min)
    }

    /// True when a field scoring 0 vetoes the pair
    pub fn rejects_zero(&self) -> bool {
        !self.passes(0.0)
    }
}

/// Weighted mean of field scores; any field failing its gate zeroes the whole pair
pub fn aggregate(scores: &[FieldScore], weights: &[f64], gates: &[FieldGate]) -> f64 {
    let gated = scores
        .iter()
        .zip(gates)
        .any(|(s, gate)| !gate.passes(s.score));
    if gated {
        return 0.0;
    }

    let (weighted, total_weight) = scores
        .iter()
        .zip(weights)
        .fold((0.0, 0.0), |(acc, tw), (s, &w)| (acc + s.score * w, tw + w));

    if total_weight <= 0.0 {
        return 0.0;
    }
    sanitize(weighted / total_weight)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_run_long_values() {
        let rules = PrefixRunRules::default();

        // one digit typo at the end, "6912" shared after the prefix
        assert!(prefix_run_match("37369123456", "37369123457", &rules));

        // prefix differs
        assert!(!prefix_run_match("37369123456", "37469123456", &rules));

        // same prefix, no 4-digit run in common
        assert!(!prefix_run_match("37369123456", "37378787878", &rules));
    }

    #[test]
    fn test_prefix_run_short_values_need_two_digits() {
        let rules = PrefixRunRules::default();

        assert!(prefix_run_match("2023-03-15", "2023-03-16", &rules));
        assert!(!prefix_run_match("2023-03-15", "2029-09-09", &rules));
    }

    #[test]
    fn test_prefix_run_length_classes_must_agree() {
        let rules = PrefixRunRules::default();

        // 11 digits vs 8 digits: long vs short
        assert!(!prefix_run_match("37369123456", "37369123", &rules));

        let gapped = PrefixRunRules {
            short_below: 9,
            long_from: 10,
            ..Default::default()
        };
        assert_eq!(gapped.length_class(9), LengthClass::Intermediate);
        assert!(!prefix_run_match("373691234", "373691235", &gapped));
    }

    #[test]
    fn test_prefix_run_identical_short_values() {
        let rules = PrefixRunRules::default();
        assert!(prefix_run_match("12", "12", &rules));
        assert!(!prefix_run_match("12", "13", &rules));
        assert!(!prefix_run_match("", "", &rules));
    }

    #[test]
    fn test_prefix_rules_validation() {
        assert!(PrefixRunRules::default().validate().is_ok());

        let inverted = PrefixRunRules {
            short_below: 12,
            long_from: 10,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero = PrefixRunRules {
            prefix_len: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_has_common_run() {
        assert!(has_common_run(b"69123456", b"00012300", 3));
        assert!(!has_common_run(b"69123456", b"00000000", 2));
        assert!(!has_common_run(b"1", b"1", 2));
    }

    #[test]
    fn test_soundex_codes() {
        assert_eq!(soundex("Robert"), "R163");
        assert_eq!(soundex("Rupert"), "R163");
        assert_eq!(soundex("Ana"), "A500");
        assert_eq!(soundex("37369123456"), "3000");
        assert_eq!(soundex(""), "");
    }

    #[test]
    fn test_phonetic_and_edit_distance() {
        assert_eq!(phonetic_score("Robert", "Rupert"), 100.0);
        assert!(phonetic_score("Robert", "Anna") < 100.0);

        assert_eq!(edit_distance_score("abcd", "abcd"), 100.0);
        assert_eq!(edit_distance_score("abcd", "abce"), 75.0);
        assert_eq!(edit_distance_score("", "abce"), 0.0);
    }

    #[test]
    fn test_score_field_exact_short_circuit() {
        let rules = PrefixRunRules::default();

        let score = score_field("2023-03-15", "2023-03-15", &[ScoringStrategy::Exact], &rules);
        assert_eq!(score.score, MAX_SCORE);
        assert!(score.exact);

        let empty = score_field("", "2023-03-15", &[ScoringStrategy::Exact], &rules);
        assert_eq!(empty.score, 0.0);
        assert!(!empty.exact);
    }

    #[test]
    fn test_score_field_averages_strategies() {
        let rules = PrefixRunRules::default();
        let strategies = [ScoringStrategy::PrefixRun, ScoringStrategy::EditDistance];

        let score = score_field("37369123456", "37369123457", &strategies, &rules);

        // prefix-run hit (100) averaged with 10/11 edit similarity
        let expected = (100.0 + (10.0 / 11.0) * 100.0) / 2.0;
        assert!((score.score - expected).abs() < 1e-9);
        assert!(!score.exact);
    }

    #[test]
    fn test_aggregate_weights() {
        let scores = [
            FieldScore { score: 100.0, exact: false },
            FieldScore { score: 0.0, exact: false },
        ];

        let open = [FieldGate::default(); 2];
        let confidence = aggregate(&scores, &[0.7, 0.3], &open);
        assert!((confidence - 70.0).abs() < 1e-9);

        // weights need not sum to 1
        let confidence = aggregate(&scores, &[7.0, 3.0], &open);
        assert!((confidence - 70.0).abs() < 1e-9);

        // required date field failing zeroes the pair
        let required_date = [
            FieldGate::default(),
            FieldGate { required: true, min_score: None },
        ];
        assert_eq!(aggregate(&scores, &[0.7, 0.3], &required_date), 0.0);

        assert_eq!(aggregate(&scores, &[0.0, 0.0], &open), 0.0);
    }

    #[test]
    fn test_min_score_gate_zeroes_weak_field() {
        let scores = [
            FieldScore { score: 100.0, exact: true },
            FieldScore { score: 60.0, exact: false },
        ];
        let gate = |min: f64| [FieldGate::default(), FieldGate { required: false, min_score: Some(min) }];

        // 0.7 * 100 + 0.3 * 60 = 88 without a minimum
        let confidence = aggregate(&scores, &[0.7, 0.3], &gate(60.0));
        assert!((confidence - 88.0).abs() < 1e-9);

        assert_eq!(aggregate(&scores, &[0.7, 0.3], &gate(75.0)), 0.0);

        assert!(gate(75.0)[1].rejects_zero());
        assert!(!gate(0.0)[1].rejects_zero());
        assert!(!FieldGate::default().rejects_zero());
        assert!(FieldGate { required: true, min_score: None }.rejects_zero());
        println!("✅ min_score gate vetoes a 60 against a minimum of 75");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(140.0), 100.0);
        assert_eq!(sanitize(-3.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_different_prefix_never_matches(
            a in "[0-9]{3,14}",
            b in "[0-9]{3,14}",
        ) {
            prop_assume!(a[..3] != b[..3]);
            let rules = PrefixRunRules::default();
            prop_assert!(!prefix_run_match(&a, &b, &rules));
            prop_assert_eq!(ScoringStrategy::PrefixRun.score(&a, &b, &rules), 0.0);
        }

        #[test]
        fn prop_identical_values_score_max(value in "[0-9]{1,14}") {
            let rules = PrefixRunRules::default();
            let field = score_field(&value, &value, &[ScoringStrategy::PrefixRun], &rules);
            prop_assert_eq!(field.score, MAX_SCORE);
            prop_assert_eq!(aggregate(&[field], &[0.7], &[FieldGate::default()]), MAX_SCORE);
        }
    }
}
