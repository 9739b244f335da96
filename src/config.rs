// ⚙️ Match Configuration - fields, weights, threshold and heuristic rules
// Loaded from JSON (every key optional) or built in code

use crate::dataset::{Dataset, Side};
use crate::error::{LinkageError, Result};
use crate::normalize::{DateRules, FieldKind, Normalizer, PhoneRules};
use crate::scoring::{FieldGate, PrefixRunRules, ScoringStrategy, MAX_SCORE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// MATCH FIELD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchField {
    /// Column in the base dataset
    pub column: String,

    /// Column in the target dataset when it is named differently
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,

    #[serde(default)]
    pub kind: FieldKind,

    /// Relative weight in the aggregate; defaults by kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// Strategies averaged into the field score; defaults by kind
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strategies: Vec<ScoringStrategy>,

    /// A zero score on this field rejects the pair outright
    #[serde(default)]
    pub required: bool,

    /// A score below this (0-100) on this field rejects the pair outright
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

impl MatchField {
    pub fn new(column: &str, kind: FieldKind) -> Self {
        MatchField {
            column: column.to_string(),
            target_column: None,
            kind,
            weight: None,
            strategies: Vec::new(),
            required: false,
            min_score: None,
        }
    }

    pub fn phone(column: &str) -> Self {
        Self::new(column, FieldKind::Phone)
    }

    pub fn date(column: &str) -> Self {
        Self::new(column, FieldKind::Date)
    }

    pub fn text(column: &str) -> Self {
        Self::new(column, FieldKind::Text)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_target_column(mut self, column: &str) -> Self {
        self.target_column = Some(column.to_string());
        self
    }

    pub fn with_strategies(mut self, strategies: &[ScoringStrategy]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn gate(&self) -> FieldGate {
        FieldGate {
            required: self.required,
            min_score: self.min_score,
        }
    }

    pub fn target_column(&self) -> &str {
        self.target_column.as_deref().unwrap_or(&self.column)
    }

    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(match self.kind {
            FieldKind::Phone => 0.7,
            FieldKind::Date => 0.3,
            FieldKind::Text => 0.5,
        })
    }

    pub fn effective_strategies(&self) -> Vec<ScoringStrategy> {
        if !self.strategies.is_empty() {
            return self.strategies.clone();
        }
        match self.kind {
            FieldKind::Phone => vec![ScoringStrategy::PrefixRun],
            FieldKind::Date => vec![ScoringStrategy::Exact],
            FieldKind::Text => vec![ScoringStrategy::EditDistance],
        }
    }

    /// Every strategy can be decided from a key (no fuzzy similarity involved)
    pub fn is_blockable(&self) -> bool {
        self.effective_strategies().iter().all(|s| s.is_blockable())
    }

    /// Column label used in diagnostic output
    pub fn label(&self) -> String {
        match &self.target_column {
            Some(target) if target != &self.column => format!("{}/{}", self.column, target),
            _ => self.column.clone(),
        }
    }

    /// Pair parallel base/target column lists; kinds are guessed from the base column name
    pub fn pair_lists(base: &[String], target: &[String], weights: &[f64]) -> Result<Vec<MatchField>> {
        if base.len() != target.len() {
            return Err(LinkageError::FieldCountMismatch {
                base: base.len(),
                target: target.len(),
            });
        }
        if !weights.is_empty() && weights.len() != base.len() {
            return Err(LinkageError::WeightCountMismatch {
                fields: base.len(),
                weights: weights.len(),
            });
        }

        Ok(base
            .iter()
            .zip(target)
            .enumerate()
            .map(|(i, (b, t))| {
                let mut field = MatchField::new(b, FieldKind::guess(b));
                if t != b {
                    field.target_column = Some(t.clone());
                }
                field.weight = weights.get(i).copied();
                field
            })
            .collect())
    }
}

// ============================================================================
// MATCH CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub fields: Vec<MatchField>,

    /// Base columns copied onto matched target rows
    pub transpose: Vec<String>,

    /// Minimum confidence (0-100) for a match to be accepted (default: 80)
    pub threshold: f64,

    /// Confidence below this counts as low confidence in the summary (default: 80)
    pub low_confidence_cutoff: f64,

    /// Further candidates listed after the best two (default: 5)
    pub max_alternates: usize,

    /// Each base row may be accepted by at most one target row
    pub one_to_one: bool,

    /// Score only base rows sharing the target's blocking key
    pub blocking: bool,

    /// Score target rows on the rayon pool
    pub parallel: bool,

    pub phone: PhoneRules,
    pub date: DateRules,
    pub prefix_run: PrefixRunRules,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            fields: Vec::new(),
            transpose: Vec::new(),
            threshold: 80.0,
            low_confidence_cutoff: 80.0,
            max_alternates: 5,
            one_to_one: false,
            blocking: false,
            parallel: true,
            phone: PhoneRules::default(),
            date: DateRules::default(),
            prefix_run: PrefixRunRules::default(),
        }
    }
}

impl MatchConfig {
    pub fn new(fields: Vec<MatchField>) -> Self {
        MatchConfig {
            fields,
            ..Default::default()
        }
    }

    /// Phone + date pair, the most common shape of a linkage job
    pub fn phone_and_date(phone_column: &str, date_column: &str) -> Self {
        Self::new(vec![MatchField::phone(phone_column), MatchField::date(date_column)])
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_transpose(mut self, columns: &[&str]) -> Self {
        self.transpose = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.phone.clone(), self.date.clone())
    }

    /// Checks that need no data: fields, weights, threshold and rule sets
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(LinkageError::NoMatchFields);
        }

        let mut total_weight = 0.0;
        for field in &self.fields {
            let weight = field.effective_weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(LinkageError::InvalidWeight {
                    field: field.label(),
                    weight,
                });
            }
            total_weight += weight;

            if let Some(min_score) = field.min_score {
                if !min_score.is_finite() || !(0.0..=MAX_SCORE).contains(&min_score) {
                    return Err(LinkageError::InvalidMinScore {
                        field: field.label(),
                        min_score,
                    });
                }
            }
        }
        if total_weight <= 0.0 {
            return Err(LinkageError::ZeroTotalWeight);
        }

        for value in [self.threshold, self.low_confidence_cutoff] {
            if !value.is_finite() || !(0.0..=MAX_SCORE).contains(&value) {
                return Err(LinkageError::InvalidThreshold(value));
            }
        }

        self.phone.validate()?;
        self.prefix_run.validate()?;
        Ok(())
    }

    /// Checks every configured column against the two schemas.
    /// Transposed columns must exist in the base; the target gains them if missing.
    pub fn validate_against(&self, base: &Dataset, target: &Dataset) -> Result<()> {
        for field in &self.fields {
            if !base.has_column(&field.column) {
                return Err(LinkageError::UnknownColumn {
                    side: Side::Base,
                    column: field.column.clone(),
                });
            }
            if !target.has_column(field.target_column()) {
                return Err(LinkageError::UnknownColumn {
                    side: Side::Target,
                    column: field.target_column().to_string(),
                });
            }
        }

        if let Some(column) = self.transpose.iter().find(|c| !base.has_column(c)) {
            return Err(LinkageError::UnknownColumn {
                side: Side::Base,
                column: column.clone(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn create_test_dataset(columns: &[&str]) -> Dataset {
        Dataset::new("t", columns.iter().map(|c| c.to_string()).collect(), Vec::new())
    }

    #[test]
    fn test_defaults_by_kind() {
        let phone = MatchField::phone("ContactPhone");
        assert_eq!(phone.effective_weight(), 0.7);
        assert_eq!(phone.effective_strategies(), vec![ScoringStrategy::PrefixRun]);
        assert!(phone.is_blockable());

        let text = MatchField::text("Name").with_weight(2.0);
        assert_eq!(text.effective_weight(), 2.0);
        assert!(!text.is_blockable());
    }

    #[test]
    fn test_pair_lists() {
        let base = vec!["ContactPhone".to_string(), "Executed".to_string()];
        let target = vec!["Phone".to_string(), "Executed".to_string()];

        let fields = MatchField::pair_lists(&base, &target, &[]).unwrap();
        assert_eq!(fields[0].kind, FieldKind::Phone);
        assert_eq!(fields[0].target_column(), "Phone");
        assert_eq!(fields[1].kind, FieldKind::Date);
        assert_eq!(fields[1].target_column, None);

        let err = MatchField::pair_lists(&base, &target[..1], &[]).unwrap_err();
        assert!(matches!(err, LinkageError::FieldCountMismatch { base: 2, target: 1 }));

        let err = MatchField::pair_lists(&base, &target, &[1.0]).unwrap_err();
        assert!(matches!(err, LinkageError::WeightCountMismatch { fields: 2, weights: 1 }));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(matches!(
            MatchConfig::default().validate(),
            Err(LinkageError::NoMatchFields)
        ));

        let config = MatchConfig::phone_and_date("ContactPhone", "Executed");
        assert!(config.validate().is_ok());

        let config = MatchConfig::phone_and_date("ContactPhone", "Executed").with_threshold(101.0);
        assert!(matches!(config.validate(), Err(LinkageError::InvalidThreshold(_))));

        let config = MatchConfig::new(vec![MatchField::phone("p").with_weight(-1.0)]);
        assert!(matches!(config.validate(), Err(LinkageError::InvalidWeight { .. })));

        let config = MatchConfig::new(vec![
            MatchField::phone("p").with_weight(0.0),
            MatchField::date("d").with_weight(0.0),
        ]);
        assert!(matches!(config.validate(), Err(LinkageError::ZeroTotalWeight)));

        let config = MatchConfig::new(vec![MatchField::date("d").with_min_score(120.0)]);
        assert!(matches!(
            config.validate(),
            Err(LinkageError::InvalidMinScore { min_score, .. }) if min_score == 120.0
        ));
    }

    #[test]
    fn test_field_gate_from_settings() {
        let field = MatchField::date("Executed");
        assert_eq!(field.gate(), FieldGate::default());
        assert!(!field.gate().rejects_zero());

        let field = MatchField::phone("ContactPhone").with_min_score(50.0);
        assert_eq!(field.gate().min_score, Some(50.0));
        assert!(field.gate().rejects_zero());
        assert!(field.gate().passes(50.0));
        assert!(!field.gate().passes(49.9));
    }

    #[test]
    fn test_validate_against_schemas() {
        let base = create_test_dataset(&["ContactPhone", "Executed", "Beneficiary"]);
        let target = create_test_dataset(&["Phone", "Executed"]);

        let config = MatchConfig::new(vec![
            MatchField::phone("ContactPhone").with_target_column("Phone"),
            MatchField::date("Executed"),
        ])
        .with_transpose(&["Beneficiary"]);
        assert!(config.validate_against(&base, &target).is_ok());

        let config = MatchConfig::phone_and_date("ContactPhone", "Executed");
        let err = config.validate_against(&base, &target).unwrap_err();
        assert!(matches!(err, LinkageError::UnknownColumn { side: Side::Target, .. }));

        let config = MatchConfig::phone_and_date("ContactPhone", "Executed").with_transpose(&["Missing"]);
        let config = MatchConfig {
            fields: vec![MatchField::date("Executed")],
            ..config
        };
        let err = config.validate_against(&base, &target).unwrap_err();
        assert!(matches!(err, LinkageError::UnknownColumn { side: Side::Base, .. }));
    }

    #[test]
    fn test_from_json_partial_config() {
        let json = r#"{
            "fields": [
                { "column": "ContactPhone", "kind": "phone", "required": true },
                { "column": "Executed", "kind": "date", "weight": 0.5, "min_score": 100 }
            ],
            "transpose": ["Beneficiary"],
            "threshold": 70,
            "prefix_run": { "long_run": 5 }
        }"#;

        let config = MatchConfig::from_json_str(json).unwrap();
        assert_eq!(config.fields.len(), 2);
        assert!(config.fields[0].required);
        assert_eq!(config.fields[1].effective_weight(), 0.5);
        assert_eq!(config.fields[1].min_score, Some(100.0));
        assert_eq!(config.fields[0].min_score, None);
        assert_eq!(config.threshold, 70.0);
        assert_eq!(config.prefix_run.long_run, 5);
        assert_eq!(config.prefix_run.prefix_len, 3);
        assert_eq!(config.phone.country_code, "373");
        assert!(config.parallel);
    }

    #[test]
    fn test_from_file() {
        let config = MatchConfig::phone_and_date("ContactPhone", "Executed");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = MatchConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);

        assert!(MatchConfig::from_file("/nonexistent/config.json").is_err());
    }
}
